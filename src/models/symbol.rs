use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading constraints of a tracked instrument, as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub min_leverage: Decimal,
    pub max_leverage: Decimal,
    pub leverage_step: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub tick_size: Decimal,
    pub min_order_qty: Decimal,
    pub max_order_qty: Decimal,
    pub qty_step: Decimal,
}
