//! Core application primitives (scheduler, fan-out, wiring)

pub mod fanout;
pub mod http;
pub mod runtime;
pub mod scheduler;

pub use fanout::*;
pub use http::*;
pub use runtime::*;
pub use scheduler::*;
