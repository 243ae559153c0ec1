//! Connection Management
//!
//! Pool tuning, readiness probing and the retry policy used while opening.

pub mod pool;
pub mod retry;

pub use pool::*;
pub use retry::RetryPolicy;
