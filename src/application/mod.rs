// Application layer: request validation and the operation contracts
// the outer surfaces (CLI, HTTP handlers) call into.

mod service;

pub use crate::error::LedgerError;
pub use service::*;
