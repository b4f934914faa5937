//! Domain models for the ledger engine

mod bank;
mod ordering;
mod sale;
mod stock;

pub use bank::*;
pub use ordering::*;
pub use sale::*;
pub use stock::*;
