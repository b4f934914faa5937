//! Shared types and pure ledger computations for the retail ledger engine
//!
//! Everything in this crate is database-free and deterministic: the event
//! model, the ordered replays that regenerate derived rows, weighted-average
//! valuation, drift comparison and the sale payment guard.

pub mod digest;
pub mod drift;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod models;
pub mod types;
pub mod validation;
pub mod valuation;

pub use drift::*;
pub use error::*;
pub use guard::*;
pub use ledger::*;
pub use models::*;
pub use types::*;
pub use validation::*;
pub use valuation::*;
