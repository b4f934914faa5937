//! Retail ledger reconciliation and valuation engine
//!
//! Rebuilds stock movement chains and bank running balances from raw events,
//! detects drift between stored and recomputed values, and answers valuation
//! queries over arbitrary date windows.

pub mod batch;
pub mod config;
pub mod db;
pub mod error;
pub mod locks;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, AppResult};
