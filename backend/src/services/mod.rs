//! Ledger services: storage adapter, rebuilder, reconciliation, intake and queries

pub mod consistency;
pub mod event_store;
pub mod intake;
pub mod query;
pub mod rebuilder;
pub mod reconciliation;
pub mod valuation;

pub use consistency::ConsistencyService;
pub use intake::IntakeService;
pub use query::QueryService;
pub use rebuilder::LedgerRebuilder;
pub use reconciliation::{DriftMode, ReconciliationService};
pub use valuation::ValuationService;
