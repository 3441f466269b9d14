//! Stock ledger and projection engine.
//!
//! The ledger is an append-only log of [`Movement`]s and the only source of
//! truth for stock. [`StockProjection`] is a disposable fold of it, kept up to
//! date on append and rebuildable with [`recompute`]; [`check_integrity`]
//! audits a stored projection against the ledger.
//!
//! Everything here is pure. Persistence lives in `wms-infra`.

pub mod error;
pub mod integrity;
pub mod movement;
pub mod projection;
pub mod query;
pub mod recompute;
pub mod summary;

pub use error::LedgerError;
pub use integrity::{check_integrity, IntegrityIssue, IntegrityReport};
pub use movement::{Movement, MovementType, NewMovement};
pub use projection::{ledger_sums, ProjectionKey, ProjectionRow, StockProjection, StockStatus};
pub use query::{newest_first, select, MovementFilter, MovementPage, Pagination};
pub use recompute::{recompute, RecomputeScope, RecomputeStats, ResolvedScope};
pub use summary::{product_totals, take_snapshot, ProductTotals, SnapshotRow, SnapshotSummary};
