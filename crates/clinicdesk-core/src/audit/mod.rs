//! Audit journal of state-changing actions.
//!
//! `AuditLogger` records who did what to which patient, employee,
//! inventory item, user or system resource. Entries are immutable; the
//! journal keeps the newest `MAX_ENTRIES` and drops entries older than the
//! retention period once per session. Results can be filtered and
//! exported as JSON or CSV.

mod details;
pub mod entry;
pub mod export;
pub mod filter;
pub mod logger;

use thiserror::Error;

pub use entry::{Actor, AuditAction, AuditLogEntry, AuditType, FieldChange, RecordOptions};
pub use export::{AuditExport, ExportFormat};
pub use filter::AuditFilter;
pub use logger::{AuditLogger, AuditStats, DEFAULT_RETENTION_DAYS, MAX_ENTRIES};

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit storage error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Export failed: {0}")]
    Export(String),
}
