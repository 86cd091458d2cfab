//! Append-only CSV stores: file access, watermark index and health audit.

pub mod audit;
pub mod file;
pub mod watermark;

pub use audit::{audit_store, AuditThresholds, StoreAudit};
pub use file::{RewriteSummary, StoreFile};
pub use watermark::WatermarkIndex;
