//! Security module for convoke: sandbox access policy and audit logging.
//!
//! Provides:
//! - **Access policy**: path resolution against a working directory,
//!   containment within allowed roots, and blacklist enforcement
//! - **Audit logging**: structured records of denied file operations

pub mod audit;
pub mod path;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use path::{AccessPolicy, PathValidationError, is_contained, normalize};
