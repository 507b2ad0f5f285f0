//! Axiom Coordinator - Async driver for baton-pass ceremonies
//!
//! Wraps the `axiom-ceremony` state machine with:
//! - Per-ceremony mutual exclusion, so concurrent submissions for the same
//!   turn resolve to exactly one acceptance
//! - Fire-and-forget hand-off notification through a pluggable [`Notifier`]
//! - An append-only JSON-lines audit log and its verifier
//! - An in-memory registry and on-disk snapshots for resuming ceremonies

pub mod audit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod storage;

pub use audit::{
    contributions_from_log, parse_line, read_log, records_from_history, verify_log, AuditEvent,
    AuditLog, AuditRecord, LogVerification,
};
pub use config::{CeremonyConfig, ParticipantConfig, CONFIG_ENV};
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, Result};
pub use notifier::{
    DeliveryStatus, LogNotifier, MemoryNotifier, Notifier, OutboxNotifier, TurnNotification,
};
pub use registry::CeremonyRegistry;
pub use storage::{SnapshotLock, SnapshotStorage};
