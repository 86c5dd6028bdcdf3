//! Infrastructure adapters: file-backed store, learning database, status
//! snapshot, inbox, audit log and the TCP health probe.

pub mod atomic_file;
pub mod audit_log;
pub mod change_detector;
pub mod inbox;
pub mod job_store;
pub mod learning_db;
pub mod probe;
pub mod status_file;

pub use audit_log::JsonlAuditSink;
pub use change_detector::ChangeDetector;
pub use inbox::{Inbox, InboxReport};
pub use job_store::{FileMarker, JobStore, StoreSnapshot};
pub use learning_db::{FixRecord, FixSuccess, LearningDb, LearningStats};
pub use probe::TcpProbe;
pub use status_file::{StatusFile, StatusSnapshot};
