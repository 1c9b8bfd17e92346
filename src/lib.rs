//! Pulse — live monitor for background customer-analysis jobs
//!
//! Merges a one-shot status snapshot with the live analysis event stream
//! into one consistent registry of in-flight jobs, and fires
//! deduplicated, auto-expiring completion notices.

pub mod api;
pub mod config;
pub mod engine;
pub mod event;
pub mod ingress;
pub mod job;
pub mod notify;
pub mod registry;
pub mod stream;

pub use event::{StreamEnvelope, TaskEvent};
pub use job::{JobPhase, JobRecord};
pub use notify::{Notice, NoticeDurations, NoticeKind, Notifier};
pub use registry::SharedRegistry;
