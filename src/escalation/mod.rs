//! Escalations: SLA breaches, ambiguous routes and failed transitions,
//! surfaced to the dashboard rather than thrown.

pub mod log;
pub mod model;
pub mod monitor;

pub use log::EscalationLog;
pub use model::{EscalationEvent, EscalationKind, FeedMessage, Subject};
pub use monitor::{EscalationMonitor, spawn_scan_task};
