//! Order Desk: inbound triage and routing, SLA tracking, order lifecycle.

pub mod api;
pub mod channels;
pub mod config;
pub mod desk;
pub mod error;
pub mod escalation;
pub mod orders;
pub mod pipeline;
pub mod store;
