//! Inbound message pipeline.
//!
//! Every message flows through:
//! 1. `Classifier::classify()`: ordered keyword and attachment rules
//! 2. `PriorityResolver::resolve()`: tier and response deadline
//! 3. `Router::route()`: exactly one handler, escalation as the fallback
//! 4. Reply template selection and, for orders, order creation
//!
//! Steps 1–3 are pure functions of the message. Side effects live in
//! `InboundProcessor`.

pub mod attachments;
pub mod classifier;
pub mod priority;
pub mod processor;
pub mod replies;
pub mod routing;
pub mod types;
