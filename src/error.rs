//! Error types for the order desk.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::orders::model::OrderState;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Routing table is empty")]
    EmptyRoutingTable,

    #[error("Duplicate routing rule name: {0}")]
    DuplicateRule(String),
}

/// Malformed input, rejected before any mutation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid sender address: {0}")]
    InvalidSender(String),

    #[error("Order has no line items")]
    EmptyLineItems,

    #[error("Line item {sku} has invalid quantity {quantity}")]
    InvalidQuantity { sku: String, quantity: u32 },

    #[error("Line item has an empty SKU")]
    EmptySku,

    #[error("Timestamp {0} is out of range")]
    InvalidTimestamp(DateTime<Utc>),

    #[error("Message {0} already ingested")]
    DuplicateMessage(Uuid),

    #[error("Message {id} is already {stage}; cannot apply {step}")]
    OutOfOrder {
        id: Uuid,
        stage: &'static str,
        step: &'static str,
    },

    #[error("Could not parse raw message: {0}")]
    Unparseable(String),
}

/// State machine rule violations and lookups.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Order {order_id} not found")]
    NotFound { order_id: Uuid },

    #[error("Order {order_id} cannot transition from {from} to {to}: {reason}")]
    Illegal {
        order_id: Uuid,
        from: OrderState,
        to: OrderState,
        reason: &'static str,
    },
}

impl TransitionError {
    /// Short machine-readable label for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Illegal { .. } => "illegal_transition",
        }
    }
}

/// Repository errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Entity already exists: {entity} with id {id}")]
    Duplicate { entity: &'static str, id: Uuid },
}

/// Result type alias for the order desk.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_message_names_both_states() {
        let err = TransitionError::Illegal {
            order_id: Uuid::nil(),
            from: OrderState::Closed,
            to: OrderState::Shipped,
            reason: "order is in a terminal state",
        };
        let msg = err.to_string();
        assert!(msg.contains("CLOSED"));
        assert!(msg.contains("SHIPPED"));
        assert_eq!(err.kind(), "illegal_transition");
    }

    #[test]
    fn validation_converts_into_top_level() {
        let err: Error = ValidationError::EmptyLineItems.into();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyLineItems)));
    }
}
