//! Escalation events and the WebSocket feed messages that carry them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationKind {
    SlaBreach,
    AmbiguousRoute,
    FailedTransition,
}

impl std::fmt::Display for EscalationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SlaBreach => "SLA_BREACH",
            Self::AmbiguousRoute => "AMBIGUOUS_ROUTE",
            Self::FailedTransition => "FAILED_TRANSITION",
        };
        write!(f, "{s}")
    }
}

/// What an escalation is about. Only the id is held, never the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "subject_type", content = "subject_id", rename_all = "snake_case")]
pub enum Subject {
    Message(Uuid),
    Order(Uuid),
}

impl Subject {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Message(id) | Self::Order(id) => *id,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(id) => write!(f, "message:{id}"),
            Self::Order(id) => write!(f, "order:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub id: Uuid,
    #[serde(flatten)]
    pub subject: Subject,
    pub kind: EscalationKind,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub detail: String,
}

impl EscalationEvent {
    pub fn new(subject: Subject, kind: EscalationKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            kind,
            raised_at: Utc::now(),
            resolved_at: None,
            detail: detail.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Messages pushed to dashboard WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Sent on connect: every unresolved event.
    EscalationsSync { events: Vec<EscalationEvent> },
    EscalationRaised { event: EscalationEvent },
    EscalationResolved { event: EscalationEvent },
}
