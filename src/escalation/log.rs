//! Escalation log: the event store, with duplicate suppression and
//! broadcast to WebSocket clients.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{EscalationEvent, EscalationKind, FeedMessage, Subject};

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

pub struct EscalationLog {
    events: RwLock<Vec<EscalationEvent>>,
    tx: broadcast::Sender<FeedMessage>,
}

impl EscalationLog {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            events: RwLock::new(Vec::new()),
            tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.tx.subscribe()
    }

    /// Raise an event unless an unresolved one exists for the same subject and kind.
    ///
    /// Returns the new event, or `None` when suppressed as a duplicate.
    pub async fn raise(
        &self,
        subject: Subject,
        kind: EscalationKind,
        detail: impl Into<String>,
    ) -> Option<EscalationEvent> {
        let mut events = self.events.write().await;
        if events
            .iter()
            .any(|e| e.subject == subject && e.kind == kind && !e.is_resolved())
        {
            debug!(subject = %subject, kind = %kind, "Escalation already open, not raising again");
            return None;
        }

        let event = EscalationEvent::new(subject, kind, detail);
        warn!(
            escalation_id = %event.id,
            subject = %subject,
            kind = %kind,
            detail = %event.detail,
            "Escalation raised"
        );
        events.push(event.clone());
        let _ = self.tx.send(FeedMessage::EscalationRaised {
            event: event.clone(),
        });
        Some(event)
    }

    /// Resolve the open event for a subject and kind, if any.
    pub async fn resolve(&self, subject: Subject, kind: EscalationKind) -> Option<EscalationEvent> {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.subject == subject && e.kind == kind && !e.is_resolved())?;
        Some(Self::mark_resolved(event, &self.tx))
    }

    /// Resolve an event by id (manual resolution from the dashboard).
    pub async fn resolve_by_id(&self, id: Uuid) -> Option<EscalationEvent> {
        let mut events = self.events.write().await;
        let event = events.iter_mut().find(|e| e.id == id && !e.is_resolved())?;
        Some(Self::mark_resolved(event, &self.tx))
    }

    fn mark_resolved(
        event: &mut EscalationEvent,
        tx: &broadcast::Sender<FeedMessage>,
    ) -> EscalationEvent {
        event.resolved_at = Some(Utc::now());
        info!(
            escalation_id = %event.id,
            subject = %event.subject,
            kind = %event.kind,
            "Escalation resolved"
        );
        let resolved = event.clone();
        let _ = tx.send(FeedMessage::EscalationResolved {
            event: resolved.clone(),
        });
        resolved
    }

    /// Events filtered by resolution status; `None` returns all.
    pub async fn list(&self, resolved: Option<bool>) -> Vec<EscalationEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| resolved.is_none_or(|r| e.is_resolved() == r))
            .cloned()
            .collect()
    }

    pub async fn unresolved(&self) -> Vec<EscalationEvent> {
        self.list(Some(false)).await
    }

    pub async fn open_for(&self, subject: Subject, kind: EscalationKind) -> Option<EscalationEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .find(|e| e.subject == subject && e.kind == kind && !e.is_resolved())
            .cloned()
    }

    /// Open events of one kind, for the monitor's resolution pass.
    pub async fn open_of_kind(&self, kind: EscalationKind) -> Vec<EscalationEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.kind == kind && !e.is_resolved())
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}
