//! Escalation monitor: periodic SLA scan over open messages and orders.
//!
//! The monitor only reads snapshots. Each entity is locked on its own,
//! copied, and released before the next one, so a scan never stalls
//! in-flight transitions. Resolution is lazy: a breach is marked resolved
//! on the first scan after its condition clears.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::log::EscalationLog;
use super::model::{EscalationEvent, EscalationKind, Subject};
use crate::orders::model::Order;
use crate::pipeline::types::InboundMessage;
use crate::store::Repository;

pub struct EscalationMonitor {
    messages: Arc<dyn Repository<InboundMessage>>,
    orders: Arc<dyn Repository<Order>>,
    log: Arc<EscalationLog>,
}

impl EscalationMonitor {
    pub fn new(
        messages: Arc<dyn Repository<InboundMessage>>,
        orders: Arc<dyn Repository<Order>>,
        log: Arc<EscalationLog>,
    ) -> Self {
        Self {
            messages,
            orders,
            log,
        }
    }

    /// One pass at the current time. Returns the events raised or resolved by it.
    pub async fn scan(&self) -> Vec<EscalationEvent> {
        self.scan_at(Utc::now()).await
    }

    /// One pass at a given instant. Safe to call concurrently and repeatedly.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Vec<EscalationEvent> {
        let mut changed = Vec::new();

        for handle in self.messages.handles().await {
            let message = handle.lock().await.clone();
            let Some(deadline) = message.response_deadline() else {
                continue;
            };
            if message.is_open() && now > deadline {
                let detail = format!("No reply dispatched; response was due {deadline}");
                if let Some(event) = self
                    .log
                    .raise(Subject::Message(message.id), EscalationKind::SlaBreach, detail)
                    .await
                {
                    changed.push(event);
                }
            }
        }

        for handle in self.orders.handles().await {
            let order = handle.lock().await.clone();
            if order.is_overdue(now) {
                let detail = format!(
                    "Order in {} past promised ship-by {}",
                    order.state,
                    order.promised_ship_by.map(|d| d.to_string()).unwrap_or_default()
                );
                if let Some(event) = self
                    .log
                    .raise(Subject::Order(order.id), EscalationKind::SlaBreach, detail)
                    .await
                {
                    changed.push(event);
                }
            }
        }

        changed.extend(self.resolve_cleared(now).await);

        if changed.is_empty() {
            debug!("Escalation scan: no changes");
        } else {
            info!(changed = changed.len(), "Escalation scan complete");
        }
        changed
    }

    /// Resolve open breaches and ambiguous routes whose condition has cleared.
    async fn resolve_cleared(&self, now: DateTime<Utc>) -> Vec<EscalationEvent> {
        let mut open = self.log.open_of_kind(EscalationKind::SlaBreach).await;
        open.extend(self.log.open_of_kind(EscalationKind::AmbiguousRoute).await);

        let mut resolved = Vec::new();
        for event in open {
            if !self.cleared(&event, now).await {
                continue;
            }
            if let Some(r) = self.log.resolve_by_id(event.id).await {
                resolved.push(r);
            }
        }
        resolved
    }

    async fn cleared(&self, event: &EscalationEvent, now: DateTime<Utc>) -> bool {
        match event.subject {
            // A reply going out clears both the response SLA and the triage question.
            Subject::Message(id) => match self.messages.snapshot(id).await {
                Some(message) => !message.is_open(),
                None => false,
            },
            Subject::Order(id) => match self.orders.snapshot(id).await {
                Some(order) => {
                    order.state.has_shipped() || order.state.is_terminal() || !order.is_overdue(now)
                }
                None => false,
            },
        }
    }
}

/// Run `scan()` on a fixed interval until the task is aborted.
pub fn spawn_scan_task(
    monitor: Arc<EscalationMonitor>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            monitor.scan().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::orders::machine::OrderStateMachine;
    use crate::orders::model::{LineItem, NewOrder, OrderState};
    use crate::pipeline::types::{
        Classification, Handler, Intent, NewMessage, PriorityAssessment, PriorityTier,
        RoutingDecision,
    };
    use crate::store::MemoryRepository;

    struct Fixture {
        monitor: EscalationMonitor,
        messages: Arc<dyn Repository<InboundMessage>>,
        machine: OrderStateMachine,
        log: Arc<EscalationLog>,
    }

    fn fixture() -> Fixture {
        let log = EscalationLog::new();
        let messages: Arc<dyn Repository<InboundMessage>> = MemoryRepository::<InboundMessage>::new();
        let orders: Arc<dyn Repository<Order>> = MemoryRepository::<Order>::new();
        Fixture {
            monitor: EscalationMonitor::new(Arc::clone(&messages), Arc::clone(&orders), Arc::clone(&log)),
            messages,
            machine: OrderStateMachine::new(orders, Arc::clone(&log), 7),
            log,
        }
    }

    /// A routed message whose response deadline is `deadline`.
    async fn routed_message(f: &Fixture, deadline: DateTime<Utc>) -> uuid::Uuid {
        let mut message = InboundMessage::from_new(NewMessage {
            sender: "ops@retail.example".into(),
            subject: Some("Status".into()),
            body: Some("Where is my order?".into()),
            received_at: Some(deadline - ChronoDuration::hours(12)),
            ..Default::default()
        })
        .unwrap();
        message
            .apply_classification(Classification {
                intent: Intent::Support,
                urgent: false,
                rule: "default_support".into(),
            })
            .unwrap();
        message
            .apply_assessment(PriorityAssessment {
                priority: PriorityTier::Normal,
                response_deadline: deadline,
                reason: "default".into(),
            })
            .unwrap();
        message
            .apply_routing(RoutingDecision {
                message_id: message.id,
                handler: Handler::Support,
                rule: "support".into(),
                reason: "matched".into(),
            })
            .unwrap();
        let id = message.id;
        f.messages.insert(message).await.unwrap();
        id
    }

    async fn confirmed_order(f: &Fixture, ship_by: DateTime<Utc>) -> uuid::Uuid {
        let order = f
            .machine
            .create(NewOrder {
                customer: "ACME".into(),
                line_items: vec![LineItem::new("A-1", 2)],
                ship_by: Some(ship_by),
                ..Default::default()
            })
            .await
            .unwrap();
        f.machine
            .transition(order.id, OrderState::Confirmed, "sales")
            .await
            .unwrap();
        order.id
    }

    #[tokio::test]
    async fn overdue_message_raises_once() {
        let f = fixture();
        let id = routed_message(&f, Utc::now() - ChronoDuration::minutes(5)).await;

        let first = f.monitor.scan().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].subject, Subject::Message(id));
        assert_eq!(first[0].kind, EscalationKind::SlaBreach);

        assert!(f.monitor.scan().await.is_empty());
        assert_eq!(f.log.unresolved().await.len(), 1);
    }

    #[tokio::test]
    async fn message_within_deadline_is_quiet() {
        let f = fixture();
        routed_message(&f, Utc::now() + ChronoDuration::hours(1)).await;
        assert!(f.monitor.scan().await.is_empty());
        assert!(f.log.is_empty().await);
    }

    #[tokio::test]
    async fn reply_resolves_message_breach_on_next_scan() {
        let f = fixture();
        let id = routed_message(&f, Utc::now() - ChronoDuration::minutes(5)).await;
        f.monitor.scan().await;

        let handle = f.messages.get(id).await.unwrap();
        handle.lock().await.close(Utc::now());

        let changed = f.monitor.scan().await;
        assert_eq!(changed.len(), 1);
        assert!(changed[0].is_resolved());
        assert!(f.log.unresolved().await.is_empty());
        assert!(f.monitor.scan().await.is_empty());
    }

    #[tokio::test]
    async fn closing_message_resolves_ambiguous_route() {
        let f = fixture();
        let id = routed_message(&f, Utc::now() + ChronoDuration::hours(1)).await;
        f.log
            .raise(Subject::Message(id), EscalationKind::AmbiguousRoute, "no rule")
            .await
            .unwrap();
        assert!(f.monitor.scan().await.is_empty());

        f.messages.get(id).await.unwrap().lock().await.close(Utc::now());
        let changed = f.monitor.scan().await;
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].kind, EscalationKind::AmbiguousRoute);
    }

    #[tokio::test]
    async fn overdue_order_raises_and_resolves_when_shipped() {
        let f = fixture();
        let id = confirmed_order(&f, Utc::now() - ChronoDuration::hours(1)).await;

        let raised = f.monitor.scan().await;
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].subject, Subject::Order(id));

        for state in [
            OrderState::Planned,
            OrderState::InProduction,
            OrderState::Produced,
            OrderState::Packed,
            OrderState::Shipped,
        ] {
            f.machine.transition(id, state, "ops").await.unwrap();
        }
        // Late shipment does not add a second open breach.
        assert_eq!(f.log.unresolved().await.len(), 1);

        let resolved = f.monitor.scan().await;
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].is_resolved());
        assert!(f.machine.get(id).await.unwrap().sla_breached);
        assert!(f.monitor.scan().await.is_empty());
    }

    #[tokio::test]
    async fn on_time_order_is_quiet() {
        let f = fixture();
        confirmed_order(&f, Utc::now() + ChronoDuration::days(2)).await;
        assert!(f.monitor.scan().await.is_empty());
    }

    #[tokio::test]
    async fn scan_at_future_instant_sees_breach() {
        let f = fixture();
        confirmed_order(&f, Utc::now() + ChronoDuration::days(2)).await;
        let changed = f.monitor.scan_at(Utc::now() + ChronoDuration::days(3)).await;
        assert_eq!(changed.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_scans_raise_one_event() {
        let f = fixture();
        routed_message(&f, Utc::now() - ChronoDuration::minutes(5)).await;
        let monitor = Arc::new(f.monitor);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&monitor);
            tasks.push(tokio::spawn(async move { m.scan().await.len() }));
        }
        let mut total = 0;
        for t in tasks {
            total += t.await.unwrap();
        }
        assert_eq!(total, 1);
        assert_eq!(f.log.unresolved().await.len(), 1);
    }

    #[tokio::test]
    async fn scan_task_runs_on_interval() {
        let f = fixture();
        routed_message(&f, Utc::now() - ChronoDuration::minutes(5)).await;
        let handle = spawn_scan_task(Arc::new(f.monitor), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();
        assert_eq!(f.log.unresolved().await.len(), 1);
    }
}
