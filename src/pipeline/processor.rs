//! Inbound processor. Runs a message through classify → prioritize → route,
//! then selects the reply and, for orders, asks the state machine for an order.
//!
//! Flow:
//! 1. Validate the ingestion request (rejected before anything is stored)
//! 2. Classifier, priority resolver, router, pure and in that order
//! 3. Store the routed message
//! 4. Side effects: AMBIGUOUS_ROUTE escalation, order creation, reply rendering
//!
//! Every accepted message gets a rendered reply, even when order creation fails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, StoreError, ValidationError};
use crate::escalation::log::EscalationLog;
use crate::escalation::model::{EscalationKind, Subject};
use crate::orders::machine::OrderStateMachine;
use crate::orders::model::{LineItem, NewOrder, OrderChannel, OrderCommand};
use crate::pipeline::attachments::{AttachmentKind, AttachmentParser, extract_line_items};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::priority::PriorityResolver;
use crate::pipeline::replies::{
    GENERIC_ACK, RenderedReply, ReplyFormatter, render_or_fallback, template_for,
};
use crate::pipeline::routing::{FALLBACK_RULE, Router};
use crate::pipeline::types::{
    InboundMessage, Intent, NewMessage, PriorityTier, RoutingDecision,
};
use crate::store::Repository;

/// What the caller gets back for one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    #[serde(flatten)]
    pub decision: RoutingDecision,
    pub intent: Intent,
    pub urgent: bool,
    pub priority: PriorityTier,
    pub response_deadline: DateTime<Utc>,
    pub reply: RenderedReply,
    pub order_id: Option<Uuid>,
}

pub struct InboundProcessor {
    classifier: Classifier,
    resolver: PriorityResolver,
    router: Arc<Router>,
    parser: Arc<dyn AttachmentParser>,
    formatter: Arc<dyn ReplyFormatter>,
    messages: Arc<dyn Repository<InboundMessage>>,
    orders: Arc<OrderStateMachine>,
    escalations: Arc<EscalationLog>,
}

impl InboundProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Classifier,
        resolver: PriorityResolver,
        router: Arc<Router>,
        parser: Arc<dyn AttachmentParser>,
        formatter: Arc<dyn ReplyFormatter>,
        messages: Arc<dyn Repository<InboundMessage>>,
        orders: Arc<OrderStateMachine>,
        escalations: Arc<EscalationLog>,
    ) -> Self {
        Self {
            classifier,
            resolver,
            router,
            parser,
            formatter,
            messages,
            orders,
            escalations,
        }
    }

    /// Process one inbound message through the whole pipeline.
    pub async fn process(&self, new: NewMessage) -> Result<ProcessOutcome, Error> {
        let mut message = InboundMessage::from_new(new)?;
        info!(
            message_id = %message.id,
            sender = %message.sender,
            has_pdf = message.has_pdf,
            "Processing inbound message"
        );

        let classification = self.classifier.classify(&message);
        message.apply_classification(classification.clone())?;

        let assessment = self.resolver.resolve(&message, &classification)?;
        let ship_by = if classification.urgent {
            Some(self.resolver.expedite_ship_by(message.received_at)?)
        } else {
            None
        };
        message.apply_assessment(assessment.clone())?;

        let decision = self.router.route(&message);
        message.apply_routing(decision.clone())?;

        let stored = message.clone();
        self.messages.insert(message).await.map_err(|e| match e {
            StoreError::Duplicate { id, .. } => Error::from(ValidationError::DuplicateMessage(id)),
            other => Error::from(other),
        })?;

        let subject = Subject::Message(stored.id);
        if decision.rule == FALLBACK_RULE {
            self.escalations
                .raise(subject, EscalationKind::AmbiguousRoute, decision.reason.clone())
                .await;
        }

        let mut order_id = None;
        let mut order_failed = false;
        if classification.intent == Intent::Order {
            let request = self.order_request(&stored, ship_by, assessment.priority);
            match self.orders.execute(OrderCommand::Create(request)).await {
                Ok(order) => order_id = Some(order.id),
                Err(e) => {
                    warn!(message_id = %stored.id, error = %e, "Order creation from message failed");
                    order_failed = true;
                }
            }
        }

        let key = if order_failed {
            GENERIC_ACK
        } else {
            template_for(decision.handler, classification.intent)
        };
        let context = json!({
            "sender": stored.sender,
            "subject": stored.subject,
            "handler": decision.handler.to_string(),
            "order_id": order_id.map(|id| id.to_string()),
        });
        let reply = render_or_fallback(self.formatter.as_ref(), key, &context);

        info!(
            message_id = %stored.id,
            intent = %classification.intent,
            priority = %assessment.priority,
            handler = %decision.handler,
            template = %reply.template_key,
            "Message routed"
        );

        Ok(ProcessOutcome {
            decision,
            intent: classification.intent,
            urgent: classification.urgent,
            priority: assessment.priority,
            response_deadline: assessment.response_deadline,
            reply,
            order_id,
        })
    }

    /// Process several messages concurrently. Failures are logged and skipped.
    pub async fn process_batch(&self, batch: Vec<NewMessage>) -> Vec<ProcessOutcome> {
        let count = batch.len();
        let results: Vec<ProcessOutcome> = join_all(batch.into_iter().map(|new| self.process(new)))
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    error!(error = %e, "Failed to process message in batch");
                    None
                }
            })
            .collect();
        info!(processed = results.len(), total = count, "Batch processing complete");
        results
    }

    /// Record that the reply went out. Repeated calls keep the first timestamp.
    pub async fn dispatch_reply(&self, message_id: Uuid) -> Result<InboundMessage, Error> {
        let handle = self
            .messages
            .get(message_id)
            .await
            .ok_or(StoreError::NotFound {
                entity: "message",
                id: message_id,
            })?;
        let mut message = handle.lock().await;
        if message.close(Utc::now()) {
            info!(message_id = %message_id, "Reply dispatched, message closed");
        }
        Ok(message.clone())
    }

    pub async fn get_message(&self, message_id: Uuid) -> Option<InboundMessage> {
        self.messages.snapshot(message_id).await
    }

    fn order_request(
        &self,
        message: &InboundMessage,
        ship_by: Option<DateTime<Utc>>,
        priority: PriorityTier,
    ) -> NewOrder {
        let channel = if self.resolver.is_oem(&message.sender_domain) {
            OrderChannel::Oem
        } else {
            OrderChannel::Retail
        };
        NewOrder {
            message_id: Some(message.id),
            customer: message.sender.clone(),
            channel,
            priority: Some(priority),
            line_items: self.line_items(message),
            expedite: ship_by.is_some(),
            ship_by,
        }
    }

    /// Line items from parsed order attachments, else from the body text.
    fn line_items(&self, message: &InboundMessage) -> Vec<LineItem> {
        let mut items = Vec::new();
        for attachment in message.attachments.iter().filter(|a| a.is_pdf()) {
            match self.parser.parse(attachment) {
                Ok(parsed) if parsed.kind == AttachmentKind::Order => items.extend(parsed.line_items),
                _ => {}
            }
        }
        if items.is_empty() {
            items = extract_line_items(&message.body);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::config::SlaPolicy;
    use crate::orders::model::{Order, OrderState};
    use crate::pipeline::attachments::KeywordAttachmentParser;
    use crate::pipeline::classifier::ClassifierDomains;
    use crate::pipeline::replies::TemplateFormatter;
    use crate::pipeline::routing::{RoutingRule, RoutingTable};
    use crate::pipeline::types::{Attachment, Handler};
    use crate::store::MemoryRepository;

    struct Fixture {
        processor: InboundProcessor,
        orders: Arc<OrderStateMachine>,
        router: Arc<Router>,
        log: Arc<EscalationLog>,
    }

    fn fixture() -> Fixture {
        let log = EscalationLog::new();
        let parser: Arc<dyn AttachmentParser> = Arc::new(KeywordAttachmentParser);
        let order_repo: Arc<dyn Repository<Order>> = MemoryRepository::<Order>::new();
        let orders = Arc::new(OrderStateMachine::new(order_repo, Arc::clone(&log), 7));
        let router = Arc::new(Router::new(RoutingTable::default_table()));
        let processor = InboundProcessor::new(
            Classifier::new(
                ClassifierDomains {
                    supplier: vec!["steelworks.example".into()],
                    known: vec!["oem1.com".into(), "retail.example".into()],
                },
                Arc::clone(&parser),
            ),
            PriorityResolver::new(vec!["oem1.com".to_string()], SlaPolicy::default()),
            Arc::clone(&router),
            parser,
            Arc::new(TemplateFormatter::with_defaults()),
            MemoryRepository::<InboundMessage>::new(),
            Arc::clone(&orders),
            Arc::clone(&log),
        );
        Fixture {
            processor,
            orders,
            router,
            log,
        }
    }

    fn new_message(sender: &str, subject: &str, body: &str, attachments: Vec<Attachment>) -> NewMessage {
        NewMessage {
            sender: sender.into(),
            subject: Some(subject.into()),
            body: Some(body.into()),
            attachments,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn expedited_oem_order_is_critical() {
        let f = fixture();
        let received = Utc::now();
        let mut new = new_message(
            "buyer@oem1.com",
            "Purchase order PO-5521",
            "Please supply BRK-200 x 40. We need delivery within 48 hours and will pay a premium.",
            vec![Attachment::new("PO-5521.pdf", "application/pdf")],
        );
        new.received_at = Some(received);

        let outcome = f.processor.process(new).await.unwrap();
        assert_eq!(outcome.intent, Intent::Order);
        assert!(outcome.urgent);
        assert_eq!(outcome.priority, PriorityTier::Critical);
        assert!(outcome.response_deadline <= received + Duration::hours(2));
        assert_eq!(outcome.decision.handler, Handler::Orders);
        assert_eq!(outcome.reply.template_key, "order_received");

        let order = f.orders.get(outcome.order_id.unwrap()).await.unwrap();
        assert_eq!(order.priority, PriorityTier::Critical);
        assert_eq!(order.state, OrderState::Created);
        assert!(order.expedite);
        assert_eq!(order.requested_ship_by, Some(received + Duration::hours(24)));
        assert_eq!(order.line_items, vec![LineItem::new("BRK-200", 40)]);
        assert_eq!(order.message_id, Some(outcome.decision.message_id));
    }

    #[tokio::test]
    async fn ambiguous_message_goes_to_management_with_generic_ack() {
        let f = fixture();
        let outcome = f
            .processor
            .process(new_message("hello@unknown.example", "Hello", "Just getting in touch.", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.intent, Intent::Ambiguous);
        assert_eq!(outcome.decision.handler, Handler::Management);
        assert_eq!(outcome.reply.template_key, GENERIC_ACK);
        assert!(outcome.order_id.is_none());

        let open = f.log.unresolved().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, EscalationKind::AmbiguousRoute);
    }

    #[tokio::test]
    async fn order_without_line_items_escalates_and_still_replies() {
        let f = fixture();
        let outcome = f
            .processor
            .process(new_message(
                "buyer@retail.example",
                "Purchase order",
                "See attached.",
                vec![Attachment::new("scan.pdf", "application/pdf")],
            ))
            .await
            .unwrap();
        assert_eq!(outcome.intent, Intent::Order);
        assert!(outcome.order_id.is_none());
        assert_eq!(outcome.reply.template_key, GENERIC_ACK);
        assert!(!outcome.reply.text.is_empty());

        let event = f
            .log
            .open_for(
                Subject::Message(outcome.decision.message_id),
                EscalationKind::FailedTransition,
            )
            .await;
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn invalid_message_is_rejected_before_storage() {
        let f = fixture();
        let mut new = new_message("not-an-address", "s", "b", vec![]);
        new.id = Some(Uuid::new_v4());
        let id = new.id.unwrap();
        assert!(matches!(
            f.processor.process(new).await,
            Err(Error::Validation(ValidationError::InvalidSender(_)))
        ));
        assert!(f.processor.get_message(id).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_message_id_rejected() {
        let f = fixture();
        let id = Uuid::new_v4();
        let mut new = new_message("ops@retail.example", "Status", "Where is my order?", vec![]);
        new.id = Some(id);
        f.processor.process(new.clone()).await.unwrap();
        assert!(matches!(
            f.processor.process(new).await,
            Err(Error::Validation(ValidationError::DuplicateMessage(d))) if d == id
        ));
    }

    #[tokio::test]
    async fn receipt_time_out_of_range_is_rejected_before_storing() {
        let f = fixture();
        let id = Uuid::new_v4();
        let mut new = new_message("ops@retail.example", "Status", "Where is my order?", vec![]);
        new.id = Some(id);
        new.received_at = Some(DateTime::<Utc>::MAX_UTC);
        assert!(matches!(
            f.processor.process(new).await,
            Err(Error::Validation(ValidationError::InvalidTimestamp(_)))
        ));
        assert!(f.processor.get_message(id).await.is_none());
        assert!(f.log.is_empty().await);
    }

    #[tokio::test]
    async fn unmatched_intent_falls_back_and_escalates() {
        let f = fixture();
        f.router.reload(
            RoutingTable::new(vec![RoutingRule::new("orders", Intent::Order, Handler::Orders)]).unwrap(),
        );
        let outcome = f
            .processor
            .process(new_message("ops@retail.example", "Status", "Where is my order?", vec![]))
            .await
            .unwrap();
        assert_eq!(outcome.intent, Intent::Support);
        assert_eq!(outcome.decision.handler, Handler::Management);
        assert_eq!(outcome.decision.rule, FALLBACK_RULE);

        let open = f.log.unresolved().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, EscalationKind::AmbiguousRoute);
        assert_eq!(open[0].subject, Subject::Message(outcome.decision.message_id));
    }

    #[tokio::test]
    async fn stored_message_is_fully_routed() {
        let f = fixture();
        let outcome = f
            .processor
            .process(new_message("ops@retail.example", "Status", "Where is my order?", vec![]))
            .await
            .unwrap();
        let stored = f.processor.get_message(outcome.decision.message_id).await.unwrap();
        assert_eq!(stored.routing.as_ref(), Some(&outcome.decision));
        assert_eq!(stored.response_deadline(), Some(outcome.response_deadline));
        assert!(stored.is_open());
    }

    #[tokio::test]
    async fn dispatch_reply_closes_once() {
        let f = fixture();
        let outcome = f
            .processor
            .process(new_message("ops@retail.example", "Status", "Where is my order?", vec![]))
            .await
            .unwrap();
        let id = outcome.decision.message_id;
        let first = f.processor.dispatch_reply(id).await.unwrap();
        let second = f.processor.dispatch_reply(id).await.unwrap();
        assert!(first.closed_at.is_some());
        assert_eq!(first.closed_at, second.closed_at);

        assert!(matches!(
            f.processor.dispatch_reply(Uuid::new_v4()).await,
            Err(Error::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn batch_skips_failures() {
        let f = fixture();
        let results = f
            .processor
            .process_batch(vec![
                new_message("ops@retail.example", "Status", "Where is my order?", vec![]),
                new_message("broken", "s", "b", vec![]),
            ])
            .await;
        assert_eq!(results.len(), 1);
    }
}
