//! Desk assembly. Wires repositories, engines and the monitor together.

use std::sync::Arc;

use tracing::info;

use crate::config::DeskConfig;
use crate::escalation::{EscalationLog, EscalationMonitor};
use crate::orders::{Order, OrderStateMachine};
use crate::pipeline::attachments::{AttachmentParser, KeywordAttachmentParser};
use crate::pipeline::classifier::{Classifier, ClassifierDomains};
use crate::pipeline::priority::PriorityResolver;
use crate::pipeline::processor::InboundProcessor;
use crate::pipeline::replies::{ReplyFormatter, TemplateFormatter};
use crate::pipeline::routing::{Router, RoutingTable};
use crate::pipeline::types::InboundMessage;
use crate::store::{MemoryRepository, Repository};

/// Everything one running desk needs, shared by the API and the scan task.
pub struct Desk {
    pub config: DeskConfig,
    pub processor: Arc<InboundProcessor>,
    pub orders: Arc<OrderStateMachine>,
    pub escalations: Arc<EscalationLog>,
    pub monitor: Arc<EscalationMonitor>,
    pub router: Arc<Router>,
}

impl Desk {
    /// Desk with the built-in reply templates and keyword attachment parser.
    pub fn new(config: DeskConfig) -> Arc<Self> {
        Self::with_collaborators(
            config,
            Arc::new(TemplateFormatter::with_defaults()),
            Arc::new(KeywordAttachmentParser),
        )
    }

    pub fn with_collaborators(
        config: DeskConfig,
        formatter: Arc<dyn ReplyFormatter>,
        parser: Arc<dyn AttachmentParser>,
    ) -> Arc<Self> {
        let messages: Arc<dyn Repository<InboundMessage>> = MemoryRepository::<InboundMessage>::new();
        let order_repo: Arc<dyn Repository<Order>> = MemoryRepository::<Order>::new();
        let escalations = EscalationLog::new();

        let orders = Arc::new(OrderStateMachine::new(
            Arc::clone(&order_repo),
            Arc::clone(&escalations),
            config.lead_time_days,
        ));
        let router = Arc::new(Router::new(RoutingTable::default_table()));

        let classifier = Classifier::new(
            ClassifierDomains {
                supplier: config.supplier_domains.clone(),
                known: config.known_domains.clone(),
            },
            Arc::clone(&parser),
        );
        let resolver = PriorityResolver::new(config.oem_domains.clone(), config.sla.clone());

        let processor = Arc::new(InboundProcessor::new(
            classifier,
            resolver,
            Arc::clone(&router),
            parser,
            formatter,
            Arc::clone(&messages),
            Arc::clone(&orders),
            Arc::clone(&escalations),
        ));
        let monitor = Arc::new(EscalationMonitor::new(
            messages,
            order_repo,
            Arc::clone(&escalations),
        ));

        info!(
            oem_domains = config.oem_domains.len(),
            supplier_domains = config.supplier_domains.len(),
            routing_rules = router.snapshot().rules().len(),
            "Order desk assembled"
        );

        Arc::new(Self {
            config,
            processor,
            orders,
            escalations,
            monitor,
            router,
        })
    }
}
