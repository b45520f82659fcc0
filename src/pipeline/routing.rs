//! Routing engine: intent/priority to business-unit handler.
//!
//! Rules are evaluated in declaration order; the first match wins.
//! Ambiguous intent or no match goes to the escalation handler.
//! The table is immutable once built; [`Router::reload`] swaps it whole.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::types::{Handler, InboundMessage, Intent, PriorityTier, RoutingDecision};

/// Handler used when nothing else applies.
pub const ESCALATION_HANDLER: Handler = Handler::Management;

/// Rule name recorded on every decision that fell back to management.
pub const FALLBACK_RULE: &str = "escalation_fallback";

/// A single routing rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    pub intent: Intent,
    /// Restrict to these tiers. Empty means any tier.
    #[serde(default)]
    pub tiers: Vec<PriorityTier>,
    pub handler: Handler,
}

impl RoutingRule {
    pub fn new(name: impl Into<String>, intent: Intent, handler: Handler) -> Self {
        Self {
            name: name.into(),
            intent,
            tiers: Vec::new(),
            handler,
        }
    }

    pub fn for_tiers(mut self, tiers: impl IntoIterator<Item = PriorityTier>) -> Self {
        self.tiers = tiers.into_iter().collect();
        self
    }

    fn matches(&self, intent: Intent, tier: PriorityTier) -> bool {
        self.intent == intent && (self.tiers.is_empty() || self.tiers.contains(&tier))
    }
}

/// Validated, ordered rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(rules: Vec<RoutingRule>) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::EmptyRoutingTable);
        }
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.name.clone()));
            }
        }
        Ok(Self { rules })
    }

    pub fn default_table() -> Self {
        Self {
            rules: vec![
                RoutingRule::new("orders", Intent::Order, Handler::Orders),
                RoutingRule::new("invoices", Intent::Invoice, Handler::Finance),
                RoutingRule::new("supplier_mail", Intent::Supplier, Handler::Procurement),
                RoutingRule::new("complaints", Intent::Complaint, Handler::Quality),
                RoutingRule::new("support", Intent::Support, Handler::Support),
            ],
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    /// Route a fully prioritized message.
    pub fn decide(&self, message: &InboundMessage) -> RoutingDecision {
        let intent = message.intent().unwrap_or(Intent::Ambiguous);
        let tier = message
            .assessment
            .as_ref()
            .map(|a| a.priority)
            .unwrap_or(PriorityTier::Normal);

        if intent == Intent::Ambiguous {
            return RoutingDecision {
                message_id: message.id,
                handler: ESCALATION_HANDLER,
                rule: FALLBACK_RULE.into(),
                reason: "ambiguous classification".into(),
            };
        }

        match self.rules.iter().find(|r| r.matches(intent, tier)) {
            Some(rule) => RoutingDecision {
                message_id: message.id,
                handler: rule.handler,
                rule: rule.name.clone(),
                reason: format!("intent {intent} at {tier}"),
            },
            None => RoutingDecision {
                message_id: message.id,
                handler: ESCALATION_HANDLER,
                rule: FALLBACK_RULE.into(),
                reason: format!("no rule for intent {intent} at {tier}"),
            },
        }
    }
}

/// Holds the live table. Readers take a snapshot; reloads replace the `Arc`.
pub struct Router {
    table: RwLock<Arc<RoutingTable>>,
}

impl Router {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<RoutingTable> {
        let guard = self.table.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn route(&self, message: &InboundMessage) -> RoutingDecision {
        let decision = self.snapshot().decide(message);
        debug!(
            message_id = %message.id,
            handler = %decision.handler,
            rule = %decision.rule,
            "Routing decision"
        );
        decision
    }

    /// Replace the whole table at once.
    pub fn reload(&self, table: RoutingTable) {
        let count = table.rules.len();
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(table);
        info!(rules = count, "Routing table reloaded");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::pipeline::types::{Classification, NewMessage, PriorityAssessment};

    fn prioritized(intent: Intent, tier: PriorityTier) -> InboundMessage {
        let mut msg = InboundMessage::from_new(NewMessage {
            sender: "a@b.com".into(),
            subject: Some("s".into()),
            body: Some("b".into()),
            ..Default::default()
        })
        .unwrap();
        msg.apply_classification(Classification {
            intent,
            urgent: false,
            rule: "test".into(),
        })
        .unwrap();
        msg.apply_assessment(PriorityAssessment {
            priority: tier,
            response_deadline: Utc::now(),
            reason: "test".into(),
        })
        .unwrap();
        msg
    }

    #[test]
    fn default_table_routes_each_intent() {
        let table = RoutingTable::default_table();
        let cases = [
            (Intent::Order, Handler::Orders),
            (Intent::Invoice, Handler::Finance),
            (Intent::Supplier, Handler::Procurement),
            (Intent::Complaint, Handler::Quality),
            (Intent::Support, Handler::Support),
            (Intent::Ambiguous, Handler::Management),
        ];
        for (intent, handler) in cases {
            let d = table.decide(&prioritized(intent, PriorityTier::Normal));
            assert_eq!(d.handler, handler, "intent {intent}");
        }
    }

    #[test]
    fn first_declared_rule_wins_ties() {
        let table = RoutingTable::new(vec![
            RoutingRule::new("critical_orders", Intent::Order, Handler::Management)
                .for_tiers([PriorityTier::Critical]),
            RoutingRule::new("orders", Intent::Order, Handler::Orders),
        ])
        .unwrap();

        let critical = table.decide(&prioritized(Intent::Order, PriorityTier::Critical));
        assert_eq!(critical.rule, "critical_orders");
        assert_eq!(critical.handler, Handler::Management);

        let normal = table.decide(&prioritized(Intent::Order, PriorityTier::Normal));
        assert_eq!(normal.rule, "orders");

        let reversed = RoutingTable::new(vec![
            RoutingRule::new("orders", Intent::Order, Handler::Orders),
            RoutingRule::new("critical_orders", Intent::Order, Handler::Management)
                .for_tiers([PriorityTier::Critical]),
        ])
        .unwrap();
        let d = reversed.decide(&prioritized(Intent::Order, PriorityTier::Critical));
        assert_eq!(d.rule, "orders");
    }

    #[test]
    fn no_match_falls_back_to_escalation() {
        let table =
            RoutingTable::new(vec![RoutingRule::new("orders", Intent::Order, Handler::Orders)])
                .unwrap();
        let d = table.decide(&prioritized(Intent::Invoice, PriorityTier::Normal));
        assert_eq!(d.handler, ESCALATION_HANDLER);
        assert_eq!(d.rule, "escalation_fallback");
    }

    #[test]
    fn ambiguous_skips_the_table() {
        let table = RoutingTable::new(vec![RoutingRule::new(
            "catch_ambiguous",
            Intent::Ambiguous,
            Handler::Support,
        )])
        .unwrap();
        let d = table.decide(&prioritized(Intent::Ambiguous, PriorityTier::Normal));
        assert_eq!(d.handler, Handler::Management);
    }

    #[test]
    fn table_validation() {
        assert!(matches!(RoutingTable::new(vec![]), Err(ConfigError::EmptyRoutingTable)));
        let dup = RoutingTable::new(vec![
            RoutingRule::new("x", Intent::Order, Handler::Orders),
            RoutingRule::new("x", Intent::Support, Handler::Support),
        ]);
        assert!(matches!(dup, Err(ConfigError::DuplicateRule(name)) if name == "x"));
    }

    #[test]
    fn reload_swaps_whole_table() {
        let router = Router::new(RoutingTable::default_table());
        let before = router.snapshot();
        router.reload(
            RoutingTable::new(vec![RoutingRule::new("all_orders", Intent::Order, Handler::Finance)])
                .unwrap(),
        );
        // Snapshots taken earlier keep the old table intact.
        assert_eq!(before.rules().len(), 5);
        let d = router.route(&prioritized(Intent::Order, PriorityTier::Normal));
        assert_eq!(d.rule, "all_orders");
        assert_eq!(d.handler, Handler::Finance);
    }

    #[test]
    fn routing_is_deterministic() {
        let router = Router::new(RoutingTable::default_table());
        let msg = prioritized(Intent::Complaint, PriorityTier::Critical);
        assert_eq!(router.route(&msg), router.route(&msg));
    }
}
