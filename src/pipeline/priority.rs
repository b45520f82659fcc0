//! Priority tiers, SLA deadlines, and expedite detection.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use tracing::debug;

use crate::config::SlaPolicy;
use crate::error::ValidationError;
use crate::pipeline::types::{
    Classification, InboundMessage, Intent, PriorityAssessment, PriorityTier, domain_matches,
};

/// Detects expedite requests: a time-bound delivery promise AND a
/// premium-payment offer. Either phrase alone is not enough.
#[derive(Debug, Clone)]
pub struct ExpediteDetector {
    deadline: Regex,
    premium: Regex,
}

impl ExpediteDetector {
    pub fn new() -> Self {
        Self {
            deadline: Regex::new(
                r"(?i)\b(within\s+\d+\s*(hours?|hrs?|days?)|by\s+(tomorrow|tonight|monday|tuesday|wednesday|thursday|friday|saturday|sunday|end\s+of\s+(the\s+)?(day|week))|next[\s-]day|asap|overnight)\b",
            )
            .unwrap(),
            premium: Regex::new(
                r"(?i)\b(pay\s+(a\s+)?(premium|extra|surcharge|double)|premium\s+(fee|payment|rate|shipping)|expedit\w*\s+(fee|charge|surcharge|cost)|willing\s+to\s+pay|additional\s+(fee|charge|cost)s?)\b",
            )
            .unwrap(),
        }
    }

    pub fn detect(&self, text: &str) -> bool {
        self.deadline.is_match(text) && self.premium.is_match(text)
    }
}

impl Default for ExpediteDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the priority tier and response deadline for a classified message.
#[derive(Debug, Clone)]
pub struct PriorityResolver {
    oem_domains: HashSet<String>,
    policy: SlaPolicy,
}

impl PriorityResolver {
    pub fn new(oem_domains: impl IntoIterator<Item = String>, policy: SlaPolicy) -> Self {
        Self {
            oem_domains: oem_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            policy,
        }
    }

    pub fn is_oem(&self, domain: &str) -> bool {
        domain_matches(domain, &self.oem_domains)
    }

    /// First match wins: urgency, OEM sender, complaint, otherwise normal.
    /// A receipt time too close to the end of the calendar is rejected.
    pub fn resolve(
        &self,
        message: &InboundMessage,
        classification: &Classification,
    ) -> Result<PriorityAssessment, ValidationError> {
        let (priority, reason) = if classification.urgent {
            (PriorityTier::Critical, "expedite requested")
        } else if self.is_oem(&message.sender_domain) {
            (PriorityTier::Oem, "OEM sender domain")
        } else if classification.intent == Intent::Complaint {
            (PriorityTier::Critical, "complaint")
        } else {
            (PriorityTier::Normal, "default")
        };

        let response_deadline = self.deadline_for(priority, message.received_at)?;
        debug!(
            message_id = %message.id,
            priority = %priority,
            deadline = %response_deadline,
            reason,
            "Priority resolved"
        );

        Ok(PriorityAssessment {
            priority,
            response_deadline,
            reason: reason.to_string(),
        })
    }

    pub fn deadline_for(
        &self,
        tier: PriorityTier,
        received_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ValidationError> {
        offset(received_at, self.policy.hours_for(tier))
    }

    /// Ship-by for an expedited order: a fixed window from receipt, regardless of tier.
    pub fn expedite_ship_by(&self, received_at: DateTime<Utc>) -> Result<DateTime<Utc>, ValidationError> {
        offset(received_at, self.policy.expedite_window_hours)
    }

    pub fn policy(&self) -> &SlaPolicy {
        &self.policy
    }
}

fn offset(from: DateTime<Utc>, hours: u32) -> Result<DateTime<Utc>, ValidationError> {
    from.checked_add_signed(Duration::hours(i64::from(hours)))
        .ok_or(ValidationError::InvalidTimestamp(from))
}
