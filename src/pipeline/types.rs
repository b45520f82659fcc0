//! Shared types for the triage pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::ValidationError;

// ── Attachments ─────────────────────────────────────────────────────

/// Attachment descriptor as declared by the sender's mail client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// File name, e.g. `PO-4411.pdf`.
    pub name: String,
    /// Declared MIME type, e.g. `application/pdf`.
    pub content_type: String,
    /// Extracted text, when the ingesting channel had any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// A descriptor with no name and no type carries no information.
    pub fn is_well_formed(&self) -> bool {
        !self.name.trim().is_empty() || !self.content_type.trim().is_empty()
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("application/pdf")
            || self.name.to_lowercase().ends_with(".pdf")
    }
}

/// Accept any JSON for the attachment list; a malformed list means "no attachments".
fn lenient_attachments<'de, D>(deserializer: D) -> Result<Vec<Attachment>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(Vec::new());
    }
    match serde_json::from_value::<Vec<Attachment>>(value) {
        Ok(list) => Ok(list.into_iter().filter(Attachment::is_well_formed).collect()),
        Err(e) => {
            warn!(error = %e, "Malformed attachment list, treating as no attachments");
            Ok(Vec::new())
        }
    }
}

// ── Enumerations ────────────────────────────────────────────────────

/// Classified purpose of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Order,
    Invoice,
    Complaint,
    Supplier,
    Support,
    Ambiguous,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Order => "order",
            Self::Invoice => "invoice",
            Self::Complaint => "complaint",
            Self::Supplier => "supplier",
            Self::Support => "support",
            Self::Ambiguous => "ambiguous",
        };
        write!(f, "{s}")
    }
}

/// Priority tier, drives the response deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTier {
    Critical,
    Oem,
    Normal,
    /// Reserved for explicitly deprioritized internal traffic.
    Low,
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::Oem => "OEM",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PriorityTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "OEM" => Ok(Self::Oem),
            "NORMAL" => Ok(Self::Normal),
            "LOW" => Ok(Self::Low),
            _ => Err(format!("Unknown priority tier: {}", s)),
        }
    }
}

/// Business unit a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    Orders,
    Support,
    Finance,
    Quality,
    Procurement,
    /// Escalation handler for ambiguous or failed cases.
    Management,
}

impl std::fmt::Display for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Orders => "orders",
            Self::Support => "support",
            Self::Finance => "finance",
            Self::Quality => "quality",
            Self::Procurement => "procurement",
            Self::Management => "management",
        };
        write!(f, "{s}")
    }
}

// ── Pipeline outputs ────────────────────────────────────────────────

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    /// Expedite requested (time-bound delivery plus premium payment).
    pub urgent: bool,
    /// Name of the classifier rule that decided the intent.
    pub rule: String,
}

/// Priority resolver output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityAssessment {
    pub priority: PriorityTier,
    pub response_deadline: DateTime<Utc>,
    /// Which tie-break step assigned the tier.
    pub reason: String,
}

/// Routing engine output. Exactly one per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub message_id: Uuid,
    pub handler: Handler,
    pub rule: String,
    pub reason: String,
}

// ── Inbound message ─────────────────────────────────────────────────

/// Ingestion request for a new message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    pub sender: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "lenient_attachments")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub has_pdf: bool,
    #[serde(default)]
    pub is_reply: bool,
}

/// How far a message has progressed through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStage {
    Received,
    Classified,
    Prioritized,
    Routed,
}

impl MessageStage {
    fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Classified => "classified",
            Self::Prioritized => "prioritized",
            Self::Routed => "routed",
        }
    }
}

/// An inbound message and everything the pipeline derived for it.
///
/// Each derived section is written exactly once, in pipeline order.
/// After routing the only further mutation is `closed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub sender: String,
    pub sender_domain: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub has_pdf: bool,
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<PriorityAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingDecision>,
    /// Set when a reply is dispatched.
    pub closed_at: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Validate an ingestion request.
    pub fn from_new(new: NewMessage) -> Result<Self, ValidationError> {
        let sender = new.sender.trim().to_string();
        let sender_domain = sender_domain(&sender)?;
        let subject = new.subject.ok_or(ValidationError::MissingField("subject"))?;
        let body = new.body.ok_or(ValidationError::MissingField("body"))?;
        let has_pdf = new.has_pdf || new.attachments.iter().any(Attachment::is_pdf);

        Ok(Self {
            id: new.id.unwrap_or_else(Uuid::new_v4),
            received_at: new.received_at.unwrap_or_else(Utc::now),
            sender,
            sender_domain,
            subject,
            body,
            attachments: new.attachments,
            has_pdf,
            is_reply: new.is_reply,
            classification: None,
            assessment: None,
            routing: None,
            closed_at: None,
        })
    }

    pub fn stage(&self) -> MessageStage {
        if self.routing.is_some() {
            MessageStage::Routed
        } else if self.assessment.is_some() {
            MessageStage::Prioritized
        } else if self.classification.is_some() {
            MessageStage::Classified
        } else {
            MessageStage::Received
        }
    }

    fn expect_stage(&self, expected: MessageStage, step: &'static str) -> Result<(), ValidationError> {
        let stage = self.stage();
        if stage != expected {
            return Err(ValidationError::OutOfOrder {
                id: self.id,
                stage: stage.label(),
                step,
            });
        }
        Ok(())
    }

    pub fn apply_classification(&mut self, c: Classification) -> Result<(), ValidationError> {
        self.expect_stage(MessageStage::Received, "classification")?;
        self.classification = Some(c);
        Ok(())
    }

    pub fn apply_assessment(&mut self, a: PriorityAssessment) -> Result<(), ValidationError> {
        self.expect_stage(MessageStage::Classified, "priority")?;
        self.assessment = Some(a);
        Ok(())
    }

    pub fn apply_routing(&mut self, d: RoutingDecision) -> Result<(), ValidationError> {
        self.expect_stage(MessageStage::Prioritized, "routing")?;
        self.routing = Some(d);
        Ok(())
    }

    /// Mark the reply as dispatched. Returns false if already closed.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if self.closed_at.is_some() {
            return false;
        }
        self.closed_at = Some(at);
        true
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    pub fn intent(&self) -> Option<Intent> {
        self.classification.as_ref().map(|c| c.intent)
    }

    pub fn response_deadline(&self) -> Option<DateTime<Utc>> {
        self.assessment.as_ref().map(|a| a.response_deadline)
    }

    /// Subject and body joined, lower-cased, for keyword matching.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body).to_lowercase()
    }
}

/// Extract the lower-cased domain from a sender address.
pub fn sender_domain(sender: &str) -> Result<String, ValidationError> {
    let address = sender
        .rsplit_once('<')
        .map(|(_, rest)| rest.trim_end_matches('>'))
        .unwrap_or(sender)
        .trim();
    match address.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(domain.to_lowercase())
        }
        _ => Err(ValidationError::InvalidSender(sender.to_string())),
    }
}

/// True when `domain` equals one of `known` or is a subdomain of it.
pub fn domain_matches<'a>(domain: &str, known: impl IntoIterator<Item = &'a String>) -> bool {
    known.into_iter().any(|k| {
        domain == k.as_str()
            || domain
                .strip_suffix(k.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
