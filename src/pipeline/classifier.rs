//! Keyword classifier.
//!
//! Classification is an ordered list of `(predicate, intent)` rules over
//! precomputed [`Signals`]. The first rule whose predicate holds decides.
//! Rule order is the tie-break and is covered by tests.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::pipeline::attachments::{AttachmentKind, AttachmentParser};
use crate::pipeline::priority::ExpediteDetector;
use crate::pipeline::types::{Classification, InboundMessage, Intent, domain_matches};

/// Facts extracted from a message once, before any rule runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub has_pdf: bool,
    /// Strongest structured evidence from the attachment parser, if any.
    pub attachment_kind: Option<AttachmentKind>,
    pub order_markers: bool,
    pub invoice_markers: bool,
    pub supplier_domain: bool,
    pub supplier_keywords: bool,
    pub complaint_keywords: bool,
    pub support_keywords: bool,
    pub known_domain: bool,
}

impl Signals {
    /// Number of category keyword sets that matched. Sender domain is not a keyword set.
    pub fn categories_matched(&self) -> usize {
        [
            self.order_markers,
            self.invoice_markers,
            self.supplier_keywords,
            self.complaint_keywords,
        ]
        .iter()
        .filter(|m| **m)
        .count()
    }

    fn order_document(&self) -> bool {
        self.has_pdf
            && match self.attachment_kind {
                Some(AttachmentKind::Order) => true,
                Some(AttachmentKind::Invoice) => false,
                _ => self.order_markers,
            }
    }

    fn invoice_document(&self) -> bool {
        self.has_pdf
            && match self.attachment_kind {
                Some(AttachmentKind::Invoice) => true,
                Some(AttachmentKind::Order) => false,
                _ => self.invoice_markers,
            }
    }

    fn structured(&self) -> bool {
        matches!(
            self.attachment_kind,
            Some(AttachmentKind::Order | AttachmentKind::Invoice)
        )
    }
}

/// One entry of the ordered rule list.
pub struct ClassificationRule {
    pub name: &'static str,
    pub intent: Intent,
    pub predicate: fn(&Signals) -> bool,
}

/// The rule list, in evaluation order. PDF documents decide before any
/// keyword conflict is considered.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule {
            name: "order_document",
            intent: Intent::Order,
            predicate: Signals::order_document,
        },
        ClassificationRule {
            name: "invoice_document",
            intent: Intent::Invoice,
            predicate: Signals::invoice_document,
        },
        ClassificationRule {
            name: "conflicting_markers",
            intent: Intent::Ambiguous,
            predicate: |s| !s.structured() && s.categories_matched() > 1,
        },
        ClassificationRule {
            name: "supplier",
            intent: Intent::Supplier,
            predicate: |s| s.supplier_domain || s.supplier_keywords,
        },
        ClassificationRule {
            name: "complaint",
            intent: Intent::Complaint,
            predicate: |s| s.complaint_keywords,
        },
        ClassificationRule {
            name: "unrecognized_generic",
            intent: Intent::Ambiguous,
            predicate: |s| {
                !s.known_domain && s.categories_matched() == 0 && !s.support_keywords
            },
        },
        ClassificationRule {
            name: "default_support",
            intent: Intent::Support,
            predicate: |_| true,
        },
    ]
}

/// Domain lists the classifier consults.
#[derive(Debug, Clone, Default)]
pub struct ClassifierDomains {
    pub supplier: Vec<String>,
    /// Customers and OEMs the company already deals with.
    pub known: Vec<String>,
}

pub struct Classifier {
    rules: Vec<ClassificationRule>,
    order_markers: Regex,
    invoice_markers: Regex,
    supplier_keywords: Regex,
    complaint_keywords: Regex,
    support_keywords: Regex,
    supplier_domains: HashSet<String>,
    known_domains: HashSet<String>,
    expedite: ExpediteDetector,
    parser: Arc<dyn AttachmentParser>,
}

impl Classifier {
    pub fn new(domains: ClassifierDomains, parser: Arc<dyn AttachmentParser>) -> Self {
        let lower = |v: Vec<String>| v.into_iter().map(|d| d.to_lowercase()).collect();
        Self {
            rules: default_rules(),
            order_markers: Regex::new(
                r"(?i)\b(purchase\s+order|po[\s#-]?\d+|order\s+(form|request)|place\s+an\s+order|we\s+(would\s+like|wish|want)\s+to\s+order)\b",
            )
            .unwrap(),
            invoice_markers: Regex::new(
                r"(?i)\b(invoices?|inv[\s#-]?\d+|amount\s+due|remittance|billing\s+statement)\b",
            )
            .unwrap(),
            supplier_keywords: Regex::new(
                r"(?i)\b(supplier|vendor|raw\s+materials?|delivery\s+note|price\s+list|our\s+quotation)\b",
            )
            .unwrap(),
            complaint_keywords: Regex::new(
                r"(?i)\b(defect(ive|s)?|broken|damaged|faulty|complain(t|ts|ing)?|refund|not\s+working|wrong\s+(item|part)s?|quality\s+issues?)\b",
            )
            .unwrap(),
            support_keywords: Regex::new(
                r"(?i)\b(help|question|support|how\s+(do|can)|where\s+is|status|tracking|manual|warranty|information)\b",
            )
            .unwrap(),
            supplier_domains: lower(domains.supplier),
            known_domains: lower(domains.known),
            expedite: ExpediteDetector::new(),
            parser,
        }
    }

    /// Gather the facts every rule reads. Parser failures degrade to text-only signals.
    pub fn signals(&self, message: &InboundMessage) -> Signals {
        let text = message.searchable_text();

        let mut attachment_kind = None;
        for attachment in message.attachments.iter().filter(|a| a.is_pdf()) {
            match self.parser.parse(attachment) {
                Ok(parsed) if parsed.kind != AttachmentKind::Unknown => {
                    if attachment_kind.is_some_and(|k| k != parsed.kind) {
                        // Order and invoice documents in one mail: no structured verdict.
                        attachment_kind = Some(AttachmentKind::Unknown);
                        break;
                    }
                    attachment_kind = Some(parsed.kind);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "Attachment parse failed, falling back to keyword classification"
                    );
                }
            }
        }

        Signals {
            has_pdf: message.has_pdf,
            attachment_kind,
            order_markers: self.order_markers.is_match(&text),
            invoice_markers: self.invoice_markers.is_match(&text),
            supplier_domain: domain_matches(&message.sender_domain, &self.supplier_domains),
            supplier_keywords: self.supplier_keywords.is_match(&text),
            complaint_keywords: self.complaint_keywords.is_match(&text),
            support_keywords: self.support_keywords.is_match(&text),
            known_domain: domain_matches(&message.sender_domain, &self.known_domains)
                || domain_matches(&message.sender_domain, &self.supplier_domains),
        }
    }

    /// Pure function of message content.
    pub fn classify(&self, message: &InboundMessage) -> Classification {
        let signals = self.signals(message);
        let (intent, rule) = self
            .rules
            .iter()
            .find(|r| (r.predicate)(&signals))
            .map(|r| (r.intent, r.name))
            .unwrap_or((Intent::Support, "default_support"));

        let urgent = self.expedite.detect(&message.body);

        debug!(
            message_id = %message.id,
            intent = %intent,
            rule,
            urgent,
            "Message classified"
        );

        Classification {
            intent,
            urgent,
            rule: rule.to_string(),
        }
    }
}
