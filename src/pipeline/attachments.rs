//! Attachment parsing seam and line-item extraction.
//!
//! The real PDF parser is an external collaborator. The classifier only
//! needs to know whether an attachment looks like an order or an invoice,
//! so the default implementation works on file names and any text the
//! ingesting channel extracted.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::orders::model::LineItem;
use crate::pipeline::types::Attachment;

/// What a parsed attachment turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Order,
    Invoice,
    Unknown,
}

/// Structured result of parsing one attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAttachment {
    pub kind: AttachmentKind,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl ParsedAttachment {
    pub fn unknown() -> Self {
        Self {
            kind: AttachmentKind::Unknown,
            line_items: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Attachment {name} could not be parsed: {reason}")]
pub struct ParseError {
    pub name: String,
    pub reason: String,
}

/// Parser for structured attachments (purchase orders, invoices).
pub trait AttachmentParser: Send + Sync {
    fn parse(&self, attachment: &Attachment) -> Result<ParsedAttachment, ParseError>;
}

static ORDER_DOC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(purchase[\s_-]*order|\bpo[\s_#-]*\d+|order[\s_-]*form)").unwrap()
});

static INVOICE_DOC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(invoice|\binv[\s_#-]*\d+|amount\s+due)").unwrap());

static LINE_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z]{2,}-?\d[a-z0-9-]*)\s*(?:x|×|qty:?)\s*(\d{1,6})\b").unwrap()
});

/// Default parser: decides by file name, then by extracted text.
#[derive(Debug, Default, Clone)]
pub struct KeywordAttachmentParser;

impl AttachmentParser for KeywordAttachmentParser {
    fn parse(&self, attachment: &Attachment) -> Result<ParsedAttachment, ParseError> {
        if !attachment.is_pdf() {
            return Ok(ParsedAttachment::unknown());
        }

        let text = attachment.text.as_deref().unwrap_or_default();
        if text.contains('\u{FFFD}') {
            return Err(ParseError {
                name: attachment.name.clone(),
                reason: "undecodable text layer".into(),
            });
        }

        let haystack = format!("{}\n{}", attachment.name, text);
        let order = ORDER_DOC.is_match(&haystack);
        let invoice = INVOICE_DOC.is_match(&haystack);
        let kind = match (order, invoice) {
            (true, false) => AttachmentKind::Order,
            (false, true) => AttachmentKind::Invoice,
            _ => AttachmentKind::Unknown,
        };
        let line_items = if kind == AttachmentKind::Order {
            extract_line_items(text)
        } else {
            Vec::new()
        };

        Ok(ParsedAttachment { kind, line_items })
    }
}

/// Pull `SKU x QTY` pairs out of free text. Repeated SKUs are summed.
pub fn extract_line_items(text: &str) -> Vec<LineItem> {
    let mut items: Vec<LineItem> = Vec::new();
    for caps in LINE_ITEM.captures_iter(text) {
        let sku = caps[1].to_uppercase();
        let Ok(quantity) = caps[2].parse::<u32>() else {
            continue;
        };
        if quantity == 0 {
            continue;
        }
        match items.iter_mut().find(|i| i.sku == sku) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
            None => items.push(LineItem::new(sku, quantity)),
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_pdf_is_unknown() {
        let parsed = KeywordAttachmentParser
            .parse(&Attachment::new("purchase_order.docx", "application/msword"))
            .unwrap();
        assert_eq!(parsed.kind, AttachmentKind::Unknown);
    }

    #[test]
    fn purchase_order_by_name() {
        let parsed = KeywordAttachmentParser
            .parse(&Attachment::new("PO-4411.pdf", "application/pdf"))
            .unwrap();
        assert_eq!(parsed.kind, AttachmentKind::Order);
    }

    #[test]
    fn invoice_by_text() {
        let att = Attachment::new("scan.pdf", "application/pdf")
            .with_text("Invoice 2024-118\nAmount due: 1,200.00");
        let parsed = KeywordAttachmentParser.parse(&att).unwrap();
        assert_eq!(parsed.kind, AttachmentKind::Invoice);
    }

    #[test]
    fn order_with_line_items() {
        let att = Attachment::new("order.pdf", "application/pdf")
            .with_text("Purchase Order\nBRK-200 x 40\nGSK-12 x 10\nBRK-200 x 5");
        let parsed = KeywordAttachmentParser.parse(&att).unwrap();
        assert_eq!(parsed.kind, AttachmentKind::Order);
        assert_eq!(parsed.line_items.len(), 2);
        assert_eq!(parsed.line_items[0].sku, "BRK-200");
        assert_eq!(parsed.line_items[0].quantity, 45);
    }

    #[test]
    fn garbled_text_is_a_parse_error() {
        let att = Attachment::new("order.pdf", "application/pdf").with_text("\u{FFFD}\u{FFFD}");
        assert!(KeywordAttachmentParser.parse(&att).is_err());
    }

    #[test]
    fn line_items_skip_zero_quantity() {
        let items = extract_line_items("Please send ABC-1 x 0 and XYZ-9 qty: 3");
        assert_eq!(items, vec![LineItem::new("XYZ-9", 3)]);
    }
}
