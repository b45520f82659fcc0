//! Raw email ingestion: RFC 822 bytes to a pipeline ingestion request.

use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser, MimeHeaders};

use crate::error::ValidationError;
use crate::pipeline::types::{Attachment, NewMessage};

/// Parse a raw email into a [`NewMessage`].
///
/// Text attachments keep their contents so the attachment parser can read
/// them. PDFs are passed through by name and content type only.
pub fn parse_raw(raw: &[u8]) -> Result<NewMessage, ValidationError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| ValidationError::Unparseable("not an RFC 822 message".into()))?;

    let sender = extract_sender(&parsed).ok_or(ValidationError::MissingField("from"))?;
    let subject = parsed.subject().unwrap_or_default().trim().to_string();
    let body = extract_body(&parsed);
    let attachments = extract_attachments(&parsed);
    let has_pdf = attachments.iter().any(Attachment::is_pdf);

    let is_reply = !matches!(parsed.in_reply_to(), HeaderValue::Empty) || is_reply_subject(&subject);

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0));

    Ok(NewMessage {
        id: None,
        received_at,
        sender,
        subject: Some(subject),
        body: Some(body),
        attachments,
        has_pdf,
        is_reply,
    })
}

/// Sender address from the first `From` entry.
fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

fn extract_attachments(parsed: &mail_parser::Message) -> Vec<Attachment> {
    let mut out = Vec::new();
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        let name = MimeHeaders::attachment_name(part).unwrap_or("attachment").to_string();
        let content_type = MimeHeaders::content_type(part)
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".into())
            .to_lowercase();

        let mut attachment = Attachment::new(name, content_type.clone());
        if content_type.starts_with("text/")
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            attachment = attachment.with_text(text);
        }
        out.push(attachment);
    }
    out
}

fn is_reply_subject(subject: &str) -> bool {
    let lower = subject.trim_start().to_lowercase();
    lower.starts_with("re:") || lower.starts_with("aw:")
}

/// Drop tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
