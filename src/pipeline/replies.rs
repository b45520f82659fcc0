//! Reply template selection and the formatter seam.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::types::{Handler, Intent};

/// Template used whenever nothing more specific applies or rendering fails.
pub const GENERIC_ACK: &str = "generic_ack";

/// Last-resort text when even the generic template cannot be rendered.
const FALLBACK_TEXT: &str =
    "Thank you for your message. We have received it and will get back to you shortly.";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Template {key} is missing value for {{{field}}}")]
    MissingField { key: String, field: String },
}

/// Renders a reply from a template key and a JSON context.
pub trait ReplyFormatter: Send + Sync {
    fn render(&self, template_key: &str, context: &serde_json::Value) -> Result<String, RenderError>;
}

/// A reply ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedReply {
    pub template_key: String,
    pub text: String,
}

/// Pick the template for a routing outcome.
pub fn template_for(handler: Handler, intent: Intent) -> &'static str {
    match (handler, intent) {
        (Handler::Management, _) | (_, Intent::Ambiguous) => GENERIC_ACK,
        (Handler::Orders, Intent::Order) => "order_received",
        (Handler::Finance, _) => "invoice_received",
        (Handler::Quality, _) => "complaint_received",
        (Handler::Procurement, _) => "supplier_ack",
        (Handler::Support, _) => "support_ack",
        _ => GENERIC_ACK,
    }
}

/// Render `key`; on any error fall back to the generic acknowledgment.
/// Never fails.
pub fn render_or_fallback(
    formatter: &dyn ReplyFormatter,
    key: &str,
    context: &serde_json::Value,
) -> RenderedReply {
    match formatter.render(key, context) {
        Ok(text) => RenderedReply {
            template_key: key.to_string(),
            text,
        },
        Err(e) => {
            warn!(template = key, error = %e, "Reply rendering failed, using generic acknowledgment");
            let text = formatter
                .render(GENERIC_ACK, context)
                .unwrap_or_else(|_| FALLBACK_TEXT.to_string());
            RenderedReply {
                template_key: GENERIC_ACK.to_string(),
                text,
            }
        }
    }
}

/// Simple `{placeholder}` templates keyed by name.
#[derive(Debug, Clone)]
pub struct TemplateFormatter {
    templates: HashMap<String, String>,
}

impl TemplateFormatter {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    pub fn with_defaults() -> Self {
        let templates = [
            (GENERIC_ACK, "Dear {sender},\n\nThank you for your message \"{subject}\". We have received it and will respond shortly."),
            ("order_received", "Dear {sender},\n\nThank you for your order \"{subject}\". Our order desk is processing it and will confirm the ship date shortly."),
            ("invoice_received", "Dear {sender},\n\nWe have received your invoice \"{subject}\" and forwarded it to our finance team."),
            ("complaint_received", "Dear {sender},\n\nWe are sorry to hear about the issue described in \"{subject}\". Our quality team will contact you as a priority."),
            ("supplier_ack", "Dear {sender},\n\nThank you for your message \"{subject}\". Our procurement team will review it."),
            ("support_ack", "Dear {sender},\n\nThank you for contacting us about \"{subject}\". A member of our support team will reply soon."),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { templates }
    }
}

impl ReplyFormatter for TemplateFormatter {
    fn render(&self, template_key: &str, context: &serde_json::Value) -> Result<String, RenderError> {
        let template = self
            .templates
            .get(template_key)
            .ok_or_else(|| RenderError::UnknownTemplate(template_key.to_string()))?;

        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let field = &after[..end];
            let value = match context.get(field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => {
                    return Err(RenderError::MissingField {
                        key: template_key.to_string(),
                        field: field.to_string(),
                    });
                }
                Some(other) => other.to_string(),
            };
            out.push_str(&value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_placeholders() {
        let f = TemplateFormatter::with_defaults();
        let text = f
            .render("order_received", &json!({"sender": "Acme", "subject": "PO-1"}))
            .unwrap();
        assert!(text.contains("Dear Acme"));
        assert!(text.contains("\"PO-1\""));
    }

    #[test]
    fn missing_field_is_an_error() {
        let f = TemplateFormatter::with_defaults();
        assert!(matches!(
            f.render("order_received", &json!({"sender": "Acme"})),
            Err(RenderError::MissingField { .. })
        ));
    }

    #[test]
    fn unknown_template_falls_back_to_generic() {
        let f = TemplateFormatter::with_defaults();
        let reply = render_or_fallback(&f, "no_such", &json!({"sender": "A", "subject": "S"}));
        assert_eq!(reply.template_key, GENERIC_ACK);
        assert!(reply.text.contains("Dear A"));
    }

    #[test]
    fn fallback_never_fails() {
        let f = TemplateFormatter::new(HashMap::new());
        let reply = render_or_fallback(&f, "order_received", &json!({}));
        assert_eq!(reply.template_key, GENERIC_ACK);
        assert_eq!(reply.text, FALLBACK_TEXT);
    }

    #[test]
    fn template_selection() {
        assert_eq!(template_for(Handler::Orders, Intent::Order), "order_received");
        assert_eq!(template_for(Handler::Management, Intent::Order), GENERIC_ACK);
        assert_eq!(template_for(Handler::Support, Intent::Ambiguous), GENERIC_ACK);
        assert_eq!(template_for(Handler::Finance, Intent::Invoice), "invoice_received");
    }
}
