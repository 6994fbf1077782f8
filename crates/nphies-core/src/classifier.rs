use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::extract::RawMessage;
use crate::types::MessageType;

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-.:_/]{1,128}$").expect("valid regex"))
}

/// A correlation identifier is usable only if it matches the exchange's id
/// grammar exactly. No trimming.
pub fn is_valid_identifier(id: &str) -> bool {
    identifier_re().is_match(id)
}

/// A raw message labeled with its origin. Classification never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedMessage {
    pub entry_index: usize,
    pub resource_type: String,
    pub event_code: Option<String>,
    pub message_type: MessageType,
    /// Kept even when invalid, for audit.
    pub response_identifier: Option<String>,
    pub payload: Value,
}

impl ClassifiedMessage {
    /// The identifier usable for direct correlation, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self.message_type {
            MessageType::Solicited => self.response_identifier.as_deref(),
            MessageType::Unsolicited | MessageType::Unknown => None,
        }
    }
}

pub fn classify(raw: RawMessage) -> ClassifiedMessage {
    let message_type = match raw.correlation.as_deref() {
        None => MessageType::Unsolicited,
        Some(id) if is_valid_identifier(id) => MessageType::Solicited,
        Some(_) => MessageType::Unknown,
    };

    ClassifiedMessage {
        entry_index: raw.entry_index,
        resource_type: raw.resource_type,
        event_code: raw.event_code,
        message_type,
        response_identifier: raw.correlation,
        payload: raw.payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(correlation: Option<&str>) -> RawMessage {
        RawMessage {
            entry_index: 0,
            resource_type: "ClaimResponse".to_string(),
            event_code: Some("claim-response".to_string()),
            correlation: correlation.map(str::to_string),
            payload: json!({ "resourceType": "ClaimResponse" }),
        }
    }

    #[test]
    fn valid_identifier_is_solicited() {
        let m = classify(raw(Some("b1c2-77f0.req")));
        assert_eq!(m.message_type, MessageType::Solicited);
        assert_eq!(m.correlation_id(), Some("b1c2-77f0.req"));
        assert_eq!(m.event_code.as_deref(), Some("claim-response"));
    }

    #[test]
    fn absent_identifier_is_unsolicited() {
        let m = classify(raw(None));
        assert_eq!(m.message_type, MessageType::Unsolicited);
        assert_eq!(m.correlation_id(), None);
    }

    #[test]
    fn malformed_identifier_is_unknown_but_kept() {
        for bad in ["", " req-1", "req 1", "req#1"] {
            let m = classify(raw(Some(bad)));
            assert_eq!(m.message_type, MessageType::Unknown, "{bad:?}");
            assert_eq!(m.response_identifier.as_deref(), Some(bad));
            assert_eq!(m.correlation_id(), None);
        }
    }

    #[test]
    fn identifier_length_is_bounded() {
        assert!(is_valid_identifier(&"a".repeat(128)));
        assert!(!is_valid_identifier(&"a".repeat(129)));
    }
}
