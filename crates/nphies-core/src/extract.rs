//! Flattens a poll-response bundle into discrete messages.
//!
//! The response is a FHIR `Bundle`. Each entry is either a nested message
//! bundle (a `MessageHeader` plus its focal resource) or a bare resource.
//! The top-level `MessageHeader` describing the poll response itself is
//! skipped.

use serde_json::Value;

use crate::error::{PollError, Result};

/// One message as it came off the wire, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Position of the entry in the response bundle.
    pub entry_index: usize,
    pub resource_type: String,
    pub event_code: Option<String>,
    /// Correlation reference as found in the payload; not yet validated.
    pub correlation: Option<String>,
    pub payload: Value,
}

/// Split `raw` into messages. Any structural problem rejects the whole bundle.
pub fn extract(raw: &str) -> Result<Vec<RawMessage>> {
    let bundle: Value = serde_json::from_str(raw)
        .map_err(|e| PollError::MalformedBundle(format!("response is not JSON: {e}")))?;

    let obj = bundle
        .as_object()
        .ok_or_else(|| malformed("response is not a JSON object"))?;
    match obj.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => {}
        Some(other) => {
            return Err(malformed(format!(
                "expected resourceType Bundle, got {other}"
            )))
        }
        None => return Err(malformed("response has no resourceType")),
    }

    let entries = match obj.get("entry") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(malformed("entry is not an array")),
    };

    let mut messages = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let resource = entry
            .get("resource")
            .filter(|r| r.is_object())
            .ok_or_else(|| malformed(format!("entry {index} has no resource")))?;
        let resource_type = resource_type_of(resource)
            .ok_or_else(|| malformed(format!("entry {index} resource has no resourceType")))?;

        match resource_type {
            // Header of the poll response itself.
            "MessageHeader" => continue,
            "Bundle" => messages.push(from_message_bundle(index, resource)?),
            other => messages.push(RawMessage {
                entry_index: index,
                resource_type: other.to_string(),
                event_code: None,
                correlation: request_identifier(resource),
                payload: resource.clone(),
            }),
        }
    }
    Ok(messages)
}

fn from_message_bundle(index: usize, bundle: &Value) -> Result<RawMessage> {
    let entries = bundle
        .get("entry")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(format!("message bundle at entry {index} has no entries")))?;

    let resources: Vec<&Value> = entries
        .iter()
        .filter_map(|e| e.get("resource"))
        .filter(|r| r.is_object())
        .collect();

    let header = resources
        .iter()
        .copied()
        .find(|r| resource_type_of(r) == Some("MessageHeader"));
    let focal = resources
        .iter()
        .copied()
        .find(|r| resource_type_of(r).is_some_and(|t| t != "MessageHeader"))
        .or(header)
        .ok_or_else(|| malformed(format!("message bundle at entry {index} is empty")))?;

    let resource_type = resource_type_of(focal)
        .ok_or_else(|| malformed(format!("message bundle at entry {index} has untyped focus")))?;

    let event_code = header.and_then(|h| {
        h.pointer("/eventCoding/code")
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    // The header's response block is authoritative; fall back to the focal
    // resource's own request reference.
    let correlation = header
        .and_then(|h| h.pointer("/response/identifier"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| request_identifier(focal));

    Ok(RawMessage {
        entry_index: index,
        resource_type: resource_type.to_string(),
        event_code,
        correlation,
        payload: focal.clone(),
    })
}

fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

fn request_identifier(resource: &Value) -> Option<String> {
    resource
        .pointer("/request/identifier/value")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn malformed(msg: impl Into<String>) -> PollError {
    PollError::MalformedBundle(msg.into())
}
