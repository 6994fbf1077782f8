//! Field extraction from message payloads: which table a message belongs
//! to, which business identifiers it carries, and the counterpart keys used
//! by heuristic matching.

use chrono::NaiveDate;
use serde_json::Value;

use crate::types::{BusinessTable, RecordStatus};

/// Table a message reconciles against, from its resource type and event.
pub fn route(resource_type: &str, event_code: Option<&str>, payload: &Value) -> Option<BusinessTable> {
    match resource_type {
        "ClaimResponse" => {
            let event = event_code.unwrap_or_default();
            if event.starts_with("advanced-authorization") {
                Some(BusinessTable::AdvancedAuthorizations)
            } else if event.starts_with("priorauth")
                || payload.get("use").and_then(Value::as_str) == Some("preauthorization")
            {
                Some(BusinessTable::PriorAuthorizations)
            } else {
                Some(BusinessTable::ClaimSubmissions)
            }
        }
        "PaymentReconciliation" | "PaymentNotice" => Some(BusinessTable::ClaimSubmissions),
        "CoverageEligibilityResponse" => Some(BusinessTable::EligibilityChecks),
        "CommunicationRequest" | "Communication" => Some(BusinessTable::Communications),
        _ => None,
    }
}

/// Domain identifiers (claim numbers, pre-auth references) carried by the
/// payload, deduplicated, in extraction order.
pub fn business_identifiers(payload: &Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut push = |v: Option<&str>| {
        if let Some(v) = v.map(str::trim).filter(|v| !v.is_empty()) {
            if !ids.iter().any(|existing| existing == v) {
                ids.push(v.to_string());
            }
        }
    };

    push(str_at(payload, "/request/identifier/value"));
    for v in array_at(payload, "/preAuthRef") {
        push(v.as_str());
    }
    for v in array_at(payload, "/identifier") {
        push(str_at(v, "/value"));
    }
    for v in array_at(payload, "/detail") {
        push(str_at(v, "/request/identifier/value"));
    }
    for v in array_at(payload, "/about") {
        push(str_at(v, "/identifier/value"));
    }
    for v in array_at(payload, "/basedOn") {
        push(str_at(v, "/identifier/value"));
    }
    ids
}

/// Who/whom/when keys used when no identifier resolves a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterpartKeys {
    pub patient_id: String,
    pub provider_id: String,
    pub service_date: NaiveDate,
}

/// All three keys must be present; a partial key set never matches.
pub fn counterpart_keys(payload: &Value) -> Option<CounterpartKeys> {
    let patient_id = party(payload, "/patient")?;
    let provider_id = party(payload, "/requestor")
        .or_else(|| party(payload, "/provider"))
        .or_else(|| {
            array_at(payload, "/detail")
                .first()
                .and_then(|d| party(d, "/provider"))
        })?;
    let service_date = ["/created", "/paymentDate", "/sent"]
        .iter()
        .find_map(|p| str_at(payload, p))
        .and_then(parse_date)?;

    Some(CounterpartKeys {
        patient_id,
        provider_id,
        service_date,
    })
}

/// Status to write back onto the matched record.
pub fn derived_status(payload: &Value) -> RecordStatus {
    if let Some(outcome) = str_at(payload, "/outcome") {
        return match outcome {
            "complete" => RecordStatus::Approved,
            "partial" => RecordStatus::Partial,
            "error" => RecordStatus::Rejected,
            "queued" => RecordStatus::Queued,
            _ => RecordStatus::Responded,
        };
    }
    match str_at(payload, "/status") {
        Some("active") | Some("completed") => RecordStatus::Received,
        Some("cancelled") | Some("entered-in-error") => RecordStatus::Cancelled,
        _ => RecordStatus::Responded,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn array_at<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// A FHIR reference: identifier value when present, else the literal reference.
fn party(value: &Value, pointer: &str) -> Option<String> {
    let node = value.pointer(pointer)?;
    str_at(node, "/identifier/value")
        .or_else(|| str_at(node, "/reference"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claim_response_routes_by_event() {
        let p = json!({});
        assert_eq!(
            route("ClaimResponse", Some("priorauth-response"), &p),
            Some(BusinessTable::PriorAuthorizations)
        );
        assert_eq!(
            route("ClaimResponse", Some("advanced-authorization"), &p),
            Some(BusinessTable::AdvancedAuthorizations)
        );
        assert_eq!(
            route("ClaimResponse", Some("claim-response"), &p),
            Some(BusinessTable::ClaimSubmissions)
        );
        assert_eq!(
            route("ClaimResponse", None, &json!({ "use": "preauthorization" })),
            Some(BusinessTable::PriorAuthorizations)
        );
    }

    #[test]
    fn unknown_resources_are_unroutable() {
        assert_eq!(route("Patient", None, &json!({})), None);
        assert_eq!(
            route("PaymentReconciliation", Some("payment-notice"), &json!({})),
            Some(BusinessTable::ClaimSubmissions)
        );
    }

    #[test]
    fn business_identifiers_collects_and_dedups() {
        let p = json!({
            "request": { "identifier": { "value": "CLM-1" } },
            "preAuthRef": ["PA-7", "CLM-1"],
            "identifier": [ { "value": "RESP-3" }, { "system": "x" } ],
            "detail": [ { "request": { "identifier": { "value": "CLM-2" } } } ],
        });
        assert_eq!(
            business_identifiers(&p),
            vec!["CLM-1", "PA-7", "RESP-3", "CLM-2"]
        );
    }

    #[test]
    fn counterpart_keys_need_all_three() {
        let p = json!({
            "patient": { "identifier": { "value": "2234567890" } },
            "requestor": { "reference": "Organization/prov-1" },
            "created": "2026-03-04T10:00:00+03:00",
        });
        let keys = counterpart_keys(&p).unwrap();
        assert_eq!(keys.patient_id, "2234567890");
        assert_eq!(keys.provider_id, "Organization/prov-1");
        assert_eq!(keys.service_date, NaiveDate::from_ymd_opt(2026, 3, 4).unwrap());

        let no_date = json!({
            "patient": { "reference": "Patient/1" },
            "requestor": { "reference": "Organization/1" },
        });
        assert_eq!(counterpart_keys(&no_date), None);
    }

    #[test]
    fn payment_keys_fall_back_to_detail_provider() {
        let p = json!({
            "patient": { "reference": "Patient/1" },
            "paymentDate": "2026-05-01",
            "detail": [ { "provider": { "identifier": { "value": "PR-9" } } } ],
        });
        let keys = counterpart_keys(&p).unwrap();
        assert_eq!(keys.provider_id, "PR-9");
    }

    #[test]
    fn derived_status_maps_outcome_and_status() {
        assert_eq!(derived_status(&json!({ "outcome": "complete" })), RecordStatus::Approved);
        assert_eq!(derived_status(&json!({ "outcome": "error" })), RecordStatus::Rejected);
        assert_eq!(derived_status(&json!({ "status": "active" })), RecordStatus::Received);
        assert_eq!(derived_status(&json!({})), RecordStatus::Responded);
    }
}
