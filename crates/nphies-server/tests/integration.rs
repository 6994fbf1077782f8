use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use nphies_core::config::Config;
use nphies_core::error::TransportError;
use nphies_core::store::{NewRecord, PollStore};
use nphies_core::transport::Transport;
use nphies_core::types::BusinessTable;
use nphies_core::Poller;
use nphies_server::state::AppState;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Exchange stand-in answering from a queue; `None` hangs until cancelled.
struct QueuedExchange {
    replies: Mutex<VecDeque<Option<String>>>,
}

impl Transport for QueuedExchange {
    fn request_bundle(&self) -> String {
        r#"{"resourceType":"Bundle","type":"message"}"#.to_string()
    }

    fn poll<'a>(&'a self, _request: &'a str) -> BoxFuture<'a, Result<String, TransportError>> {
        let next = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(Some(body)) => Ok(body),
                Some(None) => futures::future::pending().await,
                None => Ok(EMPTY.to_string()),
            }
        })
    }
}

const EMPTY: &str = r#"{"resourceType":"Bundle","entry":[]}"#;

fn app_with(replies: Vec<Option<String>>) -> (axum::Router, AppState) {
    let transport = Arc::new(QueuedExchange {
        replies: Mutex::new(replies.into()),
    });
    let store = Arc::new(PollStore::in_memory().unwrap());
    let poller = Arc::new(Poller::new(
        transport,
        store,
        &Config::new("https://exchange.test/poll"),
    ));
    let state = AppState::new(poller);
    (nphies_server::build_router(state.clone()), state)
}

/// Send a request via `oneshot` and return (status, parsed JSON body).
async fn send(app: axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri).await
}

async fn post(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri).await
}

fn claim_response_bundle(correlation: &str) -> String {
    serde_json::json!({
        "resourceType": "Bundle",
        "entry": [
            { "resource": {
                "resourceType": "ClaimResponse",
                "outcome": "complete",
                "request": { "identifier": { "value": correlation } }
            } },
            { "resource": { "resourceType": "PaymentReconciliation", "paymentDate": "2026-05-01" } }
        ]
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// Stats and logs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_start_empty() {
    let (app, _) = app_with(vec![]);
    let (status, body) = get(app, "/api/poll/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalPolls"], 0);
    assert_eq!(body["matchRatePercent"], 0.0);
    assert!(body["lastPollAt"].is_null());
}

#[tokio::test]
async fn trigger_then_read_back_logs() {
    let (app, state) = app_with(vec![Some(claim_response_bundle("req-77"))]);
    state
        .store()
        .insert_record(&NewRecord::awaiting(BusinessTable::ClaimSubmissions, "req-77"))
        .unwrap();

    let (status, body) = post(app.clone(), "/api/poll/trigger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "success");
    assert_eq!(body["stats"]["received"], 2);
    assert_eq!(body["stats"]["matched"], 1);
    assert_eq!(body["stats"]["unmatched"], 1);
    assert_eq!(body["messages"][0]["matchStrategy"], "direct_correlation");
    assert_eq!(body["messages"][0]["matchedTable"], "claim_submissions");
    assert!(body["pollBundle"].is_object());
    let id = body["pollLogId"].as_i64().unwrap();

    let (status, page) = get(app.clone(), "/api/poll/logs?page=1&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["totalPages"], 1);
    assert_eq!(page["logs"][0]["id"], id);
    assert!(page["logs"][0].get("responseBundle").is_none());

    let (status, detail) = get(app.clone(), &format!("/api/poll/logs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["messages"].as_array().unwrap().len(), 2);
    assert_eq!(detail["processingSummary"]["ClaimResponse"]["matched"], 1);
    assert_eq!(
        detail["processingSummary"]["PaymentReconciliation"]["unmatched"],
        1
    );

    let (_, stats) = get(app, "/api/poll/stats").await;
    assert_eq!(stats["totalPolls"], 1);
    assert_eq!(stats["totalMessages"], 2);
    assert_eq!(stats["matchRatePercent"], 50.0);
}

#[tokio::test]
async fn unknown_log_is_404() {
    let (app, _) = app_with(vec![]);
    let (status, body) = get(app, "/api/poll/logs/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999"));
}

#[tokio::test]
async fn bad_pagination_is_400() {
    let (app, _) = app_with(vec![]);
    let (status, _) = get(app.clone(), "/api/poll/logs?page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(app, "/api/poll/logs?limit=500").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_response_reports_failure_in_body() {
    let (app, _) = app_with(vec![Some("not json".to_string())]);
    let (status, body) = post(app, "/api/poll/trigger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "error");
    assert_eq!(body["errors"][0]["code"], "MalformedBundle");
    assert_eq!(body["responseBundle"], "not json");
    assert_eq!(body["messages"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// Single flight and cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_trigger_is_409_and_cancel_finalizes() {
    let (app, state) = app_with(vec![None]);

    let first = {
        let app = app.clone();
        tokio::spawn(async move { post(app, "/api/poll/trigger").await })
    };
    while state.store().in_progress_log().unwrap().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Let the run reach the exchange call.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (status, body) = post(app.clone(), "/api/poll/trigger").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "poll already running");

    let (status, body) = post(app.clone(), "/api/poll/cancel").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["errors"][0]["code"], "Cancelled");
    assert!(state.store().in_progress_log().unwrap().is_none());

    let (_, body) = post(app, "/api/poll/cancel").await;
    assert_eq!(body["cancelled"], false);
}
