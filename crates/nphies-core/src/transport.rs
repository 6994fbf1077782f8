//! Outbound poll call to the exchange.
//!
//! The transport returns the raw response body or a [`TransportError`]. It
//! never retries; the next manual or scheduled trigger is the retry.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::config::{ExchangeAuth, ExchangeConfig};
use crate::error::TransportError;

/// Response bodies longer than this are cut in `TransportError::Status`.
const MAX_ERROR_BODY: usize = 512;

pub trait Transport: Send + Sync {
    /// A fresh poll-request bundle, kept on the log for audit.
    fn request_bundle(&self) -> String;

    /// Send `request` and return the raw response bundle.
    fn poll<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<String, TransportError>>;
}

/// Poll over HTTPS with the credentials from config.
pub struct HttpTransport {
    client: Client,
    endpoint: reqwest::Url,
    auth: ExchangeAuth,
    timeout: Duration,
    sender_id: String,
    receiver_id: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new(config: &ExchangeConfig) -> Result<Self, TransportError> {
        let endpoint = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| TransportError::Build(format!("endpoint '{}': {e}", config.endpoint)))?;
        let timeout = config.timeout().max(Duration::from_secs(1));
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            auth: config.auth.clone(),
            timeout,
            sender_id: config.sender_id.clone(),
            receiver_id: config.receiver_id.clone(),
        })
    }

    async fn send(&self, request: &str) -> Result<String, TransportError> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/fhir+json")
            .header(reqwest::header::ACCEPT, "application/fhir+json")
            .body(request.to_string());
        builder = match &self.auth {
            ExchangeAuth::None => builder,
            ExchangeAuth::Bearer { token } => builder.bearer_auth(token),
            ExchangeAuth::Basic { username, password } => builder.basic_auth(username, password.as_ref()),
        };

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response.text().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

impl Transport for HttpTransport {
    fn request_bundle(&self) -> String {
        poll_request(&self.sender_id, &self.receiver_id, self.endpoint.as_str())
    }

    fn poll<'a>(&'a self, request: &'a str) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(self.send(request))
    }
}

/// A poll-request message bundle: a `MessageHeader` focused on a poll `Task`.
pub fn poll_request(sender_id: &str, receiver_id: &str, endpoint: &str) -> String {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let header_id = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    json!({
        "resourceType": "Bundle",
        "id": Uuid::new_v4().to_string(),
        "type": "message",
        "timestamp": now,
        "entry": [
            {
                "fullUrl": format!("urn:uuid:{header_id}"),
                "resource": {
                    "resourceType": "MessageHeader",
                    "id": header_id.to_string(),
                    "eventCoding": { "code": "poll-request" },
                    "sender": { "identifier": { "value": sender_id } },
                    "destination": [{
                        "endpoint": endpoint,
                        "receiver": { "identifier": { "value": receiver_id } }
                    }],
                    "focus": [{ "reference": format!("urn:uuid:{task_id}") }]
                }
            },
            {
                "fullUrl": format!("urn:uuid:{task_id}"),
                "resource": {
                    "resourceType": "Task",
                    "id": task_id.to_string(),
                    "status": "requested",
                    "intent": "order",
                    "code": { "coding": [{ "code": "poll" }] },
                    "requester": { "identifier": { "value": sender_id } },
                    "owner": { "identifier": { "value": receiver_id } },
                    "authoredOn": now
                }
            }
        ]
    })
    .to_string()
}
