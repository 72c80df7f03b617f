//! RecordingTransport - scripted `WebhookTransport` that keeps every request.
//!
//! Used by tests and by `hookline demo --dry-run`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{OutboundRequest, TransportError, TransportResponse, WebhookTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Respond { status: u16, body: String },
    /// Never answers; the caller's timeout decides.
    Hang,
    Refuse,
}

impl Scripted {
    pub fn status(status: u16) -> Self {
        Scripted::Respond {
            status,
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub at: Instant,
}

impl RecordedRequest {
    /// First header with this name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct RecordingTransport {
    fallback: Scripted,
    routes: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingTransport {
    /// Answers 200 to every URL without a script.
    pub fn new() -> Self {
        Self::with_fallback(Scripted::Respond {
            status: 200,
            body: "ok".into(),
        })
    }

    pub fn with_fallback(fallback: Scripted) -> Self {
        Self {
            fallback,
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn script(&self, url: impl Into<String>, behaviour: Scripted) {
        self.routes.lock().await.insert(url.into(), behaviour);
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let behaviour = self
            .routes
            .lock()
            .await
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        self.requests.lock().await.push(RecordedRequest {
            url: request.url.clone(),
            headers: request.headers,
            body: request.body,
            at: Instant::now(),
        });

        match behaviour {
            Scripted::Respond { status, body } => Ok(TransportResponse { status, body }),
            Scripted::Hang => std::future::pending().await,
            Scripted::Refuse => Err(TransportError::Connect(format!("{} refused the connection", request.url))),
        }
    }
}
