//! Upstream API client
//!
//! Thin wrapper over `reqwest` that owns the credential header, the request
//! timeout, and the retry/backoff policy for transient failures. Rate limits
//! (HTTP 429), server errors, and network blips are retried with exponential
//! backoff up to the configured budget; anything else is terminal on the first
//! response.

use fecsync_common::{Result, SyncError};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{ApiConfig, RetryConfig};

/// How much response body to carry into diagnostics
const BODY_SNIPPET_LEN: usize = 500;

/// One page of the upstream response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope {
    /// Records in this page, opaque to the engine
    pub results: Vec<Value>,
    /// Keyset pagination state; a missing object is a contract violation
    pub pagination: Pagination,
}

/// Keyset pagination block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    /// Total matching records, informational only
    #[serde(default)]
    pub count: Option<i64>,
    /// Cursor for the next request; absent or null signals the final page
    #[serde(default)]
    pub last_indexes: Option<Map<String, Value>>,
}

/// HTTP client for the upstream API
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl ApiClient {
    /// Create a new client from engine configuration
    pub fn new(api: &ApiConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(api.request_timeout())
            .build()
            .map_err(|e| SyncError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key: api.api_key.clone(),
            retry,
        })
    }

    /// Fetch one page, absorbing transient failures up to the retry budget.
    ///
    /// The returned envelope is decoded but not interpreted; cursor handling
    /// belongs to the paginator.
    pub async fn fetch_page(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<PageEnvelope> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %url, attempt, "requesting page");

            match self.request_once(&url, params).await {
                Ok(envelope) => return Ok(envelope),
                Err(RequestError::Fatal(err)) => return Err(err),
                Err(RequestError::Transient(message)) => {
                    if attempt >= self.retry.max_retries {
                        return Err(SyncError::transient(attempt, message));
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        message = %message,
                        "transient upstream failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    async fn request_once(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> std::result::Result<PageEnvelope, RequestError> {
        let response = self
            .client
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .query(params)
            .send()
            .await
            .map_err(|e| RequestError::Transient(format!("request failed: {e}")))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = body_snippet(response).await;
            return Err(RequestError::Transient(format!(
                "upstream returned {status}: {body}"
            )));
        }

        if !status.is_success() {
            // 4xx other than 429: bad parameters or a moved contract, not transience
            let body = body_snippet(response).await;
            return Err(RequestError::Fatal(SyncError::protocol(format!(
                "upstream returned {status}: {body}"
            ))));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RequestError::Transient(format!("failed to read response body: {e}")))?;

        decode_envelope(&body).map_err(RequestError::Fatal)
    }
}

enum RequestError {
    Transient(String),
    Fatal(SyncError),
}

/// Decode the page envelope; failure to decode is a protocol error
pub fn decode_envelope(body: &str) -> Result<PageEnvelope> {
    serde_json::from_str(body).map_err(|e| {
        let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
        SyncError::protocol(format!("malformed page envelope: {e} (body: {snippet})"))
    })
}

async fn body_snippet(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(body) => body.chars().take(BODY_SNIPPET_LEN).collect(),
        Err(_) => "<unreadable body>".to_string(),
    }
}
