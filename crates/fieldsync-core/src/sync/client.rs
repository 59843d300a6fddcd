//! Remote submission collaborator and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{CachedRecord, ReportPayload};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Remote acknowledgment for an accepted report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub reference_id: String,
}

impl SubmitReceipt {
    pub fn new(reference_id: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
        }
    }
}

/// Why a submission failed. The display text is what ends up in a failed
/// record's `syncError`.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid submit configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Submit request failed: {0}")]
    Http(reqwest::Error),
    #[error("Submit request timed out")]
    Timeout,
    #[error("{0}")]
    Api(String),
    #[error("Invalid submit response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for SubmitError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(error)
        }
    }
}

pub type SubmitResult<T> = Result<T, SubmitError>;

/// Sends one cached record to the remote service.
#[async_trait]
pub trait SubmitClient: Send + Sync {
    async fn submit(&self, record: &CachedRecord) -> SubmitResult<SubmitReceipt>;
}

/// Posts records as JSON to a single endpoint.
///
/// The record id is sent as `Idempotency-Key` so a server that honours it
/// can drop a resubmission after a lost response.
#[derive(Clone)]
pub struct HttpSubmitClient {
    endpoint: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSubmitClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSubmitClient")
            .field("endpoint", &self.endpoint)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpSubmitClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> SubmitResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            api_token: normalize_text_option(api_token),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    id: String,
    created_at: i64,
    payload: &'a ReportPayload,
}

#[async_trait]
impl SubmitClient for HttpSubmitClient {
    async fn submit(&self, record: &CachedRecord) -> SubmitResult<SubmitReceipt> {
        let body = SubmitRequest {
            id: record.id.to_string(),
            created_at: record.created_at,
            payload: &record.payload,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .header("Idempotency-Key", record.id.to_string())
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SubmitError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<SubmitResponse>().await?;
        payload.try_into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(default, alias = "reference_id")]
    reference_id: Option<String>,
    #[serde(default)]
    id: Option<Value>,
}

impl TryFrom<SubmitResponse> for SubmitReceipt {
    type Error = SubmitError;

    fn try_from(value: SubmitResponse) -> SubmitResult<Self> {
        let fallback_id = value.id.and_then(|id| match id {
            Value::String(id) => Some(id),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        });

        value
            .reference_id
            .or(fallback_id)
            .map(|reference| reference.trim().to_string())
            .filter(|reference| !reference.is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                SubmitError::InvalidResponse("response did not include referenceId/id".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> SubmitResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        SubmitError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(SubmitError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
