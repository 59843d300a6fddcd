//! Connectivity probes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Best-effort online check. False negatives are fine; the next poll corrects
/// them.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Treats any HTTP response from a health URL as "online".
#[derive(Clone, Debug)]
pub struct HttpConnectivityProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpConnectivityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = normalize_text_option(Some(url.into()))
            .filter(|url| is_http_url(url))
            .ok_or_else(|| {
                Error::Config("connectivity URL must include http:// or https://".to_string())
            })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Connectivity probe to {} failed: {}", self.url, error);
                false
            }
        }
    }
}

/// Always reports the same state (forced offline mode, tests).
#[derive(Clone, Copy, Debug)]
pub struct StaticProbe(pub bool);

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}
