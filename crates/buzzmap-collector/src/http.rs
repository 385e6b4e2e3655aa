//! Shared HTTP plumbing for platform clients.

use std::time::Duration;

use buzzmap_core::Platform;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;

use crate::error::CollectorError;
use crate::rate_limit::retry_with_backoff;

/// Timeout, user agent and retry policy shared by every platform client.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "buzzmap/0.1 (trend-map)".to_owned(),
            max_retries: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl HttpSettings {
    pub(crate) fn build_client(&self) -> Result<Client, CollectorError> {
        Ok(Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&self.user_agent)
            .build()?)
    }
}

pub(crate) fn parse_base_url(base_url: &str) -> Result<Url, CollectorError> {
    let normalised = format!("{}/", base_url.trim_end_matches('/'));
    Url::parse(&normalised).map_err(|e| CollectorError::InvalidBaseUrl {
        url: base_url.to_owned(),
        reason: e.to_string(),
    })
}

/// GET `url` and deserialize the JSON body, retrying transient failures.
///
/// 429 maps to [`CollectorError::RateLimited`]; other non-2xx statuses map to
/// [`CollectorError::UnexpectedStatus`]. `context` names the call in
/// deserialization errors and must not contain secrets.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    settings: &HttpSettings,
    platform: Platform,
    url: &Url,
    context: &str,
) -> Result<T, CollectorError> {
    retry_with_backoff(settings.max_retries, settings.backoff_base_ms, move || async move {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CollectorError::Http(e.without_url()))?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(CollectorError::RateLimited {
                platform,
                retry_after_secs,
            });
        }

        if !status.is_success() {
            let mut redacted = url.clone();
            redacted.set_query(None);
            return Err(CollectorError::UnexpectedStatus {
                status: status.as_u16(),
                url: redacted.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CollectorError::Http(e.without_url()))?;
        serde_json::from_str::<T>(&body).map_err(|e| CollectorError::Deserialize {
            context: context.to_owned(),
            source: e,
        })
    })
    .await
}
