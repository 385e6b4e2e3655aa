//! Gemini `generateContent` adapter for restaurant extraction.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::extractor::{Candidate, TextExtractor};
use crate::parse::parse_candidates;
use crate::ExtractorError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/";

const SYSTEM_INSTRUCTION: &str = "You extract restaurant information from Japanese food-related social \
media posts. Return only JSON: an array of objects with the keys placeName (restaurant name), \
address (street address) and confidence (0.0-1.0, how sure you are this is a real restaurant \
mentioned in the text). Use null for any value that is not present. Return [] when the text \
mentions no restaurant. Do not add explanations.";

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Gemini-backed [`TextExtractor`] with a requests-per-minute token bucket.
pub struct GeminiExtractor {
    client: Client,
    endpoint: Url,
    api_key: String,
    rate_limiter: DirectLimiter,
}

impl GeminiExtractor {
    /// # Errors
    ///
    /// Returns [`ExtractorError::Http`] if the HTTP client cannot be built, or
    /// [`ExtractorError::InvalidBaseUrl`] if the model name does not form a
    /// valid endpoint.
    pub fn new(
        api_key: &str,
        model: &str,
        requests_per_minute: NonZeroU32,
        timeout_secs: u64,
    ) -> Result<Self, ExtractorError> {
        Self::with_base_url(
            api_key,
            model,
            requests_per_minute,
            timeout_secs,
            DEFAULT_BASE_URL,
        )
    }

    /// Creates an extractor against a custom API root (for wiremock).
    ///
    /// # Errors
    ///
    /// Same as [`GeminiExtractor::new`].
    pub fn with_base_url(
        api_key: &str,
        model: &str,
        requests_per_minute: NonZeroU32,
        timeout_secs: u64,
        base_url: &str,
    ) -> Result<Self, ExtractorError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let invalid = |e: String| ExtractorError::InvalidBaseUrl {
            url: base_url.to_owned(),
            reason: e,
        };
        let root = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| invalid(e.to_string()))?;
        let endpoint = root
            .join(&format!("models/{model}:generateContent"))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_owned(),
            rate_limiter: RateLimiter::direct(Quota::per_minute(requests_per_minute)),
        })
    }

    async fn generate(&self, text: &str) -> Result<String, ExtractorError> {
        let prompt = format!("TEXT: {text}");
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: SYSTEM_INSTRUCTION,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.1,
            },
        };

        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(10);
            return Err(ExtractorError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(ExtractorError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| ExtractorError::Deserialize {
                context: "generateContent response".to_owned(),
                source: e,
            })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ExtractorError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextExtractor for GeminiExtractor {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn extract(&self, text: &str) -> Result<Vec<Candidate>, ExtractorError> {
        let output = self.generate(text).await?;
        parse_candidates(&output)
    }
}
