//! Instagram Graph API hashtag source.
//!
//! Resolves the configured hashtag to its id via `ig_hashtag_search`, then
//! pages through `{hashtag_id}/top_media` following `paging.next`. Paging
//! stops at the first post older than the configured age window.

use async_trait::async_trait;
use buzzmap_core::{Platform, RawPost, SourceConfig};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::CollectorError;
use crate::http::{get_json, parse_base_url, HttpSettings};
use crate::source::{Page, PostSource};

const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v19.0/";
const MEDIA_FIELDS: &str = "id,caption,timestamp,permalink,like_count,comments_count,media_type";
const PAGE_LIMIT: &str = "20";

#[derive(Debug, Deserialize)]
struct HashtagSearchResponse {
    #[serde(default)]
    data: Vec<HashtagId>,
}

#[derive(Debug, Deserialize)]
struct HashtagId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MediaResponse {
    #[serde(default)]
    data: Vec<Media>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Media {
    id: String,
    caption: Option<String>,
    timestamp: Option<String>,
    permalink: Option<String>,
    like_count: Option<u64>,
}

pub struct InstagramSource {
    client: Client,
    settings: HttpSettings,
    base_url: Url,
    access_token: String,
    business_account_id: String,
    hashtag: String,
    max_posts: usize,
    max_age_days: u32,
    hashtag_id: OnceCell<String>,
}

impl InstagramSource {
    /// # Errors
    ///
    /// Returns [`CollectorError::Http`] if the HTTP client cannot be built.
    pub fn new(
        access_token: &str,
        business_account_id: &str,
        source: &SourceConfig,
        settings: HttpSettings,
    ) -> Result<Self, CollectorError> {
        Self::with_base_url(
            access_token,
            business_account_id,
            source,
            settings,
            DEFAULT_BASE_URL,
        )
    }

    /// Creates a source against a custom Graph API root (for wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Http`] if the HTTP client cannot be built, or
    /// [`CollectorError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn with_base_url(
        access_token: &str,
        business_account_id: &str,
        source: &SourceConfig,
        settings: HttpSettings,
        base_url: &str,
    ) -> Result<Self, CollectorError> {
        Ok(Self {
            client: settings.build_client()?,
            base_url: parse_base_url(base_url)?,
            settings,
            access_token: access_token.to_owned(),
            business_account_id: business_account_id.to_owned(),
            hashtag: source.query.trim_start_matches('#').to_owned(),
            max_posts: source.max_posts,
            max_age_days: source.max_age_days,
            hashtag_id: OnceCell::new(),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, CollectorError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| CollectorError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("user_id", &self.business_account_id);
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("access_token", &self.access_token);
        }
        Ok(url)
    }

    async fn resolve_hashtag_id(&self) -> Result<&str, CollectorError> {
        let id = self
            .hashtag_id
            .get_or_try_init(|| async {
                let url = self.endpoint("ig_hashtag_search", &[("q", &self.hashtag)])?;
                let response: HashtagSearchResponse = get_json(
                    &self.client,
                    &self.settings,
                    Platform::Instagram,
                    &url,
                    "ig_hashtag_search",
                )
                .await?;
                response
                    .data
                    .into_iter()
                    .next()
                    .map(|h| h.id)
                    .ok_or_else(|| CollectorError::Api {
                        platform: Platform::Instagram,
                        message: format!("no hashtag id found for #{}", self.hashtag),
                    })
            })
            .await?;
        Ok(id.as_str())
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.max_age_days))
    }
}

#[async_trait]
impl PostSource for InstagramSource {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn max_posts(&self) -> usize {
        self.max_posts
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, CollectorError> {
        let url = match cursor {
            Some(next) => Url::parse(next).map_err(|e| CollectorError::InvalidBaseUrl {
                url: "paging.next".to_owned(),
                reason: e.to_string(),
            })?,
            None => {
                let hashtag_id = self.resolve_hashtag_id().await?.to_owned();
                self.endpoint(
                    &format!("{hashtag_id}/top_media"),
                    &[("fields", MEDIA_FIELDS), ("limit", PAGE_LIMIT)],
                )?
            }
        };

        let response: MediaResponse = get_json(
            &self.client,
            &self.settings,
            Platform::Instagram,
            &url,
            "top_media page",
        )
        .await?;

        let now = Utc::now();
        let (posts, reached_cutoff) = media_to_posts(response.data, self.cutoff(now), now);
        let next_cursor = if reached_cutoff {
            tracing::debug!(hashtag = %self.hashtag, "reached posts older than the age window");
            None
        } else {
            response.paging.and_then(|p| p.next)
        };

        Ok(Page { posts, next_cursor })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a page of media, stopping at the first post older than `cutoff`.
/// Returns the posts and whether the cutoff was hit.
fn media_to_posts(
    media: Vec<Media>,
    cutoff: DateTime<Utc>,
    collected_at: DateTime<Utc>,
) -> (Vec<RawPost>, bool) {
    let mut posts = Vec::with_capacity(media.len());
    for item in media {
        let Some(timestamp) = item.timestamp.as_deref().and_then(parse_timestamp) else {
            tracing::debug!(post_id = %item.id, "skipping media with unparseable timestamp");
            continue;
        };
        if timestamp < cutoff {
            return (posts, true);
        }
        let text = item
            .caption
            .unwrap_or_default()
            .replace(['\r', '\n'], " ");
        posts.push(RawPost {
            platform: Platform::Instagram,
            post_id: item.id,
            text,
            like_count: item.like_count.unwrap_or(0),
            timestamp,
            raw_location_hint: None,
            url: item.permalink,
            collected_at,
        });
    }
    (posts, false)
}
