//! YouTube Data API v3 source for short-form food videos.
//!
//! Each page is one `search.list` call ordered by view count within the age
//! window, followed by a `videos.list` call for statistics and durations.
//! Videos longer than the configured cutoff are dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use buzzmap_core::{Platform, RawPost, SourceConfig};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::duration::parse_iso8601_duration;
use crate::error::CollectorError;
use crate::http::{get_json, parse_base_url, HttpSettings};
use crate::source::{Page, PostSource};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3/";
const SEARCH_PAGE_MAX: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<Video>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: String,
    snippet: Snippet,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

/// Counts arrive as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    like_count: Option<String>,
}

pub struct YoutubeSource {
    client: Client,
    settings: HttpSettings,
    base_url: Url,
    api_key: String,
    query: String,
    max_posts: usize,
    max_age_days: u32,
    max_duration_secs: Option<u64>,
}

impl YoutubeSource {
    /// # Errors
    ///
    /// Returns [`CollectorError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_key: &str,
        source: &SourceConfig,
        settings: HttpSettings,
    ) -> Result<Self, CollectorError> {
        Self::with_base_url(api_key, source, settings, DEFAULT_BASE_URL)
    }

    /// Creates a source against a custom API root (for wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Http`] if the HTTP client cannot be built, or
    /// [`CollectorError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn with_base_url(
        api_key: &str,
        source: &SourceConfig,
        settings: HttpSettings,
        base_url: &str,
    ) -> Result<Self, CollectorError> {
        Ok(Self {
            client: settings.build_client()?,
            base_url: parse_base_url(base_url)?,
            settings,
            api_key: api_key.to_owned(),
            query: source.query.clone(),
            max_posts: source.max_posts,
            max_age_days: source.max_age_days,
            max_duration_secs: source.max_duration_secs,
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
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("key", &self.api_key);
        }
        Ok(url)
    }

    async fn search(&self, page_token: Option<&str>) -> Result<SearchResponse, CollectorError> {
        let published_after = (Utc::now() - Duration::days(i64::from(self.max_age_days)))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = self.max_posts.clamp(1, SEARCH_PAGE_MAX).to_string();
        let mut params = vec![
            ("part", "id,snippet"),
            ("type", "video"),
            ("q", self.query.as_str()),
            ("order", "viewCount"),
            ("publishedAfter", published_after.as_str()),
            ("maxResults", max_results.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let url = self.endpoint("search", &params)?;
        get_json(
            &self.client,
            &self.settings,
            Platform::Youtube,
            &url,
            "search.list",
        )
        .await
    }

    async fn videos(&self, ids: &[String]) -> Result<VideosResponse, CollectorError> {
        let joined = ids.join(",");
        let url = self.endpoint(
            "videos",
            &[
                ("part", "snippet,contentDetails,statistics"),
                ("id", joined.as_str()),
            ],
        )?;
        get_json(
            &self.client,
            &self.settings,
            Platform::Youtube,
            &url,
            "videos.list",
        )
        .await
    }
}

#[async_trait]
impl PostSource for YoutubeSource {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    fn max_posts(&self) -> usize {
        self.max_posts
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, CollectorError> {
        let search = self.search(cursor).await?;
        let ids: Vec<String> = search
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .collect();
        if ids.is_empty() {
            return Ok(Page::default());
        }

        let videos = self.videos(&ids).await?;
        let posts = videos_to_posts(videos.items, &ids, self.max_duration_secs, Utc::now());

        Ok(Page {
            posts,
            next_cursor: search.next_page_token,
        })
    }
}

/// Keep short-enough videos, in search (view count) order.
fn videos_to_posts(
    videos: Vec<Video>,
    search_order: &[String],
    max_duration_secs: Option<u64>,
    collected_at: DateTime<Utc>,
) -> Vec<RawPost> {
    let rank: HashMap<&str, usize> = search_order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let mut kept: Vec<(usize, RawPost)> = videos
        .into_iter()
        .filter_map(|video| {
            if let Some(limit) = max_duration_secs {
                let duration = video
                    .content_details
                    .as_ref()
                    .and_then(|d| d.duration.as_deref())
                    .and_then(parse_iso8601_duration);
                match duration {
                    Some(secs) if secs <= limit => {}
                    Some(_) => return None,
                    None => {
                        tracing::debug!(video_id = %video.id, "skipping video with unparseable duration");
                        return None;
                    }
                }
            }
            let like_count = video
                .statistics
                .as_ref()
                .and_then(|s| s.like_count.as_deref())
                .and_then(|c| c.parse::<u64>().ok())
                .unwrap_or(0);
            let text = format!("{}\n{}", video.snippet.title, video.snippet.description)
                .trim()
                .to_owned();
            let order = rank.get(video.id.as_str()).copied().unwrap_or(usize::MAX);
            Some((
                order,
                RawPost {
                    platform: Platform::Youtube,
                    url: Some(format!("https://www.youtube.com/watch?v={}", video.id)),
                    post_id: video.id,
                    text,
                    like_count,
                    timestamp: video.snippet.published_at,
                    raw_location_hint: None,
                    collected_at,
                },
            ))
        })
        .collect();

    kept.sort_by_key(|(order, _)| *order);
    kept.into_iter().map(|(_, post)| post).collect()
}
