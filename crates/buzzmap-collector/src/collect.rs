//! Multi-platform collection with per-platform failure isolation.

use std::collections::HashSet;
use std::sync::Arc;

use buzzmap_core::{AppConfig, Platform, RawPost, SourcesFile};

use crate::error::{CollectionError, CollectorError};
use crate::http::HttpSettings;
use crate::instagram::InstagramSource;
use crate::source::PostSource;
use crate::youtube::YoutubeSource;

/// Hard page cap per source per run. Guards against cycling cursors.
pub const MAX_PAGES: usize = 50;

/// What one platform produced this run. `error` is set when paging stopped
/// early; `posts` still holds everything fetched before the failure.
#[derive(Debug)]
pub struct SourceCollection {
    pub platform: Platform,
    pub posts: Vec<RawPost>,
    pub error: Option<CollectionError>,
}

#[derive(Debug, Default)]
pub struct CollectionReport {
    /// Deduplicated by `(platform, post_id)`.
    pub posts: Vec<RawPost>,
    pub errors: Vec<CollectionError>,
    /// Platforms that contributed without error.
    pub succeeded: Vec<Platform>,
}

impl CollectionReport {
    /// `true` when no platform finished cleanly and nothing was fetched.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && self.posts.is_empty() && !self.errors.is_empty()
    }
}

/// Page through one source until it runs dry, hits `max_posts`, or fails.
pub async fn collect_source(source: &dyn PostSource) -> SourceCollection {
    let platform = source.platform();
    let max_posts = source.max_posts();
    let mut posts: Vec<RawPost> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut page_count = 0usize;

    let error = loop {
        page_count += 1;
        if page_count > MAX_PAGES {
            break Some(CollectorError::PaginationLimit {
                platform,
                max_pages: MAX_PAGES,
            });
        }

        let page = match source.fetch_page(cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => break Some(e),
        };

        for post in page.posts {
            if posts.len() >= max_posts {
                break;
            }
            if seen.insert(post.post_id.clone()) {
                posts.push(post);
            }
        }

        if posts.len() >= max_posts {
            break None;
        }
        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break None,
        }
    };

    match &error {
        Some(e) => tracing::warn!(
            platform = %platform,
            collected = posts.len(),
            pages = page_count,
            error = %e,
            "collection stopped early"
        ),
        None => tracing::info!(
            platform = %platform,
            collected = posts.len(),
            pages = page_count,
            "collection finished"
        ),
    }

    SourceCollection {
        platform,
        posts,
        error: error.map(|e| CollectionError::new(platform, e)),
    }
}

/// Collect from every source concurrently. A failing platform keeps its
/// partial posts and adds a platform-tagged error; other platforms are
/// unaffected.
pub async fn collect_all(sources: &[Arc<dyn PostSource>]) -> CollectionReport {
    let results =
        futures::future::join_all(sources.iter().map(|s| collect_source(s.as_ref()))).await;

    let mut report = CollectionReport::default();
    let mut seen: HashSet<(Platform, String)> = HashSet::new();
    for result in results {
        match result.error {
            Some(err) => report.errors.push(err),
            None => report.succeeded.push(result.platform),
        }
        report.posts.extend(
            result
                .posts
                .into_iter()
                .filter(|p| seen.insert((p.platform, p.post_id.clone()))),
        );
    }
    report
}

/// Build a source per enabled entry in `sources`. Entries whose credentials
/// are missing become platform-tagged errors instead of sources.
#[must_use]
pub fn sources_from_config(
    config: &AppConfig,
    sources: &SourcesFile,
) -> (Vec<Arc<dyn PostSource>>, Vec<CollectionError>) {
    let settings = HttpSettings {
        timeout_secs: config.http_request_timeout_secs,
        user_agent: config.http_user_agent.clone(),
        max_retries: config.http_max_retries,
        backoff_base_ms: config.http_retry_backoff_base_ms,
    };

    let mut built: Vec<Arc<dyn PostSource>> = Vec::new();
    let mut errors = Vec::new();

    for source in sources.enabled() {
        let result: Result<Arc<dyn PostSource>, CollectorError> = match source.platform {
            Platform::Instagram => {
                match (
                    config.instagram_access_token.as_deref(),
                    config.instagram_business_account_id.as_deref(),
                ) {
                    (Some(token), Some(account)) => {
                        InstagramSource::new(token, account, source, settings.clone())
                            .map(|s| Arc::new(s) as Arc<dyn PostSource>)
                    }
                    (None, _) => Err(CollectorError::MissingCredential {
                        platform: Platform::Instagram,
                        var: "INSTAGRAM_ACCESS_TOKEN".to_owned(),
                    }),
                    (_, None) => Err(CollectorError::MissingCredential {
                        platform: Platform::Instagram,
                        var: "INSTAGRAM_BUSINESS_ACCOUNT_ID".to_owned(),
                    }),
                }
            }
            Platform::Youtube => match config.youtube_api_key.as_deref() {
                Some(key) => YoutubeSource::new(key, source, settings.clone())
                    .map(|s| Arc::new(s) as Arc<dyn PostSource>),
                None => Err(CollectorError::MissingCredential {
                    platform: Platform::Youtube,
                    var: "YOUTUBE_API_KEY".to_owned(),
                }),
            },
        };

        match result {
            Ok(s) => built.push(s),
            Err(e) => {
                tracing::warn!(platform = %source.platform, error = %e, "source not available");
                errors.push(CollectionError::new(source.platform, e));
            }
        }
    }

    (built, errors)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::source::Page;

    fn post(platform: Platform, id: &str) -> RawPost {
        RawPost {
            platform,
            post_id: id.to_owned(),
            text: String::new(),
            like_count: 1,
            timestamp: Utc::now(),
            raw_location_hint: None,
            url: None,
            collected_at: Utc::now(),
        }
    }

    /// Serves canned pages; `fail_at` makes that page index return an error.
    struct FakeSource {
        platform: Platform,
        pages: Vec<Vec<&'static str>>,
        fail_at: Option<usize>,
        max_posts: usize,
        calls: AtomicUsize,
        cycle: bool,
    }

    impl FakeSource {
        fn new(platform: Platform, pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                platform,
                pages,
                fail_at: None,
                max_posts: 100,
                calls: AtomicUsize::new(0),
                cycle: false,
            }
        }
    }

    #[async_trait]
    impl PostSource for FakeSource {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn max_posts(&self) -> usize {
            self.max_posts
        }

        async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, CollectorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cycle {
                return Ok(Page {
                    posts: vec![post(self.platform, &format!("c{call}"))],
                    next_cursor: Some(format!("cursor-{call}")),
                });
            }
            let index = cursor.map_or(0, |c| c.parse::<usize>().unwrap());
            if self.fail_at == Some(index) {
                return Err(CollectorError::UnexpectedStatus {
                    status: 500,
                    url: "https://example.test".to_owned(),
                });
            }
            let posts = self.pages[index]
                .iter()
                .map(|id| post(self.platform, id))
                .collect();
            let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
            Ok(Page { posts, next_cursor })
        }
    }

    #[tokio::test]
    async fn follows_cursors_and_dedups_within_platform() {
        let source = FakeSource::new(Platform::Instagram, vec![vec!["a", "b"], vec!["b", "c"]]);
        let result = collect_source(&source).await;
        let ids: Vec<_> = result.posts.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn stops_at_max_posts() {
        let mut source = FakeSource::new(Platform::Youtube, vec![vec!["a", "b"], vec!["c", "d"]]);
        source.max_posts = 3;
        let result = collect_source(&source).await;
        assert_eq!(result.posts.len(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_keeps_partial_results_and_tags_platform() {
        let mut source = FakeSource::new(Platform::Instagram, vec![vec!["a"], vec!["b"]]);
        source.fail_at = Some(1);
        let result = collect_source(&source).await;
        assert_eq!(result.posts.len(), 1);
        let err = result.error.expect("error expected");
        assert_eq!(err.platform, Platform::Instagram);
    }

    #[tokio::test]
    async fn cycling_cursor_hits_page_cap() {
        let mut source = FakeSource::new(Platform::Youtube, vec![]);
        source.cycle = true;
        source.max_posts = usize::MAX;
        let result = collect_source(&source).await;
        assert!(matches!(
            result.error.map(|e| e.source),
            Some(CollectorError::PaginationLimit { .. })
        ));
        assert_eq!(result.posts.len(), MAX_PAGES);
    }

    #[tokio::test]
    async fn one_platform_failing_does_not_affect_another() {
        let mut broken = FakeSource::new(Platform::Instagram, vec![vec!["x"]]);
        broken.fail_at = Some(0);
        let healthy = FakeSource::new(Platform::Youtube, vec![vec!["v1", "v2"]]);
        let sources: Vec<Arc<dyn PostSource>> = vec![Arc::new(broken), Arc::new(healthy)];

        let report = collect_all(&sources).await;
        assert_eq!(report.posts.len(), 2);
        assert_eq!(report.succeeded, vec![Platform::Youtube]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].platform, Platform::Instagram);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn same_post_id_on_different_platforms_is_kept() {
        let ig = FakeSource::new(Platform::Instagram, vec![vec!["1"]]);
        let yt = FakeSource::new(Platform::Youtube, vec![vec!["1"]]);
        let sources: Vec<Arc<dyn PostSource>> = vec![Arc::new(ig), Arc::new(yt)];
        let report = collect_all(&sources).await;
        assert_eq!(report.posts.len(), 2);
    }

    #[tokio::test]
    async fn all_failed_when_every_platform_errors_without_posts() {
        let mut a = FakeSource::new(Platform::Instagram, vec![vec!["x"]]);
        a.fail_at = Some(0);
        let mut b = FakeSource::new(Platform::Youtube, vec![vec!["y"]]);
        b.fail_at = Some(0);
        let sources: Vec<Arc<dyn PostSource>> = vec![Arc::new(a), Arc::new(b)];
        let report = collect_all(&sources).await;
        assert!(report.all_failed());
    }
}
