use async_trait::async_trait;
use buzzmap_core::{Platform, RawPost};

use crate::error::CollectorError;

/// One page of posts from a platform.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<RawPost>,
    /// `None` once the source has nothing more to give this run.
    pub next_cursor: Option<String>,
}

/// A social platform that can be paged through for recent posts.
#[async_trait]
pub trait PostSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Upper bound on posts to collect per run.
    fn max_posts(&self) -> usize;

    /// Fetch the page at `cursor`; `None` requests the first page.
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<Page, CollectorError>;
}
