//! Social post collection: the `PostSource` contract, Instagram and YouTube
//! sources, and multi-platform collection.

pub mod collect;
pub mod duration;
pub mod error;
mod http;
pub mod instagram;
mod rate_limit;
pub mod source;
pub mod youtube;

pub use collect::{collect_all, collect_source, sources_from_config, CollectionReport, SourceCollection};
pub use error::{CollectionError, CollectorError};
pub use http::HttpSettings;
pub use instagram::InstagramSource;
pub use source::{Page, PostSource};
pub use youtube::YoutubeSource;
