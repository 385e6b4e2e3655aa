use std::sync::Arc;

use async_trait::async_trait;

use crate::ExtractorError;

/// A raw `(name, address, confidence)` triple as reported by the
/// collaborator, before validation and thresholding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub confidence: Option<f64>,
}

/// Text-understanding capability: turns free text into restaurant candidates.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    async fn extract(&self, text: &str) -> Result<Vec<Candidate>, ExtractorError>;
}

#[async_trait]
impl<T: TextExtractor + ?Sized> TextExtractor for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn extract(&self, text: &str) -> Result<Vec<Candidate>, ExtractorError> {
        (**self).extract(text).await
    }
}
