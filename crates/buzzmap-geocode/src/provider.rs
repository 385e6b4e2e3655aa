use std::sync::Arc;

use async_trait::async_trait;
use buzzmap_core::Coordinates;

use crate::GeocodeError;

/// Address-to-coordinates capability.
///
/// `Ok(None)` means the provider found no match; it is treated the same as
/// [`GeocodeError::Unresolved`].
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

#[async_trait]
impl<T: GeocodingProvider + ?Sized> GeocodingProvider for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        (**self).lookup(address).await
    }
}
