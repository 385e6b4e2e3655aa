//! Address resolution: the `GeocodingProvider` contract, a Nominatim
//! adapter, and the caching, single-flight `Geocoder`.

pub mod cache;
pub mod error;
pub mod geocoder;
pub mod nominatim;
pub mod provider;

pub use cache::MemoryGeocodeCache;
pub use error::GeocodeError;
pub use geocoder::{Geocoder, GeocoderSettings};
pub use nominatim::{NominatimClient, NominatimSettings};
pub use provider::GeocodingProvider;
