//! Dual-layer response cache: an exact-match layer and a semantic layer.

pub mod exact;
pub mod semantic;
pub mod singleflight;

pub use exact::ExactCache;
pub use semantic::{category_threshold, SemanticCache};
pub use singleflight::SingleFlight;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CacheErrorKind {
    #[error("cache write failed: {0}")]
    WriteFailed(String),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

impl From<CacheErrorKind> for crate::error::GatewayError {
    fn from(value: CacheErrorKind) -> Self {
        crate::error::GatewayError::CacheError(value.to_string())
    }
}
