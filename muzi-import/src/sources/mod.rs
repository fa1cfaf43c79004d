//! Source readers: raw bytes from exports or API pages → `ListenEvent`s

pub mod lastfm;
pub mod spotify;

use async_trait::async_trait;
use thiserror::Error;

pub use lastfm::{decode_page, LastFmClient, LastFmCredentials, ScrobblePage};
pub use spotify::{
    decode_export, decode_exports, decode_exports_blocking, ExportDecode, ExportDecodeReport,
};

/// Per-unit source failures
///
/// None of these abort an import on their own, except when page discovery
/// fails.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {0}: {1}")]
    Status(u16, String),

    /// Error body returned by the scrobble API itself
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    /// Well-formed response missing required metadata (e.g. page count)
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

/// A paginated listen source (1-based pages)
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch and decode one page
    async fn fetch_page(&self, page: u32) -> Result<ScrobblePage, SourceError>;
}
