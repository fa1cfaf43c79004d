//! LastFM-style scrobble API
//!
//! `user.getrecenttracks` returns one page of scrobbles per request plus the
//! total page count in `recenttracks.@attr`. Decoding is kept separate from
//! HTTP so pages can be decoded from any byte source.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use muzi_common::time::parse_unix_seconds;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::fmt;

use super::{PageSource, SourceError};
use crate::config::ImportConfig;
use crate::models::{ListenEvent, Platform};

const USER_AGENT: &str = concat!("muzi-import/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct RecentTracksResponse {
    recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: OneOrMany<RawScrobble>,
    #[serde(rename = "@attr")]
    attr: Option<PageAttr>,
}

#[derive(Debug, Deserialize)]
struct PageAttr {
    #[serde(rename = "totalPages")]
    total_pages: Option<StringOrNumber>,
}

/// The API returns a bare object instead of an array when a page holds one track
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> IntoIterator for OneOrMany<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            OneOrMany::Many(items) => items.into_iter(),
            OneOrMany::One(item) => vec![item].into_iter(),
        }
    }
}

/// Numbers arrive as strings (`"250"`), but accept plain numbers too
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(u64),
    /// Any other JSON value; never yields a number
    Other(IgnoredAny),
}

impl StringOrNumber {
    fn as_u32(&self) -> Option<u32> {
        match self {
            StringOrNumber::String(s) => s.trim().parse().ok(),
            StringOrNumber::Number(n) => u32::try_from(*n).ok(),
            StringOrNumber::Other(_) => None,
        }
    }

    /// Read as Unix seconds
    fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            StringOrNumber::String(s) => parse_unix_seconds(s),
            StringOrNumber::Number(n) => {
                let secs = i64::try_from(*n).ok()?;
                Utc.timestamp_opt(secs, 0).single()
            }
            StringOrNumber::Other(_) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TextField {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawScrobble {
    #[serde(default)]
    artist: TextField,
    #[serde(default)]
    album: TextField,
    #[serde(default)]
    name: String,
    #[serde(rename = "@attr")]
    attr: Option<ScrobbleAttr>,
    date: Option<ScrobbleDate>,
}

#[derive(Debug, Deserialize)]
struct ScrobbleAttr {
    nowplaying: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrobbleDate {
    #[serde(default)]
    uts: Option<StringOrNumber>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: i64,
    #[serde(default)]
    message: String,
}

impl RawScrobble {
    fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|a| a.nowplaying.as_deref())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    fn into_event(self, user_id: i64) -> Option<ListenEvent> {
        if self.is_now_playing() {
            return None;
        }
        let timestamp = self.date?.uts?.as_timestamp()?;
        let album = self.album.text;
        Some(ListenEvent {
            user_id,
            timestamp,
            song_name: self.name,
            artist: self.artist.text,
            album_name: if album.is_empty() { None } else { Some(album) },
            played_ms: 0,
            platform: Platform::LastFm,
        })
    }
}

/// One decoded API page
#[derive(Debug, Clone, Default)]
pub struct ScrobblePage {
    /// Total pages reported by the API
    pub total_pages: u32,
    pub events: Vec<ListenEvent>,
    /// Now-playing or undated records left out
    pub excluded: usize,
}

/// Decode one `user.getrecenttracks` response body
pub fn decode_page(bytes: &[u8], user_id: i64) -> Result<ScrobblePage, SourceError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    if value.get("error").is_some() {
        let body: ApiErrorBody = serde_json::from_value(value)?;
        return Err(SourceError::Api {
            code: body.error,
            message: body.message,
        });
    }

    let response: RecentTracksResponse = serde_json::from_value(value)?;
    let recent = response.recenttracks;
    let total_pages = recent
        .attr
        .as_ref()
        .and_then(|attr| attr.total_pages.as_ref())
        .and_then(StringOrNumber::as_u32)
        .ok_or_else(|| SourceError::InvalidMetadata("missing or invalid totalPages".to_string()))?;

    let mut page = ScrobblePage {
        total_pages,
        ..ScrobblePage::default()
    };
    for raw in recent.track {
        match raw.into_event(user_id) {
            Some(event) => page.events.push(event),
            None => page.excluded += 1,
        }
    }
    Ok(page)
}

/// Account whose history is imported
#[derive(Clone, Deserialize)]
pub struct LastFmCredentials {
    #[serde(rename = "lastfm_username")]
    pub username: String,
    #[serde(rename = "lastfm_api_key")]
    pub api_key: String,
}

impl fmt::Debug for LastFmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastFmCredentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// HTTP client for one user's scrobble history
pub struct LastFmClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: LastFmCredentials,
    page_size: u32,
    user_id: i64,
}

impl LastFmClient {
    pub fn new(
        config: &ImportConfig,
        credentials: LastFmCredentials,
        user_id: i64,
    ) -> Result<Self, SourceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.lastfm_base_url.clone(),
            credentials,
            page_size: config.page_size,
            user_id,
        })
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }
}

#[async_trait]
impl PageSource for LastFmClient {
    async fn fetch_page(&self, page: u32) -> Result<ScrobblePage, SourceError> {
        tracing::debug!(user = %self.credentials.username, page, "Requesting scrobble page");

        let limit = self.page_size.to_string();
        let page_number = page.to_string();
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("method", "user.getrecenttracks"),
                ("user", self.credentials.username.as_str()),
                ("api_key", self.credentials.api_key.as_str()),
                ("format", "json"),
                ("limit", limit.as_str()),
                ("page", page_number.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            // Error responses usually carry the API's own error body
            return match decode_page(&body, self.user_id) {
                Err(api_err @ SourceError::Api { .. }) => Err(api_err),
                _ => Err(SourceError::Status(
                    status.as_u16(),
                    String::from_utf8_lossy(&body).into_owned(),
                )),
            };
        }

        decode_page(&body, self.user_id)
    }
}
