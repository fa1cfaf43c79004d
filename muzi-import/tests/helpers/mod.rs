//! Shared helpers for muzi-import integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::Query,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use http_body_util::BodyExt;
use muzi_common::events::ProgressUpdate;
use muzi_import::{build_router, AppState, ImportConfig};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USER_HEADER: &str = "x-muzi-user-id";
pub const BOUNDARY: &str = "muzi-test-boundary";

/// Router over an in-memory database
pub async fn create_test_app(config: ImportConfig) -> (Router, AppState, SqlitePool) {
    let pool = muzi_common::db::init_in_memory()
        .await
        .expect("Failed to create in-memory database");
    let state = AppState::new(pool.clone(), config);
    let app = build_router(state.clone());
    (app, state, pool)
}

/// Spotify export record
pub fn export_record(ts: &str, artist: &str, track: &str, ms_played: i64) -> Value {
    json!({
        "ts": ts,
        "platform": "linux",
        "ms_played": ms_played,
        "conn_country": "DE",
        "master_metadata_track_name": track,
        "master_metadata_album_artist_name": artist,
        "master_metadata_album_album_name": "Some Album",
        "reason_start": "trackdone",
        "shuffle": false
    })
}

/// `n` distinct valid records, three minutes apart from 2023-01-01
pub fn export_file(n: usize, artist: &str) -> Vec<u8> {
    let base = chrono::DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap();
    let records: Vec<Value> = (0..n)
        .map(|i| {
            let ts = (base + chrono::Duration::minutes(3 * i as i64))
                .with_timezone(&chrono::Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            export_record(&ts, artist, &format!("Track {}", i), 180_000)
        })
        .collect();
    serde_json::to_vec(&records).unwrap()
}

/// multipart/form-data body with one part per `(field, file_name, data)`
pub fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, file_name, data) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(user_id: Option<i64>, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/import/spotify")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(id) = user_id {
        builder = builder.header(USER_HEADER, id.to_string());
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

pub fn get_request(uri: &str, user_id: i64) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(USER_HEADER, user_id.to_string())
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// All `data:` payloads of an SSE response, read until the stream ends
pub async fn sse_messages(response: Response<Body>) -> Vec<String> {
    let body = tokio::time::timeout(Duration::from_secs(20), response.into_body().collect())
        .await
        .expect("SSE stream did not end")
        .unwrap()
        .to_bytes();
    String::from_utf8(body.to_vec())
        .unwrap()
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_string())
        .collect()
}

/// SSE payloads after the connection message, decoded
pub fn progress_updates(messages: &[String]) -> Vec<ProgressUpdate> {
    messages
        .iter()
        .skip(1)
        .map(|m| serde_json::from_str(m).unwrap())
        .collect()
}

/// Behaviour of the fake scrobble API
#[derive(Clone, Default)]
pub struct FakeLastFmOptions {
    pub pages: u32,
    pub per_page: u32,
    /// Pages answered with HTTP 500
    pub failing_pages: Vec<u32>,
    /// Answer every request with an API error body
    pub unknown_user: bool,
    /// Wait this long before answering
    pub delay: Option<Duration>,
}

pub struct FakeLastFm {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

/// Scrobble `n` of page `page`; distinct per page, four minutes apart
pub fn scrobble(page: u32, i: u32, per_page: u32) -> Value {
    let n = u64::from((page - 1) * per_page + i);
    json!({
        "artist": {"mbid": "", "#text": "Scrobbled Artist"},
        "album": {"mbid": "", "#text": "Scrobbled Album"},
        "name": format!("Scrobble {}", n),
        "date": {"uts": (1_650_000_000 - n * 240).to_string(), "#text": "whenever"}
    })
}

/// Local stand-in for `user.getrecenttracks` on 127.0.0.1:0
pub async fn spawn_fake_lastfm(options: FakeLastFmOptions) -> FakeLastFm {
    let requests: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::default();
    let recorded = Arc::clone(&requests);

    let handler = move |Query(params): Query<HashMap<String, String>>| {
        let options = options.clone();
        let recorded = Arc::clone(&recorded);
        async move {
            recorded.lock().unwrap().push(params.clone());
            if let Some(delay) = options.delay {
                tokio::time::sleep(delay).await;
            }

            if options.unknown_user {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": 6, "message": "User not found", "links": []})),
                )
                    .into_response();
            }

            let page: u32 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
            if options.failing_pages.contains(&page) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
            }

            let mut tracks: Vec<Value> = (0..options.per_page)
                .map(|i| scrobble(page, i, options.per_page))
                .collect();
            if page == 1 {
                tracks.insert(
                    0,
                    json!({
                        "artist": {"#text": "Live Artist"},
                        "album": {"#text": ""},
                        "name": "Playing Right Now",
                        "@attr": {"nowplaying": "true"}
                    }),
                );
            }

            Json(json!({
                "recenttracks": {
                    "track": tracks,
                    "@attr": {
                        "user": params.get("user").cloned().unwrap_or_default(),
                        "page": page.to_string(),
                        "perPage": options.per_page.to_string(),
                        "totalPages": options.pages.to_string(),
                        "total": (options.pages * options.per_page).to_string()
                    }
                }
            }))
            .into_response()
        }
    };

    let app = Router::new().route("/2.0/", get(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeLastFm {
        base_url: format!("http://{}/2.0/", addr),
        requests,
    }
}

/// Config pointing the LastFM client at a fake server
pub fn config_for(fake: &FakeLastFm) -> ImportConfig {
    ImportConfig {
        lastfm_base_url: fake.base_url.clone(),
        request_timeout_secs: 5,
        ..ImportConfig::default()
    }
}
