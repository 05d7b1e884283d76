/// HTTP stream proxy for direct (non-HLS) stations.
///
/// Serves `GET /api/stream?url=<upstream>`.  The media element is pointed at
/// this route instead of the raw station URL.  Each request opens **one**
/// upstream connection and relays the body byte-for-byte; when the client
/// drops its connection the upstream fetch is dropped with it.
///
/// Error contract
/// ──────────────
/// • missing `url`            → 400 `Missing url parameter`
/// • upstream non-2xx         → same status, `Stream error: <code>`
/// • connect / DNS failure    → 500 `Failed to fetch stream` (logged, never retried)
use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use reqwest::Client;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use freeradio_proto::stations::STREAM_ROUTE;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; FreeRadio/1.0)";
const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

// ── Shared state ──────────────────────────────────────────────────────────────

/// Proxy state: a persistent HTTP client so TLS sessions are shared between
/// requests.  Nothing else is kept per request.
#[derive(Clone)]
pub struct ProxyState {
    pub client: Client,
}

impl ProxyState {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            // Icecast servers commonly redirect to a mount on another host
            .redirect(reqwest::redirect::Policy::limited(10))
            // Ask for inline ICY metadata
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    "Icy-MetaData",
                    reqwest::header::HeaderValue::from_static("1"),
                );
                h
            })
            .build()?;

        Ok(Self { client })
    }
}

// ── Route handler ─────────────────────────────────────────────────────────────

async fn stream(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ProxyState>,
) -> Response {
    let url = match params.get("url").map(|u| u.trim()) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => {
            debug!("proxy: request without url parameter");
            return (StatusCode::BAD_REQUEST, "Missing url parameter").into_response();
        }
    };

    info!("proxy: opening upstream {}", url);

    let upstream = match state.client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!("proxy: upstream fetch failed for {}: {}", url, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch stream").into_response();
        }
    };

    let upstream_status = upstream.status();
    if !upstream_status.is_success() {
        warn!("proxy: upstream returned {} for {}", upstream_status, url);
        let status = StatusCode::from_u16(upstream_status.as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        return (
            status,
            format!("Stream error: {}", upstream_status.as_u16()),
        )
            .into_response();
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    // Relay bytes from upstream unchanged
    let byte_stream = upstream.bytes_stream();
    let reader = tokio_util::io::StreamReader::new(
        byte_stream.map(|result| result.map_err(std::io::Error::other)),
    );
    let body = Body::from_stream(ReaderStream::new(reader));

    (
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store"),
            ),
            (
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ),
        ],
        body,
    )
        .into_response()
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route(STREAM_ROUTE, get(stream))
        .with_state(state)
}
