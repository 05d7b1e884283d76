//! In-process HLS adaptive-streaming engine.
//!
//! A session follows a live HLS playlist, fetches its segments and fans the
//! bytes out to subscribers of `GET /api/hls/{session}`.  That route is the
//! source the media element is pointed at once the manifest has been parsed,
//! so to the element an HLS station looks like one continuous stream.
mod playlist;
mod session;

pub use playlist::{best_variant, parse, MediaPlaylist, Playlist, PlaylistError, Segment, Variant};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use reqwest::{Client, Url};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use freeradio_proto::config::HlsConfig;

use crate::media::{AdaptiveEngine, AdaptiveSession, EventSender, Generation};
use session::{Control, SessionTask};

const FEED_CAPACITY: usize = 64;
/// Segments replayed to a subscriber that joins late.
const FEED_BACKLOG: usize = 3;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ── segment fan-out ───────────────────────────────────────────────────────────

/// Byte feed of one session: optional init section, a short backlog and a
/// broadcast channel for live segments.
pub struct SegmentFeed {
    inner: Mutex<FeedInner>,
    tx: broadcast::Sender<Bytes>,
}

#[derive(Default)]
struct FeedInner {
    init: Option<Bytes>,
    backlog: VecDeque<Bytes>,
    content_type: Option<&'static str>,
}

impl SegmentFeed {
    fn new() -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Mutex::new(FeedInner::default()),
            tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_init(&self, bytes: Bytes) {
        self.lock().init = Some(bytes);
    }

    pub fn push(&self, uri: &Url, bytes: Bytes) {
        let mut inner = self.lock();
        if inner.content_type.is_none() {
            inner.content_type = Some(segment_content_type(uri));
        }
        inner.backlog.push_back(bytes.clone());
        while inner.backlog.len() > FEED_BACKLOG {
            inner.backlog.pop_front();
        }
        // No receivers is fine; the backlog covers late joiners.
        let _ = self.tx.send(bytes);
    }

    /// Everything buffered so far plus a receiver for what comes next.  Taken
    /// under one lock so nothing is lost or duplicated in between.
    pub fn subscribe(&self) -> (Vec<Bytes>, broadcast::Receiver<Bytes>) {
        let inner = self.lock();
        let rx = self.tx.subscribe();
        let prefix = inner
            .init
            .iter()
            .chain(inner.backlog.iter())
            .cloned()
            .collect();
        (prefix, rx)
    }

    pub fn content_type(&self) -> &'static str {
        self.lock().content_type.unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

fn segment_content_type(uri: &Url) -> &'static str {
    let path = uri.path().to_ascii_lowercase();
    if path.ends_with(".aac") {
        "audio/aac"
    } else if path.ends_with(".mp3") {
        "audio/mpeg"
    } else if path.ends_with(".ts") {
        "video/mp2t"
    } else if path.ends_with(".m4s") || path.ends_with(".mp4") || path.ends_with(".m4a") {
        "audio/mp4"
    } else {
        DEFAULT_CONTENT_TYPE
    }
}

/// Live session feeds by session id.
#[derive(Clone, Default)]
pub struct HlsRegistry {
    feeds: Arc<Mutex<HashMap<Generation, Arc<SegmentFeed>>>>,
}

impl HlsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn feeds(&self) -> std::sync::MutexGuard<'_, HashMap<Generation, Arc<SegmentFeed>>> {
        self.feeds.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, id: Generation) -> Arc<SegmentFeed> {
        let feed = Arc::new(SegmentFeed::new());
        self.feeds().insert(id, feed.clone());
        feed
    }

    pub fn get(&self, id: Generation) -> Option<Arc<SegmentFeed>> {
        self.feeds().get(&id).cloned()
    }

    pub fn remove(&self, id: Generation) {
        self.feeds().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.feeds().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── route ─────────────────────────────────────────────────────────────────────

pub const HLS_ROUTE: &str = "/api/hls/{id}";

pub fn router(registry: HlsRegistry) -> Router {
    Router::new()
        .route(HLS_ROUTE, get(hls_stream))
        .with_state(registry)
}

async fn hls_stream(Path(id): Path<Generation>, State(registry): State<HlsRegistry>) -> Response {
    let Some(feed) = registry.get(id) else {
        warn!("hls: no session {}", id);
        return (StatusCode::NOT_FOUND, "Unknown HLS session").into_response();
    };

    let (prefix, rx) = feed.subscribe();
    debug!("hls: subscriber joined session {} ({} buffered)", id, prefix.len());

    let live = futures_util::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(bytes) => return Some((Ok::<_, std::io::Error>(bytes), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("hls: subscriber of session {} lagged by {} segments", id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    let body = Body::from_stream(futures_util::stream::iter(prefix.into_iter().map(Ok)).chain(live));

    (
        [
            (header::CONTENT_TYPE, feed.content_type()),
            (header::CACHE_CONTROL, "no-cache, no-store"),
        ],
        body,
    )
        .into_response()
}

// ── engine / session ──────────────────────────────────────────────────────────

pub struct HlsEngine {
    client: Client,
    registry: HlsRegistry,
    /// Scheme + authority the daemon's routes are reachable at.
    base_url: String,
    enabled: bool,
    segment_retries: u32,
}

impl HlsEngine {
    pub fn new(
        client: Client,
        registry: HlsRegistry,
        base_url: String,
        config: &HlsConfig,
    ) -> Self {
        Self {
            client,
            registry,
            base_url,
            enabled: config.enabled,
            segment_retries: config.segment_retries,
        }
    }
}

impl AdaptiveEngine for HlsEngine {
    fn is_supported(&self) -> bool {
        self.enabled
    }

    fn create(
        &mut self,
        manifest_url: &str,
        generation: Generation,
        events: EventSender,
    ) -> anyhow::Result<Box<dyn AdaptiveSession>> {
        let manifest = Url::parse(manifest_url)?;
        let feed = self.registry.insert(generation);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            client: self.client.clone(),
            manifest,
            generation,
            events,
            feed,
            control: control_rx,
            segment_retries: self.segment_retries,
            failures: 0,
        };
        let handle = tokio::spawn(task.run());
        info!("hls: session {} started", generation);

        Ok(Box::new(HlsSession {
            id: generation,
            source: format!("{}/api/hls/{}", self.base_url.trim_end_matches('/'), generation),
            control: control_tx,
            task: handle,
            registry: self.registry.clone(),
        }))
    }
}

pub struct HlsSession {
    id: Generation,
    source: String,
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
    registry: HlsRegistry,
}

impl HlsSession {
    fn control(&self, ctl: Control) -> anyhow::Result<()> {
        if self.task.is_finished() {
            anyhow::bail!("hls session {} has exited", self.id);
        }
        self.control
            .send(ctl)
            .map_err(|_| anyhow::anyhow!("hls session {} has exited", self.id))
    }
}

impl AdaptiveSession for HlsSession {
    fn media_source(&self) -> String {
        self.source.clone()
    }

    fn start_load(&mut self) -> anyhow::Result<()> {
        self.control(Control::StartLoad)
    }

    fn recover_media_error(&mut self) -> anyhow::Result<()> {
        self.control(Control::RecoverMedia)
    }
}

impl Drop for HlsSession {
    fn drop(&mut self) {
        self.task.abort();
        self.registry.remove(self.id);
        debug!("hls: session {} released", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerEvent;
    use crate::media::{AdaptiveErrorKind, AdaptiveEvent};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_feed_backlog_and_subscribe() {
        let feed = SegmentFeed::new();
        feed.set_init(Bytes::from_static(b"init"));
        for i in 0..5u8 {
            feed.push(&url("http://h/a.aac"), Bytes::from(vec![i]));
        }
        let (prefix, mut rx) = feed.subscribe();
        assert_eq!(prefix.len(), 1 + FEED_BACKLOG);
        assert_eq!(prefix[0], Bytes::from_static(b"init"));
        assert_eq!(prefix[1], Bytes::from(vec![2u8]));
        assert_eq!(feed.content_type(), "audio/aac");

        feed.push(&url("http://h/b.aac"), Bytes::from_static(b"next"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"next"));
    }

    #[test]
    fn test_segment_content_types() {
        assert_eq!(segment_content_type(&url("http://h/x/seg1.ts?t=1")), "video/mp2t");
        assert_eq!(segment_content_type(&url("http://h/x/seg1.m4s")), "audio/mp4");
        assert_eq!(segment_content_type(&url("http://h/x/seg1")), DEFAULT_CONTENT_TYPE);
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn engine(registry: &HlsRegistry, retries: u32) -> HlsEngine {
        HlsEngine::new(
            Client::new(),
            registry.clone(),
            "http://127.0.0.1:1".to_string(),
            &HlsConfig {
                enabled: true,
                segment_retries: retries,
            },
        )
    }

    async fn next_adaptive(rx: &mut mpsc::Receiver<ControllerEvent>) -> (Generation, AdaptiveEvent) {
        let evt = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("channel closed");
        match evt {
            ControllerEvent::Adaptive { generation, event } => (generation, event),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_parses_manifest_and_feeds_segments() {
        let upstream = serve(
            Router::new()
                .route(
                    "/live/master.m3u8",
                    get(|| async {
                        "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=64000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=128000\nhigh.m3u8\n"
                    }),
                )
                .route(
                    "/live/high.m3u8",
                    get(|| async {
                        "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:7\n#EXTINF:1,\nseg7.aac\n#EXTINF:1,\nseg8.aac\n#EXT-X-ENDLIST\n"
                    }),
                )
                .route("/live/seg7.aac", get(|| async { "AAAA" }))
                .route("/live/seg8.aac", get(|| async { "BBBB" })),
        )
        .await;

        let registry = HlsRegistry::new();
        let mut engine = engine(&registry, 3);
        let (tx, mut rx) = mpsc::channel(16);
        let session = engine
            .create(&format!("{}/live/master.m3u8", upstream), 9, tx)
            .unwrap();
        assert_eq!(session.media_source(), "http://127.0.0.1:1/api/hls/9");

        assert_eq!(next_adaptive(&mut rx).await, (9, AdaptiveEvent::ManifestParsed));

        let feed = registry.get(9).unwrap();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let (prefix, _) = feed.subscribe();
            if prefix.len() == 2 {
                assert_eq!(prefix[0], Bytes::from_static(b"AAAA"));
                assert_eq!(prefix[1], Bytes::from_static(b"BBBB"));
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "segments never arrived");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        drop(session);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_session_reports_fatal_network_error_for_missing_manifest() {
        let upstream = serve(Router::new()).await;
        let registry = HlsRegistry::new();
        let mut engine = engine(&registry, 3);
        let (tx, mut rx) = mpsc::channel(16);
        let _session = engine
            .create(&format!("{}/nope.m3u8", upstream), 4, tx)
            .unwrap();

        match next_adaptive(&mut rx).await {
            (4, AdaptiveEvent::Error { kind, fatal, .. }) => {
                assert_eq!(kind, AdaptiveErrorKind::Network);
                assert!(fatal);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_reports_fatal_other_for_garbage_manifest() {
        let upstream = serve(Router::new().route("/x.m3u8", get(|| async { "<html/>" }))).await;
        let registry = HlsRegistry::new();
        let mut engine = engine(&registry, 3);
        let (tx, mut rx) = mpsc::channel(16);
        let _session = engine.create(&format!("{}/x.m3u8", upstream), 5, tx).unwrap();

        match next_adaptive(&mut rx).await {
            (5, AdaptiveEvent::Error { kind, fatal, .. }) => {
                assert_eq!(kind, AdaptiveErrorKind::Other);
                assert!(fatal);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_media_playlist_is_recoverable_media_error() {
        let upstream = serve(Router::new().route(
            "/x.m3u8",
            get(|| async { "#EXTM3U\n#EXT-X-TARGETDURATION:1\n" }),
        ))
        .await;
        let registry = HlsRegistry::new();
        let mut engine = engine(&registry, 3);
        let (tx, mut rx) = mpsc::channel(16);
        let _session = engine.create(&format!("{}/x.m3u8", upstream), 6, tx).unwrap();

        assert_eq!(next_adaptive(&mut rx).await, (6, AdaptiveEvent::ManifestParsed));
        match next_adaptive(&mut rx).await {
            (6, AdaptiveEvent::Error { kind, fatal, .. }) => {
                assert_eq!(kind, AdaptiveErrorKind::Media);
                assert!(!fatal);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_last_possible_media_sequence_stops_session() {
        let upstream = serve(
            Router::new()
                .route(
                    "/x.m3u8",
                    get(|| async {
                        "#EXTM3U\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:18446744073709551615\n#EXTINF:1,\nlast.aac\n#EXT-X-ENDLIST\n"
                    }),
                )
                .route("/last.aac", get(|| async { "ZZZZ" })),
        )
        .await;
        let registry = HlsRegistry::new();
        let mut engine = engine(&registry, 3);
        let (tx, mut rx) = mpsc::channel(16);
        let _session = engine.create(&format!("{}/x.m3u8", upstream), 7, tx).unwrap();

        assert_eq!(next_adaptive(&mut rx).await, (7, AdaptiveEvent::ManifestParsed));
        match next_adaptive(&mut rx).await {
            (7, AdaptiveEvent::Error { kind, fatal, .. }) => {
                assert_eq!(kind, AdaptiveErrorKind::Other);
                assert!(fatal);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_session_route_is_404() {
        let base = serve(router(HlsRegistry::new())).await;
        let resp = reqwest::get(format!("{}/api/hls/42", base)).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_route_replays_backlog() {
        let registry = HlsRegistry::new();
        let feed = registry.insert(3);
        feed.push(&url("http://h/a.ts"), Bytes::from_static(b"seg-a"));
        let base = serve(router(registry.clone())).await;

        let resp = reqwest::get(format!("{}/api/hls/3", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "video/mp2t");
        let mut stream = resp.bytes_stream();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"seg-a"));
    }
}
