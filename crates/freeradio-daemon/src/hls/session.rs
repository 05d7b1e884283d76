use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use reqwest::{Client, Url};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::playlist::{best_variant, parse, Playlist};
use super::SegmentFeed;
use crate::controller::ControllerEvent;
use crate::media::{AdaptiveErrorKind, AdaptiveEvent, EventSender, Generation};

/// Segments fetched when joining a live playlist, counted back from the end.
const LIVE_EDGE_SEGMENTS: u64 = 3;
const MIN_POLL: Duration = Duration::from_secs(1);
const MAX_POLL_SECS: f64 = 30.0;

#[derive(Debug)]
pub(super) enum Control {
    StartLoad,
    RecoverMedia,
}

enum SessionError {
    Network(String),
    Media(String),
    Other(String),
}

enum Follow {
    Restart,
    Closed,
}

struct PollOutcome {
    new_segments: usize,
    target_duration: f64,
    ended: bool,
}

/// Worker behind one `HlsSession`.  Lives until the session is dropped (task
/// aborted) or its control channel closes.
pub(super) struct SessionTask {
    pub(super) client: Client,
    pub(super) manifest: Url,
    pub(super) generation: Generation,
    pub(super) events: EventSender,
    pub(super) feed: Arc<SegmentFeed>,
    pub(super) control: mpsc::UnboundedReceiver<Control>,
    pub(super) segment_retries: u32,
    /// Consecutive failures; survives restarts so a reload loop ends in a
    /// fatal error instead of spinning.
    pub(super) failures: u32,
}

impl SessionTask {
    pub(super) async fn run(mut self) {
        info!("hls[{}]: loading {}", self.generation, self.manifest);
        let mut announced = false;

        'load: loop {
            let media_url = match self.resolve_media_playlist().await {
                Ok(url) => url,
                Err(e) => {
                    let (kind, detail) = split(e);
                    self.emit_error(kind, true, detail).await;
                    match self.control.recv().await {
                        Some(_) => continue 'load,
                        None => return,
                    }
                }
            };

            if !announced {
                announced = true;
                self.emit(AdaptiveEvent::ManifestParsed).await;
            }

            match self.follow(&media_url).await {
                Follow::Restart => {
                    debug!("hls[{}]: reloading from manifest", self.generation);
                    continue 'load;
                }
                Follow::Closed => return,
            }
        }
    }

    /// Fetch the manifest and return the media playlist to follow.
    async fn resolve_media_playlist(&self) -> Result<Url, SessionError> {
        let text = self
            .fetch_text(&self.manifest)
            .await
            .map_err(SessionError::Network)?;
        match parse(&self.manifest, &text).map_err(|e| SessionError::Other(e.to_string()))? {
            Playlist::Media(_) => Ok(self.manifest.clone()),
            Playlist::Master(variants) => {
                let variant = best_variant(&variants)
                    .ok_or_else(|| SessionError::Other("no variants".into()))?;
                debug!(
                    "hls[{}]: picked variant {} ({} bps)",
                    self.generation, variant.uri, variant.bandwidth
                );
                Ok(variant.uri.clone())
            }
        }
    }

    async fn follow(&mut self, media_url: &Url) -> Follow {
        let mut next_seq: Option<u64> = None;
        let mut init_sent = false;
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                ctl = self.control.recv() => match ctl {
                    None => return Follow::Closed,
                    Some(Control::StartLoad) => return Follow::Restart,
                    Some(Control::RecoverMedia) => {
                        debug!("hls[{}]: resyncing to live edge", self.generation);
                        next_seq = None;
                        wait = Duration::ZERO;
                        continue;
                    }
                },
                _ = tokio::time::sleep(wait) => {}
            }

            match self.poll(media_url, &mut next_seq, &mut init_sent).await {
                Ok(outcome) => {
                    if outcome.ended && outcome.new_segments == 0 {
                        debug!("hls[{}]: playlist ended", self.generation);
                        match self.control.recv().await {
                            None => return Follow::Closed,
                            Some(Control::StartLoad) => return Follow::Restart,
                            Some(Control::RecoverMedia) => {
                                next_seq = None;
                                continue;
                            }
                        }
                    }
                    let secs = outcome.target_duration.max(0.0).min(MAX_POLL_SECS);
                    let target = Duration::from_secs_f64(secs);
                    wait = if outcome.new_segments > 0 { target } else { target / 2 };
                    wait = wait.max(MIN_POLL);
                }
                Err(SessionError::Other(detail)) => {
                    self.emit_error(AdaptiveErrorKind::Other, true, detail).await;
                    match self.control.recv().await {
                        None => return Follow::Closed,
                        Some(_) => return Follow::Restart,
                    }
                }
                Err(e) => {
                    self.failures += 1;
                    let fatal = self.failures > self.segment_retries;
                    let (kind, detail) = split(e);
                    self.emit_error(kind, fatal, detail).await;
                    if fatal {
                        // Wait for an explicit reload from the controller.
                        match self.control.recv().await {
                            None => return Follow::Closed,
                            Some(_) => {
                                self.failures = 0;
                                return Follow::Restart;
                            }
                        }
                    }
                    wait = MIN_POLL;
                }
            }
        }
    }

    async fn poll(
        &mut self,
        media_url: &Url,
        next_seq: &mut Option<u64>,
        init_sent: &mut bool,
    ) -> Result<PollOutcome, SessionError> {
        let text = self
            .fetch_text(media_url)
            .await
            .map_err(SessionError::Network)?;
        let media = match parse(media_url, &text).map_err(|e| SessionError::Other(e.to_string()))? {
            Playlist::Media(m) => m,
            Playlist::Master(_) => {
                return Err(SessionError::Other("variant is itself a master playlist".into()))
            }
        };
        let (first, last) = match (media.segments.first(), media.segments.last()) {
            (Some(f), Some(l)) => (f.sequence, l.sequence),
            _ => return Err(SessionError::Media("playlist has no segments".into())),
        };

        if !*init_sent {
            if let Some(init) = &media.init {
                let bytes = self.fetch_bytes(init).await.map_err(SessionError::Network)?;
                self.feed.set_init(bytes);
            }
            *init_sent = true;
        }

        let start = match *next_seq {
            Some(seq) if seq < first => {
                warn!(
                    "hls[{}]: fell behind the playlist window ({} < {}), skipping ahead",
                    self.generation, seq, first
                );
                first
            }
            Some(seq) => seq,
            None if media.ended => first,
            None => last.saturating_sub(LIVE_EDGE_SEGMENTS - 1).max(first),
        };

        let mut new_segments = 0;
        for segment in media.segments.iter().filter(|s| s.sequence >= start) {
            let bytes = self
                .fetch_bytes(&segment.uri)
                .await
                .map_err(SessionError::Network)?;
            if bytes.is_empty() {
                return Err(SessionError::Media(format!(
                    "segment {} is empty",
                    segment.sequence
                )));
            }
            self.feed.push(&segment.uri, bytes);
            let next = segment
                .sequence
                .checked_add(1)
                .ok_or_else(|| SessionError::Other("media sequence exhausted".into()))?;
            *next_seq = Some(next);
            self.failures = 0;
            new_segments += 1;
        }

        Ok(PollOutcome {
            new_segments,
            target_duration: media.target_duration,
            ended: media.ended,
        })
    }

    async fn fetch_text(&self, url: &Url) -> Result<String, String> {
        let resp = self.get(url).await?;
        resp.text().await.map_err(|e| format!("{}: {}", url, e))
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, String> {
        let resp = self.get(url).await?;
        resp.bytes().await.map_err(|e| format!("{}: {}", url, e))
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, String> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("{}: {}", url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{}: upstream returned {}", url, status));
        }
        Ok(resp)
    }

    async fn emit(&self, event: AdaptiveEvent) {
        let _ = self
            .events
            .send(ControllerEvent::Adaptive {
                generation: self.generation,
                event,
            })
            .await;
    }

    async fn emit_error(&self, kind: AdaptiveErrorKind, fatal: bool, detail: String) {
        warn!(
            "hls[{}]: {:?} error (fatal={}): {}",
            self.generation, kind, fatal, detail
        );
        self.emit(AdaptiveEvent::Error {
            kind,
            fatal,
            detail,
        })
        .await;
    }
}

fn split(e: SessionError) -> (AdaptiveErrorKind, String) {
    match e {
        SessionError::Network(d) => (AdaptiveErrorKind::Network, d),
        SessionError::Media(d) => (AdaptiveErrorKind::Media, d),
        SessionError::Other(d) => (AdaptiveErrorKind::Other, d),
    }
}
