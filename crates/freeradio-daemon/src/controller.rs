/// PlaybackController: single-owner event loop for playback.
///
/// All inputs (client commands, media element notifications, adaptive
/// session notifications) arrive as `ControllerEvent`s on one channel and are
/// handled in arrival order.  The controller exclusively owns the media
/// element and at most one adaptive session; starting a new station or
/// stopping tears the old session down completely and bumps the generation,
/// so notifications still in flight for the old session are recognised as
/// stale and dropped.
///
/// Playback status is published through `StateManager`; callers never get
/// a synchronous "it's playing" answer and must observe the state instead.
use std::sync::Arc;

use freeradio_proto::protocol::{Command, PlaybackPhase, Station};
use freeradio_proto::state::StateManager;
use freeradio_proto::stations::{classify, proxy_url, StreamKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::media::{
    AdaptiveEngine, AdaptiveErrorKind, AdaptiveEvent, AdaptiveSession, EventSender, Generation,
    MediaElement, MediaErrorKind, MediaEvent,
};

pub const MSG_NETWORK: &str = "Network error. Check your connection.";
pub const MSG_DECODE: &str = "Unable to decode audio stream.";
pub const MSG_UNSUPPORTED: &str = "Stream format not supported.";
pub const MSG_UNKNOWN: &str = "Failed to load stream. Please try another station.";
pub const MSG_PLAY_FAILED: &str = "Playback failed. Click to retry.";
pub const MSG_HLS_NETWORK: &str = "Network error loading stream.";
pub const MSG_HLS_MEDIA: &str = "Media error while playing stream.";
pub const MSG_HLS_OTHER: &str = "Failed to load stream.";
pub const MSG_HLS_UNSUPPORTED: &str = "HLS streams are not supported by this player.";

pub fn media_error_message(kind: MediaErrorKind) -> &'static str {
    match kind {
        MediaErrorKind::Network => MSG_NETWORK,
        MediaErrorKind::Decode => MSG_DECODE,
        MediaErrorKind::SrcNotSupported => MSG_UNSUPPORTED,
        MediaErrorKind::Unknown => MSG_UNKNOWN,
    }
}

pub fn adaptive_error_message(kind: AdaptiveErrorKind) -> &'static str {
    match kind {
        AdaptiveErrorKind::Network => MSG_HLS_NETWORK,
        AdaptiveErrorKind::Media => MSG_HLS_MEDIA,
        AdaptiveErrorKind::Other => MSG_HLS_OTHER,
    }
}

// ── ControllerEvent ───────────────────────────────────────────────────────────

/// All inputs into the PlaybackController loop.
#[derive(Debug)]
pub enum ControllerEvent {
    /// A command from the HTTP API.
    Command(Command),
    /// Notification from the media element.
    Media {
        generation: Generation,
        event: MediaEvent,
    },
    /// Notification from an adaptive session.
    Adaptive {
        generation: Generation,
        event: AdaptiveEvent,
    },
    /// Shutdown requested.
    Shutdown,
}

// ── PlaybackController ────────────────────────────────────────────────────────

pub struct PlaybackController {
    state_manager: Arc<StateManager>,
    element: Box<dyn MediaElement>,
    engine: Box<dyn AdaptiveEngine>,
    /// Live adaptive session, if the current station is HLS.
    session: Option<Box<dyn AdaptiveSession>>,
    /// Handed to adaptive sessions so they can report back.
    event_tx: EventSender,
    /// Tag of the current session; events carrying any other value are stale.
    generation: Generation,
    /// Scheme + authority the stream proxy is reachable at.
    proxy_base: String,
}

impl PlaybackController {
    pub async fn new(
        state_manager: Arc<StateManager>,
        mut element: Box<dyn MediaElement>,
        engine: Box<dyn AdaptiveEngine>,
        event_tx: EventSender,
        proxy_base: String,
    ) -> Self {
        element.set_volume(state_manager.get_state().await.volume);
        Self {
            state_manager,
            element,
            engine,
            session: None,
            event_tx,
            generation: 0,
            proxy_base,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Run the event loop.  Returns when a `Shutdown` event is received or
    /// every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<ControllerEvent>) {
        info!("PlaybackController: starting event loop");
        loop {
            match event_rx.recv().await {
                None => {
                    info!("PlaybackController: event channel closed, shutting down");
                    break;
                }
                Some(ControllerEvent::Shutdown) => {
                    info!("PlaybackController: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }
        self.teardown();
    }

    pub async fn handle_event(&mut self, evt: ControllerEvent) {
        match evt {
            ControllerEvent::Command(cmd) => {
                info!("PlaybackController: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            ControllerEvent::Media { generation, event } => {
                if generation != self.generation {
                    debug!(
                        "PlaybackController: dropping stale media event {:?} (gen {} != {})",
                        event, generation, self.generation
                    );
                    return;
                }
                self.handle_media_event(event).await;
            }
            ControllerEvent::Adaptive { generation, event } => {
                if generation != self.generation {
                    debug!(
                        "PlaybackController: dropping stale adaptive event {:?} (gen {} != {})",
                        event, generation, self.generation
                    );
                    return;
                }
                self.handle_adaptive_event(event).await;
            }
            ControllerEvent::Shutdown => {}
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play { station } => self.play(station).await,
            Command::Pause => self.pause().await,
            Command::Resume => self.resume().await,
            Command::Stop => self.stop().await,
            Command::Volume { value } => self.set_volume(value).await,
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn play(&mut self, station: Station) {
        let state = self.state_manager.get_state().await;
        let same_station = state
            .current_station
            .as_ref()
            .is_some_and(|s| s.id == station.id);
        let live = self.element.has_source() || self.session.is_some();

        if same_station && live && state.phase != PlaybackPhase::Error {
            debug!("PlaybackController: {} already loaded, resuming in place", station.name);
            if state.phase == PlaybackPhase::Paused {
                self.state_manager.clear_error().await;
            }
            self.element.play(self.generation);
            return;
        }

        self.start_session(station).await;
    }

    async fn pause(&mut self) {
        let phase = self.state_manager.get_state().await.phase;
        if matches!(phase, PlaybackPhase::Playing | PlaybackPhase::Loading) {
            self.element.pause();
        } else {
            debug!("PlaybackController: pause ignored in {:?}", phase);
        }
    }

    async fn resume(&mut self) {
        let state = self.state_manager.get_state().await;
        let Some(station) = state.current_station else {
            debug!("PlaybackController: resume ignored, nothing loaded");
            return;
        };
        match state.phase {
            PlaybackPhase::Paused if self.element.has_source() => {
                self.state_manager.clear_error().await;
                self.element.play(self.generation);
            }
            PlaybackPhase::Paused | PlaybackPhase::Error => {
                // The failed session is not reusable; rebuild it for the same station.
                info!("PlaybackController: retrying {}", station.name);
                self.start_session(station).await;
            }
            other => debug!("PlaybackController: resume ignored in {:?}", other),
        }
    }

    async fn stop(&mut self) {
        self.teardown();
        self.generation += 1;
        self.state_manager.set_stopped().await;
    }

    async fn set_volume(&mut self, value: f32) {
        let (applied, saved) = self.state_manager.set_volume(value).await;
        self.element.set_volume(applied);
        if let Err(e) = saved {
            warn!("PlaybackController: failed to persist volume: {}", e);
        }
    }

    // ── session management ────────────────────────────────────────────────────

    /// Drop the adaptive session (releasing its worker) and detach the element.
    fn teardown(&mut self) {
        if self.session.take().is_some() {
            debug!("PlaybackController: adaptive session released");
        }
        self.element.detach();
    }

    async fn start_session(&mut self, station: Station) {
        self.teardown();
        self.generation += 1;
        let generation = self.generation;
        info!(
            "PlaybackController: playing {} (gen {}) → {}",
            station.name, generation, station.stream_url
        );

        let url = station.stream_url.clone();
        self.state_manager.set_loading(station).await;

        match classify(&url) {
            StreamKind::Adaptive => self.start_adaptive(&url, generation).await,
            StreamKind::Direct => match proxy_url(&self.proxy_base, &url) {
                Ok(proxied) => {
                    self.element.load(&proxied, generation);
                    self.element.play(generation);
                }
                Err(e) => {
                    error!("PlaybackController: cannot build proxy url for {}: {}", url, e);
                    self.state_manager.set_error(MSG_UNKNOWN).await;
                }
            },
        }
    }

    async fn start_adaptive(&mut self, url: &str, generation: Generation) {
        if self.engine.is_supported() {
            match self.engine.create(url, generation, self.event_tx.clone()) {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    warn!("PlaybackController: failed to start adaptive session: {}", e);
                    self.state_manager.set_error(MSG_HLS_OTHER).await;
                }
            }
        } else if self.element.supports_native_hls() {
            debug!("PlaybackController: handing manifest to the element directly");
            self.element.load(url, generation);
            self.element.play(generation);
        } else {
            self.state_manager.set_error(MSG_HLS_UNSUPPORTED).await;
        }
    }

    // ── notifications ─────────────────────────────────────────────────────────

    async fn handle_media_event(&mut self, event: MediaEvent) {
        let state = self.state_manager.get_state().await;
        if state.current_station.is_none() {
            debug!("PlaybackController: media event {:?} with nothing loaded", event);
            return;
        }

        match event {
            MediaEvent::Playing => {
                if state.phase != PlaybackPhase::Playing {
                    info!("PlaybackController: status {:?} → Playing", state.phase);
                    self.state_manager.set_phase(PlaybackPhase::Playing).await;
                }
            }
            MediaEvent::Waiting => {
                if state.phase == PlaybackPhase::Playing {
                    self.state_manager.set_phase(PlaybackPhase::Loading).await;
                }
            }
            MediaEvent::Paused => {
                if matches!(state.phase, PlaybackPhase::Playing | PlaybackPhase::Loading) {
                    info!("PlaybackController: status {:?} → Paused", state.phase);
                    self.state_manager.set_phase(PlaybackPhase::Paused).await;
                }
            }
            MediaEvent::Error(kind) => {
                warn!("PlaybackController: media error {:?}", kind);
                self.state_manager.set_error(media_error_message(kind)).await;
            }
            MediaEvent::PlayRejected { aborted } => {
                if aborted {
                    debug!("PlaybackController: play request aborted by a newer load");
                } else {
                    warn!("PlaybackController: play request rejected");
                    self.state_manager.set_error(MSG_PLAY_FAILED).await;
                }
            }
        }
    }

    async fn handle_adaptive_event(&mut self, event: AdaptiveEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!("PlaybackController: adaptive event {:?} without a session", event);
            return;
        };

        match event {
            AdaptiveEvent::ManifestParsed => {
                let source = session.media_source();
                debug!("PlaybackController: manifest parsed, attaching {}", source);
                self.element.load(&source, self.generation);
                self.element.play(self.generation);
            }
            AdaptiveEvent::Error {
                kind,
                fatal: false,
                detail,
            } => {
                debug!("PlaybackController: recoverable {:?} error: {}", kind, detail);
                let recovered = match kind {
                    AdaptiveErrorKind::Network => session.start_load(),
                    AdaptiveErrorKind::Media => session.recover_media_error(),
                    AdaptiveErrorKind::Other => Ok(()),
                };
                if let Err(e) = recovered {
                    warn!("PlaybackController: recovery from {:?} failed: {}", kind, e);
                    self.state_manager.set_error(adaptive_error_message(kind)).await;
                }
            }
            AdaptiveEvent::Error {
                kind,
                fatal: true,
                detail,
            } => {
                warn!("PlaybackController: fatal {:?} error: {}", kind, detail);
                if kind == AdaptiveErrorKind::Other {
                    self.teardown();
                }
                self.state_manager.set_error(adaptive_error_message(kind)).await;
            }
        }
    }
}
