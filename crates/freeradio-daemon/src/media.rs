//! Seams between the playback controller and the things that actually make
//! sound.
//!
//! Every call is fire-and-forget: outcomes come back later as
//! [`ControllerEvent`]s tagged with the [`Generation`] they were issued under,
//! so the controller can drop notifications from sessions it already replaced.
use tokio::sync::mpsc;

use crate::controller::ControllerEvent;

/// Session tag.  Bumped by the controller on every new session and on stop.
pub type Generation = u64;

pub type EventSender = mpsc::Sender<ControllerEvent>;

/// Failure classes reported by the media element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorKind {
    Network,
    Decode,
    SrcNotSupported,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Audio is flowing.
    Playing,
    /// Buffering after having started.
    Waiting,
    /// The element confirmed a pause.
    Paused,
    Error(MediaErrorKind),
    /// A play request failed.  `aborted` is set when it was interrupted by a
    /// newer load rather than failing on its own.
    PlayRejected { aborted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveErrorKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdaptiveEvent {
    /// The manifest was fetched and understood; media can be attached.
    ManifestParsed,
    Error {
        kind: AdaptiveErrorKind,
        fatal: bool,
        detail: String,
    },
}

/// The single audio output the controller owns.
pub trait MediaElement: Send {
    /// Replace the current source.  Does not start playback.
    fn load(&mut self, source: &str, generation: Generation);
    /// Request playback of the loaded source.
    fn play(&mut self, generation: Generation);
    fn pause(&mut self);
    /// Pause and drop the source.
    fn detach(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn has_source(&self) -> bool;
    /// Whether HLS manifests can be handed to the element directly.
    fn supports_native_hls(&self) -> bool;
}

/// A live adaptive-streaming session.  Dropping it releases its worker.
pub trait AdaptiveSession: Send {
    /// Source the media element should load once the manifest is parsed.
    fn media_source(&self) -> String;
    /// Restart loading from the manifest.
    fn start_load(&mut self) -> anyhow::Result<()>;
    /// Resynchronise media after a recoverable media error.
    fn recover_media_error(&mut self) -> anyhow::Result<()>;
}

pub trait AdaptiveEngine: Send {
    fn is_supported(&self) -> bool;
    /// Start a session for `manifest_url`.  Loading begins immediately and
    /// progress is reported on `events` under `generation`.
    fn create(
        &mut self,
        manifest_url: &str,
        generation: Generation,
        events: EventSender,
    ) -> anyhow::Result<Box<dyn AdaptiveSession>>;
}
