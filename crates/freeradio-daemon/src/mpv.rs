/// mpv-backed media element.
///
/// Architecture:
///
/// ```text
///   MpvElement (sync, owned by PlaybackController)
///         │  ElementCommand via unbounded mpsc (keeps command order)
///         ▼
///   driver task ── owns MpvDriver (child process) + MpvHandle
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → translator task
///                                                                   → ControllerEvent::Media
/// ```
///
/// mpv is spawned lazily on the first command that needs it and respawned if
/// it died.  The reply to each `loadfile` is turned into a generation marker
/// in the event stream, so an event is tagged with the load that preceded it
/// on the socket rather than whichever load is newest when it is read.
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use freeradio_proto::config::PlaybackConfig;

use crate::controller::ControllerEvent;
use crate::media::{EventSender, Generation, MediaElement, MediaErrorKind, MediaEvent};

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

// ── internal channel types ────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;

struct Pending {
    reply: oneshot::Sender<anyhow::Result<Value>>,
    /// Set for `loadfile`; a successful reply emits `MpvPush::Loaded`.
    generation: Option<Generation>,
}

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
    generation: Option<Generation>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

/// What the reader task forwards to the translator, in socket order.
#[derive(Debug, Clone)]
pub enum MpvPush {
    Event(MpvEvent),
    /// mpv accepted the `loadfile` issued for this generation.
    Loaded(Generation),
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        self.send_tagged(command, None).await
    }

    async fn send_tagged(
        &self,
        command: Value,
        generation: Option<Generation>,
    ) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
                generation,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn load(&self, url: &str, generation: Generation) -> anyhow::Result<()> {
        // Loaded paused; an explicit play request unpauses.
        self.set_pause(true).await?;
        self.send_tagged(json!(["loadfile", url, "replace"]), Some(generation))
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        self.send(json!(["set_property", "volume", volume_percent(vol)]))
            .await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    /// Register observe_property for the properties we translate into media
    /// events.  Must be called after every fresh connection.
    pub async fn observe_properties(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

fn volume_percent(volume: f32) -> f64 {
    (volume as f64 * 100.0).clamp(0.0, 100.0)
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    binary: String,
    socket_name: String,
    connect_timeout: Duration,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            binary: config.mpv_binary.clone(),
            socket_name: freeradio_proto::platform::mpv_socket_name(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
            process: None,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<MpvPush>,
    ) -> anyhow::Result<MpvHandle> {
        // Kill stale process
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        info!("mpv: spawning {}", self.binary);
        let child = tokio::process::Command::new(&self.binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(format!("--input-ipc-server={}", self.socket_name))
            .arg("--quiet")
            .arg(format!("--volume={}", volume_percent(volume).round() as i64))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        // Wait for socket to appear
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        while !socket_path.exists() {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("mpv IPC socket did not appear");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(Self::start_io_tasks(stream, event_tx))
    }

    fn start_io_tasks(stream: UnixStream, event_tx: mpsc::Sender<MpvPush>) -> MpvHandle {
        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);

        // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(reader, pending, event_tx));

        MpvHandle { tx: cmd_tx }
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvPush>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                // Fail all pending requests
                let mut map = pending.lock().await;
                for (_, p) in map.drain() {
                    let _ = p.reply.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let entry = pending.lock().await.remove(&req_id);
                    if let Some(p) = entry {
                        let success = val["error"].as_str() == Some("success");
                        if let (true, Some(generation)) = (success, p.generation) {
                            // Everything mpv sends after this reply belongs to the new file.
                            if event_tx.send(MpvPush::Loaded(generation)).await.is_err() {
                                break;
                            }
                        }
                        let result = if success {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = p.reply.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    if event_tx.send(MpvPush::Event(MpvEvent { raw: val })).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, p) in map.drain() {
                    let _ = p.reply.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(
                req.req_id,
                Pending {
                    reply: req.reply,
                    generation: req.generation,
                },
            );
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(p) = map.remove(&req.req_id) {
                let _ = p.reply.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Map mpv's `file_error` text on an `end-file` event to a media error class.
pub fn classify_file_error(file_error: &str) -> MediaErrorKind {
    let e = file_error.to_ascii_lowercase();
    if e.contains("unrecognized file format") || e.contains("no audio or video") {
        MediaErrorKind::SrcNotSupported
    } else if e.contains("loading failed") || e.contains("network") || e.contains("timeout") {
        MediaErrorKind::Network
    } else if e.contains("decod") || e.contains("demux") {
        MediaErrorKind::Decode
    } else {
        MediaErrorKind::Unknown
    }
}

/// Turns raw mpv push events into media events.  Tracks the observed
/// `pause` / `core-idle` pair so Playing and Waiting are only reported on
/// actual edges.
///
/// `pause=true` is only reported as Paused while a pause was requested; the
/// element pauses mpv itself before every load and that must not look like
/// a user pause.
#[derive(Debug, Default)]
pub struct EventTranslator {
    paused: bool,
    core_idle: Option<bool>,
    /// Set by file-loaded, cleared by end-file; Waiting only makes sense in between.
    loaded: bool,
    pause_requested: Arc<AtomicBool>,
}

impl EventTranslator {
    pub fn new(pause_requested: Arc<AtomicBool>) -> Self {
        Self {
            pause_requested,
            ..Self::default()
        }
    }

    pub fn translate(&mut self, evt: &MpvEvent) -> Option<MediaEvent> {
        if let Some((obs_id, data)) = evt.as_property_change() {
            return match obs_id {
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    if paused == self.paused {
                        return None;
                    }
                    self.paused = paused;
                    if paused {
                        self.pause_requested
                            .load(Ordering::SeqCst)
                            .then_some(MediaEvent::Paused)
                    } else {
                        self.playing_edge()
                    }
                }
                OBS_CORE_IDLE => {
                    let idle = data.as_bool();
                    if idle == self.core_idle {
                        return None;
                    }
                    self.core_idle = idle;
                    match idle {
                        Some(false) => self.playing_edge(),
                        Some(true) if self.loaded && !self.paused => Some(MediaEvent::Waiting),
                        _ => None,
                    }
                }
                _ => None,
            };
        }

        match evt.event_name()? {
            "file-loaded" => {
                self.loaded = true;
                None
            }
            "end-file" => {
                self.loaded = false;
                self.core_idle = Some(true);
                let reason = evt.raw.get("reason").and_then(|v| v.as_str()).unwrap_or("");
                match reason {
                    "error" => {
                        let file_error = evt
                            .raw
                            .get("file_error")
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        Some(MediaEvent::Error(classify_file_error(file_error)))
                    }
                    // A live stream should never reach its end; treat it as a dropped connection.
                    "eof" => Some(MediaEvent::Error(MediaErrorKind::Network)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn playing_edge(&self) -> Option<MediaEvent> {
        if !self.paused && self.core_idle == Some(false) {
            Some(MediaEvent::Playing)
        } else {
            None
        }
    }
}

/// Translate mpv pushes and forward them to the controller.  Events are
/// tagged with the generation of the last `Loaded` marker before them; events
/// ahead of the first marker carry generation 0, which is never current once
/// anything has been played.
async fn forward_events(
    mut mpv_rx: mpsc::Receiver<MpvPush>,
    mut translator: EventTranslator,
    events: EventSender,
) {
    let mut generation: Generation = 0;
    while let Some(push) = mpv_rx.recv().await {
        let event = match push {
            MpvPush::Loaded(g) => {
                generation = g;
                continue;
            }
            MpvPush::Event(evt) => match translator.translate(&evt) {
                Some(event) => event,
                None => continue,
            },
        };
        if events
            .send(ControllerEvent::Media { generation, event })
            .await
            .is_err()
        {
            break;
        }
    }
    debug!("mpv: event translator exiting");
}

// ── element ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ElementCommand {
    Load { url: String, generation: Generation },
    Play { generation: Generation },
    Pause,
    Detach,
    Volume(f32),
}

pub struct MpvElement {
    commands: mpsc::UnboundedSender<ElementCommand>,
    has_source: bool,
}

impl MpvElement {
    /// Start the driver task.  No mpv process is spawned until it is needed.
    pub fn spawn(config: &PlaybackConfig, events: EventSender) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = ElementDriver {
            driver: MpvDriver::new(config),
            handle: None,
            volume: config.default_volume,
            pause_requested: Arc::new(AtomicBool::new(false)),
            events,
        };
        tokio::spawn(driver.run(rx));
        Self {
            commands: tx,
            has_source: false,
        }
    }

    fn send(&self, cmd: ElementCommand) {
        if self.commands.send(cmd).is_err() {
            warn!("mpv: element driver is gone, dropping command");
        }
    }
}

impl MediaElement for MpvElement {
    fn load(&mut self, source: &str, generation: Generation) {
        self.has_source = true;
        self.send(ElementCommand::Load {
            url: source.to_string(),
            generation,
        });
    }

    fn play(&mut self, generation: Generation) {
        self.send(ElementCommand::Play { generation });
    }

    fn pause(&mut self) {
        self.send(ElementCommand::Pause);
    }

    fn detach(&mut self) {
        if self.has_source {
            self.has_source = false;
            self.send(ElementCommand::Detach);
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(ElementCommand::Volume(volume));
    }

    fn has_source(&self) -> bool {
        self.has_source
    }

    fn supports_native_hls(&self) -> bool {
        true
    }
}

struct ElementDriver {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    volume: f32,
    /// Shared with the translator task; true between a pause request and the
    /// next load or play.
    pause_requested: Arc<AtomicBool>,
    events: EventSender,
}

impl ElementDriver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ElementCommand>) {
        while let Some(cmd) = rx.recv().await {
            debug!("mpv: element command {:?}", cmd);
            match cmd {
                ElementCommand::Load { url, generation } => {
                    self.pause_requested.store(false, Ordering::SeqCst);
                    match self.ensure_handle().await {
                        Some(h) => {
                            if let Err(e) = h.load(&url, generation).await {
                                warn!("mpv: loadfile failed for {}: {}", url, e);
                                self.emit(generation, MediaEvent::Error(MediaErrorKind::Unknown))
                                    .await;
                            }
                        }
                        None => {
                            self.emit(generation, MediaEvent::Error(MediaErrorKind::Unknown))
                                .await
                        }
                    }
                }
                ElementCommand::Play { generation } => {
                    self.pause_requested.store(false, Ordering::SeqCst);
                    let result = match self.ensure_handle().await {
                        Some(h) => h.set_pause(false).await,
                        None => Err(anyhow::anyhow!("mpv unavailable")),
                    };
                    if let Err(e) = result {
                        warn!("mpv: play request failed: {}", e);
                        self.emit(generation, MediaEvent::PlayRejected { aborted: false })
                            .await;
                    }
                }
                ElementCommand::Pause => {
                    self.pause_requested.store(true, Ordering::SeqCst);
                    if let Some(h) = self.live_handle() {
                        if let Err(e) = h.set_pause(true).await {
                            warn!("mpv: pause failed: {}", e);
                        }
                    }
                }
                ElementCommand::Detach => {
                    if let Some(h) = self.live_handle() {
                        if let Err(e) = h.stop().await {
                            warn!("mpv: stop failed: {}", e);
                        }
                    }
                }
                ElementCommand::Volume(volume) => {
                    self.volume = volume;
                    if let Some(h) = self.live_handle() {
                        if let Err(e) = h.set_volume(volume).await {
                            warn!("mpv: set volume failed: {}", e);
                        }
                    }
                }
            }
        }
        debug!("mpv: element driver exiting");
    }

    async fn emit(&self, generation: Generation, event: MediaEvent) {
        let _ = self
            .events
            .send(ControllerEvent::Media { generation, event })
            .await;
    }

    /// Current handle if mpv is connected; never spawns.
    fn live_handle(&mut self) -> Option<MpvHandle> {
        if self.handle.as_ref().is_some_and(|h| h.is_closed()) || !self.driver.process_alive() {
            self.handle = None;
        }
        self.handle.clone()
    }

    async fn ensure_handle(&mut self) -> Option<MpvHandle> {
        if let Some(h) = self.live_handle() {
            return Some(h);
        }

        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvPush>(64);
        let handle = match self.driver.spawn_and_connect(self.volume, mpv_tx).await {
            Ok(h) => h,
            Err(e) => {
                warn!("mpv: failed to start: {}", e);
                return None;
            }
        };
        handle.observe_properties().await;

        // Translator: mpv pushes → ControllerEvent::Media
        tokio::spawn(forward_events(
            mpv_rx,
            EventTranslator::new(self.pause_requested.clone()),
            self.events.clone(),
        ));

        self.handle = Some(handle.clone());
        Some(handle)
    }
}
