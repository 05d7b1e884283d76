use std::sync::Arc;

use freeradio_daemon::controller::{ControllerEvent, PlaybackController};
use freeradio_daemon::hls::{HlsEngine, HlsRegistry};
use freeradio_daemon::http::{self, AppState};
use freeradio_daemon::mpv::MpvElement;
use freeradio_daemon::proxy::ProxyState;
use freeradio_proto::config::Config;
use freeradio_proto::custom_stations::CustomStations;
use freeradio_proto::favorites::Favorites;
use freeradio_proto::state::StateManager;
use freeradio_proto::store::{FileBackend, SharedBackend};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup file logging + stderr
    let data_dir = freeradio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,freeradio_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let backend: SharedBackend = Arc::new(FileBackend::new(&config.store.path));
    info!("Store: {:?}", config.store.path);

    let state_manager = Arc::new(StateManager::new(
        backend.clone(),
        config.playback.default_volume,
    ));
    let favorites = Arc::new(Favorites::new(backend.clone()));
    let custom = Arc::new(CustomStations::new(backend));

    // Event channel: HTTP commands, mpv and HLS notifications all funnel into
    // the controller
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<ControllerEvent>(256);

    let base_url = config.http.base_url();
    let proxy_state = ProxyState::new()?;
    let registry = HlsRegistry::new();

    let element = MpvElement::spawn(&config.playback, event_tx.clone());
    let engine = HlsEngine::new(
        proxy_state.client.clone(),
        registry.clone(),
        base_url.clone(),
        &config.hls,
    );

    let controller = PlaybackController::new(
        state_manager.clone(),
        Box::new(element),
        Box::new(engine),
        event_tx.clone(),
        base_url,
    )
    .await;

    let app = http::build_app(
        AppState {
            state_manager,
            event_tx: event_tx.clone(),
            favorites,
            custom,
        },
        proxy_state,
        registry,
    );
    let _http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        app,
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Failed to listen for ctrl-c");
            return;
        }
        let _ = event_tx.send(ControllerEvent::Shutdown).await;
    });

    info!("Daemon initialised, running event loop");
    controller.run(event_rx).await;

    Ok(())
}
