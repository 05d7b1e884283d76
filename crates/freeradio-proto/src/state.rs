use crate::protocol::{PlaybackPhase, PlaybackState, Station};
use crate::store::{SharedBackend, Store, StoreError, VOLUME_KEY};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, observable playback state.  Only the playback controller writes
/// through it; HTTP handlers read snapshots.
pub struct StateManager {
    state: Arc<RwLock<PlaybackState>>,
    volume_store: Store<f32>,
}

impl StateManager {
    pub fn new(backend: SharedBackend, default_volume: f32) -> Self {
        let volume_store = Store::new(backend, VOLUME_KEY, default_volume.clamp(0.0, 1.0));
        let state = PlaybackState {
            rev: 1,
            current_station: None,
            phase: PlaybackPhase::Idle,
            error: None,
            volume: volume_store.load().clamp(0.0, 1.0),
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            volume_store,
        }
    }

    pub async fn get_state(&self) -> PlaybackState {
        self.state.read().await.clone()
    }

    /// New session: station becomes current, phase Loading, error cleared.
    pub async fn set_loading(&self, station: Station) {
        let mut state = self.state.write().await;
        state.current_station = Some(station);
        state.phase = PlaybackPhase::Loading;
        state.error = None;
        state.rev += 1;
    }

    pub async fn set_phase(&self, phase: PlaybackPhase) {
        let mut state = self.state.write().await;
        if matches!(phase, PlaybackPhase::Loading | PlaybackPhase::Playing) {
            state.error = None;
        }
        state.phase = phase;
        state.rev += 1;
    }

    pub async fn clear_error(&self) {
        let mut state = self.state.write().await;
        if state.error.is_some() {
            state.error = None;
            state.rev += 1;
        }
    }

    pub async fn set_error(&self, message: impl Into<String>) {
        let mut state = self.state.write().await;
        state.phase = PlaybackPhase::Error;
        state.error = Some(message.into());
        state.rev += 1;
    }

    pub async fn set_stopped(&self) {
        let mut state = self.state.write().await;
        state.current_station = None;
        state.phase = PlaybackPhase::Idle;
        state.error = None;
        state.rev += 1;
    }

    /// Clamp, publish and persist.  Returns the applied value; the state is
    /// updated even when persisting fails.
    pub async fn set_volume(&self, volume: f32) -> (f32, Result<(), StoreError>) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        {
            let mut state = self.state.write().await;
            state.volume = volume;
            state.rev += 1;
        }
        (volume, self.volume_store.save(&volume))
    }
}
