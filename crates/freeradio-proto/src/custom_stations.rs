use rand::Rng;
use reqwest::Url;
use tracing::info;

use crate::protocol::{NewStation, Station, StationPatch};
use crate::stations::is_preset_id;
use crate::store::{SharedBackend, Store, StoreError, CUSTOM_STATIONS_KEY};

#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error("Station name is required")]
    MissingName,
    #[error("Stream URL is required")]
    MissingUrl,
    #[error("Please enter a valid URL")]
    InvalidUrl,
    #[error("no custom station with id {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StationError {
    /// True for input problems the caller should show next to the form.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StationError::MissingName | StationError::MissingUrl | StationError::InvalidUrl
        )
    }
}

/// Persisted, user-editable station list.
pub struct CustomStations {
    store: Store<Vec<Station>>,
}

impl CustomStations {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            store: Store::new(backend, CUSTOM_STATIONS_KEY, Vec::new()),
        }
    }

    pub fn list(&self) -> Vec<Station> {
        self.store.load()
    }

    pub fn add(&self, new: NewStation) -> Result<Station, StationError> {
        let name = validate_name(&new.name)?;
        let stream_url = validate_stream_url(&new.stream_url)?;

        let station = self.store.update(|stations| {
            let station = Station {
                id: fresh_id(stations),
                name,
                stream_url,
                genre: non_empty(new.genre),
                logo_url: non_empty(new.logo_url),
                is_custom: true,
            };
            stations.push(station.clone());
            station
        })?;

        info!("custom stations: added {} ({})", station.name, station.id);
        Ok(station)
    }

    /// Returns whether a station was removed; removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) -> Result<bool, StationError> {
        let removed = self.store.update(|stations| {
            let before = stations.len();
            stations.retain(|s| s.id != id);
            before != stations.len()
        })?;
        Ok(removed)
    }

    /// Merge the present fields of `patch` into the station with `id`.
    pub fn update(&self, id: &str, patch: StationPatch) -> Result<Station, StationError> {
        let name = patch.name.as_deref().map(validate_name).transpose()?;
        let stream_url = patch
            .stream_url
            .as_deref()
            .map(validate_stream_url)
            .transpose()?;

        let updated = self.store.update(|stations| {
            let station = stations.iter_mut().find(|s| s.id == id)?;
            if let Some(name) = name {
                station.name = name;
            }
            if let Some(url) = stream_url {
                station.stream_url = url;
            }
            if let Some(genre) = patch.genre {
                station.genre = non_empty(Some(genre));
            }
            if let Some(logo) = patch.logo_url {
                station.logo_url = non_empty(Some(logo));
            }
            Some(station.clone())
        })?;

        updated.ok_or_else(|| StationError::NotFound(id.to_string()))
    }
}

fn validate_name(raw: &str) -> Result<String, StationError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StationError::MissingName);
    }
    Ok(name.to_string())
}

fn validate_stream_url(raw: &str) -> Result<String, StationError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(StationError::MissingUrl);
    }
    let parsed = Url::parse(url).map_err(|_| StationError::InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(StationError::InvalidUrl);
    }
    Ok(url.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn fresh_id(existing: &[Station]) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    loop {
        let id = format!("custom-{}-{:04x}", millis, rng.gen::<u16>());
        if !is_preset_id(&id) && existing.iter().all(|s| s.id != id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;

    fn registry() -> CustomStations {
        CustomStations::new(Arc::new(MemoryBackend::new()))
    }

    fn new_station(name: &str, url: &str) -> NewStation {
        NewStation {
            name: name.to_string(),
            stream_url: url.to_string(),
            genre: Some("  ".to_string()),
            logo_url: None,
        }
    }

    #[test]
    fn test_add_marks_custom_and_trims() {
        let reg = registry();
        let s = reg
            .add(new_station("  Night FM ", " https://night.example/live.mp3 "))
            .unwrap();
        assert!(s.is_custom);
        assert!(s.id.starts_with("custom-"));
        assert_eq!(s.name, "Night FM");
        assert_eq!(s.stream_url, "https://night.example/live.mp3");
        assert_eq!(s.genre, None);
        assert_eq!(reg.list(), vec![s]);
    }

    #[test]
    fn test_add_generates_unique_ids() {
        let reg = registry();
        let ids: Vec<String> = (0..20)
            .map(|i| {
                reg.add(new_station(&format!("S{}", i), "http://a.example/s"))
                    .unwrap()
                    .id
            })
            .collect();
        for (i, id) in ids.iter().enumerate() {
            assert!(ids[i + 1..].iter().all(|o| o != id));
        }
    }

    #[test]
    fn test_concurrent_adds_keep_every_station() {
        let reg = registry();
        std::thread::scope(|s| {
            for t in 0..4 {
                let reg = &reg;
                s.spawn(move || {
                    for i in 0..25 {
                        reg.add(new_station(&format!("T{}-{}", t, i), "http://a.example/s"))
                            .unwrap();
                    }
                });
            }
        });
        let stations = reg.list();
        assert_eq!(stations.len(), 100);
        let mut ids: Vec<&str> = stations.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_add_rejects_invalid_input_without_persisting() {
        let reg = registry();
        reg.add(new_station("Keep", "http://keep.example/")).unwrap();
        let before = reg.list();

        let err = reg.add(new_station("   ", "http://a.example/")).unwrap_err();
        assert!(matches!(err, StationError::MissingName));
        let err = reg.add(new_station("X", "  ")).unwrap_err();
        assert!(matches!(err, StationError::MissingUrl));
        let err = reg.add(new_station("X", "not a url")).unwrap_err();
        assert!(matches!(err, StationError::InvalidUrl));
        assert!(err.is_validation());
        let err = reg.add(new_station("X", "ftp://a.example/s")).unwrap_err();
        assert!(matches!(err, StationError::InvalidUrl));

        assert_eq!(reg.list(), before);
    }

    #[test]
    fn test_remove() {
        let reg = registry();
        let a = reg.add(new_station("A", "http://a.example/")).unwrap();
        let b = reg.add(new_station("B", "http://b.example/")).unwrap();
        assert!(reg.remove(&a.id).unwrap());
        assert_eq!(reg.list(), vec![b.clone()]);
        assert!(!reg.remove(&a.id).unwrap());
        assert_eq!(reg.list(), vec![b]);
    }

    #[test]
    fn test_update_merges_present_fields() {
        let reg = registry();
        let mut input = new_station("A", "http://a.example/");
        input.genre = Some("Jazz".into());
        let a = reg.add(input).unwrap();

        let patch = StationPatch {
            name: Some("A2".into()),
            logo_url: Some("http://a.example/logo.png".into()),
            ..Default::default()
        };
        let updated = reg.update(&a.id, patch).unwrap();
        assert_eq!(updated.name, "A2");
        assert_eq!(updated.stream_url, "http://a.example/");
        assert_eq!(updated.genre.as_deref(), Some("Jazz"));
        assert_eq!(updated.logo_url.as_deref(), Some("http://a.example/logo.png"));
        assert!(updated.is_custom);
        assert_eq!(updated.id, a.id);
        assert_eq!(reg.list(), vec![updated]);
    }

    #[test]
    fn test_update_validates_and_reports_unknown() {
        let reg = registry();
        let a = reg.add(new_station("A", "http://a.example/")).unwrap();
        let bad = StationPatch {
            stream_url: Some("nope".into()),
            ..Default::default()
        };
        assert!(matches!(reg.update(&a.id, bad), Err(StationError::InvalidUrl)));
        assert_eq!(reg.list(), vec![a]);

        let missing = reg.update("custom-0", StationPatch::default());
        assert!(matches!(missing, Err(StationError::NotFound(_))));
    }
}
