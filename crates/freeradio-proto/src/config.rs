use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub hls: HlsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Volume used when nothing has been persisted yet.
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_mpv_binary")]
    pub mpv_binary: String,
    /// How long to wait for mpv's IPC socket to appear after spawning.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Location of the durable key-value store (volume, favorites, custom stations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HlsConfig {
    /// Follow HLS playlists in-process.  When off, `.m3u8` stations are
    /// handed to mpv directly.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive segment failures reported as recoverable before the
    /// session gives up with a fatal network error.
    #[serde(default = "default_segment_retries")]
    pub segment_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            mpv_binary: default_mpv_binary(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            segment_retries: default_segment_retries(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_volume() -> f32 {
    0.7
}

fn default_mpv_binary() -> String {
    "mpv".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_store_path() -> PathBuf {
    platform::data_dir().join("store.json")
}

fn default_segment_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl HttpConfig {
    /// Base URL the daemon's own routes are reachable at, as seen by mpv.
    pub fn base_url(&self) -> String {
        let host = match self.bind_address.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" => "[::1]",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http.port, 8989);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.playback.default_volume, 0.7);
        assert!(config.hls.enabled);
        assert_eq!(config.hls.segment_retries, 3);
        assert!(config.store.path.ends_with("freeradio/store.json"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[http]\nport = 9000\n").unwrap();
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.playback.mpv_binary, "mpv");
        assert!(config.hls.enabled);
    }

    #[test]
    fn test_hls_can_be_disabled() {
        let config: Config = toml::from_str("[hls]\nenabled = false\n").unwrap();
        assert!(!config.hls.enabled);
        assert_eq!(config.hls.segment_retries, 3);
    }

    #[test]
    fn test_base_url_rewrites_wildcard_bind() {
        let http = HttpConfig {
            bind_address: "0.0.0.0".into(),
            port: 3000,
        };
        assert_eq!(http.base_url(), "http://127.0.0.1:3000");
    }
}
