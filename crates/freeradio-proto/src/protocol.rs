use serde::{Deserialize, Serialize};

/// Commands accepted by the playback controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station: Station },
    Pause,
    Resume,
    Stop,
    Volume { value: f32 },
}

/// Playback phase as observed by clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle, // nothing loaded / explicitly stopped
    Loading, // session built, no audio yet
    Playing, // media element confirmed audio
    Paused,  // media element confirmed pause
    Error,   // failed; current station kept for retry
}

/// Full observable playback state.  `rev` is a monotonically increasing
/// counter incremented every time the state changes, so pollers can tell
/// whether anything moved since their last read.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlaybackState {
    #[serde(default)]
    pub rev: u64,
    pub current_station: Option<Station>,
    pub phase: PlaybackPhase,
    pub error: Option<String>,
    pub volume: f32,
}

/// A radio station, either compiled in or added by the user.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
}

/// User-supplied fields for a new custom station.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewStation {
    pub name: String,
    pub stream_url: String,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

/// Partial update for a custom station.  Absent fields are left unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_json_shape() {
        let station = Station {
            id: "custom-1".into(),
            name: "Test FM".into(),
            stream_url: "https://example.com/live.mp3".into(),
            genre: Some("Jazz".into()),
            logo_url: None,
            is_custom: true,
        };
        let json = serde_json::to_value(&station).unwrap();
        assert_eq!(json["streamUrl"], "https://example.com/live.mp3");
        assert_eq!(json["isCustom"], true);
        assert!(json.get("logoUrl").is_none());
    }

    #[test]
    fn test_station_missing_optionals_deserialize() {
        let station: Station = serde_json::from_str(
            r#"{"id":"x","name":"X","streamUrl":"http://x/a.aac"}"#,
        )
        .unwrap();
        assert_eq!(station.genre, None);
        assert!(!station.is_custom);
    }

    #[test]
    fn test_command_tagging() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"Volume","value":0.25}"#).unwrap();
        match cmd {
            Command::Volume { value } => assert_eq!(value, 0.25),
            _ => panic!("Wrong command"),
        }
    }
}
