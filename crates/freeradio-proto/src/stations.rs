use reqwest::Url;

use crate::protocol::Station;

/// How a stream URL has to be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// HLS manifest, played through an adaptive session.
    Adaptive,
    /// Plain audio stream (Icecast/Shoutcast/file), played through the proxy.
    Direct,
}

pub fn classify(url: &str) -> StreamKind {
    if url.to_ascii_lowercase().contains("m3u8") {
        StreamKind::Adaptive
    } else {
        StreamKind::Direct
    }
}

pub const STREAM_ROUTE: &str = "/api/stream";

/// Build the proxy URL that relays `upstream` through `base` (scheme + authority).
pub fn proxy_url(base: &str, upstream: &str) -> anyhow::Result<String> {
    let mut url = Url::parse(base)?.join(STREAM_ROUTE)?;
    url.query_pairs_mut().append_pair("url", upstream);
    Ok(url.to_string())
}

struct Preset {
    id: &'static str,
    name: &'static str,
    stream_url: &'static str,
    genre: &'static str,
    logo_url: Option<&'static str>,
}

const PRESETS: &[Preset] = &[
    Preset {
        id: "preset-groove-salad",
        name: "SomaFM Groove Salad",
        stream_url: "https://ice1.somafm.com/groovesalad-128-mp3",
        genre: "Ambient",
        logo_url: Some("https://somafm.com/img/groovesalad120.png"),
    },
    Preset {
        id: "preset-drone-zone",
        name: "SomaFM Drone Zone",
        stream_url: "https://ice1.somafm.com/dronezone-128-mp3",
        genre: "Ambient",
        logo_url: Some("https://somafm.com/img/dronezone120.jpg"),
    },
    Preset {
        id: "preset-secret-agent",
        name: "SomaFM Secret Agent",
        stream_url: "https://ice1.somafm.com/secretagent-128-mp3",
        genre: "Lounge",
        logo_url: Some("https://somafm.com/img/secretagent120.jpg"),
    },
    Preset {
        id: "preset-radio-paradise",
        name: "Radio Paradise Main Mix",
        stream_url: "https://stream.radioparadise.com/aac-128",
        genre: "Eclectic",
        logo_url: None,
    },
    Preset {
        id: "preset-fip",
        name: "FIP",
        stream_url: "https://icecast.radiofrance.fr/fip-hifi.aac",
        genre: "Eclectic",
        logo_url: None,
    },
    Preset {
        id: "preset-kexp",
        name: "KEXP 90.3 FM",
        stream_url: "https://kexp-mp3-128.streamguys1.com/kexp128.mp3",
        genre: "Indie",
        logo_url: None,
    },
    Preset {
        id: "preset-nts-1",
        name: "NTS Radio 1",
        stream_url: "https://stream-relay-geo.ntslive.net/stream",
        genre: "Eclectic",
        logo_url: None,
    },
    Preset {
        id: "preset-bbc-radio-3",
        name: "BBC Radio 3",
        stream_url: "https://as-hls-ww-live.akamaized.net/pool_904/live/ww/bbc_radio_three/bbc_radio_three.isml/bbc_radio_three-audio%3d96000.norewind.m3u8",
        genre: "Classical",
        logo_url: None,
    },
];

/// The compiled-in, non-removable station catalog.
pub fn presets() -> Vec<Station> {
    PRESETS
        .iter()
        .map(|p| Station {
            id: p.id.to_string(),
            name: p.name.to_string(),
            stream_url: p.stream_url.to_string(),
            genre: Some(p.genre.to_string()),
            logo_url: p.logo_url.map(str::to_string),
            is_custom: false,
        })
        .collect()
}

pub fn is_preset_id(id: &str) -> bool {
    PRESETS.iter().any(|p| p.id == id)
}

/// Presets followed by custom stations.
pub fn all_stations(custom: Vec<Station>) -> Vec<Station> {
    let mut all = presets();
    all.extend(custom);
    all
}

pub fn find_station<'a>(stations: &'a [Station], id: &str) -> Option<&'a Station> {
    stations.iter().find(|s| s.id == id)
}

/// Stations whose id is in `favorites`, in catalog order.  Favorites that
/// reference missing stations simply never match.
pub fn favorite_stations(stations: &[Station], favorites: &[String]) -> Vec<Station> {
    stations
        .iter()
        .filter(|s| favorites.iter().any(|f| f == &s.id))
        .cloned()
        .collect()
}
