//! Minimal m3u8 parsing: enough to pick a variant from a master playlist and
//! walk the segments of a live media playlist.
use reqwest::Url;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlaylistError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("master playlist has no variants")]
    NoVariants,
    #[error("bad uri {0:?}")]
    BadUri(String),
    #[error("media sequence overflows")]
    SequenceOverflow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: Url,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub media_sequence: u64,
    /// `#EXT-X-MAP` initialisation section (fMP4).
    pub init: Option<Url>,
    pub segments: Vec<Segment>,
    /// `#EXT-X-ENDLIST` seen; no more segments will appear.
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: Url,
    pub sequence: u64,
    pub duration: f64,
}

pub fn parse(base: &Url, text: &str) -> Result<Playlist, PlaylistError> {
    let mut lines = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    if lines.next().map(|l| l.trim_start_matches('\u{feff}')) != Some("#EXTM3U") {
        return Err(PlaylistError::MissingHeader);
    }

    let mut variants = Vec::new();
    let mut pending_bandwidth: Option<u64> = None;
    let mut is_master = false;

    let mut target_duration = 0.0;
    let mut media_sequence: u64 = 0;
    let mut init = None;
    let mut segments = Vec::new();
    let mut pending_duration: Option<f64> = None;
    let mut ended = false;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            is_master = true;
            pending_bandwidth = Some(
                attribute(attrs, "BANDWIDTH")
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(0),
            );
        } else if let Some(v) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = v.parse().unwrap_or(0.0);
        } else if let Some(v) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = v.parse().unwrap_or(0);
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            if let Some(uri) = attribute(attrs, "URI") {
                init = Some(resolve(base, uri)?);
            }
        } else if let Some(v) = line.strip_prefix("#EXTINF:") {
            let duration = v.split(',').next().unwrap_or("");
            pending_duration = Some(duration.trim().parse().unwrap_or(0.0));
        } else if line == "#EXT-X-ENDLIST" {
            ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some(bandwidth) = pending_bandwidth.take() {
            variants.push(Variant {
                uri: resolve(base, line)?,
                bandwidth,
            });
        } else {
            let sequence = media_sequence
                .checked_add(segments.len() as u64)
                .ok_or(PlaylistError::SequenceOverflow)?;
            segments.push(Segment {
                uri: resolve(base, line)?,
                sequence,
                duration: pending_duration.take().unwrap_or(target_duration),
            });
        }
    }

    if is_master {
        if variants.is_empty() {
            return Err(PlaylistError::NoVariants);
        }
        return Ok(Playlist::Master(variants));
    }

    Ok(Playlist::Media(MediaPlaylist {
        target_duration,
        media_sequence,
        init,
        segments,
        ended,
    }))
}

/// Highest-bandwidth variant; ties keep playlist order.
pub fn best_variant(variants: &[Variant]) -> Option<&Variant> {
    variants
        .iter()
        .rev()
        .max_by_key(|v| v.bandwidth)
}

fn resolve(base: &Url, uri: &str) -> Result<Url, PlaylistError> {
    base.join(uri)
        .map_err(|_| PlaylistError::BadUri(uri.to_string()))
}

/// Value of `name` in an attribute list like `BANDWIDTH=1,CODECS="a,b",URI="x"`.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while !rest.is_empty() {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        let after = &rest[eq + 1..];
        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], quoted[end + 1..].trim_start_matches(','))
        } else {
            match after.find(',') {
                Some(comma) => (&after[..comma], &after[comma + 1..]),
                None => (after, ""),
            }
        };
        if key == name {
            return Some(value);
        }
        rest = remainder;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example/live/master.m3u8").unwrap()
    }

    #[test]
    fn test_master_playlist() {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=48000,CODECS=\"mp4a.40.5\"\n\
            low/index.m3u8\n\
            #EXT-X-STREAM-INF:CODECS=\"mp4a.40.2,x\",BANDWIDTH=128000\n\
            https://other.example/high.m3u8\n";
        let Playlist::Master(variants) = parse(&base(), text).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].uri.as_str(), "https://cdn.example/live/low/index.m3u8");
        assert_eq!(variants[0].bandwidth, 48000);
        let best = best_variant(&variants).unwrap();
        assert_eq!(best.uri.as_str(), "https://other.example/high.m3u8");
    }

    #[test]
    fn test_media_playlist() {
        let text = "#EXTM3U\n\
            #EXT-X-VERSION:3\n\
            #EXT-X-TARGETDURATION:6\n\
            #EXT-X-MEDIA-SEQUENCE:100\n\
            #EXTINF:6.0,\n\
            seg100.aac\n\
            #EXTINF:5.5,title\n\
            /abs/seg101.aac\n";
        let Playlist::Media(media) = parse(&base(), text).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.target_duration, 6.0);
        assert!(!media.ended);
        assert_eq!(media.init, None);
        assert_eq!(media.segments.len(), 2);
        assert_eq!(media.segments[0].sequence, 100);
        assert_eq!(media.segments[0].uri.as_str(), "https://cdn.example/live/seg100.aac");
        assert_eq!(media.segments[1].sequence, 101);
        assert_eq!(media.segments[1].duration, 5.5);
        assert_eq!(media.segments[1].uri.as_str(), "https://cdn.example/abs/seg101.aac");
    }

    #[test]
    fn test_fmp4_map_and_endlist() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4,\na.m4s\n#EXT-X-ENDLIST\n";
        let Playlist::Media(media) = parse(&base(), text).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.init.unwrap().as_str(), "https://cdn.example/live/init.mp4");
        assert!(media.ended);
    }

    #[test]
    fn test_rejects_non_playlists() {
        assert_eq!(parse(&base(), "<html></html>"), Err(PlaylistError::MissingHeader));
        assert_eq!(parse(&base(), ""), Err(PlaylistError::MissingHeader));
        assert_eq!(
            parse(&base(), "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\n"),
            Err(PlaylistError::NoVariants)
        );
    }

    #[test]
    fn test_media_sequence_at_u64_limit() {
        let one = "#EXTM3U
            #EXT-X-MEDIA-SEQUENCE:18446744073709551615
            #EXTINF:6.0,
            last.aac
";
        let Playlist::Media(media) = parse(&base(), one).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(media.segments[0].sequence, u64::MAX);

        let two = format!("{}#EXTINF:6.0,
next.aac
", one);
        assert_eq!(parse(&base(), &two), Err(PlaylistError::SequenceOverflow));
    }
}
