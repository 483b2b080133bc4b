use std::io::{Cursor, Read};

use base64::prelude::*;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::protocol::messages::Severity;

/// Flag in the top two bits of the header word marking that a version byte
/// follows. Blobs without it are treated as version 1.
const TRACK_INFO_VERSIONED: u32 = 1;

/// A single audio track as the node describes it: an opaque encoded blob
/// plus decoded metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Base64-encoded track data.
    pub encoded: String,
    /// Track metadata.
    pub info: TrackInfo,
    /// Plugin-specific info. Always `{}` without plugins.
    #[serde(default)]
    pub plugin_info: serde_json::Value,
}

/// Metadata for an audio track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Duration in milliseconds. 0 for streams.
    pub length: u64,
    pub is_stream: bool,
    /// Playback position in milliseconds at encode time.
    #[serde(default)]
    pub position: u64,
    pub title: String,
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

impl Track {
    /// Decode a node-encoded track blob, detecting the codec version from
    /// the header word. Returns `None` for malformed input or an unknown
    /// version, never panics.
    pub fn decode(encoded: &str) -> Option<Self> {
        let data = BASE64_STANDARD.decode(encoded).ok()?;
        let mut cursor = Cursor::new(data);

        let header = cursor.read_u32::<BigEndian>().ok()?;
        let version = if (header & 0xC000_0000) >> 30 & TRACK_INFO_VERSIONED != 0 {
            cursor.read_u8().ok()?
        } else {
            1
        };

        let info = match version {
            1 => Self::read_info(&mut cursor, 1)?,
            2 => Self::read_info(&mut cursor, 2)?,
            3 => Self::read_info(&mut cursor, 3)?,
            _ => return None,
        };

        Some(Self {
            encoded: encoded.to_string(),
            info,
            plugin_info: serde_json::json!({}),
        })
    }

    fn read_info(cursor: &mut Cursor<Vec<u8>>, version: u8) -> Option<TrackInfo> {
        let title = read_utf(cursor)?;
        let author = read_utf(cursor)?;
        let length = cursor.read_u64::<BigEndian>().ok()?;
        let identifier = read_utf(cursor)?;
        let is_stream = cursor.read_u8().ok()? != 0;

        let uri = if version >= 2 { read_opt_utf(cursor)? } else { None };
        let (artwork_url, isrc) = if version >= 3 {
            (read_opt_utf(cursor)?, read_opt_utf(cursor)?)
        } else {
            (None, None)
        };

        let source_name = read_utf(cursor)?.to_lowercase();
        let position = cursor.read_u64::<BigEndian>().ok()?;

        Some(TrackInfo {
            identifier,
            // The binary layout never carries seekability; nodes treat every
            // decoded track as seekable.
            is_seekable: true,
            author,
            length,
            is_stream,
            position,
            title,
            uri,
            artwork_url,
            isrc,
            source_name,
        })
    }

    /// Encode metadata into a blob of the given codec version (1..=3).
    /// Fields the version cannot carry are silently omitted. Version 1 is
    /// written without the versioned-header flag, the way old nodes emit it.
    pub fn encode(info: &TrackInfo, version: u8) -> Option<String> {
        if !(1..=3).contains(&version) {
            return None;
        }

        let mut body = Vec::new();
        write_utf(&mut body, &info.title);
        write_utf(&mut body, &info.author);
        body.write_u64::<BigEndian>(info.length).ok()?;
        write_utf(&mut body, &info.identifier);
        body.write_u8(if info.is_stream { 1 } else { 0 }).ok()?;
        if version >= 2 {
            write_opt_utf(&mut body, info.uri.as_deref());
        }
        if version >= 3 {
            write_opt_utf(&mut body, info.artwork_url.as_deref());
            write_opt_utf(&mut body, info.isrc.as_deref());
        }
        write_utf(&mut body, &info.source_name);
        body.write_u64::<BigEndian>(info.position).ok()?;

        let mut buf = Vec::with_capacity(body.len() + 5);
        if version == 1 {
            buf.write_u32::<BigEndian>(body.len() as u32).ok()?;
        } else {
            let header = (body.len() as u32 + 1) | (TRACK_INFO_VERSIONED << 30);
            buf.write_u32::<BigEndian>(header).ok()?;
            buf.write_u8(version).ok()?;
        }
        buf.extend_from_slice(&body);

        Some(BASE64_STANDARD.encode(&buf))
    }

    /// Build a track from metadata, encoding it at the current version.
    pub fn new(info: TrackInfo) -> Self {
        let encoded = Self::encode(&info, 3).unwrap_or_default();
        Self {
            encoded,
            info,
            plugin_info: serde_json::json!({}),
        }
    }
}

fn write_utf(w: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let _ = w.write_u16::<BigEndian>(bytes.len() as u16);
    let _ = std::io::Write::write_all(w, bytes);
}

fn write_opt_utf(w: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            let _ = w.write_u8(1);
            write_utf(w, s);
        }
        None => {
            let _ = w.write_u8(0);
        }
    }
}

pub(crate) fn read_utf<R: Read>(r: &mut R) -> Option<String> {
    let len = r.read_u16::<BigEndian>().ok()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).ok()?;
    String::from_utf8(buf).ok()
}

/// Reads a presence byte followed by a UTF field. `None` for a truncated
/// buffer, `Some(None)` for an absent field.
pub(crate) fn read_opt_utf<R: Read>(r: &mut R) -> Option<Option<String>> {
    let present = r.read_u8().ok()? != 0;
    if present {
        Some(Some(read_utf(r)?))
    } else {
        Some(None)
    }
}

/// Canonical result of a `/loadtracks` call, after driver normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    /// A single track was loaded.
    Track(Track),
    /// A playlist was loaded.
    Playlist(PlaylistData),
    /// A search returned results.
    Search(Vec<Track>),
    /// No matches found.
    Empty {},
    /// An error occurred during loading.
    Error(LoadError),
}

/// Playlist data returned from a load operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistData {
    pub info: PlaylistInfo,
    #[serde(default)]
    pub plugin_info: serde_json::Value,
    pub tracks: Vec<Track>,
}

/// Playlist metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    /// Index of the selected track, or -1 if none.
    #[serde(default = "default_selected_track")]
    pub selected_track: i32,
}

fn default_selected_track() -> i32 {
    -1
}

/// Error from a failed track load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadError {
    #[serde(default)]
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> TrackInfo {
        TrackInfo {
            identifier: "dQw4w9WgXcQ".to_string(),
            is_seekable: true,
            author: "Rick Astley".to_string(),
            length: 212000,
            is_stream: false,
            position: 0,
            title: "Never Gonna Give You Up".to_string(),
            uri: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
            artwork_url: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".to_string()),
            isrc: Some("GBARL9300135".to_string()),
            source_name: "youtube".to_string(),
        }
    }

    #[test]
    fn v3_roundtrip_preserves_every_field() {
        let encoded = Track::encode(&sample_info(), 3).unwrap();
        let decoded = Track::decode(&encoded).expect("decode should succeed");

        assert_eq!(decoded.info.identifier, "dQw4w9WgXcQ");
        assert_eq!(decoded.info.title, "Never Gonna Give You Up");
        assert_eq!(decoded.info.author, "Rick Astley");
        assert_eq!(decoded.info.length, 212000);
        assert!(!decoded.info.is_stream);
        assert!(decoded.info.is_seekable);
        assert_eq!(decoded.info.position, 0);
        assert_eq!(
            decoded.info.uri.as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert_eq!(
            decoded.info.artwork_url.as_deref(),
            Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg")
        );
        assert_eq!(decoded.info.isrc.as_deref(), Some("GBARL9300135"));
        assert_eq!(decoded.info.source_name, "youtube");
    }

    #[test]
    fn v2_roundtrip_drops_v3_fields() {
        let encoded = Track::encode(&sample_info(), 2).unwrap();
        let decoded = Track::decode(&encoded).expect("decode should succeed");

        assert_eq!(
            decoded.info.uri.as_deref(),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
        assert_eq!(decoded.info.artwork_url, None);
        assert_eq!(decoded.info.isrc, None);
    }

    #[test]
    fn v1_roundtrip_has_no_uri_and_no_version_flag() {
        let encoded = Track::encode(&sample_info(), 1).unwrap();

        let raw = BASE64_STANDARD.decode(&encoded).unwrap();
        let header = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        assert_eq!((header >> 30) & 1, 0, "v1 must not carry the version flag");

        let decoded = Track::decode(&encoded).expect("decode should succeed");
        assert_eq!(decoded.info.uri, None);
        assert_eq!(decoded.info.artwork_url, None);
        assert_eq!(decoded.info.isrc, None);
        assert_eq!(decoded.info.title, "Never Gonna Give You Up");
        assert_eq!(decoded.info.length, 212000);
    }

    #[test]
    fn versioned_header_flag_is_set_for_v3() {
        let encoded = Track::encode(&sample_info(), 3).unwrap();
        let raw = BASE64_STANDARD.decode(&encoded).unwrap();

        let header = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        assert_eq!((header >> 30) & 1, 1, "version flag must be set");
        assert_eq!(raw[4], 3, "version byte must be 3");
    }

    #[test]
    fn unknown_version_returns_none() {
        let mut raw = BASE64_STANDARD
            .decode(Track::encode(&sample_info(), 3).unwrap())
            .unwrap();
        raw[4] = 9;
        assert!(Track::decode(&BASE64_STANDARD.encode(&raw)).is_none());
    }

    #[test]
    fn truncated_buffer_returns_none() {
        let encoded = Track::encode(&sample_info(), 3).unwrap();
        let raw = BASE64_STANDARD.decode(&encoded).unwrap();

        for cut in [0, 3, 5, 10, raw.len() / 2, raw.len() - 1] {
            let truncated = BASE64_STANDARD.encode(&raw[..cut]);
            assert!(
                Track::decode(&truncated).is_none(),
                "cut at {cut} bytes must fail cleanly"
            );
        }
    }

    #[test]
    fn invalid_base64_returns_none() {
        assert!(Track::decode("not_valid_base64!!!").is_none());
    }

    #[test]
    fn source_name_is_lowercased() {
        let mut info = sample_info();
        info.source_name = "YouTube".to_string();
        let encoded = Track::encode(&info, 3).unwrap();
        let decoded = Track::decode(&encoded).unwrap();
        assert_eq!(decoded.info.source_name, "youtube");
    }

    #[test]
    fn stream_roundtrip() {
        let mut info = sample_info();
        info.is_stream = true;
        info.length = 0;
        info.uri = None;
        info.artwork_url = None;
        info.isrc = None;

        let encoded = Track::encode(&info, 3).unwrap();
        let decoded = Track::decode(&encoded).unwrap();
        assert!(decoded.info.is_stream);
        assert_eq!(decoded.info.length, 0);
        assert_eq!(decoded.info.uri, None);
    }

    #[test]
    fn track_serializes_camelcase() {
        let track = Track::new(sample_info());
        let json = serde_json::to_value(&track).unwrap();

        assert!(json.get("pluginInfo").is_some(), "expected pluginInfo key");
        let info = &json["info"];
        assert!(info.get("isSeekable").is_some());
        assert!(info.get("isStream").is_some());
        assert!(info.get("artworkUrl").is_some());
        assert!(info.get("sourceName").is_some());
    }

    #[test]
    fn load_result_tagging() {
        let json = serde_json::json!({
            "loadType": "search",
            "data": [serde_json::to_value(Track::new(sample_info())).unwrap()],
        });
        let result: LoadResult = serde_json::from_value(json).unwrap();
        match result {
            LoadResult::Search(tracks) => assert_eq!(tracks.len(), 1),
            other => panic!("expected search result, got {other:?}"),
        }
    }
}
