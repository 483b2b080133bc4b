use std::io::Cursor;

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use byteorder::{BigEndian, ReadBytesExt};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::common::{RestError, SessionId};
use crate::config::{ClientIdentity, NodeConfig};
use crate::driver::{HttpContext, ProtocolDriver, RestRequest, execute, http_base, ws_base};
use crate::protocol::messages::IncomingMessage;
use crate::protocol::tracks::{Track, TrackInfo, read_utf};

/// Driver for FrequenC v1. The wire protocol is snake_case in both
/// directions and the track blob uses its own layout, so this driver
/// translates a fixed set of field names on every boundary crossing.
pub struct FrequenC;

/// Inbound snake_case fields renamed to the canonical camelCase model.
/// A fixed table, applied to the known spots only.
const INBOUND_RENAMES: &[(&str, &str)] = &[
    ("session_id", "sessionId"),
    ("guild_id", "guildId"),
    ("playing_players", "playingPlayers"),
    ("frame_stats", "frameStats"),
    ("threshold_ms", "thresholdMs"),
    ("by_remote", "byRemote"),
];

const CPU_RENAMES: &[(&str, &str)] = &[
    ("system_load", "systemLoad"),
    ("lavalink_load", "lavalinkLoad"),
];

/// Outbound camelCase body fields renamed to FrequenC's snake_case.
const OUTBOUND_RENAMES: &[(&str, &str)] = &[
    ("encodedTrack", "encoded_track"),
    ("endTime", "end_time"),
    ("sessionId", "session_id"),
];

impl FrequenC {
    fn headers(&self, ctx: &HttpContext<'_>) -> Vec<(&'static str, String)> {
        vec![
            ("authorization", ctx.config.auth.clone()),
            ("user-agent", ctx.user_agent.to_string()),
        ]
    }
}

#[async_trait]
impl ProtocolDriver for FrequenC {
    fn id(&self) -> &'static str {
        "frequenc/v1"
    }

    fn ws_url(&self, config: &NodeConfig) -> String {
        ws_base(config, "/v1")
    }

    fn http_url(&self, config: &NodeConfig) -> String {
        http_base(config, "/v1")
    }

    fn connect_headers(
        &self,
        config: &NodeConfig,
        identity: &ClientIdentity,
        user_agent: &str,
        _session_id: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        // client-info where the others send client-name; no resume header.
        vec![
            ("authorization", config.auth.clone()),
            ("user-id", identity.user_id.clone()),
            ("client-info", crate::config::CLIENT_NAME.to_string()),
            ("user-agent", user_agent.to_string()),
            ("num-shards", identity.shard_count.to_string()),
        ]
    }

    fn decode_track(&self, encoded: &str) -> Option<Track> {
        decode_frequenc_track(encoded)
    }

    fn normalize_ws_message(&self, text: &str) -> Result<IncomingMessage, serde_json::Error> {
        let mut value: Value = serde_json::from_str(text)?;
        rename_inbound(&mut value);
        serde_json::from_value(value)
    }

    async fn request(
        &self,
        ctx: &HttpContext<'_>,
        mut req: RestRequest,
    ) -> Result<Option<Value>, RestError> {
        if req.path == "/decodetrack" {
            if let Some((_, blob)) = req.params.iter().find(|(k, _)| k == "encodedTrack") {
                if let Some(track) = self.decode_track(blob) {
                    return Ok(Some(serde_json::to_value(track)?));
                }
            }
        }

        if let Some(body) = req.body.as_mut() {
            rename_outbound(body);
        }

        let Some(mut value) = execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await?
        else {
            return Ok(None);
        };
        rename_inbound(&mut value);
        Ok(Some(value))
    }

    async fn update_session(
        &self,
        ctx: &HttpContext<'_>,
        session_id: &SessionId,
        resuming: bool,
        timeout_secs: u64,
    ) -> Result<(), RestError> {
        let req = RestRequest::patch(
            format!("/sessions/{session_id}"),
            json!({ "resuming": resuming, "timeout": timeout_secs }),
        );
        execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await?;
        debug!(node = %ctx.config.name, resuming, timeout_secs, "session updated");
        Ok(())
    }
}

fn apply_renames(obj: &mut Map<String, Value>, table: &[(&str, &str)]) {
    for (from, to) in table {
        if let Some(value) = obj.remove(*from) {
            obj.insert((*to).to_string(), value);
        }
    }
}

fn rename_inbound(value: &mut Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                rename_inbound(item);
            }
        }
        Value::Object(obj) => {
            apply_renames(obj, INBOUND_RENAMES);
            if let Some(cpu) = obj.get_mut("cpu").and_then(Value::as_object_mut) {
                apply_renames(cpu, CPU_RENAMES);
            }
            for key in ["state", "voice", "exception"] {
                if let Some(nested) = obj.get_mut(key) {
                    rename_inbound(nested);
                }
            }
        }
        _ => {}
    }
}

fn rename_outbound(value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        apply_renames(obj, OUTBOUND_RENAMES);
        if let Some(voice) = obj.get_mut("voice") {
            rename_outbound(voice);
        }
    }
}

/// FrequenC's blob layout: length int, version byte, then title, author,
/// length, identifier, stream flag, a mandatory uri, presence-flagged
/// artwork and isrc, and the source name. No stored position.
fn decode_frequenc_track(encoded: &str) -> Option<Track> {
    let data = BASE64_STANDARD.decode(encoded).ok()?;
    let mut cursor = Cursor::new(data);

    cursor.read_u32::<BigEndian>().ok()?;
    cursor.read_u8().ok()?;

    let title = read_utf(&mut cursor)?;
    let author = read_utf(&mut cursor)?;
    let length = cursor.read_u64::<BigEndian>().ok()?;
    let identifier = read_utf(&mut cursor)?;
    let is_stream = cursor.read_u8().ok()? == 1;
    let uri = read_utf(&mut cursor)?;
    let artwork_url = if cursor.read_u8().ok()? == 1 {
        Some(read_utf(&mut cursor)?)
    } else {
        None
    };
    let isrc = if cursor.read_u8().ok()? == 1 {
        Some(read_utf(&mut cursor)?)
    } else {
        None
    };
    let source_name = read_utf(&mut cursor)?.to_lowercase();

    Some(Track {
        encoded: encoded.to_string(),
        info: TrackInfo {
            identifier,
            is_seekable: true,
            author,
            length,
            is_stream,
            position: 0,
            title,
            uri: Some(uri),
            artwork_url,
            isrc,
            source_name,
        },
        plugin_info: Value::Object(Map::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::PlayerWireEvent;
    use byteorder::WriteBytesExt;

    fn write_utf(buf: &mut Vec<u8>, value: &str) {
        buf.write_u16::<BigEndian>(value.len() as u16).unwrap();
        buf.extend_from_slice(value.as_bytes());
    }

    fn sample_blob() -> String {
        let mut body = Vec::new();
        write_utf(&mut body, "Snow Halation");
        write_utf(&mut body, "mu's");
        body.write_u64::<BigEndian>(263_000).unwrap();
        write_utf(&mut body, "xyz123");
        body.write_u8(0).unwrap();
        write_utf(&mut body, "https://example.com/watch?v=xyz123");
        body.write_u8(1).unwrap();
        write_utf(&mut body, "https://example.com/art.jpg");
        body.write_u8(0).unwrap();
        write_utf(&mut body, "YouTube");

        let mut data = Vec::new();
        data.write_u32::<BigEndian>(body.len() as u32 + 1).unwrap();
        data.write_u8(1).unwrap();
        data.extend_from_slice(&body);
        BASE64_STANDARD.encode(data)
    }

    #[test]
    fn decodes_own_layout() {
        let track = decode_frequenc_track(&sample_blob()).unwrap();
        assert_eq!(track.info.title, "Snow Halation");
        assert_eq!(track.info.author, "mu's");
        assert_eq!(track.info.length, 263_000);
        assert_eq!(
            track.info.uri.as_deref(),
            Some("https://example.com/watch?v=xyz123")
        );
        assert_eq!(
            track.info.artwork_url.as_deref(),
            Some("https://example.com/art.jpg")
        );
        assert_eq!(track.info.isrc, None);
        assert_eq!(track.info.source_name, "youtube");
        assert_eq!(track.info.position, 0);
        assert!(track.info.is_seekable);
    }

    #[test]
    fn truncated_blob_decodes_to_none() {
        let full = sample_blob();
        let raw = BASE64_STANDARD.decode(&full).unwrap();
        let cut = BASE64_STANDARD.encode(&raw[..raw.len() / 2]);
        assert!(decode_frequenc_track(&cut).is_none());
    }

    #[test]
    fn translates_snake_case_ready() {
        let driver = FrequenC;
        let msg = driver
            .normalize_ws_message(r#"{"op":"ready","resumed":false,"session_id":"abc"}"#)
            .unwrap();
        match msg {
            IncomingMessage::Ready { session_id, .. } => assert_eq!(&*session_id, "abc"),
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn translates_snake_case_stats_and_events() {
        let driver = FrequenC;
        let stats = driver
            .normalize_ws_message(
                r#"{"op":"stats","players":1,"playing_players":1,"uptime":5,
                    "memory":{"free":1,"used":2,"allocated":3,"reservable":4},
                    "cpu":{"cores":4,"system_load":0.2,"lavalink_load":0.1},
                    "frame_stats":{"sent":10,"nulled":0,"deficit":0}}"#,
            )
            .unwrap();
        match stats {
            IncomingMessage::Stats { stats } => {
                assert_eq!(stats.playing_players, 1);
                assert_eq!(stats.cpu.system_load, 0.2);
                assert!(stats.frame_stats.is_some());
            }
            other => panic!("expected stats, got {other:?}"),
        }

        let closed = driver
            .normalize_ws_message(
                r#"{"op":"event","type":"WebSocketClosedEvent","guild_id":"77",
                    "code":4014,"reason":"disconnected","by_remote":true}"#,
            )
            .unwrap();
        match closed {
            IncomingMessage::Event {
                event: PlayerWireEvent::WebSocketClosed { guild_id, by_remote, .. },
            } => {
                assert_eq!(&*guild_id, "77");
                assert!(by_remote);
            }
            other => panic!("expected closed event, got {other:?}"),
        }
    }

    #[test]
    fn outbound_bodies_use_snake_case() {
        let mut body = json!({
            "encodedTrack": "blob",
            "endTime": 1000,
            "voice": { "token": "t", "endpoint": "e", "sessionId": "s" },
        });
        rename_outbound(&mut body);
        assert_eq!(
            body,
            json!({
                "encoded_track": "blob",
                "end_time": 1000,
                "voice": { "token": "t", "endpoint": "e", "session_id": "s" },
            })
        );
    }
}
