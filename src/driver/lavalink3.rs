use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::common::{RestError, SessionId};
use crate::config::{ClientIdentity, NodeConfig};
use crate::driver::{HttpContext, ProtocolDriver, RestRequest, execute, http_base, ws_base};
use crate::protocol::messages::IncomingMessage;
use crate::protocol::tracks::Track;

/// Driver for Lavalink v3. The oldest supported variant: Title-Case
/// headers, SCREAMING_CASE load types, flat playlist/search containers
/// and base64 track blobs inside WebSocket events. Everything is
/// reshaped to the canonical model before leaving the driver.
pub struct Lavalink3;

impl Lavalink3 {
    fn headers(&self, ctx: &HttpContext<'_>) -> Vec<(&'static str, String)> {
        vec![
            ("Authorization", ctx.config.auth.clone()),
            ("User-Agent", ctx.user_agent.to_string()),
        ]
    }
}

#[async_trait]
impl ProtocolDriver for Lavalink3 {
    fn id(&self) -> &'static str {
        "lavalink/v3"
    }

    fn ws_url(&self, config: &NodeConfig) -> String {
        ws_base(config, "/v3")
    }

    fn http_url(&self, config: &NodeConfig) -> String {
        http_base(config, "/v3")
    }

    fn connect_headers(
        &self,
        config: &NodeConfig,
        identity: &ClientIdentity,
        user_agent: &str,
        session_id: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        // v3 expects Session-Id on every handshake, empty when there is
        // nothing to resume.
        vec![
            ("Authorization", config.auth.clone()),
            ("User-Id", identity.user_id.clone()),
            ("Client-Name", crate::config::CLIENT_NAME.to_string()),
            ("Session-Id", session_id.unwrap_or("").to_string()),
            ("User-Agent", user_agent.to_string()),
        ]
    }

    fn decode_track(&self, encoded: &str) -> Option<Track> {
        Track::decode(encoded)
    }

    fn normalize_ws_message(&self, text: &str) -> Result<IncomingMessage, serde_json::Error> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Some(obj) = value.as_object_mut() {
            // Only the old SCREAMING spellings are rewritten; the free-text
            // reason of a WebSocketClosedEvent passes through untouched.
            if let Some(mapped) = obj
                .get("reason")
                .and_then(Value::as_str)
                .and_then(map_end_reason)
            {
                obj.insert("reason".into(), json!(mapped));
            }
            if let Some(exception) = obj.get_mut("exception").and_then(Value::as_object_mut) {
                if let Some(severity) = exception.get("severity").and_then(Value::as_str) {
                    let lowered = severity.to_ascii_lowercase();
                    exception.insert("severity".into(), json!(lowered));
                }
            }
            // Events carry the raw blob where v4 sends a track object.
            if let Some(blob) = obj.get("track").and_then(Value::as_str) {
                if let Some(track) = self.decode_track(blob) {
                    obj.insert("track".into(), serde_json::to_value(track)?);
                }
            }
        }
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
            rewrite_body(body);
        }

        let Some(mut value) = execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await?
        else {
            return Ok(None);
        };

        if value.get("loadType").is_some() {
            value = reshape_load_result(value);
        } else {
            rebuild_player_tracks(&mut value);
        }
        Ok(Some(value))
    }

    async fn update_session(
        &self,
        ctx: &HttpContext<'_>,
        session_id: &SessionId,
        resuming: bool,
        timeout_secs: u64,
    ) -> Result<(), RestError> {
        // v3 keys resume on resumingKey rather than a boolean flag.
        let key = if resuming {
            json!(session_id)
        } else {
            Value::Null
        };
        let req = RestRequest::patch(
            format!("/sessions/{session_id}"),
            json!({ "resumingKey": key, "timeout": timeout_secs }),
        );
        execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await?;
        debug!(node = %ctx.config.name, resuming, timeout_secs, "session updated");
        Ok(())
    }
}

fn map_end_reason(reason: &str) -> Option<&'static str> {
    Some(match reason {
        "FINISHED" => "finished",
        "LOAD_FAILED" => "loadFailed",
        "STOPPED" => "stopped",
        "REPLACED" => "replaced",
        "CLEANUP" => "cleanup",
        _ => return None,
    })
}

/// v3 player updates take the encoded blob at the top level instead of a
/// nested track object.
fn rewrite_body(body: &mut Value) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    if let Some(encoded) = obj
        .get("track")
        .and_then(|t| t.get("encoded"))
        .cloned()
    {
        obj.remove("track");
        obj.insert("encodedTrack".into(), encoded);
    }
}

/// Reshape a v3 loadtracks response into the v4 `{loadType, data}` form,
/// rebuilding every nested track on the way.
fn reshape_load_result(value: Value) -> Value {
    let load_type = value
        .get("loadType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match load_type.as_str() {
        "TRACK_LOADED" => {
            let track = value
                .get("tracks")
                .and_then(|t| t.get(0))
                .map(rebuild_track)
                .unwrap_or(Value::Null);
            json!({ "loadType": "track", "data": track })
        }
        "PLAYLIST_LOADED" => {
            let tracks: Vec<Value> = value
                .get("tracks")
                .and_then(Value::as_array)
                .map(|tracks| tracks.iter().map(rebuild_track).collect())
                .unwrap_or_default();
            let info = value.get("playlistInfo").cloned().unwrap_or(json!({}));
            json!({ "loadType": "playlist", "data": { "info": info, "tracks": tracks } })
        }
        "SEARCH_RESULT" => {
            let tracks: Vec<Value> = value
                .get("tracks")
                .and_then(Value::as_array)
                .map(|tracks| tracks.iter().map(rebuild_track).collect())
                .unwrap_or_default();
            json!({ "loadType": "search", "data": tracks })
        }
        "NO_MATCHES" => json!({ "loadType": "empty", "data": {} }),
        "LOAD_FAILED" => {
            let exception = value.get("exception").cloned().unwrap_or(json!({}));
            json!({ "loadType": "error", "data": normalize_exception(exception) })
        }
        _ => value,
    }
}

fn normalize_exception(mut exception: Value) -> Value {
    if let Some(obj) = exception.as_object_mut() {
        if let Some(severity) = obj.get("severity").and_then(Value::as_str) {
            let lowered = severity.to_ascii_lowercase();
            obj.insert("severity".into(), json!(lowered));
        }
    }
    exception
}

/// Rebuild a v3 track object field by field so only the canonical keys
/// survive. v3 has no artwork or isrc.
fn rebuild_track(old: &Value) -> Value {
    let info = old.get("info").cloned().unwrap_or(json!({}));
    json!({
        "encoded": old.get("encoded").or_else(|| old.get("track")).cloned(),
        "info": {
            "sourceName": info.get("sourceName"),
            "identifier": info.get("identifier"),
            "isSeekable": info.get("isSeekable"),
            "author": info.get("author"),
            "length": info.get("length"),
            "isStream": info.get("isStream"),
            "position": info.get("position"),
            "title": info.get("title"),
            "uri": info.get("uri"),
            "artworkUrl": Value::Null,
            "isrc": Value::Null,
        },
        "pluginInfo": {},
    })
}

/// v3 returns old-shape tracks inside player objects too.
fn rebuild_player_tracks(value: &mut Value) {
    match value {
        Value::Array(players) => {
            for player in players {
                rebuild_player_tracks(player);
            }
        }
        Value::Object(obj) => {
            let has_old_track = obj
                .get("track")
                .map(|t| t.get("encoded").is_some() || t.is_string())
                .unwrap_or(false);
            if obj.contains_key("guildId") && has_old_track {
                let rebuilt = match &obj["track"] {
                    Value::String(blob) => Track::decode(blob)
                        .and_then(|t| serde_json::to_value(t).ok())
                        .unwrap_or(Value::Null),
                    other => rebuild_track(other),
                };
                obj.insert("track".into(), rebuilt);
            }
        }
        _ => {}
    }
}
