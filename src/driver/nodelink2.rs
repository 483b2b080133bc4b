use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::common::{RestError, SessionId};
use crate::config::{ClientIdentity, NodeConfig};
use crate::driver::{HttpContext, ProtocolDriver, RestRequest, execute, http_base, ws_base};
use crate::protocol::tracks::Track;

/// Driver for NodeLink v2. Speaks the v4 wire format with a handful of
/// extra load types and a lyrics endpoint; node-side resume does not
/// exist on this variant.
pub struct Nodelink2;

impl Nodelink2 {
    fn headers(&self, ctx: &HttpContext<'_>) -> Vec<(&'static str, String)> {
        vec![
            ("authorization", ctx.config.auth.clone()),
            ("user-agent", ctx.user_agent.to_string()),
            ("accept-encoding", "br, gzip, deflate".to_string()),
        ]
    }
}

#[async_trait]
impl ProtocolDriver for Nodelink2 {
    fn id(&self) -> &'static str {
        "nodelink/v2"
    }

    fn ws_url(&self, config: &NodeConfig) -> String {
        ws_base(config, "/v4")
    }

    fn http_url(&self, config: &NodeConfig) -> String {
        http_base(config, "/v4")
    }

    fn connect_headers(
        &self,
        config: &NodeConfig,
        identity: &ClientIdentity,
        user_agent: &str,
        session_id: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("authorization", config.auth.clone()),
            ("user-id", identity.user_id.clone()),
            ("client-name", crate::config::CLIENT_NAME.to_string()),
            ("user-agent", user_agent.to_string()),
            ("accept-encoding", "br, gzip, deflate".to_string()),
            ("num-shards", identity.shard_count.to_string()),
        ];
        if let Some(id) = session_id {
            headers.push(("session-id", id.to_string()));
        }
        headers
    }

    fn decode_track(&self, encoded: &str) -> Option<Track> {
        Track::decode(encoded)
    }

    async fn request(
        &self,
        ctx: &HttpContext<'_>,
        req: RestRequest,
    ) -> Result<Option<Value>, RestError> {
        if req.path == "/decodetrack" {
            if let Some((_, blob)) = req.params.iter().find(|(k, _)| k == "encodedTrack") {
                if let Some(track) = self.decode_track(blob) {
                    return Ok(Some(serde_json::to_value(track)?));
                }
            }
        }

        let Some(mut value) = execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await?
        else {
            return Ok(None);
        };

        if value.get("loadType").is_some() {
            remap_load_type(&mut value);
        }
        Ok(Some(value))
    }

    async fn update_session(
        &self,
        ctx: &HttpContext<'_>,
        _session_id: &SessionId,
        _resuming: bool,
        _timeout_secs: u64,
    ) -> Result<(), RestError> {
        warn!(
            node = %ctx.config.name,
            "nodelink does not support resuming, ignoring session update"
        );
        Ok(())
    }

    fn functions(&self) -> &'static [&'static str] {
        &["getLyrics"]
    }

    async fn call(
        &self,
        ctx: &HttpContext<'_>,
        name: &str,
        args: Value,
    ) -> Result<Option<Value>, RestError> {
        match name {
            "getLyrics" => {
                let encoded = args
                    .get("encodedTrack")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let language = args
                    .get("language")
                    .and_then(Value::as_str)
                    .unwrap_or("en")
                    .to_string();
                let req = RestRequest::get("/loadlyrics")
                    .param("encodedTrack", encoded)
                    .param("language", language);
                debug!(node = %ctx.config.name, "fetching lyrics");
                execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await
            }
            other => Err(RestError::UnknownFunction {
                driver: self.id(),
                name: other.to_string(),
            }),
        }
    }
}

/// Map NodeLink's extra load types onto the canonical set. Shorts are a
/// single track; every other extra type is a playlist-shaped container.
fn remap_load_type(value: &mut Value) {
    let Some(load_type) = value.get("loadType").and_then(Value::as_str) else {
        return;
    };
    let mapped = match load_type {
        "shorts" => "track",
        "album" | "artist" | "episode" | "station" | "podcast" | "show" => "playlist",
        _ => return,
    };
    value["loadType"] = json!(mapped);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorts_map_to_track() {
        let mut value = json!({ "loadType": "shorts", "data": {} });
        remap_load_type(&mut value);
        assert_eq!(value["loadType"], "track");
    }

    #[test]
    fn album_and_podcast_map_to_playlist() {
        for extra in ["album", "artist", "episode", "station", "podcast", "show"] {
            let mut value = json!({ "loadType": extra, "data": {} });
            remap_load_type(&mut value);
            assert_eq!(value["loadType"], "playlist", "load type {extra}");
        }
    }

    #[test]
    fn canonical_load_types_pass_through() {
        for canonical in ["track", "playlist", "search", "empty", "error"] {
            let mut value = json!({ "loadType": canonical, "data": {} });
            remap_load_type(&mut value);
            assert_eq!(value["loadType"], canonical);
        }
    }

    #[test]
    fn lyrics_is_the_only_function() {
        assert_eq!(Nodelink2.functions(), ["getLyrics"]);
    }
}
