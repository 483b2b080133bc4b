use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::common::{RestError, SessionId};
use crate::config::{ClientIdentity, NodeConfig};
use crate::driver::{HttpContext, ProtocolDriver, RestRequest, execute, http_base, ws_base};
use crate::protocol::tracks::Track;

/// Driver for Lavalink v4, the current reference protocol. Responses are
/// already in the canonical shape, so normalization is a pass-through.
pub struct Lavalink4;

impl Lavalink4 {
    fn headers(&self, ctx: &HttpContext<'_>) -> Vec<(&'static str, String)> {
        vec![
            ("authorization", ctx.config.auth.clone()),
            ("user-agent", ctx.user_agent.to_string()),
        ]
    }
}

#[async_trait]
impl ProtocolDriver for Lavalink4 {
    fn id(&self) -> &'static str {
        "lavalink/v4"
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
        // Serve decodes locally when the blob is well-formed; the REST
        // endpoint is only a fallback.
        if req.path == "/decodetrack" {
            if let Some((_, blob)) = req.params.iter().find(|(k, _)| k == "encodedTrack") {
                if let Some(track) = self.decode_track(blob) {
                    debug!(node = %ctx.config.name, "decoded track client-side");
                    return Ok(Some(serde_json::to_value(track)?));
                }
            }
        }

        execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await
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
            serde_json::json!({ "resuming": resuming, "timeout": timeout_secs }),
        );
        execute(ctx, &self.http_url(ctx.config), &self.headers(ctx), &req).await?;
        debug!(node = %ctx.config.name, resuming, timeout_secs, "session updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NodeConfig {
        NodeConfig {
            name: "main".into(),
            host: "localhost".into(),
            port: 2333,
            auth: "youshallnotpass".into(),
            secure: false,
            driver: crate::config::DriverVariant::Lavalink4,
            region: None,
        }
    }

    #[test]
    fn urls_use_v4_prefix() {
        let driver = Lavalink4;
        assert_eq!(driver.ws_url(&config()), "ws://localhost:2333/v4/websocket");
        assert_eq!(driver.http_url(&config()), "http://localhost:2333/v4");
    }

    #[test]
    fn secure_urls_use_tls_schemes() {
        let driver = Lavalink4;
        let mut cfg = config();
        cfg.secure = true;
        assert_eq!(driver.ws_url(&cfg), "wss://localhost:2333/v4/websocket");
        assert_eq!(driver.http_url(&cfg), "https://localhost:2333/v4");
    }

    #[test]
    fn session_id_header_only_when_resuming() {
        let driver = Lavalink4;
        let identity = ClientIdentity {
            user_id: "123".into(),
            shard_count: 1,
        };

        let fresh = driver.connect_headers(&config(), &identity, "ua", None);
        assert!(!fresh.iter().any(|(k, _)| *k == "session-id"));

        let resumed = driver.connect_headers(&config(), &identity, "ua", Some("abc"));
        assert!(
            resumed
                .iter()
                .any(|(k, v)| *k == "session-id" && v == "abc")
        );
    }
}
