//! Per-protocol-variant adapters.
//!
//! Each remote node speaks one of several related wire protocols. A driver
//! owns everything variant-specific: URL layout, connect-header convention,
//! session-update shape, track blob layout, and the reshaping of legacy
//! responses into the canonical [`LoadResult`]/[`IncomingMessage`] model.
//! One implementing type per variant, selected at connection construction
//! from [`DriverVariant`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::common::{RestError, SessionId};
use crate::config::{ClientIdentity, DriverVariant, NodeConfig};
use crate::protocol::messages::IncomingMessage;
use crate::protocol::tracks::Track;

pub mod frequenc;
pub mod lavalink3;
pub mod lavalink4;
pub mod nodelink2;

pub use frequenc::FrequenC;
pub use lavalink3::Lavalink3;
pub use lavalink4::Lavalink4;
pub use nodelink2::Nodelink2;

/// Everything a driver needs to perform one REST call.
pub struct HttpContext<'a> {
    pub client: &'a reqwest::Client,
    pub config: &'a NodeConfig,
    pub user_agent: &'a str,
    pub session_id: Option<SessionId>,
}

/// A REST call in canonical form, before the driver applies its wire
/// conventions.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub path: String,
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::GET,
            params: Vec::new(),
            body: None,
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            path: path.into(),
            method: Method::PATCH,
            params: Vec::new(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::DELETE,
            params: Vec::new(),
            body: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// Adapter normalizing one protocol variant to the canonical model.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// Stable driver identifier, e.g. `lavalink/v4`.
    fn id(&self) -> &'static str;

    fn ws_url(&self, config: &NodeConfig) -> String;

    fn http_url(&self, config: &NodeConfig) -> String;

    /// Exact header set (names, casing, values) the variant's WebSocket
    /// handshake expects. `session_id` is only passed when resuming.
    fn connect_headers(
        &self,
        config: &NodeConfig,
        identity: &ClientIdentity,
        user_agent: &str,
        session_id: Option<&str>,
    ) -> Vec<(&'static str, String)>;

    /// Decode a track blob in this variant's binary layout.
    fn decode_track(&self, encoded: &str) -> Option<Track>;

    /// Parse one inbound WebSocket text frame into the canonical message
    /// model, applying any variant-specific reshaping first.
    fn normalize_ws_message(&self, text: &str) -> Result<IncomingMessage, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Perform a REST call and normalize the response body. `Ok(None)`
    /// covers 204 and non-2xx statuses (logged, never fatal).
    async fn request(
        &self,
        ctx: &HttpContext<'_>,
        req: RestRequest,
    ) -> Result<Option<Value>, RestError>;

    /// Ask the node to retain player state for `timeout_secs` after an
    /// unexpected disconnect.
    async fn update_session(
        &self,
        ctx: &HttpContext<'_>,
        session_id: &SessionId,
        resuming: bool,
        timeout_secs: u64,
    ) -> Result<(), RestError>;

    /// Names of variant-specific capabilities reachable through [`call`].
    fn functions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Invoke a variant-specific capability by name.
    async fn call(
        &self,
        _ctx: &HttpContext<'_>,
        name: &str,
        _args: Value,
    ) -> Result<Option<Value>, RestError> {
        Err(RestError::UnknownFunction {
            driver: self.id(),
            name: name.to_string(),
        })
    }
}

/// Instantiate the driver for a configured variant.
pub fn driver_for(variant: DriverVariant) -> Arc<dyn ProtocolDriver> {
    match variant {
        DriverVariant::Lavalink3 => Arc::new(Lavalink3),
        DriverVariant::Lavalink4 => Arc::new(Lavalink4),
        DriverVariant::Nodelink2 => Arc::new(Nodelink2),
        DriverVariant::FrequenC => Arc::new(FrequenC),
    }
}

pub(crate) fn ws_base(config: &NodeConfig, version_path: &str) -> String {
    let scheme = if config.secure { "wss" } else { "ws" };
    format!(
        "{}://{}:{}{}/websocket",
        scheme, config.host, config.port, version_path
    )
}

pub(crate) fn http_base(config: &NodeConfig, version_path: &str) -> String {
    let scheme = if config.secure { "https" } else { "http" };
    format!("{}://{}:{}{}", scheme, config.host, config.port, version_path)
}

/// Shared request executor: builds the URL, sends, and applies the common
/// status convention (204 and non-2xx yield `Ok(None)`). Calls under
/// `/sessions` fail fast when no session id exists yet.
pub(crate) async fn execute(
    ctx: &HttpContext<'_>,
    base_url: &str,
    headers: &[(&'static str, String)],
    req: &RestRequest,
) -> Result<Option<Value>, RestError> {
    if req.path.contains("/sessions") && ctx.session_id.is_none() {
        return Err(RestError::NoSessionId);
    }

    let mut url = format!("{}{}", base_url, req.path);
    if !req.params.is_empty() {
        let query: Vec<String> = req
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        url.push('?');
        url.push_str(&query.join("&"));
    }

    let mut builder = ctx.client.request(req.method.clone(), &url);
    for (name, value) in headers {
        builder = builder.header(*name, value);
    }
    if let Some(body) = &req.body {
        builder = builder.json(body);
    }

    let res = builder.send().await?;
    let status = res.status();

    if status == reqwest::StatusCode::NO_CONTENT {
        debug!(node = %ctx.config.name, method = %req.method, path = %req.path, "204, no body");
        return Ok(None);
    }
    if !status.is_success() {
        debug!(
            node = %ctx.config.name,
            method = %req.method,
            path = %req.path,
            %status,
            "node returned a non-success status, treating as empty result"
        );
        return Ok(None);
    }

    Ok(Some(res.json::<Value>().await?))
}
