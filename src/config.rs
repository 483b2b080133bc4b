use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::SessionId;
use crate::node::registry::NodeResolver;

/// Library name/version pair advertised to nodes in connect headers.
pub const CLIENT_NAME: &str = concat!("wavelink/", env!("CARGO_PKG_VERSION"));

/// Which wire protocol a configured node speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DriverVariant {
    Lavalink3,
    #[default]
    Lavalink4,
    Nodelink2,
    FrequenC,
}

/// Static description of one remote node. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// Unique name used as the registry key.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Password sent in the authorization header.
    pub auth: String,
    /// Use wss/https instead of ws/http.
    pub secure: bool,
    #[serde(default)]
    pub driver: DriverVariant,
    /// Voice region this node is closest to. Players created for a matching
    /// voice region prefer this node.
    #[serde(default)]
    pub region: Option<String>,
}

/// Optional externally-supplied store for resumable session ids, keyed by
/// node host. The library never persists anything else.
pub trait SessionStore: Send + Sync {
    fn load(&self, host: &str) -> Option<SessionId>;
    fn save(&self, host: &str, session_id: &SessionId);
}

/// Client-wide options. Every field has a sensible default; construct with
/// struct-update syntax: `WavelinkOptions { nodes, ..Default::default() }`.
pub struct WavelinkOptions {
    pub nodes: Vec<NodeConfig>,
    /// How many reconnect attempts a node gets before it is closed for good.
    pub retry_count: u32,
    /// Fixed delay between reconnect attempts. Not exponential.
    pub retry_timeout: Duration,
    /// How long a voice handshake may take before `connect()` fails.
    pub voice_connection_timeout: Duration,
    /// Ask nodes to retain player state across unexpected disconnects.
    pub resume: bool,
    /// How long (seconds) a node should keep a resumable session alive.
    pub resume_timeout_secs: u64,
    /// Engine used when a bare search query carries no explicit engine.
    pub default_search_engine: String,
    /// Second engine tried when track resolution finds nothing.
    pub search_fallback_engine: Option<String>,
    /// Initial volume for new players, in percent.
    pub default_volume: u16,
    pub user_agent: String,
    pub session_store: Option<Arc<dyn SessionStore>>,
    /// Overrides least-used node selection entirely when set.
    pub node_resolver: Option<NodeResolver>,
}

impl Default for WavelinkOptions {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            retry_count: 15,
            retry_timeout: Duration::from_millis(3000),
            voice_connection_timeout: Duration::from_millis(15000),
            resume: false,
            resume_timeout_secs: 300,
            default_search_engine: "youtube".to_string(),
            search_fallback_engine: Some("soundcloud".to_string()),
            default_volume: 100,
            user_agent: format!("Discord/Bot/{}", CLIENT_NAME),
            session_store: None,
            node_resolver: None,
        }
    }
}

/// Identity of the hosting bot, required by node connect headers.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    /// The bot's user id as a decimal string. Empty until the host gateway
    /// has identified.
    pub user_id: String,
    pub shard_count: u32,
}
