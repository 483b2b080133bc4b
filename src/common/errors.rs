use std::time::Duration;

use crate::common::types::GuildId;

/// Failures of a node WebSocket connection.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Every configured node is offline (or none passed the `Connected` filter).
    #[error("no nodes are online")]
    NoNodesOnline,

    /// A node was referenced by a name that is not registered.
    #[error("node `{0}` is not registered")]
    UnknownNode(String),

    #[error(transparent)]
    Rest(#[from] RestError),
}

/// Failures of a REST call to a node.
///
/// Non-2xx responses are deliberately *not* represented here: the node REST
/// convention treats them as empty results (logged at debug level), so only
/// transport problems and the pre-flight session guard surface as errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The call needs a session id but the node has not completed its `ready`
    /// handshake yet. Raised before any network I/O.
    #[error("session id not initialized, wait for the node to finish its ready handshake")]
    NoSessionId,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse node response: {0}")]
    Parse(#[from] serde_json::Error),

    /// A driver function-table lookup for a capability the variant lacks.
    #[error("driver `{driver}` has no function `{name}`")]
    UnknownFunction { driver: &'static str, name: String },
}

/// Failures of the per-guild voice handshake.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// A state update arrived without a session id.
    #[error("voice connection not established: missing session id")]
    MissingSessionId,

    /// The server update carried an empty endpoint.
    #[error("voice connection not established: missing connection endpoint")]
    MissingEndpoint,

    /// Neither failure nor readiness was observed within the deadline.
    #[error("voice connection not established within {0:?}")]
    Timeout(Duration),

    /// `connect()` was called while another connect was pending.
    #[error("a voice connect is already in progress")]
    ConnectInProgress,

    /// The session was torn down while a connect was waiting.
    #[error("voice handshake aborted")]
    Aborted,
}

/// Failures of player operations.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("player for guild {0} is destroyed")]
    Destroyed(GuildId),

    #[error("no track is available to play")]
    NoTrack,

    #[error("current track is not seekable")]
    NotSeekable,

    #[error("voice session has no credential yet")]
    VoiceNotReady,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}

/// Failures of track search and resolution.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("no results found")]
    NoResults,

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Rest(#[from] RestError),
}
