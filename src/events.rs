//! Typed event fan-out.
//!
//! Nodes and players publish through an [`EventBus`]; consumers take a
//! [`flume`] receiver per concern and read at their own pace. Dead
//! receivers are pruned on the next emit.

use parking_lot::Mutex;

use crate::common::GuildId;
use crate::protocol::messages::{PlayerUpdateState, TrackEndReason, TrackException};
use crate::protocol::stats::NodeStats;
use crate::protocol::tracks::Track;

/// Lifecycle events for one node connection.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The WebSocket opened and the node is taking traffic.
    Connect { name: String },
    /// The connection dropped unexpectedly; a reconnect may follow.
    Disconnect {
        name: String,
        code: u16,
        reason: String,
    },
    /// The connection is permanently closed, either on request or after
    /// the retry budget ran out.
    Closed { name: String },
    /// A non-fatal transport error.
    Error { name: String, message: String },
    /// A fresh stats payload arrived.
    Stats { name: String, stats: NodeStats },
}

/// Events for one guild's player.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Create {
        guild_id: GuildId,
    },
    Destroy {
        guild_id: GuildId,
    },
    TrackStart {
        guild_id: GuildId,
        track: Track,
    },
    TrackEnd {
        guild_id: GuildId,
        track: Option<Track>,
        reason: TrackEndReason,
    },
    /// Playback stopped and the queue has nothing left.
    QueueEmpty {
        guild_id: GuildId,
    },
    TrackException {
        guild_id: GuildId,
        track: Option<Track>,
        exception: TrackException,
    },
    TrackStuck {
        guild_id: GuildId,
        track: Option<Track>,
        threshold_ms: u64,
    },
    /// A queued entry could not be resolved to a playable track.
    ResolveError {
        guild_id: GuildId,
        identifier: String,
        message: String,
    },
    /// The node reported the guild's voice WebSocket closed.
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
    /// Position/latency snapshot from the node.
    Update {
        guild_id: GuildId,
        state: PlayerUpdateState,
    },
}

impl PlayerEvent {
    pub fn guild_id(&self) -> &GuildId {
        match self {
            Self::Create { guild_id }
            | Self::Destroy { guild_id }
            | Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::QueueEmpty { guild_id }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::ResolveError { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. }
            | Self::Update { guild_id, .. } => guild_id,
        }
    }
}

/// Broadcast hub for node and player events.
#[derive(Default)]
pub struct EventBus {
    node_subs: Mutex<Vec<flume::Sender<NodeEvent>>>,
    player_subs: Mutex<Vec<flume::Sender<PlayerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_nodes(&self) -> flume::Receiver<NodeEvent> {
        let (tx, rx) = flume::unbounded();
        self.node_subs.lock().push(tx);
        rx
    }

    pub fn subscribe_players(&self) -> flume::Receiver<PlayerEvent> {
        let (tx, rx) = flume::unbounded();
        self.player_subs.lock().push(tx);
        rx
    }

    pub fn emit_node(&self, event: NodeEvent) {
        self.node_subs
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn emit_player(&self, event: PlayerEvent) {
        self.player_subs
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
