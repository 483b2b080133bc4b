use serde::{Deserialize, Serialize};

use crate::common::{GuildId, SessionId};
use crate::protocol::stats::NodeStats;
use crate::protocol::tracks::Track;

/// Messages a node pushes over its WebSocket, keyed by the `op` field.
/// Drivers normalize variant-specific spellings before this is parsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(default)]
        resumed: bool,
        session_id: SessionId,
    },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerUpdateState,
    },
    Stats {
        #[serde(flatten)]
        stats: NodeStats,
    },
    Event {
        #[serde(flatten)]
        event: PlayerWireEvent,
    },
}

/// Per-guild player events carried inside `op: event` frames, keyed by the
/// secondary `type` discriminator.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerWireEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart {
        guild_id: GuildId,
        track: Track,
    },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: GuildId,
        #[serde(default)]
        track: Option<Track>,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: GuildId,
        #[serde(default)]
        track: Option<Track>,
        exception: TrackException,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: GuildId,
        #[serde(default)]
        track: Option<Track>,
        threshold_ms: u64,
    },

    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: GuildId,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl PlayerWireEvent {
    pub fn guild_id(&self) -> &GuildId {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => guild_id,
        }
    }
}

/// Why a track stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

/// Playback state snapshot pushed with `op: playerUpdate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub ping: Option<i64>,
}

/// Exception payload attached to TrackExceptionEvent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: String,
}

/// Exception severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ready_op() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"op":"ready","resumed":false,"sessionId":"la3kfltkdt0dwpp3"}"#)
                .unwrap();
        match msg {
            IncomingMessage::Ready {
                resumed,
                session_id,
            } => {
                assert!(!resumed);
                assert_eq!(&*session_id, "la3kfltkdt0dwpp3");
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn parses_stats_op() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"stats","players":2,"playingPlayers":1,"uptime":123456,
                "memory":{"free":1,"used":2,"allocated":3,"reservable":4},
                "cpu":{"cores":8,"systemLoad":0.5,"lavalinkLoad":0.1},
                "frameStats":{"sent":3000,"nulled":10,"deficit":-20}}"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Stats { stats } => {
                assert_eq!(stats.players, 2);
                assert_eq!(stats.playing_players, 1);
                assert_eq!(stats.cpu.cores, 8);
                assert_eq!(stats.frame_stats.unwrap().deficit, -20);
            }
            other => panic!("expected stats, got {other:?}"),
        }
    }

    #[test]
    fn parses_track_end_event() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"event","type":"TrackEndEvent","guildId":"9293","reason":"loadFailed"}"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Event {
                event: PlayerWireEvent::TrackEnd { reason, track, .. },
            } => {
                assert_eq!(reason, TrackEndReason::LoadFailed);
                assert!(track.is_none());
            }
            other => panic!("expected TrackEnd, got {other:?}"),
        }
    }

    #[test]
    fn parses_websocket_closed_event() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"event","type":"WebSocketClosedEvent","guildId":"9293",
                "code":4006,"reason":"Session is no longer valid.","byRemote":true}"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Event {
                event: PlayerWireEvent::WebSocketClosed { code, by_remote, .. },
            } => {
                assert_eq!(code, 4006);
                assert!(by_remote);
            }
            other => panic!("expected WebSocketClosed, got {other:?}"),
        }
    }
}
