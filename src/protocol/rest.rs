use serde::{Deserialize, Serialize};

use crate::common::GuildId;
use crate::protocol::tracks::Track;

/// One live player as reported by `GET /sessions/{id}/players`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlayer {
    pub guild_id: GuildId,
    #[serde(default)]
    pub track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    #[serde(default)]
    pub voice: Option<PlayerVoice>,
}

/// Voice credential forwarded to the node so it can join the media stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerVoice {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

/// Body of `PATCH /sessions/{id}/players/{guildId}`. Absent fields leave the
/// remote state untouched.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    /// `Some(None)` serializes an explicit `null`, which stops the current
    /// track; `None` omits the field entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_track: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<PlayerVoice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_player_omits_unset_fields() {
        let body = serde_json::to_value(UpdatePlayer {
            paused: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"paused": true}));
    }

    #[test]
    fn encoded_track_null_is_serialized() {
        let body = serde_json::to_value(UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"encodedTrack": null}));
    }
}
