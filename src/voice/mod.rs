//! Per-guild voice handshake state.
//!
//! Discord hands out voice credentials in two gateway dispatches, a
//! server update (token + endpoint) and a state update (session id),
//! with no ordering guarantee. [`VoiceSession`] collects both, in
//! either order, and wakes the pending `connect()` once the pair is
//! complete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::common::{AnyResult, GuildId, VoiceError};
use crate::protocol::rest::PlayerVoice;

/// Bridge to the host's Discord gateway. The library never owns a
/// gateway connection; it only asks the host to send voice intents.
#[async_trait]
pub trait SignalingAdapter: Send + Sync {
    async fn send_packet(&self, shard_id: u64, payload: Value) -> AnyResult<()>;
}

/// `VOICE_SERVER_UPDATE` dispatch payload.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// `VOICE_STATE_UPDATE` dispatch payload, reduced to the fields the
/// handshake needs.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Disconnected,
    Connecting,
    Connected,
}

enum HandshakeSignal {
    Ready,
    MissingEndpoint,
    MissingSessionId,
}

struct Inner {
    channel_id: Option<String>,
    deaf: bool,
    mute: bool,
    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    region: Option<String>,
    state: VoiceState,
    waiter: Option<oneshot::Sender<HandshakeSignal>>,
}

pub struct VoiceSession {
    guild_id: GuildId,
    shard_id: u64,
    adapter: Arc<dyn SignalingAdapter>,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl VoiceSession {
    pub fn new(
        guild_id: GuildId,
        shard_id: u64,
        adapter: Arc<dyn SignalingAdapter>,
        timeout: Duration,
    ) -> Self {
        Self {
            guild_id,
            shard_id,
            adapter,
            timeout,
            inner: Mutex::new(Inner {
                channel_id: None,
                deaf: false,
                mute: false,
                session_id: None,
                token: None,
                endpoint: None,
                region: None,
                state: VoiceState::Disconnected,
                waiter: None,
            }),
        }
    }

    pub fn state(&self) -> VoiceState {
        self.inner.lock().state
    }

    pub fn channel_id(&self) -> Option<String> {
        self.inner.lock().channel_id.clone()
    }

    pub fn region(&self) -> Option<String> {
        self.inner.lock().region.clone()
    }

    /// Credentials for the node's player update, once the handshake is
    /// complete.
    pub fn credential(&self) -> Option<PlayerVoice> {
        let inner = self.inner.lock();
        Some(PlayerVoice {
            token: inner.token.clone()?,
            endpoint: inner.endpoint.clone()?,
            session_id: inner.session_id.clone()?,
        })
    }

    /// Ask the gateway to join `channel_id` and wait for the credential
    /// pair. Fails with a typed error on timeout or a broken handshake.
    pub async fn connect(
        &self,
        channel_id: String,
        deaf: bool,
        mute: bool,
    ) -> Result<(), VoiceError> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.waiter.is_some() {
                return Err(VoiceError::ConnectInProgress);
            }
            inner.channel_id = Some(channel_id.clone());
            inner.deaf = deaf;
            inner.mute = mute;
            inner.state = VoiceState::Connecting;

            let (tx, rx) = oneshot::channel();
            inner.waiter = Some(tx);
            rx
        };

        if let Err(e) = self.send_intent(Some(channel_id)).await {
            self.fail_handshake();
            warn!(guild = %self.guild_id, "voice intent failed: {e}");
            return Err(VoiceError::Aborted);
        }

        let signal = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(signal)) => signal,
            Ok(Err(_)) => {
                self.fail_handshake();
                return Err(VoiceError::Aborted);
            }
            Err(_) => {
                self.fail_handshake();
                return Err(VoiceError::Timeout(self.timeout));
            }
        };

        match signal {
            HandshakeSignal::Ready => {
                self.inner.lock().state = VoiceState::Connected;
                debug!(guild = %self.guild_id, "voice handshake complete");
                Ok(())
            }
            HandshakeSignal::MissingEndpoint => {
                self.fail_handshake();
                Err(VoiceError::MissingEndpoint)
            }
            HandshakeSignal::MissingSessionId => {
                self.fail_handshake();
                Err(VoiceError::MissingSessionId)
            }
        }
    }

    /// Leave the session safe to retry after a broken handshake: drop the
    /// waiter so a late signal hits nothing, and fall back to
    /// `Disconnected`. The channel id is kept so a later `disconnect()`
    /// still sends the leave intent for the join that went out.
    fn fail_handshake(&self) {
        let mut inner = self.inner.lock();
        inner.waiter = None;
        inner.state = VoiceState::Disconnected;
    }

    /// Leave the channel. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        {
            let mut inner = self.inner.lock();
            // A failed connect is already Disconnected but still holds
            // the channel it asked the gateway to join.
            if inner.state == VoiceState::Disconnected && inner.channel_id.is_none() {
                return;
            }
            inner.state = VoiceState::Disconnected;
            inner.channel_id = None;
            inner.session_id = None;
            inner.token = None;
            inner.endpoint = None;
            inner.waiter = None;
        }
        if let Err(e) = self.send_intent(None).await {
            debug!(guild = %self.guild_id, "leave intent failed: {e}");
        }
    }

    pub async fn set_deaf(&self, deaf: bool) -> AnyResult<()> {
        let channel = {
            let mut inner = self.inner.lock();
            inner.deaf = deaf;
            inner.channel_id.clone()
        };
        match channel {
            Some(channel) => self.send_intent(Some(channel)).await,
            None => Ok(()),
        }
    }

    pub async fn set_mute(&self, mute: bool) -> AnyResult<()> {
        let channel = {
            let mut inner = self.inner.lock();
            inner.mute = mute;
            inner.channel_id.clone()
        };
        match channel {
            Some(channel) => self.send_intent(Some(channel)).await,
            None => Ok(()),
        }
    }

    async fn send_intent(&self, channel_id: Option<String>) -> AnyResult<()> {
        let (deaf, mute) = {
            let inner = self.inner.lock();
            (inner.deaf, inner.mute)
        };
        let payload = json!({
            "op": 4,
            "d": {
                "guild_id": self.guild_id,
                "channel_id": channel_id,
                "self_deaf": deaf,
                "self_mute": mute,
            }
        });
        self.adapter.send_packet(self.shard_id, payload).await
    }

    /// Feed a `VOICE_SERVER_UPDATE` for this guild.
    pub fn handle_server_update(&self, update: VoiceServerUpdate) {
        let mut inner = self.inner.lock();

        let Some(endpoint) = update.endpoint.filter(|e| !e.is_empty()) else {
            warn!(guild = %self.guild_id, "server update without endpoint");
            if let Some(waiter) = inner.waiter.take() {
                let _ = waiter.send(HandshakeSignal::MissingEndpoint);
            }
            return;
        };

        let region = endpoint_region(&endpoint);
        if inner.region.is_some() && inner.region != region {
            debug!(
                guild = %self.guild_id,
                from = ?inner.region,
                to = ?region,
                "voice region changed"
            );
        }
        inner.region = region;
        inner.token = Some(update.token);
        inner.endpoint = Some(endpoint);

        if inner.session_id.is_some() {
            if let Some(waiter) = inner.waiter.take() {
                let _ = waiter.send(HandshakeSignal::Ready);
            }
        }
    }

    /// Feed a `VOICE_STATE_UPDATE` for this guild's own user.
    pub fn handle_state_update(&self, update: VoiceStateUpdate) {
        let mut inner = self.inner.lock();

        let Some(channel_id) = update.channel_id else {
            debug!(guild = %self.guild_id, "voice state cleared, disconnected");
            inner.state = VoiceState::Disconnected;
            inner.channel_id = None;
            inner.session_id = None;
            return;
        };
        inner.channel_id = Some(channel_id);

        let Some(session_id) = update.session_id.filter(|s| !s.is_empty()) else {
            warn!(guild = %self.guild_id, "voice state without session id");
            if let Some(waiter) = inner.waiter.take() {
                let _ = waiter.send(HandshakeSignal::MissingSessionId);
            }
            return;
        };
        inner.session_id = Some(session_id);

        if inner.token.is_some() && inner.endpoint.is_some() {
            if let Some(waiter) = inner.waiter.take() {
                let _ = waiter.send(HandshakeSignal::Ready);
            }
        }
    }
}

/// Voice region from an endpoint hostname: the first dot-separated label
/// with its trailing digits stripped, e.g. `us-west123.discord.media` is
/// `us-west`.
fn endpoint_region(endpoint: &str) -> Option<String> {
    let label = endpoint.split('.').next()?;
    let stripped = label.trim_end_matches(|c: char| c.is_ascii_digit());
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct RecordingAdapter {
        packets: PlMutex<Vec<Value>>,
    }

    impl RecordingAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                packets: PlMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SignalingAdapter for RecordingAdapter {
        async fn send_packet(&self, _shard_id: u64, payload: Value) -> AnyResult<()> {
            self.packets.lock().push(payload);
            Ok(())
        }
    }

    fn session(adapter: Arc<RecordingAdapter>) -> VoiceSession {
        VoiceSession::new(
            GuildId::from("100"),
            0,
            adapter,
            Duration::from_millis(100),
        )
    }

    fn server_update(endpoint: Option<&str>) -> VoiceServerUpdate {
        VoiceServerUpdate {
            token: "tok".into(),
            guild_id: GuildId::from("100"),
            endpoint: endpoint.map(String::from),
        }
    }

    fn state_update(session_id: Option<&str>) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: GuildId::from("100"),
            channel_id: Some("555".into()),
            session_id: session_id.map(String::from),
        }
    }

    #[tokio::test]
    async fn completes_server_then_state() {
        let adapter = RecordingAdapter::new();
        let session = Arc::new(session(adapter));

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.connect("555".into(), false, false).await })
        };
        tokio::task::yield_now().await;

        session.handle_server_update(server_update(Some("us-west123.discord.media:443")));
        session.handle_state_update(state_update(Some("sess")));

        task.await.unwrap().unwrap();
        assert_eq!(session.state(), VoiceState::Connected);
        assert_eq!(session.region().as_deref(), Some("us-west"));
        assert!(session.credential().is_some());
    }

    #[tokio::test]
    async fn completes_state_then_server() {
        let adapter = RecordingAdapter::new();
        let session = Arc::new(session(adapter));

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.connect("555".into(), false, false).await })
        };
        tokio::task::yield_now().await;

        session.handle_state_update(state_update(Some("sess")));
        session.handle_server_update(server_update(Some("rotterdam1.discord.media")));

        task.await.unwrap().unwrap();
        assert_eq!(session.state(), VoiceState::Connected);
        assert_eq!(session.region().as_deref(), Some("rotterdam"));
    }

    #[tokio::test]
    async fn missing_endpoint_fails_distinctly() {
        let adapter = RecordingAdapter::new();
        let session = Arc::new(session(adapter));

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.connect("555".into(), false, false).await })
        };
        tokio::task::yield_now().await;

        session.handle_server_update(server_update(None));

        assert!(matches!(
            task.await.unwrap(),
            Err(VoiceError::MissingEndpoint)
        ));
        assert_eq!(session.state(), VoiceState::Disconnected);
    }

    #[tokio::test]
    async fn missing_session_id_fails_distinctly() {
        let adapter = RecordingAdapter::new();
        let session = Arc::new(session(adapter));

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.connect("555".into(), false, false).await })
        };
        tokio::task::yield_now().await;

        session.handle_state_update(state_update(None));

        assert!(matches!(
            task.await.unwrap(),
            Err(VoiceError::MissingSessionId)
        ));
        assert_eq!(session.state(), VoiceState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_unregisters_waiter() {
        let adapter = RecordingAdapter::new();
        let session = Arc::new(session(adapter));

        let result = session.connect("555".into(), false, false).await;
        assert!(matches!(result, Err(VoiceError::Timeout(_))));
        assert_eq!(session.state(), VoiceState::Disconnected);

        // A late pair must not resurrect the handshake.
        session.handle_server_update(server_update(Some("sydney55.discord.media")));
        session.handle_state_update(state_update(Some("sess")));
        assert_eq!(session.state(), VoiceState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_after_failed_connect_sends_leave_intent() {
        let adapter = RecordingAdapter::new();
        let session = Arc::new(session(adapter.clone()));

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.connect("555".into(), false, false).await })
        };
        tokio::task::yield_now().await;
        session.handle_server_update(server_update(None));
        assert!(task.await.unwrap().is_err());

        session.disconnect().await;

        let packets = adapter.packets.lock();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0]["d"]["channel_id"], "555");
        assert_eq!(packets[1]["d"]["channel_id"], Value::Null);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_sends_null_channel() {
        let adapter = RecordingAdapter::new();
        let session = session(adapter.clone());

        {
            let mut inner = session.inner.lock();
            inner.state = VoiceState::Connected;
            inner.channel_id = Some("555".into());
        }

        session.disconnect().await;
        session.disconnect().await;

        let packets = adapter.packets.lock();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0]["d"]["channel_id"], Value::Null);
    }

    #[test]
    fn region_parsing() {
        assert_eq!(
            endpoint_region("us-west123.discord.media:443").as_deref(),
            Some("us-west")
        );
        assert_eq!(
            endpoint_region("rotterdam.discord.media").as_deref(),
            Some("rotterdam")
        );
        assert_eq!(endpoint_region("1234.discord.media"), None);
    }
}
