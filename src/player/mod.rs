//! Guild players.
//!
//! A [`Player`] is the local mirror of one guild's player on a node:
//! it owns the queue, the voice session and the playback flags, issues
//! REST updates for every mutation, and applies the node's events as
//! they arrive from the router. All mutating operations serialize on an
//! internal async lock so queue state and remote state cannot diverge.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::common::{GuildId, PlayerError};
use crate::events::{EventBus, PlayerEvent};
use crate::node::NodeConnection;
use crate::protocol::messages::{PlayerUpdateState, PlayerWireEvent};
use crate::protocol::rest::UpdatePlayer;
use crate::search::Searcher;
use crate::voice::VoiceSession;

pub mod queue;
pub mod registry;
pub mod track;

pub use queue::{EndDisposition, LoopMode, Queue};
pub use registry::{PlayerMap, PlayerOptions, PlayerRegistry};
pub use track::PlayerTrack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Destroying,
    Destroyed,
}

#[derive(Debug, Clone, Copy, Default)]
struct PlayState {
    playing: bool,
    paused: bool,
    position: u64,
    ping: Option<i64>,
    volume: u16,
}

pub struct Player {
    guild_id: GuildId,
    node: Arc<NodeConnection>,
    voice: Arc<VoiceSession>,
    bus: Arc<EventBus>,
    searcher: Arc<Searcher>,
    queue: Mutex<Queue>,
    state: Mutex<PlayState>,
    text_channel_id: Mutex<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes every mutating operation for this guild.
    op_lock: tokio::sync::Mutex<()>,
}

impl Player {
    pub(crate) fn new(
        guild_id: GuildId,
        node: Arc<NodeConnection>,
        voice: Arc<VoiceSession>,
        bus: Arc<EventBus>,
        searcher: Arc<Searcher>,
        volume: u16,
        text_channel_id: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            node,
            voice,
            bus,
            searcher,
            queue: Mutex::new(Queue::new()),
            state: Mutex::new(PlayState {
                volume,
                ..Default::default()
            }),
            text_channel_id: Mutex::new(text_channel_id),
            lifecycle: Mutex::new(Lifecycle::Active),
            op_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn node(&self) -> &Arc<NodeConnection> {
        &self.node
    }

    pub fn voice(&self) -> &VoiceSession {
        &self.voice
    }

    pub fn text_channel_id(&self) -> Option<String> {
        self.text_channel_id.lock().clone()
    }

    pub fn set_text_channel_id(&self, channel_id: Option<String>) {
        *self.text_channel_id.lock() = channel_id;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn position(&self) -> u64 {
        self.state.lock().position
    }

    pub fn ping(&self) -> Option<i64> {
        self.state.lock().ping
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn current(&self) -> Option<PlayerTrack> {
        self.queue.lock().current().cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.queue.lock().loop_mode()
    }

    pub fn set_loop(&self, mode: LoopMode) {
        self.queue.lock().set_loop_mode(mode);
    }

    pub fn add(&self, track: PlayerTrack) {
        self.queue.lock().push(track);
    }

    pub fn clear_queue(&self) {
        self.queue.lock().clear();
    }

    fn ensure_active(&self) -> Result<(), PlayerError> {
        match *self.lifecycle.lock() {
            Lifecycle::Active => Ok(()),
            _ => Err(PlayerError::Destroyed(self.guild_id.clone())),
        }
    }

    fn is_destroying(&self) -> bool {
        *self.lifecycle.lock() != Lifecycle::Active
    }

    /// Start playback. With a track, that track plays now and the one it
    /// preempts returns to the front of the queue unless `replace` is
    /// set; without one, the next queued track plays.
    pub async fn play(
        &self,
        track: Option<PlayerTrack>,
        replace: bool,
    ) -> Result<(), PlayerError> {
        let _guard = self.op_lock.lock().await;
        self.play_locked(track, replace).await
    }

    async fn play_locked(
        &self,
        track: Option<PlayerTrack>,
        replace: bool,
    ) -> Result<(), PlayerError> {
        self.ensure_active()?;

        {
            let mut queue = self.queue.lock();
            match track {
                Some(track) => {
                    if let Some(preempted) = queue.take_current() {
                        if !replace {
                            queue.push_front(preempted);
                        }
                    }
                    queue.set_current(Some(track));
                }
                None => {
                    if queue.current().is_none() && queue.advance().is_none() {
                        return Err(PlayerError::NoTrack);
                    }
                }
            }
        }

        self.start_current().await
    }

    /// Resolve and start whatever `current` holds, advancing past
    /// entries that fail to resolve.
    async fn start_current(&self) -> Result<(), PlayerError> {
        loop {
            let Some(mut entry) = self.queue.lock().current().cloned() else {
                self.mark_stopped();
                self.bus.emit_player(PlayerEvent::QueueEmpty {
                    guild_id: self.guild_id.clone(),
                });
                return Ok(());
            };

            if !entry.is_playable() {
                match self.searcher.resolve(&entry).await {
                    Ok(resolved) => {
                        entry.resolved_uri = resolved.info.uri.clone();
                        entry.track = resolved;
                        self.queue.lock().set_current(Some(entry.clone()));
                    }
                    Err(e) => {
                        warn!(
                            guild = %self.guild_id,
                            identifier = entry.identifier(),
                            "track resolution failed: {e}"
                        );
                        self.bus.emit_player(PlayerEvent::ResolveError {
                            guild_id: self.guild_id.clone(),
                            identifier: entry.identifier().to_string(),
                            message: e.to_string(),
                        });
                        self.queue.lock().advance();
                        continue;
                    }
                }
            }

            let volume = self.state.lock().volume;
            let update = UpdatePlayer {
                encoded_track: Some(Some(entry.track.encoded.clone())),
                volume: Some(volume),
                ..Default::default()
            };
            self.node
                .rest()
                .update_player(&self.guild_id, false, &update)
                .await?;

            let mut state = self.state.lock();
            state.playing = true;
            state.paused = false;
            info!(guild = %self.guild_id, title = entry.title(), "playing");
            return Ok(());
        }
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.set_pause(true).await
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        self.set_pause(false).await
    }

    /// Idempotent: a no-op when already in the requested state.
    pub async fn set_pause(&self, paused: bool) -> Result<(), PlayerError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active()?;

        if self.state.lock().paused == paused {
            return Ok(());
        }

        let update = UpdatePlayer {
            paused: Some(paused),
            ..Default::default()
        };
        self.node
            .rest()
            .update_player(&self.guild_id, false, &update)
            .await?;

        // playing and paused are complementary while a track is loaded.
        let mut state = self.state.lock();
        state.paused = paused;
        state.playing = !paused;
        Ok(())
    }

    /// Seek within the current track. Positions past the end clamp to
    /// track length.
    pub async fn seek(&self, position_ms: u64) -> Result<(), PlayerError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active()?;

        let (seekable, length) = {
            let queue = self.queue.lock();
            let current = queue.current().ok_or(PlayerError::NoTrack)?;
            (current.track.info.is_seekable, current.length())
        };
        if !seekable {
            return Err(PlayerError::NotSeekable);
        }

        let position = position_ms.min(length);
        let update = UpdatePlayer {
            position: Some(position),
            ..Default::default()
        };
        self.node
            .rest()
            .update_player(&self.guild_id, false, &update)
            .await?;
        self.state.lock().position = position;
        Ok(())
    }

    /// Volume in percent, clamped to 0..=1000.
    pub async fn set_volume(&self, volume: u16) -> Result<(), PlayerError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active()?;

        let volume = volume.min(1000);
        let update = UpdatePlayer {
            volume: Some(volume),
            ..Default::default()
        };
        self.node
            .rest()
            .update_player(&self.guild_id, false, &update)
            .await?;
        self.state.lock().volume = volume;
        Ok(())
    }

    /// Stop the current track. The node answers with a `stopped` track
    /// end, which advances the queue through the normal path.
    pub async fn skip(&self) -> Result<PlayerTrack, PlayerError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_active()?;

        let current = self
            .queue
            .lock()
            .current()
            .cloned()
            .ok_or(PlayerError::NoTrack)?;

        let update = UpdatePlayer {
            encoded_track: Some(None),
            ..Default::default()
        };
        self.node
            .rest()
            .update_player(&self.guild_id, false, &update)
            .await?;
        Ok(current)
    }

    /// Jump back to the most recently played track. The history pop and
    /// the play happen under one guard so a racing track-end cannot
    /// slip between them.
    pub async fn previous(&self) -> Result<(), PlayerError> {
        let _guard = self.op_lock.lock().await;
        let previous = self
            .queue
            .lock()
            .pop_history()
            .ok_or(PlayerError::NoTrack)?;
        self.play_locked(Some(previous), false).await
    }

    /// Tear the player down: leave voice, delete the remote player and
    /// emit `Destroy`. Subsequent calls and in-flight events are no-ops.
    pub(crate) async fn destroy(&self) -> Result<(), PlayerError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Active {
                return Ok(());
            }
            *lifecycle = Lifecycle::Destroying;
        }
        let _guard = self.op_lock.lock().await;

        self.voice.disconnect().await;
        if let Err(e) = self.node.rest().destroy_player(&self.guild_id).await {
            debug!(guild = %self.guild_id, "remote destroy failed: {e}");
        }

        *self.lifecycle.lock() = Lifecycle::Destroyed;
        info!(guild = %self.guild_id, "player destroyed");
        Ok(())
    }

    fn mark_stopped(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.paused = false;
    }

    /// Apply a position snapshot from the node.
    pub(crate) fn handle_update(&self, update: PlayerUpdateState) {
        {
            let mut state = self.state.lock();
            state.position = update.position;
            state.ping = update.ping;
        }
        self.bus.emit_player(PlayerEvent::Update {
            guild_id: self.guild_id.clone(),
            state: update,
        });
    }

    /// Apply one node event. Called by the router in arrival order.
    pub(crate) async fn handle_event(&self, event: PlayerWireEvent) {
        match event {
            PlayerWireEvent::TrackStart { track, .. } => {
                {
                    let mut state = self.state.lock();
                    state.playing = true;
                    state.paused = false;
                }
                self.bus.emit_player(PlayerEvent::TrackStart {
                    guild_id: self.guild_id.clone(),
                    track,
                });
            }
            PlayerWireEvent::TrackEnd { track, reason, .. } => {
                // Ends racing a destroy are stale.
                if self.is_destroying() {
                    return;
                }
                let _guard = self.op_lock.lock().await;
                let disposition = self.queue.lock().on_track_end(reason);
                match disposition {
                    EndDisposition::Replaced => {
                        self.bus.emit_player(PlayerEvent::TrackEnd {
                            guild_id: self.guild_id.clone(),
                            track,
                            reason,
                        });
                    }
                    EndDisposition::Advance(_) => {
                        self.bus.emit_player(PlayerEvent::TrackEnd {
                            guild_id: self.guild_id.clone(),
                            track,
                            reason,
                        });
                        if let Err(e) = self.start_current().await {
                            warn!(guild = %self.guild_id, "failed to start next track: {e}");
                        }
                    }
                    EndDisposition::Empty => {
                        self.mark_stopped();
                        self.bus.emit_player(PlayerEvent::QueueEmpty {
                            guild_id: self.guild_id.clone(),
                        });
                    }
                }
            }
            PlayerWireEvent::TrackException {
                track, exception, ..
            } => {
                self.bus.emit_player(PlayerEvent::TrackException {
                    guild_id: self.guild_id.clone(),
                    track,
                    exception,
                });
            }
            PlayerWireEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => {
                self.bus.emit_player(PlayerEvent::TrackStuck {
                    guild_id: self.guild_id.clone(),
                    track,
                    threshold_ms,
                });
            }
            PlayerWireEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                self.bus.emit_player(PlayerEvent::WebSocketClosed {
                    guild_id: self.guild_id.clone(),
                    code,
                    reason,
                    by_remote,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::RwLock;
    use serde_json::Value;

    use crate::common::AnyResult;
    use crate::config::{ClientIdentity, NodeConfig, WavelinkOptions};
    use crate::node::NodeRegistry;
    use crate::player::registry::PlayerMap;
    use crate::voice::SignalingAdapter;

    struct NullAdapter;

    #[async_trait]
    impl SignalingAdapter for NullAdapter {
        async fn send_packet(&self, _shard_id: u64, _payload: Value) -> AnyResult<()> {
            Ok(())
        }
    }

    fn player() -> Arc<Player> {
        let options = Arc::new(WavelinkOptions::default());
        let bus = Arc::new(EventBus::new());
        let nodes = Arc::new(NodeRegistry::new());
        let players = PlayerMap::default();
        let searcher = Arc::new(Searcher::new(nodes, options.clone(), players));
        let (tx, _rx) = flume::unbounded();
        let node = NodeConnection::new(
            NodeConfig {
                name: "main".into(),
                host: "localhost".into(),
                port: 2333,
                auth: "pass".into(),
                secure: false,
                driver: Default::default(),
                region: None,
            },
            Arc::new(RwLock::new(ClientIdentity::default())),
            options,
            bus.clone(),
            tx,
        );
        let voice = Arc::new(VoiceSession::new(
            GuildId::from("42"),
            0,
            Arc::new(NullAdapter),
            Duration::from_millis(50),
        ));
        Player::new(GuildId::from("42"), node, voice, bus, searcher, 100, None)
    }

    #[tokio::test]
    async fn previous_without_history_errors() {
        let player = player();
        assert!(matches!(player.previous().await, Err(PlayerError::NoTrack)));
    }
}
