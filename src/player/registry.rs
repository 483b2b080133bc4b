use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::common::{GuildId, PlayerError};
use crate::config::WavelinkOptions;
use crate::events::{EventBus, PlayerEvent};
use crate::node::NodeRegistry;
use crate::player::Player;
use crate::protocol::rest::UpdatePlayer;
use crate::search::Searcher;
use crate::voice::{SignalingAdapter, VoiceSession};

/// Shared guild-to-player map. The router and the registry both hold it.
pub type PlayerMap = Arc<DashMap<GuildId, Arc<Player>>>;

pub struct PlayerOptions {
    pub guild_id: GuildId,
    pub voice_channel_id: String,
    /// Channel to report playback to. Stored for callers, never sent to
    /// the node.
    pub text_channel_id: Option<String>,
    /// Gateway shard that owns this guild's voice intents.
    pub shard_id: u64,
    pub deaf: bool,
    pub mute: bool,
    /// Initial volume; the configured default when unset.
    pub volume: Option<u16>,
    /// Pin the player to a named node instead of the least-used one.
    pub node: Option<String>,
}

/// Creates and tears down guild players.
pub struct PlayerRegistry {
    players: PlayerMap,
    nodes: Arc<NodeRegistry>,
    options: Arc<WavelinkOptions>,
    bus: Arc<EventBus>,
    searcher: Arc<Searcher>,
    adapter: Arc<dyn SignalingAdapter>,
    /// Handshakes in flight. Gateway voice dispatches arriving before the
    /// player exists are routed here.
    pending_voice: DashMap<GuildId, Arc<VoiceSession>>,
    /// Serializes creation so two connects for one guild cannot race.
    create_lock: tokio::sync::Mutex<()>,
}

impl PlayerRegistry {
    pub(crate) fn new(
        players: PlayerMap,
        nodes: Arc<NodeRegistry>,
        options: Arc<WavelinkOptions>,
        bus: Arc<EventBus>,
        searcher: Arc<Searcher>,
        adapter: Arc<dyn SignalingAdapter>,
    ) -> Self {
        Self {
            players,
            nodes,
            options,
            bus,
            searcher,
            adapter,
            pending_voice: DashMap::new(),
            create_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Voice session of a handshake still inside `create`.
    pub fn pending_voice(&self, guild_id: &GuildId) -> Option<Arc<VoiceSession>> {
        self.pending_voice
            .get(guild_id)
            .map(|entry| entry.value().clone())
    }

    pub fn get(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.players.get(guild_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Create a player: join voice, pick a node (preferring the voice
    /// region), and push the credential to it. Calling this again for a
    /// guild that already has a player returns the existing one.
    pub async fn create(&self, options: PlayerOptions) -> Result<Arc<Player>, PlayerError> {
        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.get(&options.guild_id) {
            debug!(guild = %options.guild_id, "player already exists");
            return Ok(existing);
        }

        let voice = Arc::new(VoiceSession::new(
            options.guild_id.clone(),
            options.shard_id,
            self.adapter.clone(),
            self.options.voice_connection_timeout,
        ));
        self.pending_voice
            .insert(options.guild_id.clone(), voice.clone());
        let joined = voice
            .connect(options.voice_channel_id.clone(), options.deaf, options.mute)
            .await;
        self.pending_voice.remove(&options.guild_id);
        if let Err(e) = joined {
            // The join intent already reached the gateway; take it back.
            voice.disconnect().await;
            return Err(e.into());
        }

        let region = voice.region();
        let node = match &options.node {
            Some(name) => self.nodes.get(name).map_err(PlayerError::from),
            None => {
                let players = self.players.clone();
                self.nodes
                    .best(
                        region.as_deref(),
                        self.options.node_resolver.as_ref(),
                        move |guild| players.contains_key(guild),
                    )
                    .await
                    .map_err(PlayerError::from)
            }
        };
        let node = match node {
            Ok(node) => node,
            Err(e) => {
                // Leave voice again; a failed create keeps nothing around.
                voice.disconnect().await;
                return Err(e);
            }
        };

        let credential = match voice.credential() {
            Some(credential) => credential,
            None => {
                voice.disconnect().await;
                return Err(PlayerError::VoiceNotReady);
            }
        };
        let volume = options.volume.unwrap_or(self.options.default_volume);
        let update = UpdatePlayer {
            voice: Some(credential),
            volume: Some(volume),
            ..Default::default()
        };
        if let Err(e) = node
            .rest()
            .update_player(&options.guild_id, false, &update)
            .await
        {
            voice.disconnect().await;
            return Err(e.into());
        }

        let player = Player::new(
            options.guild_id.clone(),
            node,
            voice,
            self.bus.clone(),
            self.searcher.clone(),
            volume,
            options.text_channel_id.clone(),
        );
        self.players
            .insert(options.guild_id.clone(), player.clone());

        info!(
            guild = %options.guild_id,
            node = player.node().name(),
            "player created"
        );
        self.bus.emit_player(PlayerEvent::Create {
            guild_id: options.guild_id,
        });
        Ok(player)
    }

    /// Destroy a guild's player. A no-op when none exists.
    pub async fn destroy(&self, guild_id: &GuildId) -> Result<(), PlayerError> {
        let Some(player) = self.get(guild_id) else {
            return Ok(());
        };

        player.destroy().await?;
        self.players.remove(guild_id);
        self.bus.emit_player(PlayerEvent::Destroy {
            guild_id: guild_id.clone(),
        });
        Ok(())
    }
}
