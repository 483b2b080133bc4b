//! Client entry point.
//!
//! [`Wavelink`] wires everything together: the node registry, the guild
//! player registry, the search layer and the event bus. The host hands
//! it a [`SignalingAdapter`] and forwards the two voice dispatches from
//! its gateway; everything else happens internally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::common::{GuildId, NodeError, PlayerError, SearchError};
use crate::config::{ClientIdentity, NodeConfig, WavelinkOptions};
use crate::events::{EventBus, NodeEvent, PlayerEvent};
use crate::node::{NodeConnection, NodeRegistry, RoutedMessage, router};
use crate::player::{Player, PlayerMap, PlayerOptions, PlayerRegistry};
use crate::protocol::rest::UpdatePlayer;
use crate::search::{SearchOptions, SearchResponse, Searcher};
use crate::voice::{SignalingAdapter, VoiceServerUpdate, VoiceStateUpdate};

pub struct Wavelink {
    options: Arc<WavelinkOptions>,
    identity: Arc<RwLock<ClientIdentity>>,
    nodes: Arc<NodeRegistry>,
    players: PlayerRegistry,
    player_map: PlayerMap,
    bus: Arc<EventBus>,
    searcher: Arc<Searcher>,
    router_tx: flume::Sender<RoutedMessage>,
    router_rx: flume::Receiver<RoutedMessage>,
    started: AtomicBool,
}

impl Wavelink {
    pub fn new(options: WavelinkOptions, adapter: Arc<dyn SignalingAdapter>) -> Arc<Self> {
        let options = Arc::new(options);
        let bus = Arc::new(EventBus::new());
        let nodes = Arc::new(NodeRegistry::new());
        let player_map = PlayerMap::default();
        let searcher = Arc::new(Searcher::new(
            nodes.clone(),
            options.clone(),
            player_map.clone(),
        ));
        let players = PlayerRegistry::new(
            player_map.clone(),
            nodes.clone(),
            options.clone(),
            bus.clone(),
            searcher.clone(),
            adapter,
        );
        let (router_tx, router_rx) = flume::unbounded();

        Arc::new(Self {
            options,
            identity: Arc::new(RwLock::new(ClientIdentity::default())),
            nodes,
            players,
            player_map,
            bus,
            searcher,
            router_tx,
            router_rx,
            started: AtomicBool::new(false),
        })
    }

    /// Start the client once the host gateway has identified: spawns the
    /// event router and connects every configured node.
    pub async fn start(&self, user_id: impl Into<String>, shard_count: u32) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut identity = self.identity.write();
            identity.user_id = user_id.into();
            identity.shard_count = shard_count.max(1);
        }

        router::spawn(self.router_rx.clone(), self.player_map.clone());

        for config in self.options.nodes.clone() {
            self.add_node(config);
        }
        info!(nodes = self.nodes.len(), "client started");
    }

    /// Register and connect one more node at runtime.
    pub fn add_node(&self, config: NodeConfig) {
        let node = NodeConnection::new(
            config,
            self.identity.clone(),
            self.options.clone(),
            self.bus.clone(),
            self.router_tx.clone(),
        );
        self.nodes.add(node);
    }

    pub fn remove_node(&self, name: &str) -> Result<(), NodeError> {
        self.nodes.remove(name)
    }

    pub fn node(&self, name: &str) -> Result<Arc<NodeConnection>, NodeError> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn searcher(&self) -> &Arc<Searcher> {
        &self.searcher
    }

    pub fn player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.players.get(guild_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub async fn create_player(&self, options: PlayerOptions) -> Result<Arc<Player>, PlayerError> {
        self.players.create(options).await
    }

    pub async fn destroy_player(&self, guild_id: &GuildId) -> Result<(), PlayerError> {
        self.players.destroy(guild_id).await
    }

    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        self.searcher.search(query, options).await
    }

    pub fn on_node_events(&self) -> flume::Receiver<NodeEvent> {
        self.bus.subscribe_nodes()
    }

    pub fn on_player_events(&self) -> flume::Receiver<PlayerEvent> {
        self.bus.subscribe_players()
    }

    /// Route a raw gateway dispatch. Only the two voice dispatches are
    /// acted on; everything else is ignored.
    pub async fn handle_gateway_dispatch(&self, event_type: &str, data: Value) {
        match event_type {
            "VOICE_SERVER_UPDATE" => match serde_json::from_value(data) {
                Ok(update) => self.handle_voice_server_update(update).await,
                Err(e) => debug!("bad voice server update: {e}"),
            },
            "VOICE_STATE_UPDATE" => match serde_json::from_value(data) {
                Ok(update) => self.handle_voice_state_update(update).await,
                Err(e) => debug!("bad voice state update: {e}"),
            },
            _ => {}
        }
    }

    pub async fn handle_voice_server_update(&self, update: VoiceServerUpdate) {
        let Some(player) = self.players.get(&update.guild_id) else {
            // A create may be mid-handshake for this guild.
            if let Some(voice) = self.players.pending_voice(&update.guild_id) {
                voice.handle_server_update(update);
            } else {
                debug!(guild = %update.guild_id, "voice server update without player");
            }
            return;
        };
        player.voice().handle_server_update(update);
        self.push_voice_credential(&player).await;
    }

    pub async fn handle_voice_state_update(&self, update: VoiceStateUpdate) {
        let Some(player) = self.players.get(&update.guild_id) else {
            if let Some(voice) = self.players.pending_voice(&update.guild_id) {
                voice.handle_state_update(update);
            } else {
                debug!(guild = %update.guild_id, "voice state update without player");
            }
            return;
        };
        player.voice().handle_state_update(update);
        self.push_voice_credential(&player).await;
    }

    /// Re-send the credential after a completed handshake, so a voice
    /// server move mid-session reaches the node.
    async fn push_voice_credential(&self, player: &Arc<Player>) {
        use crate::voice::VoiceState;

        if player.voice().state() != VoiceState::Connected {
            return;
        }
        let Some(credential) = player.voice().credential() else {
            return;
        };
        let update = UpdatePlayer {
            voice: Some(credential),
            ..Default::default()
        };
        if let Err(e) = player
            .node()
            .rest()
            .update_player(player.guild_id(), false, &update)
            .await
        {
            warn!(guild = %player.guild_id(), "voice credential push failed: {e}");
        }
    }
}
