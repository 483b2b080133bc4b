//! Client library for Lavalink-family audio nodes.
//!
//! Speaks four related wire protocols (Lavalink v3/v4, NodeLink v2,
//! FrequenC v1) behind one driver abstraction, supervises node
//! WebSockets with finite fixed-delay reconnects, runs the per-guild
//! voice handshake, and drives queue-backed players from server events.
//!
//! The host owns the Discord gateway. It hands [`Wavelink`] a
//! [`voice::SignalingAdapter`] for outbound voice intents and forwards
//! `VOICE_SERVER_UPDATE` / `VOICE_STATE_UPDATE` dispatches back in:
//!
//! ```no_run
//! use std::sync::Arc;
//! use wavelink::{NodeConfig, Wavelink, WavelinkOptions};
//! # use wavelink::voice::SignalingAdapter;
//! # async fn example(adapter: Arc<dyn SignalingAdapter>) {
//! let options = WavelinkOptions {
//!     nodes: vec![NodeConfig {
//!         name: "main".into(),
//!         host: "localhost".into(),
//!         port: 2333,
//!         auth: "youshallnotpass".into(),
//!         secure: false,
//!         driver: Default::default(),
//!         region: None,
//!     }],
//!     ..Default::default()
//! };
//! let client = Wavelink::new(options, adapter);
//! client.start("1234567890", 1).await;
//! # }
//! ```

pub mod common;
pub mod config;
pub mod driver;
pub mod events;
pub mod manager;
pub mod node;
pub mod player;
pub mod protocol;
pub mod search;
pub mod voice;

pub use common::{GuildId, NodeError, PlayerError, RestError, SearchError, SessionId, VoiceError};
pub use config::{ClientIdentity, DriverVariant, NodeConfig, SessionStore, WavelinkOptions};
pub use events::{EventBus, NodeEvent, PlayerEvent};
pub use manager::Wavelink;
pub use node::{NodeConnection, NodeRegistry, NodeState};
pub use player::{LoopMode, Player, PlayerOptions, PlayerTrack};
pub use protocol::tracks::{LoadResult, Track, TrackInfo};
pub use search::{SearchOptions, SearchPlugin, SearchResponse, SearchResultType, Searcher};
pub use voice::{SignalingAdapter, VoiceServerUpdate, VoiceSession, VoiceStateUpdate};
