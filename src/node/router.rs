use tokio::task::JoinHandle;
use tracing::debug;

use crate::player::PlayerMap;
use crate::protocol::messages::IncomingMessage;

/// A player-directed message, tagged with the node it came from. Every
/// connection forwards into one channel so a single task applies events
/// in arrival order.
pub struct RoutedMessage {
    pub node: String,
    pub message: IncomingMessage,
}

pub(crate) fn spawn(rx: flume::Receiver<RoutedMessage>, players: PlayerMap) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(routed) = rx.recv_async().await {
            match routed.message {
                IncomingMessage::PlayerUpdate { guild_id, state } => {
                    let Some(player) = players.get(&guild_id).map(|e| e.value().clone()) else {
                        debug!(node = %routed.node, guild = %guild_id, "update for unknown player");
                        continue;
                    };
                    player.handle_update(state);
                }
                IncomingMessage::Event { event } => {
                    let guild_id = event.guild_id().clone();
                    let Some(player) = players.get(&guild_id).map(|e| e.value().clone()) else {
                        debug!(node = %routed.node, guild = %guild_id, "event for unknown player");
                        continue;
                    };
                    player.handle_event(event).await;
                }
                // ready and stats are handled inside the connection.
                _ => {}
            }
        }
    })
}
