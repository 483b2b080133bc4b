use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::common::{GuildId, NodeError};
use crate::node::{NodeConnection, NodeState};

/// Caller-supplied override for node selection. When set it replaces the
/// least-used strategy entirely.
pub type NodeResolver = Box<
    dyn Fn(Vec<Arc<NodeConnection>>) -> BoxFuture<'static, Option<Arc<NodeConnection>>>
        + Send
        + Sync,
>;

/// All known nodes, keyed by name. Iteration order is insertion order so
/// selection ties break deterministically.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<NodeConnection>>,
    order: RwLock<Vec<String>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and open its connection.
    pub fn add(&self, node: Arc<NodeConnection>) {
        let name = node.name().to_string();
        node.connect();
        if self.nodes.insert(name.clone(), node).is_none() {
            self.order.write().push(name);
        }
    }

    /// Disconnect and forget a node.
    pub fn remove(&self, name: &str) -> Result<(), NodeError> {
        let (_, node) = self
            .nodes
            .remove(name)
            .ok_or_else(|| NodeError::UnknownNode(name.to_string()))?;
        node.disconnect();
        self.order.write().retain(|n| n != name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<NodeConnection>, NodeError> {
        self.nodes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| NodeError::UnknownNode(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node, in registration order.
    pub fn all(&self) -> Vec<Arc<NodeConnection>> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.nodes.get(name).map(|entry| entry.value().clone()))
            .collect()
    }

    pub fn connected(&self) -> Vec<Arc<NodeConnection>> {
        self.all()
            .into_iter()
            .filter(|node| node.state() == NodeState::Connected)
            .collect()
    }

    /// Pick the connected node carrying the fewest of our players,
    /// preferring one declared for `region` when available. `is_tracked`
    /// filters remote players down to guilds this client manages.
    pub async fn best(
        &self,
        region: Option<&str>,
        resolver: Option<&NodeResolver>,
        is_tracked: impl Fn(&GuildId) -> bool,
    ) -> Result<Arc<NodeConnection>, NodeError> {
        if let Some(resolver) = resolver {
            return resolver(self.all()).await.ok_or(NodeError::NoNodesOnline);
        }

        let connected = self.connected();
        if connected.is_empty() {
            return Err(NodeError::NoNodesOnline);
        }

        if let Some(region) = region {
            let regional: Vec<Arc<NodeConnection>> = connected
                .iter()
                .filter(|node| {
                    node.config()
                        .region
                        .as_deref()
                        .is_some_and(|r| r.eq_ignore_ascii_case(region))
                })
                .cloned()
                .collect();
            if !regional.is_empty() {
                debug!(%region, candidates = regional.len(), "using regional nodes");
                return self.least_used(regional, &is_tracked).await;
            }
        }

        self.least_used(connected, &is_tracked).await
    }

    async fn least_used(
        &self,
        candidates: Vec<Arc<NodeConnection>>,
        is_tracked: &impl Fn(&GuildId) -> bool,
    ) -> Result<Arc<NodeConnection>, NodeError> {
        let mut usable = Vec::new();
        let mut counts = Vec::new();

        for node in candidates {
            match node.rest().get_players().await {
                Ok(players) => {
                    let count = players
                        .iter()
                        .filter(|player| is_tracked(&player.guild_id))
                        .count();
                    usable.push(node);
                    counts.push(count);
                }
                Err(e) => {
                    warn!(node = node.name(), "player count failed, skipping: {e}");
                }
            }
        }

        match index_of_first_min(&counts) {
            Some(index) => Ok(usable.swap_remove(index)),
            None => Err(NodeError::NoNodesOnline),
        }
    }
}

/// Index of the smallest value; the earliest wins a tie.
fn index_of_first_min(counts: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, &count) in counts.iter().enumerate() {
        match best {
            Some((_, min)) if count >= min => {}
            _ => best = Some((index, count)),
        }
    }
    best.map(|(index, _)| index)
}
