//! Node connections.
//!
//! One [`NodeConnection`] per remote node: a supervised WebSocket with a
//! finite fixed-delay reconnect budget, plus the node's typed REST
//! surface. Player-directed messages are forwarded to the manager's
//! router so one task applies them in arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::SessionId;
use crate::config::{ClientIdentity, NodeConfig, WavelinkOptions};
use crate::driver::{ProtocolDriver, driver_for};
use crate::events::{EventBus, NodeEvent};
use crate::protocol::messages::IncomingMessage;
use crate::protocol::stats::NodeStats;

pub mod registry;
pub mod rest;
pub mod router;

pub use registry::{NodeRegistry, NodeResolver};
pub use rest::Rest;
pub use router::RoutedMessage;

/// Connection lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Closed,
    Connecting,
    Connected,
    Disconnected,
}

enum SessionOutcome {
    /// Self-initiated close; never retried.
    Shutdown,
    /// The connection dropped from the far side or the transport.
    Lost { code: u16, reason: String },
}

pub struct NodeConnection {
    config: NodeConfig,
    driver: Arc<dyn ProtocolDriver>,
    rest: Rest,
    identity: Arc<RwLock<ClientIdentity>>,
    options: Arc<WavelinkOptions>,
    bus: Arc<EventBus>,
    router_tx: flume::Sender<RoutedMessage>,
    state: Mutex<NodeState>,
    session_id: Arc<RwLock<Option<SessionId>>>,
    stats: RwLock<Option<NodeStats>>,
    retries: AtomicU32,
    cancel: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl NodeConnection {
    pub fn new(
        config: NodeConfig,
        identity: Arc<RwLock<ClientIdentity>>,
        options: Arc<WavelinkOptions>,
        bus: Arc<EventBus>,
        router_tx: flume::Sender<RoutedMessage>,
    ) -> Arc<Self> {
        let driver = driver_for(config.driver);

        // A previously persisted session id lets the first handshake
        // request a resume.
        let cached = if options.resume {
            options
                .session_store
                .as_ref()
                .and_then(|store| store.load(&config.host))
        } else {
            None
        };
        let session_id = Arc::new(RwLock::new(cached));

        let rest = Rest::new(
            driver.clone(),
            config.clone(),
            options.user_agent.clone(),
            session_id.clone(),
        );

        Arc::new(Self {
            config,
            driver,
            rest,
            identity,
            options,
            bus,
            router_tx,
            state: Mutex::new(NodeState::Closed),
            session_id,
            stats: RwLock::new(None),
            retries: AtomicU32::new(0),
            cancel: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn driver_id(&self) -> &'static str {
        self.driver.id()
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    pub fn rest(&self) -> &Rest {
        &self.rest
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.read().clone()
    }

    /// Open the connection and keep it alive in a background task. A
    /// no-op when the supervisor is already running.
    pub fn connect(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.retries.store(0, Ordering::SeqCst);
        *self.state.lock() = NodeState::Connecting;

        let token = CancellationToken::new();
        *self.cancel.lock() = token;

        let node = self.clone();
        tokio::spawn(async move {
            node.run().await;
        });
    }

    /// Close the connection for good. Self-initiated, so no retry.
    pub fn disconnect(&self) {
        self.cancel.lock().cancel();
    }

    async fn run(self: Arc<Self>) {
        loop {
            let outcome = self.session().await;

            match outcome {
                SessionOutcome::Shutdown => {
                    info!(node = %self.config.name, "connection closed");
                    *self.state.lock() = NodeState::Closed;
                    self.running.store(false, Ordering::SeqCst);
                    self.bus.emit_node(NodeEvent::Closed {
                        name: self.config.name.clone(),
                    });
                    return;
                }
                SessionOutcome::Lost { code, reason } => {
                    *self.state.lock() = NodeState::Disconnected;
                    self.bus.emit_node(NodeEvent::Disconnect {
                        name: self.config.name.clone(),
                        code,
                        reason,
                    });

                    let attempt = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt > self.options.retry_count {
                        warn!(
                            node = %self.config.name,
                            attempts = attempt - 1,
                            "retry budget exhausted, closing"
                        );
                        *self.state.lock() = NodeState::Closed;
                        self.running.store(false, Ordering::SeqCst);
                        self.bus.emit_node(NodeEvent::Closed {
                            name: self.config.name.clone(),
                        });
                        return;
                    }

                    debug!(
                        node = %self.config.name,
                        attempt,
                        delay = ?self.options.retry_timeout,
                        "reconnecting"
                    );
                    let cancel = self.cancel.lock().clone();
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            *self.state.lock() = NodeState::Closed;
                            self.running.store(false, Ordering::SeqCst);
                            self.bus.emit_node(NodeEvent::Closed {
                                name: self.config.name.clone(),
                            });
                            return;
                        }
                        _ = tokio::time::sleep(self.options.retry_timeout) => {}
                    }
                    *self.state.lock() = NodeState::Connecting;
                }
            }
        }
    }

    /// One connect-to-close cycle.
    async fn session(self: &Arc<Self>) -> SessionOutcome {
        let url = self.driver.ws_url(&self.config);
        debug!(node = %self.config.name, %url, "connecting");

        let mut request = match url.clone().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                self.bus.emit_node(NodeEvent::Error {
                    name: self.config.name.clone(),
                    message: e.to_string(),
                });
                return SessionOutcome::Lost {
                    code: 1006,
                    reason: format!("bad url: {e}"),
                };
            }
        };

        let session_id = self.session_id.read().clone();
        let resume_id = if self.options.resume {
            session_id.as_deref().map(str::to_string)
        } else {
            None
        };
        let identity = self.identity.read().clone();
        let headers = self.driver.connect_headers(
            &self.config,
            &identity,
            &self.options.user_agent,
            resume_id.as_deref(),
        );
        for (name, value) in headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(&value) else {
                continue;
            };
            request.headers_mut().insert(name, value);
        }

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                warn!(node = %self.config.name, "connect failed: {e}");
                self.bus.emit_node(NodeEvent::Error {
                    name: self.config.name.clone(),
                    message: e.to_string(),
                });
                return SessionOutcome::Lost {
                    code: 1006,
                    reason: e.to_string(),
                };
            }
        };

        info!(node = %self.config.name, driver = self.driver.id(), "connected");
        *self.state.lock() = NodeState::Connected;
        self.retries.store(0, Ordering::SeqCst);
        self.bus.emit_node(NodeEvent::Connect {
            name: self.config.name.clone(),
        });

        let (mut write, mut read) = ws_stream.split();
        let cancel = self.cancel.lock().clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionOutcome::Shutdown;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!(node = %self.config.name, "read error: {e}");
                            self.bus.emit_node(NodeEvent::Error {
                                name: self.config.name.clone(),
                                message: e.to_string(),
                            });
                            return SessionOutcome::Lost {
                                code: 1006,
                                reason: e.to_string(),
                            };
                        }
                        None => {
                            return SessionOutcome::Lost {
                                code: 1000,
                                reason: "stream ended".into(),
                            };
                        }
                    };

                    match msg {
                        Message::Text(text) => self.handle_text(text.as_str()),
                        Message::Close(frame) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000u16, "no reason".into()));
                            info!(
                                node = %self.config.name,
                                code, reason,
                                "closed by remote"
                            );
                            return SessionOutcome::Lost { code, reason };
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_text(self: &Arc<Self>, text: &str) {
        let message = match self.driver.normalize_ws_message(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(node = %self.config.name, "unparseable frame: {e}");
                return;
            }
        };

        match message {
            IncomingMessage::Ready {
                resumed,
                session_id,
            } => self.handle_ready(resumed, session_id),
            IncomingMessage::Stats { stats } => {
                *self.stats.write() = Some(stats.clone());
                self.bus.emit_node(NodeEvent::Stats {
                    name: self.config.name.clone(),
                    stats,
                });
            }
            message @ (IncomingMessage::PlayerUpdate { .. } | IncomingMessage::Event { .. }) => {
                let _ = self.router_tx.send(RoutedMessage {
                    node: self.config.name.clone(),
                    message,
                });
            }
        }
    }

    fn handle_ready(self: &Arc<Self>, resumed: bool, session_id: SessionId) {
        info!(node = %self.config.name, resumed, "session ready");
        *self.session_id.write() = Some(session_id.clone());

        if self.options.resume {
            if let Some(store) = &self.options.session_store {
                store.save(&self.config.host, &session_id);
            }

            // Configure node-side resume off the read loop.
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node
                    .rest
                    .update_session(true, node.options.resume_timeout_secs)
                    .await
                {
                    warn!(node = %node.config.name, "resume configuration failed: {e}");
                }
            });
        }
    }
}

impl Drop for NodeConnection {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverVariant, SessionStore};

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<(String, SessionId)>>,
    }

    impl SessionStore for RecordingStore {
        fn load(&self, _host: &str) -> Option<SessionId> {
            None
        }

        fn save(&self, host: &str, session_id: &SessionId) {
            self.saved
                .lock()
                .push((host.to_string(), session_id.clone()));
        }
    }

    fn node(options: WavelinkOptions) -> Arc<NodeConnection> {
        let (tx, _rx) = flume::unbounded();
        NodeConnection::new(
            NodeConfig {
                name: "main".into(),
                host: "localhost".into(),
                port: 2333,
                auth: "pass".into(),
                secure: false,
                driver: DriverVariant::Lavalink4,
                region: None,
            },
            Arc::new(RwLock::new(ClientIdentity::default())),
            Arc::new(options),
            Arc::new(EventBus::new()),
            tx,
        )
    }

    #[tokio::test]
    async fn ready_persists_session_id_only_when_resuming() {
        let ready = r#"{"op":"ready","resumed":false,"sessionId":"la3kfltkdt0dwpp3"}"#;

        let store = Arc::new(RecordingStore::default());
        let conn = node(WavelinkOptions {
            session_store: Some(store.clone()),
            ..Default::default()
        });
        conn.handle_text(ready);
        assert_eq!(conn.session_id().as_deref(), Some("la3kfltkdt0dwpp3"));
        assert!(store.saved.lock().is_empty());

        let store = Arc::new(RecordingStore::default());
        let conn = node(WavelinkOptions {
            resume: true,
            session_store: Some(store.clone()),
            ..Default::default()
        });
        conn.handle_text(ready);
        let saved = store.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "localhost");
    }
}
