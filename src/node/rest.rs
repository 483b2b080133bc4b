use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::common::{GuildId, RestError, SessionId};
use crate::config::NodeConfig;
use crate::driver::{HttpContext, ProtocolDriver, RestRequest};
use crate::protocol::rest::{RemotePlayer, UpdatePlayer};
use crate::protocol::tracks::{LoadResult, Track};

/// Typed REST surface of one node. Thin wrapper that builds canonical
/// requests and hands them to the driver for wire-level translation.
pub struct Rest {
    client: reqwest::Client,
    driver: Arc<dyn ProtocolDriver>,
    config: NodeConfig,
    user_agent: String,
    session_id: Arc<RwLock<Option<SessionId>>>,
}

impl Rest {
    pub fn new(
        driver: Arc<dyn ProtocolDriver>,
        config: NodeConfig,
        user_agent: String,
        session_id: Arc<RwLock<Option<SessionId>>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            driver,
            config,
            user_agent,
            session_id,
        }
    }

    fn context(&self) -> HttpContext<'_> {
        HttpContext {
            client: &self.client,
            config: &self.config,
            user_agent: &self.user_agent,
            session_id: self.session_id.read().clone(),
        }
    }

    fn session(&self) -> Result<SessionId, RestError> {
        self.session_id.read().clone().ok_or(RestError::NoSessionId)
    }

    /// All players the node currently holds for this session.
    pub async fn get_players(&self) -> Result<Vec<RemotePlayer>, RestError> {
        let session = self.session()?;
        let req = RestRequest::get(format!("/sessions/{session}/players"));
        match self.driver.request(&self.context(), req).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn update_player(
        &self,
        guild_id: &GuildId,
        no_replace: bool,
        update: &UpdatePlayer,
    ) -> Result<Option<RemotePlayer>, RestError> {
        let session = self.session()?;
        let req = RestRequest::patch(
            format!("/sessions/{session}/players/{guild_id}"),
            serde_json::to_value(update)?,
        )
        .param("noReplace", no_replace.to_string());
        match self.driver.request(&self.context(), req).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn destroy_player(&self, guild_id: &GuildId) -> Result<(), RestError> {
        let session = self.session()?;
        let req = RestRequest::delete(format!("/sessions/{session}/players/{guild_id}"));
        self.driver.request(&self.context(), req).await?;
        Ok(())
    }

    pub async fn update_session(
        &self,
        resuming: bool,
        timeout_secs: u64,
    ) -> Result<(), RestError> {
        let session = self.session()?;
        self.driver
            .update_session(&self.context(), &session, resuming, timeout_secs)
            .await
    }

    /// Resolve an identifier (URL or `<engine>search:<query>`).
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, RestError> {
        let req = RestRequest::get("/loadtracks").param("identifier", identifier);
        match self.driver.request(&self.context(), req).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(LoadResult::Empty {}),
        }
    }

    /// Decode a blob, client-side where the driver supports it.
    pub async fn decode_track(&self, encoded: &str) -> Result<Option<Track>, RestError> {
        if let Some(track) = self.driver.decode_track(encoded) {
            return Ok(Some(track));
        }
        let req = RestRequest::get("/decodetrack").param("encodedTrack", encoded);
        match self.driver.request(&self.context(), req).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Variant-specific capabilities, e.g. NodeLink lyrics.
    pub fn functions(&self) -> &'static [&'static str] {
        self.driver.functions()
    }

    pub async fn call(&self, name: &str, args: Value) -> Result<Option<Value>, RestError> {
        self.driver.call(&self.context(), name, args).await
    }
}
