//! Track search and resolution.
//!
//! Turns user queries into node `loadtracks` identifiers: bare text is
//! prefixed with the engine's search scheme, URLs pass through, and the
//! `directSearch=` escape forces a literal identifier. Plugins can claim
//! an engine name and bypass node search entirely.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::common::SearchError;
use crate::config::WavelinkOptions;
use crate::node::{NodeConnection, NodeRegistry};
use crate::player::registry::PlayerMap;
use crate::player::track::{PlayerTrack, pick_best};
use crate::protocol::tracks::{LoadResult, Track};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://\S+$").unwrap());
static DIRECT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"directSearch=(.*)").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResultType {
    Track,
    Playlist,
    Search,
}

/// Outcome of a search, with requester tags already attached.
pub struct SearchResponse {
    pub result_type: SearchResultType,
    pub playlist_name: Option<String>,
    pub tracks: Vec<PlayerTrack>,
}

#[derive(Default, Clone)]
pub struct SearchOptions {
    /// Engine name, e.g. `youtube` or a plugin's name. Falls back to the
    /// configured default.
    pub engine: Option<String>,
    /// Opaque tag copied onto every returned track.
    pub requester: Option<Value>,
    /// Search on a specific node instead of the least-used one.
    pub node: Option<String>,
}

/// A metadata source that answers queries without a node.
#[async_trait]
pub trait SearchPlugin: Send + Sync {
    /// Engine name this plugin claims.
    fn engine(&self) -> &'static str;

    async fn search_direct(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse, SearchError>;
}

pub struct Searcher {
    nodes: Arc<NodeRegistry>,
    options: Arc<WavelinkOptions>,
    players: PlayerMap,
    /// Engine name to node search prefix.
    engines: DashMap<String, String>,
    plugins: DashMap<String, Arc<dyn SearchPlugin>>,
}

impl Searcher {
    pub fn new(nodes: Arc<NodeRegistry>, options: Arc<WavelinkOptions>, players: PlayerMap) -> Self {
        let engines = DashMap::new();
        engines.insert("youtube".to_string(), "yt".to_string());
        engines.insert("youtubeMusic".to_string(), "ytm".to_string());
        engines.insert("soundcloud".to_string(), "sc".to_string());
        Self {
            nodes,
            options,
            players,
            engines,
            plugins: DashMap::new(),
        }
    }

    /// Register an extra engine prefix, e.g. `spotify` -> `sp`.
    pub fn register_engine(&self, name: impl Into<String>, prefix: impl Into<String>) {
        self.engines.insert(name.into(), prefix.into());
    }

    pub fn register_plugin(&self, plugin: Arc<dyn SearchPlugin>) {
        self.plugins.insert(plugin.engine().to_string(), plugin);
    }

    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<SearchResponse, SearchError> {
        let engine = options
            .engine
            .clone()
            .unwrap_or_else(|| self.options.default_search_engine.clone());

        if let Some(plugin) = self.plugins.get(&engine) {
            let plugin = plugin.value().clone();
            return plugin.search_direct(query, &options).await;
        }

        let node = self.pick_node(options.node.as_deref()).await?;
        let identifier = self.build_identifier(query, &engine);
        debug!(node = node.name(), %identifier, "searching");

        let result = node.rest().load_tracks(&identifier).await?;
        Ok(build_response(result, options.requester))
    }

    /// Fill in the encoded blob for an entry queued without one, using
    /// the configured engines plus the author/title/duration heuristics.
    pub async fn resolve(&self, entry: &PlayerTrack) -> Result<Track, SearchError> {
        let author = entry.author();
        let title = entry.title();
        let query: String = [author, title]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" - ");
        if query.is_empty() {
            return Err(SearchError::NoResults);
        }

        let mut response = self.search(&query, SearchOptions::default()).await?;
        if response.tracks.is_empty() {
            if let Some(fallback) = self.options.search_fallback_engine.clone() {
                warn!(%query, %fallback, "primary engine found nothing, trying fallback");
                response = self
                    .search(
                        &query,
                        SearchOptions {
                            engine: Some(fallback),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        let candidates: Vec<Track> = response
            .tracks
            .into_iter()
            .map(|entry| entry.track)
            .collect();
        let duration = (entry.length() > 0).then(|| entry.length());
        pick_best(&candidates, author, title, duration)
            .cloned()
            .ok_or(SearchError::NoResults)
    }

    async fn pick_node(&self, name: Option<&str>) -> Result<Arc<NodeConnection>, SearchError> {
        match name {
            Some(name) => Ok(self.nodes.get(name)?),
            None => {
                let players = self.players.clone();
                Ok(self
                    .nodes
                    .best(None, self.options.node_resolver.as_ref(), move |guild| {
                        players.contains_key(guild)
                    })
                    .await?)
            }
        }
    }

    fn build_identifier(&self, query: &str, engine: &str) -> String {
        if let Some(caps) = DIRECT_PATTERN.captures(query) {
            return caps[1].to_string();
        }
        if URL_PATTERN.is_match(query) {
            return query.to_string();
        }
        let prefix = self
            .engines
            .get(engine)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| "yt".to_string());
        format!("{prefix}search:{query}")
    }
}

fn build_response(result: LoadResult, requester: Option<Value>) -> SearchResponse {
    let tag = |track: Track| PlayerTrack::resolved(track, requester.clone());

    match result {
        LoadResult::Track(track) => SearchResponse {
            result_type: SearchResultType::Track,
            playlist_name: None,
            tracks: vec![tag(track)],
        },
        LoadResult::Playlist(playlist) => SearchResponse {
            result_type: SearchResultType::Playlist,
            playlist_name: Some(playlist.info.name),
            tracks: playlist.tracks.into_iter().map(tag).collect(),
        },
        LoadResult::Search(tracks) => SearchResponse {
            result_type: SearchResultType::Search,
            playlist_name: None,
            tracks: tracks.into_iter().map(tag).collect(),
        },
        LoadResult::Empty {} => SearchResponse {
            result_type: SearchResultType::Search,
            playlist_name: None,
            tracks: Vec::new(),
        },
        LoadResult::Error(error) => {
            warn!(message = %error.message, "track load failed");
            SearchResponse {
                result_type: SearchResultType::Search,
                playlist_name: None,
                tracks: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn searcher() -> Searcher {
        Searcher::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(WavelinkOptions::default()),
            PlayerMap::default(),
        )
    }

    #[test]
    fn bare_text_gets_engine_prefix() {
        let searcher = searcher();
        assert_eq!(
            searcher.build_identifier("never gonna give you up", "youtube"),
            "ytsearch:never gonna give you up"
        );
        assert_eq!(
            searcher.build_identifier("some song", "soundcloud"),
            "scsearch:some song"
        );
    }

    #[test]
    fn urls_pass_through_unchanged() {
        let searcher = searcher();
        let url = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        assert_eq!(searcher.build_identifier(url, "youtube"), url);
    }

    #[test]
    fn direct_search_escape_forces_literal() {
        let searcher = searcher();
        assert_eq!(
            searcher.build_identifier("directSearch=spsearch:abc def", "youtube"),
            "spsearch:abc def"
        );
    }

    #[test]
    fn unknown_engine_falls_back_to_youtube_prefix() {
        let searcher = searcher();
        assert_eq!(
            searcher.build_identifier("hello", "nonsense"),
            "ytsearch:hello"
        );
    }

    #[test]
    fn registered_engines_are_used() {
        let searcher = searcher();
        searcher.register_engine("spotify", "sp");
        assert_eq!(searcher.build_identifier("hello", "spotify"), "spsearch:hello");
    }
}
