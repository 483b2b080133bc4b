use serde_json::Value;

use crate::protocol::tracks::Track;

/// A queue entry: the wire track plus the requester tag the host
/// attached when it was queued.
#[derive(Debug, Clone)]
pub struct PlayerTrack {
    pub track: Track,
    pub requester: Option<Value>,
    /// Playback URI confirmed by a node. Entries from metadata plugins
    /// start without one and get resolved through a node search before
    /// their first play.
    pub resolved_uri: Option<String>,
}

impl PlayerTrack {
    /// An unresolved entry, as produced by metadata plugins.
    pub fn new(track: Track, requester: Option<Value>) -> Self {
        Self {
            track,
            requester,
            resolved_uri: None,
        }
    }

    /// An entry loaded straight from a node, already playable.
    pub fn resolved(track: Track, requester: Option<Value>) -> Self {
        let resolved_uri = track.info.uri.clone();
        Self {
            track,
            requester,
            resolved_uri,
        }
    }

    pub fn is_playable(&self) -> bool {
        let info = &self.track.info;
        !self.track.encoded.is_empty()
            && !info.source_name.is_empty()
            && !info.identifier.is_empty()
            && !info.author.is_empty()
            && info.length > 0
            && !info.title.is_empty()
            && info.uri.is_some()
            && self.resolved_uri.is_some()
    }

    pub fn identifier(&self) -> &str {
        &self.track.info.identifier
    }

    pub fn title(&self) -> &str {
        &self.track.info.title
    }

    pub fn author(&self) -> &str {
        &self.track.info.author
    }

    pub fn length(&self) -> u64 {
        self.track.info.length
    }
}

/// Pick the best candidate for a track being re-resolved on another
/// source: an exact author ("X" or "X - Topic") or exact title match
/// first, then anything within two seconds of the original duration,
/// then the first result.
pub fn pick_best<'a>(
    candidates: &'a [Track],
    author: &str,
    title: &str,
    duration: Option<u64>,
) -> Option<&'a Track> {
    if candidates.is_empty() {
        return None;
    }

    if !author.is_empty() {
        let topic = format!("{author} - Topic");
        let official = candidates.iter().find(|track| {
            track.info.author.eq_ignore_ascii_case(author)
                || track.info.author.eq_ignore_ascii_case(&topic)
                || track.info.title.eq_ignore_ascii_case(title)
        });
        if official.is_some() {
            return official;
        }
    }

    if let Some(duration) = duration {
        let close = candidates.iter().find(|track| {
            track.info.length >= duration.saturating_sub(2000)
                && track.info.length <= duration + 2000
        });
        if close.is_some() {
            return close;
        }
    }

    candidates.first()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tracks::TrackInfo;

    fn track(author: &str, title: &str, length: u64) -> Track {
        Track {
            encoded: "blob".into(),
            info: TrackInfo {
                identifier: title.to_lowercase(),
                is_seekable: true,
                author: author.into(),
                length,
                is_stream: false,
                position: 0,
                title: title.into(),
                uri: None,
                artwork_url: None,
                isrc: None,
                source_name: "youtube".into(),
            },
            plugin_info: Value::Null,
        }
    }

    #[test]
    fn prefers_exact_author_including_topic_channels() {
        let candidates = vec![
            track("Covers Inc", "Song (Cover)", 180_000),
            track("Artist - Topic", "Song (Lyrics)", 179_000),
        ];
        let best = pick_best(&candidates, "Artist", "Song", Some(180_000)).unwrap();
        assert_eq!(best.info.author, "Artist - Topic");
    }

    #[test]
    fn exact_title_matches_in_the_first_pass() {
        let candidates = vec![
            track("Covers Inc", "Song", 150_000),
            track("Artist - Topic", "Song (Lyrics)", 179_000),
        ];
        let best = pick_best(&candidates, "Artist", "Song", Some(180_000)).unwrap();
        assert_eq!(best.info.author, "Covers Inc");
    }

    #[test]
    fn falls_back_to_duration_window() {
        let candidates = vec![
            track("Someone", "Song sped up", 150_000),
            track("Else", "Song", 181_500),
        ];
        let best = pick_best(&candidates, "Artist", "Song Title", Some(180_000)).unwrap();
        assert_eq!(best.info.length, 181_500);
    }

    #[test]
    fn falls_back_to_first_result() {
        let candidates = vec![
            track("A", "one", 10_000),
            track("B", "two", 20_000),
        ];
        let best = pick_best(&candidates, "", "", None).unwrap();
        assert_eq!(best.info.title, "one");
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(pick_best(&[], "Artist", "Song", None).is_none());
    }

    #[test]
    fn plugin_entries_need_resolution_first() {
        let mut wire = track("Artist", "Song", 180_000);
        wire.info.uri = Some("https://example.com".into());

        let plugin = PlayerTrack::new(wire.clone(), None);
        assert!(!plugin.is_playable());

        let searched = PlayerTrack::resolved(wire, None);
        assert!(searched.is_playable());
    }
}
