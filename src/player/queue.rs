use std::collections::VecDeque;

use crate::player::track::PlayerTrack;
use crate::protocol::messages::TrackEndReason;

/// Repeat behavior applied when a track ends normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    None,
    /// Replay the track that just ended.
    Song,
    /// Requeue the ended track at the back.
    Queue,
}

/// What the player should do after a track-end was applied.
#[derive(Debug, Clone)]
pub enum EndDisposition {
    /// The track was replaced by an explicit play; nothing to do.
    Replaced,
    /// A new current track is ready to start.
    Advance(PlayerTrack),
    /// Nothing left to play.
    Empty,
}

/// Pending tracks, the current track and the play history for one guild.
/// Purely in-memory; all node I/O stays in the player.
#[derive(Default)]
pub struct Queue {
    pending: VecDeque<PlayerTrack>,
    current: Option<PlayerTrack>,
    history: Vec<PlayerTrack>,
    loop_mode: LoopMode,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, track: PlayerTrack) {
        self.pending.push_back(track);
    }

    pub fn push_front(&mut self, track: PlayerTrack) {
        self.pending.push_front(track);
    }

    pub fn remove(&mut self, index: usize) -> Option<PlayerTrack> {
        self.pending.remove(index)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PlayerTrack> {
        self.pending.iter()
    }

    pub fn current(&self) -> Option<&PlayerTrack> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, track: Option<PlayerTrack>) {
        self.current = track;
    }

    pub fn take_current(&mut self) -> Option<PlayerTrack> {
        self.current.take()
    }

    pub fn history(&self) -> &[PlayerTrack] {
        &self.history
    }

    /// Pop the most recently played track, for a "previous" jump.
    pub fn pop_history(&mut self) -> Option<PlayerTrack> {
        self.history.pop()
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    /// Pop the next pending track into `current`.
    pub fn advance(&mut self) -> Option<PlayerTrack> {
        self.current = self.pending.pop_front();
        self.current.clone()
    }

    /// Apply a track-end to the queue and report what comes next.
    ///
    /// A replaced track belongs to the play that replaced it, so the
    /// queue is untouched. Failure reasons never requeue, whatever the
    /// loop mode; normal ends honor it. The ended track always lands in
    /// history.
    pub fn on_track_end(&mut self, reason: TrackEndReason) -> EndDisposition {
        if reason == TrackEndReason::Replaced {
            return EndDisposition::Replaced;
        }

        let ended = self.current.take();

        if let Some(ended) = &ended {
            if matches!(reason, TrackEndReason::Finished | TrackEndReason::Stopped) {
                match self.loop_mode {
                    LoopMode::Song => self.pending.push_front(ended.clone()),
                    LoopMode::Queue => self.pending.push_back(ended.clone()),
                    LoopMode::None => {}
                }
            }
            self.history.push(ended.clone());
        }

        match self.advance() {
            Some(next) => EndDisposition::Advance(next),
            None => EndDisposition::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::tracks::{Track, TrackInfo};

    fn entry(title: &str) -> PlayerTrack {
        PlayerTrack::new(
            Track {
                encoded: format!("blob-{title}"),
                info: TrackInfo {
                    identifier: title.into(),
                    is_seekable: true,
                    author: "author".into(),
                    length: 1000,
                    is_stream: false,
                    position: 0,
                    title: title.into(),
                    uri: None,
                    artwork_url: None,
                    isrc: None,
                    source_name: "youtube".into(),
                },
                plugin_info: serde_json::Value::Null,
            },
            None,
        )
    }

    fn playing(titles: &[&str]) -> Queue {
        let mut queue = Queue::new();
        for title in titles {
            queue.push(entry(title));
        }
        queue.advance();
        queue
    }

    #[test]
    fn finished_advances_and_records_history() {
        let mut queue = playing(&["a", "b"]);

        match queue.on_track_end(TrackEndReason::Finished) {
            EndDisposition::Advance(next) => assert_eq!(next.title(), "b"),
            other => panic!("expected advance, got {other:?}"),
        }
        assert_eq!(queue.history().len(), 1);
        assert_eq!(queue.history()[0].title(), "a");
    }

    #[test]
    fn finished_with_empty_queue_reports_empty() {
        let mut queue = playing(&["a"]);
        assert!(matches!(
            queue.on_track_end(TrackEndReason::Finished),
            EndDisposition::Empty
        ));
        assert!(queue.current().is_none());
    }

    #[test]
    fn song_loop_replays_the_same_track() {
        let mut queue = playing(&["a", "b"]);
        queue.set_loop_mode(LoopMode::Song);

        match queue.on_track_end(TrackEndReason::Finished) {
            EndDisposition::Advance(next) => assert_eq!(next.title(), "a"),
            other => panic!("expected advance, got {other:?}"),
        }
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_loop_requeues_at_the_back() {
        let mut queue = playing(&["a", "b"]);
        queue.set_loop_mode(LoopMode::Queue);

        match queue.on_track_end(TrackEndReason::Stopped) {
            EndDisposition::Advance(next) => assert_eq!(next.title(), "b"),
            other => panic!("expected advance, got {other:?}"),
        }
        let pending: Vec<&str> = queue.pending().map(|t| t.title()).collect();
        assert_eq!(pending, ["a"]);
    }

    #[test]
    fn load_failed_never_requeues_even_when_looping() {
        let mut queue = playing(&["a", "b"]);
        queue.set_loop_mode(LoopMode::Song);

        match queue.on_track_end(TrackEndReason::LoadFailed) {
            EndDisposition::Advance(next) => assert_eq!(next.title(), "b"),
            other => panic!("expected advance, got {other:?}"),
        }
        assert_eq!(queue.history().len(), 1);
        assert_eq!(queue.history()[0].title(), "a");
    }

    #[test]
    fn cleanup_behaves_like_load_failed() {
        let mut queue = playing(&["a"]);
        queue.set_loop_mode(LoopMode::Queue);

        assert!(matches!(
            queue.on_track_end(TrackEndReason::Cleanup),
            EndDisposition::Empty
        ));
        assert_eq!(queue.history().len(), 1);
    }

    #[test]
    fn replaced_leaves_the_queue_alone() {
        let mut queue = playing(&["a", "b"]);

        assert!(matches!(
            queue.on_track_end(TrackEndReason::Replaced),
            EndDisposition::Replaced
        ));
        assert_eq!(queue.current().unwrap().title(), "a");
        assert_eq!(queue.len(), 1);
        assert!(queue.history().is_empty());
    }
}
