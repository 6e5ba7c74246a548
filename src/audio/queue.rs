use std::collections::VecDeque;
use tracing::{debug, info};

use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::{Track, TrackSummary},
};

/// Pending tracks of one room, strictly FIFO.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Appends a track at the back.
    pub fn add_track(&mut self, track: Track) -> PlaybackResult<()> {
        if self.items.len() >= self.max_size {
            return Err(PlaybackError::QueueFull(self.max_size));
        }

        info!("➕ Added to queue: {}", track.title());
        self.items.push_back(track);
        Ok(())
    }

    /// Takes the head of the queue.
    pub fn next_track(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Next in queue: {}", track.title()),
            None => debug!("📭 Queue empty"),
        }
        next
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        if dropped > 0 {
            info!("🗑️ Cleared {} queued tracks", dropped);
        }
        dropped
    }

    pub fn summaries(&self) -> Vec<TrackSummary> {
        self.items.iter().map(Track::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_support::track;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_enqueue_order() {
        let mut queue = TrackQueue::new(10);
        for i in 0..5 {
            queue.add_track(track(&format!("id{}", i), &format!("Song {}", i), 60)).unwrap();
        }

        assert_eq!(queue.len(), 5);
        let titles: Vec<String> = queue.summaries().into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["Song 0", "Song 1", "Song 2", "Song 3", "Song 4"]);

        assert_eq!(queue.next_track().unwrap().title(), "Song 0");
        assert_eq!(queue.next_track().unwrap().title(), "Song 1");
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn rejects_tracks_beyond_capacity() {
        let mut queue = TrackQueue::new(2);
        queue.add_track(track("a", "A", 1)).unwrap();
        queue.add_track(track("b", "B", 1)).unwrap();

        assert!(matches!(
            queue.add_track(track("c", "C", 1)),
            Err(PlaybackError::QueueFull(2))
        ));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn clear_empties_queue() {
        let mut queue = TrackQueue::new(5);
        queue.add_track(track("a", "A", 225)).unwrap();
        queue.add_track(track("b", "B", 15)).unwrap();

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.next_track().is_none());
    }
}
