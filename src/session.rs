//! One item's playback attempt.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::catalog::MediaItem;
use crate::engine::PlaybackState;
use crate::overlay;

#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub id: Uuid,
    pub item: MediaItem,
    /// Position of `item` in the catalog when it was loaded.
    pub index: usize,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub duration: Option<Duration>,
    pub at_end: bool,
    /// Polls in a row that failed for item-level reasons.
    pub consecutive_errors: u32,
    /// The engine has reported the file as playing or paused at least once.
    pub seen_running: bool,
    overlay_enabled: bool,
    last_overlay: Option<String>,
}

impl PlaybackSession {
    pub fn new(item: MediaItem, index: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            item,
            index,
            started_at: Instant::now(),
            elapsed: Duration::ZERO,
            duration: None,
            at_end: false,
            consecutive_errors: 0,
            seen_running: false,
            overlay_enabled: true,
            last_overlay: None,
        }
    }

    /// Fold one poll into the session. Returns true the first time the
    /// engine reports the file running.
    pub fn apply(&mut self, state: &PlaybackState) -> bool {
        self.consecutive_errors = 0;
        self.elapsed = state.elapsed;
        if state.duration.is_some() {
            self.duration = state.duration;
        }
        let first_run = !self.seen_running && state.media.is_running();
        self.seen_running |= state.media.is_running();
        // Before the file has started, "stopped" only means "not yet playing".
        self.at_end = self.seen_running && state.at_end();
        first_run
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn overlay_text(&self) -> String {
        overlay::format(
            &self.item.title,
            self.elapsed.as_secs(),
            self.duration.map(|d| d.as_secs()),
        )
    }

    /// Overlay text to push, or `None` if it has not changed since the last
    /// confirmed update (or overlay updates are disabled for this session).
    pub fn pending_overlay(&self) -> Option<String> {
        if !self.overlay_enabled {
            return None;
        }
        let text = self.overlay_text();
        if self.last_overlay.as_deref() == Some(text.as_str()) {
            return None;
        }
        Some(text)
    }

    pub fn overlay_sent(&mut self, text: String) {
        self.last_overlay = Some(text);
    }

    pub fn disable_overlay(&mut self) {
        self.overlay_enabled = false;
    }

    pub fn overlay_enabled(&self) -> bool {
        self.overlay_enabled
    }

    pub fn last_overlay(&self) -> Option<&str> {
        self.last_overlay.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MediaState;
    use std::path::PathBuf;

    fn session() -> PlaybackSession {
        PlaybackSession::new(MediaItem::from_path(PathBuf::from("/v/Show S01E03.mkv")), 0)
    }

    fn poll(media: MediaState, elapsed: u64, duration: Option<u64>) -> PlaybackState {
        PlaybackState {
            elapsed: Duration::from_secs(elapsed),
            duration: duration.map(Duration::from_secs),
            media,
        }
    }

    #[test]
    fn stopped_before_start_is_not_the_end() {
        let mut s = session();
        assert!(!s.apply(&poll(MediaState::Stopped, 0, None)));
        assert!(!s.at_end);

        assert!(s.apply(&poll(MediaState::Playing, 1, Some(1344))));
        assert!(!s.apply(&poll(MediaState::Playing, 2, Some(1344))));
        s.apply(&poll(MediaState::Ended, 1344, Some(1344)));
        assert!(s.at_end);
    }

    #[test]
    fn duration_is_kept_once_known() {
        let mut s = session();
        s.apply(&poll(MediaState::Playing, 84, Some(1344)));
        s.apply(&poll(MediaState::Playing, 85, None));
        assert_eq!(s.duration, Some(Duration::from_secs(1344)));
        assert_eq!(s.overlay_text(), "S01E03 01:25/22:24");
    }

    #[test]
    fn overlay_updates_are_deduplicated() {
        let mut s = session();
        let first = s.pending_overlay().unwrap();
        assert_eq!(first, "S01E03");
        s.overlay_sent(first);
        assert!(s.pending_overlay().is_none());

        s.apply(&poll(MediaState::Playing, 1, Some(60)));
        assert_eq!(s.pending_overlay().as_deref(), Some("S01E03 00:01/01:00"));

        s.disable_overlay();
        assert!(s.pending_overlay().is_none());
    }
}
