//! Core domain entities, scoped per user
//!
//! There is no global song table: every row in [`Song`], [`PlayEvent`], and
//! [`SongTransition`] carries a `user_id` and is owned exclusively by the
//! storage layer (see `storage::Storage`).

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum adjusted play/skip value, per the decay identity x_{n+1} = 1 + lambda*x_n
/// with lambda = DECAY_LAMBDA. Bounded above by 1 / (1 - lambda).
pub const DECAY_LAMBDA: f64 = 0.95;
pub const DECAY_UPPER_BOUND: f64 = 20.0; // 1 / (1 - 0.95)

/// Replay-prevention window: songs presented within this many days are excluded
pub const REPLAY_WINDOW_DAYS: i64 = 14;

/// Song count threshold above which the shuffle engine switches to the
/// paginated/reservoir-sampled large-library path.
pub const LARGE_LIBRARY_THRESHOLD: i64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Start,
    Play,
    Skip,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Play => "play",
            EventType::Skip => "skip",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(EventType::Start),
            "play" => Some(EventType::Play),
            "skip" => Some(EventType::Skip),
            _ => None,
        }
    }
}

/// A track within a single user's library
#[derive(Debug, Clone, Serialize)]
pub struct Song {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: i64,
    pub last_played: Option<DateTime<Utc>>,
    pub last_skipped: Option<DateTime<Utc>>,
    pub play_count: i64,
    pub skip_count: i64,
    pub adjusted_plays: f64,
    pub adjusted_skips: f64,
    pub cover_art: Option<String>,
}

impl Song {
    /// Metadata fields compared for the sync differential diff. Statistics
    /// and timestamps are deliberately excluded - they are preserved across
    /// a metadata-only update.
    pub fn metadata_eq(&self, other: &SongMetadata) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.album == other.album
            && self.duration == other.duration
            && self.cover_art == other.cover_art
    }

    /// Last time this song was presented to the user (played or skipped)
    pub fn last_presented(&self) -> Option<DateTime<Utc>> {
        match (self.last_played, self.last_skipped) {
            (Some(p), Some(s)) => Some(p.max(s)),
            (Some(p), None) => Some(p),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        }
    }
}

/// Metadata discovered for a song during sync, before it is merged with
/// any locally-stored statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMetadata {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: i64,
    pub cover_art: Option<String>,
}

/// Append-only play/skip/start log record
#[derive(Debug, Clone)]
pub struct PlayEvent {
    pub id: i64,
    pub user_id: String,
    pub song_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub previous_song_id: Option<String>,
}

/// First-order Markov edge: probability of transitioning from one song to another
#[derive(Debug, Clone)]
pub struct SongTransition {
    pub user_id: String,
    pub from_song_id: String,
    pub to_song_id: String,
    pub play_count: i64,
    pub skip_count: i64,
}

impl SongTransition {
    pub fn probability(&self) -> f64 {
        let total = self.play_count + self.skip_count;
        if total > 0 {
            self.play_count as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Summary of a differential diff applied during sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Apply the decay update for a play or skip event. Maintains the geometric
/// series identity x_{n+1} = 1 + lambda*x_n in one place; every caller must
/// go through this function to preserve the upper bound.
pub fn apply_decay(adjusted_plays: f64, adjusted_skips: f64, event: &EventType) -> (f64, f64) {
    match event {
        EventType::Play => (
            1.0 + DECAY_LAMBDA * adjusted_plays,
            DECAY_LAMBDA * adjusted_skips,
        ),
        EventType::Skip => (
            DECAY_LAMBDA * adjusted_plays,
            1.0 + DECAY_LAMBDA * adjusted_skips,
        ),
        EventType::Start => (adjusted_plays, adjusted_skips),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_converges_to_upper_bound() {
        let mut plays = 0.0;
        let mut skips = 0.0;
        for _ in 0..10_000 {
            let (p, s) = apply_decay(plays, skips, &EventType::Play);
            plays = p;
            skips = s;
        }
        assert!((plays - DECAY_UPPER_BOUND).abs() < 1e-6);
        assert!(skips < 1e-6);
        assert!(plays <= DECAY_UPPER_BOUND + 1e-9);
    }

    #[test]
    fn decay_never_goes_negative_or_over_bound() {
        let mut plays = 0.0;
        let mut skips = 0.0;
        for i in 0..200 {
            let event = if i % 3 == 0 { EventType::Skip } else { EventType::Play };
            let (p, s) = apply_decay(plays, skips, &event);
            plays = p;
            skips = s;
            assert!(plays >= 0.0 && plays <= DECAY_UPPER_BOUND + 1e-9);
            assert!(skips >= 0.0 && skips <= DECAY_UPPER_BOUND + 1e-9);
        }
    }

    #[test]
    fn transition_probability_zero_when_no_data() {
        let t = SongTransition {
            user_id: "alice".into(),
            from_song_id: "A".into(),
            to_song_id: "B".into(),
            play_count: 0,
            skip_count: 0,
        };
        assert_eq!(t.probability(), 0.0);
    }
}
