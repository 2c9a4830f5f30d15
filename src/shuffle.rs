//! Weighted shuffle engine
//!
//! `weighted_sample` is the one entry point the `getRandomSongs` handler
//! calls. Internally it picks between the small- and large-library paths
//! based on `models::LARGE_LIBRARY_THRESHOLD`, computes a per-song weight
//! from five independent factors, and performs weighted selection without
//! replacement via the A-Res algorithm, hand-rolled rather than pulled in
//! from a crate.

use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, RwLock};

use rand::seq::SliceRandom;
use rusqlite::params;

use crate::error::AppError;
use crate::models::{self, Song, LARGE_LIBRARY_THRESHOLD, REPLAY_WINDOW_DAYS};
use crate::storage::Storage;

const NEVER_BONUS: f64 = 4.0;
const W_TIME_MIN: f64 = 0.1;
const W_TIME_MAX: f64 = 2.0;
const W_TIME_HALF_LIFE_DAYS: f64 = 7.0;
const W_RATIO_MIN: f64 = 0.2;
const W_RATIO_MAX: f64 = 1.8;
const W_TRANS_MIN: f64 = 0.5;
const W_TRANS_MAX: f64 = 1.5;
const W_ARTIST_MIN: f64 = 0.5;
const W_ARTIST_MAX: f64 = 1.5;
/// Informative-prior strength: how many pseudo-observations the user's
/// global play/skip ratio is worth relative to a song's own decayed counts.
const PRIOR_STRENGTH: f64 = 2.0;
const RESERVOIR_PAGE_SIZE: i64 = 1_000;
const RESERVOIR_OVERSAMPLE_FACTOR: usize = 3;

/// Decomposed weight factors for a single candidate, used by `weighted_sample`
/// and surfaced verbatim by the debug view.
#[derive(Debug, Clone)]
pub struct WeightBreakdown {
    pub song: Song,
    pub never_bonus: f64,
    pub w_time: f64,
    pub w_ratio: f64,
    pub w_trans: f64,
    pub w_artist: f64,
}

impl WeightBreakdown {
    pub fn total(&self) -> f64 {
        self.never_bonus * self.w_time * self.w_ratio * self.w_trans * self.w_artist
    }
}

/// Priors derived once per sampling call from the user's whole library
struct Priors {
    alpha: f64,
    beta: f64,
}

pub struct ShuffleEngine {
    storage: Arc<Storage>,
    last_played: RwLock<HashMap<String, String>>,
}

impl ShuffleEngine {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage, last_played: RwLock::new(HashMap::new()) }
    }

    /// Record the song a user is currently playing, for the W_trans factor
    /// on their *next* sample. Never blocks weight computation readers for
    /// longer than the write itself.
    pub fn set_last_played(&self, user_id: &str, song_id: &str) {
        self.last_played.write().unwrap().insert(user_id.to_string(), song_id.to_string());
    }

    pub fn get_last_played(&self, user_id: &str) -> Option<String> {
        self.last_played.read().unwrap().get(user_id).cloned()
    }

    /// Select at most `n` distinct songs for `user_id`, weighted and in
    /// randomized order.
    pub fn weighted_sample(&self, user_id: &str, n: usize) -> Result<Vec<Song>, AppError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let song_count = self.storage.get_song_count(user_id)?;
        let mut selected = if song_count > LARGE_LIBRARY_THRESHOLD {
            self.sample_large_library(user_id, n)?
        } else {
            self.sample_small_library(user_id, n)?
        };

        selected.shuffle(&mut rand::thread_rng());
        Ok(selected)
    }

    /// Compute the decomposed weight for a single song, used by both
    /// sampling paths and the `/debug` view.
    fn compute_weight(&self, user_id: &str, song: &Song, priors: &Priors) -> Result<WeightBreakdown, AppError> {
        let never_bonus = if song.play_count == 0 && song.skip_count == 0 { NEVER_BONUS } else { 1.0 };
        let w_time = w_time(song);
        let w_ratio = beta_binomial_weight(song.adjusted_plays, song.adjusted_skips, priors, W_RATIO_MIN, W_RATIO_MAX);

        let w_trans = match self.get_last_played(user_id) {
            Some(from_id) => {
                let probs = self.storage.get_transition_probabilities(user_id, &from_id)?;
                match probs.get(&song.id) {
                    Some(p) => W_TRANS_MIN + (W_TRANS_MAX - W_TRANS_MIN) * p,
                    None => 1.0,
                }
            }
            None => 1.0,
        };

        let (artist_plays, artist_skips) = self.storage.get_artist_stats(user_id, &song.artist)?;
        let w_artist = if artist_plays + artist_skips == 0.0 {
            1.0
        } else {
            beta_binomial_weight(artist_plays, artist_skips, priors, W_ARTIST_MIN, W_ARTIST_MAX)
        };

        Ok(WeightBreakdown { song: song.clone(), never_bonus, w_time, w_ratio, w_trans, w_artist })
    }

    /// Public wrapper used by the debug handler, which does not have access
    /// to pre-computed priors.
    pub fn compute_weight_breakdown(&self, user_id: &str, song: &Song) -> Result<WeightBreakdown, AppError> {
        let priors = self.priors_for(user_id)?;
        self.compute_weight(user_id, song, &priors)
    }

    /// Every eligible candidate for `user_id` with its decomposed weight,
    /// used by the `/debug` view. Not used by `weighted_sample` itself, which
    /// streams through the large-library path instead of materializing all
    /// candidates.
    pub fn all_weights(&self, user_id: &str) -> Result<Vec<WeightBreakdown>, AppError> {
        let priors = self.priors_for(user_id)?;
        let songs = self.storage.get_all_songs(user_id)?;
        songs.iter().map(|s| self.compute_weight(user_id, s, &priors)).collect()
    }

    fn sample_small_library(&self, user_id: &str, n: usize) -> Result<Vec<Song>, AppError> {
        let priors = self.priors_for(user_id)?;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(REPLAY_WINDOW_DAYS);
        let songs = self.storage.get_all_songs(user_id)?;

        let candidates: Vec<WeightBreakdown> = songs
            .into_iter()
            .filter(|s| s.last_presented().map(|t| t < cutoff).unwrap_or(true))
            .map(|s| self.compute_weight(user_id, &s, &priors))
            .collect::<Result<_, _>>()?;

        Ok(a_res_select(candidates, n))
    }

    fn sample_large_library(&self, user_id: &str, n: usize) -> Result<Vec<Song>, AppError> {
        let priors = self.priors_for(user_id)?;
        let reservoir_capacity = n * RESERVOIR_OVERSAMPLE_FACTOR;
        let mut reservoir: BinaryHeap<KeyedCandidate> = BinaryHeap::with_capacity(reservoir_capacity + 1);

        let mut offset = 0i64;
        loop {
            let page = self.storage.get_songs_batch_filtered(user_id, RESERVOIR_PAGE_SIZE, offset, REPLAY_WINDOW_DAYS)?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            for song in page {
                let breakdown = self.compute_weight(user_id, &song, &priors)?;
                let key = reservoir_key(breakdown.total());
                reservoir.push(std::cmp::Reverse(KeyedCandidate { key, breakdown }));
                if reservoir.len() > reservoir_capacity {
                    reservoir.pop();
                }
            }
            if (page_len as i64) < RESERVOIR_PAGE_SIZE {
                break;
            }
            offset += RESERVOIR_PAGE_SIZE;
        }

        let candidates: Vec<WeightBreakdown> = reservoir.into_iter().map(|std::cmp::Reverse(kc)| kc.breakdown).collect();
        Ok(a_res_select(candidates, n))
    }

    /// Derive the Beta-Binomial priors from the user's whole-library
    /// play/skip ratio. Queried directly against the pool rather than a
    /// named storage operation, since this is an internal shuffle detail,
    /// not a first-class store operation.
    fn priors_for(&self, user_id: &str) -> Result<Priors, AppError> {
        let conn = self.storage.pool().get()?;
        let (total_plays, total_skips): (f64, f64) = conn.query_row(
            "SELECT COALESCE(SUM(adjusted_plays), 0.0), COALESCE(SUM(adjusted_skips), 0.0) FROM songs WHERE user_id = ?1",
            params![user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let mean_ratio = if total_plays + total_skips > 0.0 {
            total_plays / (total_plays + total_skips)
        } else {
            0.5
        };

        Ok(Priors { alpha: mean_ratio * PRIOR_STRENGTH, beta: (1.0 - mean_ratio) * PRIOR_STRENGTH })
    }
}

struct KeyedCandidate {
    key: f64,
    breakdown: WeightBreakdown,
}

impl PartialEq for KeyedCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for KeyedCandidate {}
impl PartialOrd for KeyedCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.key.partial_cmp(&other.key)
    }
}
impl Ord for KeyedCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// A-Res weighted selection without replacement: assign every candidate a
/// key = U^(1/weight) for U ~ Uniform(0,1), keep the top `n` by key. Returns
/// fewer than `n` items if there aren't enough candidates.
fn a_res_select(candidates: Vec<WeightBreakdown>, n: usize) -> Vec<Song> {
    let mut keyed: Vec<(f64, Song)> = candidates
        .into_iter()
        .map(|c| {
            let weight = c.total().max(f64::MIN_POSITIVE);
            (reservoir_key(weight), c.song)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    keyed.into_iter().take(n).map(|(_, song)| song).collect()
}

fn reservoir_key(weight: f64) -> f64 {
    let u: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
    u.powf(1.0 / weight.max(f64::MIN_POSITIVE))
}

/// Age-based recency weight. Never-presented songs bypass this factor
/// entirely (return 1.0) in favor of `never_bonus`. Otherwise increases
/// monotonically and continuously from `W_TIME_MIN` toward `W_TIME_MAX`
/// as the time since last presentation grows.
fn w_time(song: &Song) -> f64 {
    match song.last_presented() {
        None => 1.0,
        Some(last) => {
            let age_days = (chrono::Utc::now() - last).num_seconds() as f64 / 86_400.0;
            let age_days = age_days.max(0.0);
            W_TIME_MIN + (W_TIME_MAX - W_TIME_MIN) * (1.0 - (-age_days / W_TIME_HALF_LIFE_DAYS).exp())
        }
    }
}

/// Beta-Binomial smoothed ratio, linearly mapped onto `[min, max]`.
fn beta_binomial_weight(adjusted_plays: f64, adjusted_skips: f64, priors: &Priors, min: f64, max: f64) -> f64 {
    let p = (adjusted_plays + priors.alpha) / (adjusted_plays + adjusted_skips + priors.alpha + priors.beta);
    min + (max - min) * p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::time::Duration;

    fn test_storage() -> Arc<Storage> {
        // max_size(1) so every checkout reuses the same SQLite `:memory:`
        // connection - a pool of size > 1 would hand out independent,
        // schema-less in-memory databases.
        let pool_config = PoolConfig {
            max_open: 1,
            max_idle: 1,
            conn_max_lifetime: Duration::from_secs(0),
            conn_max_idle_time: Duration::from_secs(0),
            health_check: false,
        };
        Arc::new(Storage::new(":memory:", &pool_config).unwrap())
    }

    fn priors() -> Priors {
        Priors { alpha: 1.0, beta: 1.0 }
    }

    #[test]
    fn never_played_song_gets_discovery_bonus() {
        let song = Song {
            id: "1".into(),
            user_id: "alice".into(),
            title: "A".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration: 200,
            last_played: None,
            last_skipped: None,
            play_count: 0,
            skip_count: 0,
            adjusted_plays: 0.0,
            adjusted_skips: 0.0,
            cover_art: None,
        };
        let never_bonus = if song.play_count == 0 && song.skip_count == 0 { NEVER_BONUS } else { 1.0 };
        assert_eq!(never_bonus, NEVER_BONUS);
        assert_eq!(w_time(&song), 1.0);
    }

    #[test]
    fn w_time_is_monotonic_and_bounded() {
        let base = Song {
            id: "1".into(),
            user_id: "alice".into(),
            title: "A".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration: 200,
            last_played: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
            last_skipped: None,
            play_count: 1,
            skip_count: 0,
            adjusted_plays: 1.0,
            adjusted_skips: 0.0,
            cover_art: None,
        };
        let recent = w_time(&base);

        let mut old = base.clone();
        old.last_played = Some(chrono::Utc::now() - chrono::Duration::days(365));
        let far = w_time(&old);

        assert!(recent >= W_TIME_MIN && recent <= W_TIME_MAX);
        assert!(far >= W_TIME_MIN && far <= W_TIME_MAX);
        assert!(far > recent);
        assert!(far <= W_TIME_MAX + 1e-9);
    }

    #[test]
    fn beta_binomial_weight_respects_bounds() {
        let p = &priors();
        let w = beta_binomial_weight(10.0, 0.0, p, W_RATIO_MIN, W_RATIO_MAX);
        assert!(w <= W_RATIO_MAX + 1e-9);
        let w = beta_binomial_weight(0.0, 10.0, p, W_RATIO_MIN, W_RATIO_MAX);
        assert!(w >= W_RATIO_MIN - 1e-9);
    }

    #[test]
    fn weighted_sample_returns_empty_for_empty_library() {
        let storage = test_storage();
        let engine = ShuffleEngine::new(storage);
        let result = engine.weighted_sample("nobody", 10).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn weighted_sample_never_returns_more_than_n() {
        let storage = test_storage();
        let metas: Vec<_> = (0..10)
            .map(|i| crate::models::SongMetadata {
                id: i.to_string(),
                title: format!("Song {i}"),
                artist: "Artist".into(),
                album: "Album".into(),
                duration: 180,
                cover_art: None,
            })
            .collect();
        storage.store_songs("alice", &metas).unwrap();

        let engine = ShuffleEngine::new(storage);
        let result = engine.weighted_sample("alice", 3).unwrap();
        assert_eq!(result.len(), 3);

        let unique: std::collections::HashSet<_> = result.iter().map(|s| s.id.clone()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn weighted_sample_excludes_recently_presented_songs() {
        let storage = test_storage();
        let metas: Vec<_> = (0..3)
            .map(|i| crate::models::SongMetadata {
                id: i.to_string(),
                title: format!("Song {i}"),
                artist: "Artist".into(),
                album: "Album".into(),
                duration: 180,
                cover_art: None,
            })
            .collect();
        storage.store_songs("alice", &metas).unwrap();
        storage.record_play_event("alice", "0", &models::EventType::Play, None).unwrap();
        storage.record_play_event("alice", "1", &models::EventType::Play, None).unwrap();

        let engine = ShuffleEngine::new(storage);
        let result = engine.weighted_sample("alice", 10).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "2");
    }
}
