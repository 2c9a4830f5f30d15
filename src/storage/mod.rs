//! Embedded per-user song/event/transition store
//!
//! Schema is created and migrated idempotently: a `metadata` table holds a
//! single `schema_version` row, and every migration checks
//! `pragma_table_info` before altering a table so a crash mid-migration can
//! never see a "duplicate column" error on the next startup.
//!
//! Access goes through an `r2d2` pool of `rusqlite` connections: this store
//! serves point lookups and small batch writes from many concurrent request
//! handlers, not a single high-throughput event stream, so a pool of ready
//! connections is the better fit than a dedicated writer thread.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::AppError;
use crate::models::{self, DiffSummary, EventType, Song, SongMetadata};

pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
}

impl Storage {
    /// Open (creating if necessary) the database at `db_path`, applying the
    /// pool settings from configuration, and run any pending migrations.
    pub fn new(db_path: &str, pool_config: &PoolConfig) -> Result<Self, AppError> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::database("db_dir_create_failed", "could not create database directory").with_cause(e)
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(pool_config.max_open)
            .min_idle(Some(pool_config.max_idle))
            .max_lifetime(non_zero_duration(pool_config.conn_max_lifetime))
            .idle_timeout(non_zero_duration(pool_config.conn_max_idle_time))
            .build(manager)?;

        {
            let conn = pool.get()?;
            run_migrations(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Reconcile a freshly-discovered song list against what is stored for
    /// `user_id`. Statistics and timestamps on unchanged/updated songs are
    /// preserved; songs no longer present upstream are removed along with
    /// their events and transitions.
    pub fn store_songs(&self, user_id: &str, discovered: &[SongMetadata]) -> Result<DiffSummary, AppError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut summary = DiffSummary::default();

        let existing = load_songs(&tx, user_id)?;
        let mut existing_by_id: HashMap<String, Song> =
            existing.into_iter().map(|s| (s.id.clone(), s)).collect();
        let discovered_ids: HashSet<&str> = discovered.iter().map(|m| m.id.as_str()).collect();

        for meta in discovered {
            match existing_by_id.remove(&meta.id) {
                Some(song) if song.metadata_eq(meta) => {
                    summary.unchanged += 1;
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE songs SET title = ?1, artist = ?2, album = ?3, duration = ?4, cover_art = ?5
                         WHERE user_id = ?6 AND id = ?7",
                        params![meta.title, meta.artist, meta.album, meta.duration, meta.cover_art, user_id, meta.id],
                    )?;
                    summary.updated += 1;
                }
                None => {
                    tx.execute(
                        "INSERT INTO songs (id, user_id, title, artist, album, duration, cover_art,
                            play_count, skip_count, adjusted_plays, adjusted_skips)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, 0.0, 0.0)",
                        params![meta.id, user_id, meta.title, meta.artist, meta.album, meta.duration, meta.cover_art],
                    )?;
                    summary.added += 1;
                }
            }
        }

        // Anything left in existing_by_id is no longer reported upstream.
        for stale_id in existing_by_id.keys() {
            if discovered_ids.contains(stale_id.as_str()) {
                continue; // defensive: can't happen, kept for clarity
            }
            tx.execute("DELETE FROM play_events WHERE user_id = ?1 AND song_id = ?2", params![user_id, stale_id])?;
            tx.execute(
                "DELETE FROM transitions WHERE user_id = ?1 AND (from_song_id = ?2 OR to_song_id = ?2)",
                params![user_id, stale_id],
            )?;
            tx.execute("DELETE FROM songs WHERE user_id = ?1 AND id = ?2", params![user_id, stale_id])?;
            summary.deleted += 1;
        }

        tx.commit()?;
        debug!(user_id, ?summary, "sync diff applied");
        Ok(summary)
    }

    pub fn get_all_songs(&self, user_id: &str) -> Result<Vec<Song>, AppError> {
        let conn = self.pool.get()?;
        load_songs(&conn, user_id)
    }

    pub fn get_song_count(&self, user_id: &str) -> Result<i64, AppError> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM songs WHERE user_id = ?1", params![user_id], |r| r.get(0))?;
        Ok(count)
    }

    /// Page through a user's library, used by the large-library shuffle path.
    pub fn get_songs_batch(&self, user_id: &str, limit: i64, offset: i64) -> Result<Vec<Song>, AppError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, artist, album, duration, last_played, last_skipped,
                    play_count, skip_count, adjusted_plays, adjusted_skips, cover_art
             FROM songs WHERE user_id = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![user_id, limit, offset], song_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    /// Same as `get_songs_batch`, but excludes songs presented (played or
    /// skipped) within `threshold_days` - the replay-prevention window,
    /// enforced at the database level for the large-library path.
    pub fn get_songs_batch_filtered(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        threshold_days: i64,
    ) -> Result<Vec<Song>, AppError> {
        let conn = self.pool.get()?;
        let cutoff = replay_cutoff(threshold_days);
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, artist, album, duration, last_played, last_skipped,
                    play_count, skip_count, adjusted_plays, adjusted_skips, cover_art
             FROM songs
             WHERE user_id = ?1
               AND (last_played IS NULL OR last_played < ?2)
               AND (last_skipped IS NULL OR last_skipped < ?2)
             ORDER BY id LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(params![user_id, cutoff, limit, offset], song_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
    }

    pub fn get_song_count_filtered(&self, user_id: &str, threshold_days: i64) -> Result<i64, AppError> {
        let conn = self.pool.get()?;
        let cutoff = replay_cutoff(threshold_days);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM songs
             WHERE user_id = ?1
               AND (last_played IS NULL OR last_played < ?2)
               AND (last_skipped IS NULL OR last_skipped < ?2)",
            params![user_id, cutoff],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Record a start/play/skip event and apply its decay update to the
    /// song's adjusted play/skip weight. If `previous_song_id` is present,
    /// also updates the Markov transition edge from that song to this one.
    pub fn record_play_event(
        &self,
        user_id: &str,
        song_id: &str,
        event_type: &EventType,
        previous_song_id: Option<&str>,
    ) -> Result<(), AppError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO play_events (user_id, song_id, event_type, timestamp, previous_song_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, song_id, event_type.as_str(), now, previous_song_id],
        )?;

        let (adjusted_plays, adjusted_skips): (f64, f64) = tx
            .query_row(
                "SELECT adjusted_plays, adjusted_skips FROM songs WHERE user_id = ?1 AND id = ?2",
                params![user_id, song_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .map_err(|e| {
                AppError::database("song_not_found", "cannot record event for unknown song")
                    .with_cause(e)
                    .with_context("song_id", song_id)
            })?;

        let (new_plays, new_skips) = models::apply_decay(adjusted_plays, adjusted_skips, event_type);

        match event_type {
            EventType::Play => {
                tx.execute(
                    "UPDATE songs SET adjusted_plays = ?1, adjusted_skips = ?2, play_count = play_count + 1,
                        last_played = ?3 WHERE user_id = ?4 AND id = ?5",
                    params![new_plays, new_skips, now, user_id, song_id],
                )?;
            }
            EventType::Skip => {
                tx.execute(
                    "UPDATE songs SET adjusted_plays = ?1, adjusted_skips = ?2, skip_count = skip_count + 1,
                        last_skipped = ?3 WHERE user_id = ?4 AND id = ?5",
                    params![new_plays, new_skips, now, user_id, song_id],
                )?;
            }
            EventType::Start => {
                tx.execute(
                    "UPDATE songs SET adjusted_plays = ?1, adjusted_skips = ?2 WHERE user_id = ?3 AND id = ?4",
                    params![new_plays, new_skips, user_id, song_id],
                )?;
            }
        }

        if let Some(from_id) = previous_song_id {
            record_transition(&tx, user_id, from_id, song_id, event_type)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// `to_song_id -> play probability` for every transition observed from `from_song_id`.
    pub fn get_transition_probabilities(&self, user_id: &str, from_song_id: &str) -> Result<HashMap<String, f64>, AppError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT to_song_id, play_count, skip_count FROM transitions WHERE user_id = ?1 AND from_song_id = ?2",
        )?;
        let rows = stmt.query_map(params![user_id, from_song_id], |r| {
            let to_song_id: String = r.get(0)?;
            let play_count: i64 = r.get(1)?;
            let skip_count: i64 = r.get(2)?;
            Ok((to_song_id, play_count, skip_count))
        })?;

        let mut result = HashMap::new();
        for row in rows {
            let (to_song_id, play_count, skip_count) = row?;
            let total = play_count + skip_count;
            let probability = if total > 0 { play_count as f64 / total as f64 } else { 0.0 };
            result.insert(to_song_id, probability);
        }
        Ok(result)
    }

    /// Aggregated adjusted plays/skips across every song by `artist` for
    /// `user_id`. Feeds the shuffle engine's artist weight.
    pub fn get_artist_stats(&self, user_id: &str, artist: &str) -> Result<(f64, f64), AppError> {
        let conn = self.pool.get()?;
        let row: Option<(f64, f64)> = conn
            .query_row(
                "SELECT COALESCE(SUM(adjusted_plays), 0.0), COALESCE(SUM(adjusted_skips), 0.0)
                 FROM songs WHERE user_id = ?1 AND artist = ?2",
                params![user_id, artist],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(row.unwrap_or((0.0, 0.0)))
    }

    /// Upsert the from->to edge and increment the play or skip counter,
    /// independent of `record_play_event` for callers that only need the
    /// transition graph updated (e.g. backfill tooling).
    pub fn record_transition(
        &self,
        user_id: &str,
        from_song_id: &str,
        to_song_id: &str,
        event_type: &EventType,
    ) -> Result<(), AppError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        record_transition(&tx, user_id, from_song_id, to_song_id, event_type)?;
        tx.commit()?;
        Ok(())
    }

    pub fn pool(&self) -> Pool<SqliteConnectionManager> {
        self.pool.clone()
    }
}

fn record_transition(
    tx: &rusqlite::Transaction,
    user_id: &str,
    from_song_id: &str,
    to_song_id: &str,
    event_type: &EventType,
) -> Result<(), AppError> {
    let exists: bool = tx.query_row(
        "SELECT COUNT(*) > 0 FROM transitions WHERE user_id = ?1 AND from_song_id = ?2 AND to_song_id = ?3",
        params![user_id, from_song_id, to_song_id],
        |r| r.get(0),
    )?;

    if !exists {
        tx.execute(
            "INSERT INTO transitions (user_id, from_song_id, to_song_id, play_count, skip_count) VALUES (?1, ?2, ?3, 0, 0)",
            params![user_id, from_song_id, to_song_id],
        )?;
    }

    let column = match event_type {
        EventType::Play => "play_count",
        EventType::Skip => "skip_count",
        EventType::Start => return Ok(()),
    };
    tx.execute(
        &format!(
            "UPDATE transitions SET {column} = {column} + 1 WHERE user_id = ?1 AND from_song_id = ?2 AND to_song_id = ?3"
        ),
        params![user_id, from_song_id, to_song_id],
    )?;
    Ok(())
}

fn load_songs(conn: &Connection, user_id: &str) -> Result<Vec<Song>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, artist, album, duration, last_played, last_skipped,
                play_count, skip_count, adjusted_plays, adjusted_skips, cover_art
         FROM songs WHERE user_id = ?1",
    )?;
    let rows = stmt.query_map(params![user_id], song_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::from)
}

fn song_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        artist: row.get(3)?,
        album: row.get(4)?,
        duration: row.get(5)?,
        last_played: parse_timestamp(row.get(6)?),
        last_skipped: parse_timestamp(row.get(7)?),
        play_count: row.get(8)?,
        skip_count: row.get(9)?,
        adjusted_plays: row.get(10)?,
        adjusted_skips: row.get(11)?,
        cover_art: row.get(12)?,
    })
}

fn parse_timestamp(raw: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&chrono::Utc))
}

/// RFC3339 cutoff timestamp: songs presented at or after this instant fall
/// inside the replay-prevention window and must be excluded.
fn replay_cutoff(threshold_days: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::days(threshold_days)).to_rfc3339()
}

fn non_zero_duration(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

/// Spawn the periodic pool health-check loop. Runs until `shutdown` fires.
pub async fn spawn_health_check_loop(pool: Pool<SqliteConnectionManager>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let state = pool.state();
                if state.connections == 0 {
                    warn!("connection pool reports zero live connections");
                } else {
                    debug!(connections = state.connections, idle = state.idle_connections, "pool health check");
                }
            }
            _ = shutdown.recv() => {
                info!("pool health-check loop shutting down");
                break;
            }
        }
    }
}

fn run_migrations(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA busy_timeout=5000;
        PRAGMA foreign_keys=OFF;
        "#,
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE((SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'), 0)",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_schema_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v1_to_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v2_to_v3(conn)?;
    }
    if current_version < 4 {
        migrate_v3_to_v4(conn)?;
    }

    Ok(())
}

fn apply_schema_v1(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS songs (
            id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            album TEXT NOT NULL,
            duration INTEGER NOT NULL,
            last_played TEXT,
            play_count INTEGER NOT NULL DEFAULT 0,
            skip_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_songs_user ON songs(user_id);
        CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs(user_id, artist);

        CREATE TABLE IF NOT EXISTS play_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            song_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            previous_song_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_events_user_song ON play_events(user_id, song_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON play_events(timestamp);

        CREATE TABLE IF NOT EXISTS transitions (
            user_id TEXT NOT NULL,
            from_song_id TEXT NOT NULL,
            to_song_id TEXT NOT NULL,
            play_count INTEGER NOT NULL DEFAULT 0,
            skip_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, from_song_id, to_song_id)
        );

        INSERT INTO metadata (key, value) VALUES ('schema_version', '1');
        "#,
    )?;
    Ok(())
}

/// v1 -> v2: adds `cover_art` to songs.
fn migrate_v1_to_v2(conn: &Connection) -> Result<(), AppError> {
    let has_column: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('songs') WHERE name = 'cover_art'",
        [],
        |r| r.get(0),
    )?;
    if !has_column {
        conn.execute("ALTER TABLE songs ADD COLUMN cover_art TEXT", [])?;
    }
    conn.execute("UPDATE metadata SET value = '2' WHERE key = 'schema_version'", [])?;
    info!("migrated subsoxy database from v1 to v2 (added cover_art)");
    Ok(())
}

/// v2 -> v3: adds `last_skipped` to songs, tracked separately from `last_played`
/// so the replay window can consider either kind of presentation.
fn migrate_v2_to_v3(conn: &Connection) -> Result<(), AppError> {
    let has_column: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('songs') WHERE name = 'last_skipped'",
        [],
        |r| r.get(0),
    )?;
    if !has_column {
        conn.execute("ALTER TABLE songs ADD COLUMN last_skipped TEXT", [])?;
    }
    conn.execute("UPDATE metadata SET value = '3' WHERE key = 'schema_version'", [])?;
    info!("migrated subsoxy database from v2 to v3 (added last_skipped)");
    Ok(())
}

/// v3 -> v4: adds the decayed play/skip weights used by the shuffle engine,
/// backfilled from each song's raw `play_count`/`skip_count` so a library
/// migrated in from an older version doesn't start every song at zero
/// decayed weight regardless of its play history.
fn migrate_v3_to_v4(conn: &Connection) -> Result<(), AppError> {
    let has_plays: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('songs') WHERE name = 'adjusted_plays'",
        [],
        |r| r.get(0),
    )?;
    if !has_plays {
        conn.execute("ALTER TABLE songs ADD COLUMN adjusted_plays REAL NOT NULL DEFAULT 0.0", [])?;
        conn.execute("UPDATE songs SET adjusted_plays = CAST(play_count AS REAL)", [])?;
    }
    let has_skips: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('songs') WHERE name = 'adjusted_skips'",
        [],
        |r| r.get(0),
    )?;
    if !has_skips {
        conn.execute("ALTER TABLE songs ADD COLUMN adjusted_skips REAL NOT NULL DEFAULT 0.0", [])?;
        conn.execute("UPDATE songs SET adjusted_skips = CAST(skip_count AS REAL)", [])?;
    }
    conn.execute("UPDATE metadata SET value = '4' WHERE key = 'schema_version'", [])?;
    info!("migrated subsoxy database from v3 to v4 (added adjusted_plays/adjusted_skips, backfilled from raw counts)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool_config() -> PoolConfig {
        PoolConfig {
            max_open: 5,
            max_idle: 1,
            conn_max_lifetime: Duration::from_secs(0),
            conn_max_idle_time: Duration::from_secs(0),
            health_check: false,
        }
    }

    fn memory_storage() -> Storage {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
        Storage { pool }
    }

    fn meta(id: &str, title: &str) -> SongMetadata {
        SongMetadata {
            id: id.to_string(),
            title: title.to_string(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration: 200,
            cover_art: None,
        }
    }

    #[test]
    fn pool_config_struct_is_usable() {
        let _ = test_pool_config();
    }

    #[test]
    fn migrations_are_idempotent() {
        let storage = memory_storage();
        let conn = storage.pool.get().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn v3_to_v4_migration_backfills_adjusted_weights_from_raw_counts() {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).unwrap();
        let conn = pool.get().unwrap();

        apply_schema_v1(&conn).unwrap();
        migrate_v1_to_v2(&conn).unwrap();
        migrate_v2_to_v3(&conn).unwrap();
        conn.execute(
            "INSERT INTO songs (id, user_id, title, artist, album, duration, play_count, skip_count)
             VALUES ('1', 'alice', 'Song One', 'Artist', 'Album', 200, 7, 3)",
            [],
        )
        .unwrap();

        migrate_v3_to_v4(&conn).unwrap();

        let (adjusted_plays, adjusted_skips): (f64, f64) = conn
            .query_row(
                "SELECT adjusted_plays, adjusted_skips FROM songs WHERE user_id = 'alice' AND id = '1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(adjusted_plays, 7.0);
        assert_eq!(adjusted_skips, 3.0);
    }

    #[test]
    fn store_songs_tracks_add_update_unchanged_delete() {
        let storage = memory_storage();

        let first = vec![meta("1", "Song One"), meta("2", "Song Two")];
        let summary = storage.store_songs("alice", &first).unwrap();
        assert_eq!(summary, DiffSummary { added: 2, updated: 0, unchanged: 0, deleted: 0 });

        let mut second = vec![meta("1", "Song One"), meta("3", "Song Three")];
        second[0].title = "Song One Renamed".into();
        let summary = storage.store_songs("alice", &second).unwrap();
        assert_eq!(summary, DiffSummary { added: 1, updated: 1, unchanged: 0, deleted: 1 });

        let summary = storage.store_songs("alice", &second).unwrap();
        assert_eq!(summary, DiffSummary { added: 0, updated: 0, unchanged: 2, deleted: 0 });
    }

    #[test]
    fn record_play_event_updates_decayed_weights() {
        let storage = memory_storage();
        storage.store_songs("alice", &[meta("1", "Song One")]).unwrap();
        storage.record_play_event("alice", "1", &EventType::Play, None).unwrap();

        let songs = storage.get_all_songs("alice").unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].play_count, 1);
        assert!((songs[0].adjusted_plays - 1.0).abs() < 1e-9);
        assert!(songs[0].last_played.is_some());
    }

    #[test]
    fn record_play_event_with_previous_builds_transition() {
        let storage = memory_storage();
        storage.store_songs("alice", &[meta("1", "A"), meta("2", "B")]).unwrap();
        storage.record_play_event("alice", "2", &EventType::Play, Some("1")).unwrap();

        let probs = storage.get_transition_probabilities("alice", "1").unwrap();
        assert_eq!(probs.get("2"), Some(&1.0));
    }

    #[test]
    fn get_song_count_filtered_excludes_recently_presented() {
        let storage = memory_storage();
        storage.store_songs("alice", &[meta("1", "A"), meta("2", "B"), meta("3", "C")]).unwrap();
        storage.record_play_event("alice", "2", &EventType::Play, None).unwrap();

        let count = storage.get_song_count_filtered("alice", models::REPLAY_WINDOW_DAYS).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn get_artist_stats_aggregates_across_songs() {
        let storage = memory_storage();
        storage.store_songs("alice", &[meta("1", "A"), meta("2", "B")]).unwrap();
        storage.record_play_event("alice", "1", &EventType::Play, None).unwrap();
        storage.record_play_event("alice", "2", &EventType::Play, None).unwrap();

        let (plays, skips) = storage.get_artist_stats("alice", "Artist").unwrap();
        assert!((plays - 2.0).abs() < 1e-9);
        assert_eq!(skips, 0.0);
    }
}
