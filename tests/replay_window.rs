//! A song presented within the last 14 days is excluded from shuffle
//! results; once `last_presented` falls outside that window it becomes
//! eligible again.

mod common;

use rusqlite::params;
use subsoxy::models::SongMetadata;

fn backdate_last_played(app: &common::TestApp, user: &str, song_id: &str, days_ago: i64) {
    let conn = app.state.storage.pool().get().expect("pool conn");
    let timestamp = (chrono::Utc::now() - chrono::Duration::days(days_ago)).to_rfc3339();
    conn.execute(
        "UPDATE songs SET last_played = ?1 WHERE user_id = ?2 AND id = ?3",
        params![timestamp, user, song_id],
    )
    .expect("backdate last_played");
}

#[tokio::test]
async fn a_song_played_inside_the_window_is_excluded_and_outside_it_is_eligible() {
    let app = common::spawn_app("http://127.0.0.1:1").await;

    let metadata = vec![
        SongMetadata {
            id: "recent".into(),
            title: "Recent".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration: 200,
            cover_art: None,
        },
        SongMetadata {
            id: "stale".into(),
            title: "Stale".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration: 200,
            cover_art: None,
        },
    ];
    app.state.storage.store_songs("alice", &metadata).expect("seed songs");

    // Played 5 days ago: still inside the 14-day replay window, excluded.
    backdate_last_played(&app, "alice", "recent", 5);
    // Played 20 days ago: outside the window, eligible again.
    backdate_last_played(&app, "alice", "stale", 20);

    let sampled = app.state.shuffle.weighted_sample("alice", 10).expect("sample");
    let ids: Vec<&str> = sampled.iter().map(|s| s.id.as_str()).collect();

    assert!(!ids.contains(&"recent"), "recently-played song should be excluded from candidates");
    assert!(ids.contains(&"stale"), "song outside the replay window should be eligible");
}
