//! `stream`/`scrobble` hooks defer to the upstream after recording their
//! side effects, so these scenarios need a real (mocked) upstream behind
//! the proxy.

mod common;

use subsoxy::models::SongMetadata;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ok_envelope() -> serde_json::Value {
    serde_json::json!({ "subsonic-response": { "status": "ok", "version": "1.15.0" } })
}

async fn seed_songs(storage: &subsoxy::storage::Storage, user: &str, ids: &[&str]) {
    let metadata: Vec<SongMetadata> = ids
        .iter()
        .map(|id| SongMetadata {
            id: id.to_string(),
            title: format!("Title {id}"),
            artist: "Artist".into(),
            album: "Album".into(),
            duration: 200,
            cover_art: None,
        })
        .collect();
    storage.store_songs(user, &metadata).expect("seed songs");
}

#[tokio::test]
async fn streaming_a_different_song_records_a_skip_for_the_previous_one() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/scrobble"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&upstream)
        .await;

    let app = common::spawn_app(&upstream.uri()).await;
    seed_songs(&app.state.storage, "alice", &["song-a", "song-b"]).await;

    app.client
        .get(format!("{}/rest/stream?u=alice&id=song-a", app.base_url))
        .send()
        .await
        .expect("stream A");

    app.client
        .get(format!("{}/rest/stream?u=alice&id=song-b", app.base_url))
        .send()
        .await
        .expect("stream B");

    app.client
        .get(format!("{}/rest/scrobble?u=alice&id=song-b&submission=true", app.base_url))
        .send()
        .await
        .expect("scrobble B");

    let songs = app.state.storage.get_all_songs("alice").expect("songs");
    let song_a = songs.iter().find(|s| s.id == "song-a").expect("song a present");
    let song_b = songs.iter().find(|s| s.id == "song-b").expect("song b present");

    assert_eq!(song_a.skip_count, 1);
    assert!(song_a.last_skipped.is_some());
    assert_eq!(song_b.play_count, 1);
    assert!(song_b.last_played.is_some());

    assert_eq!(app.state.shuffle.get_last_played("alice"), Some("song-b".to_string()));
}

#[tokio::test]
async fn scrobble_without_submission_emits_nothing() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/scrobble"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope()))
        .mount(&upstream)
        .await;

    let app = common::spawn_app(&upstream.uri()).await;
    seed_songs(&app.state.storage, "bob", &["song-x"]).await;

    app.client
        .get(format!("{}/rest/stream?u=bob&id=song-x", app.base_url))
        .send()
        .await
        .expect("stream");

    app.client
        .get(format!("{}/rest/scrobble?u=bob&id=song-x&submission=false", app.base_url))
        .send()
        .await
        .expect("scrobble non-submission");

    let songs = app.state.storage.get_all_songs("bob").expect("songs");
    let song_x = songs.iter().find(|s| s.id == "song-x").expect("song present");
    assert_eq!(song_x.play_count, 0);
    assert_eq!(song_x.skip_count, 0);
}
