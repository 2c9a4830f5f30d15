//! Multi-tenant synchronization loop
//!
//! Discovers each captured user's library by Subsonic directory traversal,
//! diffs it against the local store, and preserves per-song statistics
//! across refreshes. Runs hourly, plus once immediately whenever the vault
//! reports a brand-new credential capture.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::error::AppError;
use crate::models::{DiffSummary, SongMetadata};
use crate::storage::Storage;
use crate::subsonic::{CLIENT_ID, SUBSONIC_VERSION};
use crate::vault::{Credential, Vault};

const SYNC_INTERVAL: Duration = Duration::from_secs(3600);
const STAGGER_SECONDS: u64 = 2;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs until `shutdown` fires. The ticker's first tick is one full interval
/// out - the initial sync is not forced, it waits for `trigger` instead.
pub async fn run_sync_loop(
    client: reqwest::Client,
    upstream_url: String,
    vault: std::sync::Arc<Vault>,
    storage: std::sync::Arc<Storage>,
    mut trigger: mpsc::Receiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + SYNC_INTERVAL, SYNC_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::info!("hourly sync tick");
                sync_all(&client, &upstream_url, &vault, &storage).await;
            }
            Some(()) = trigger.recv() => {
                tracing::info!("immediate sync triggered by new credential capture");
                sync_all(&client, &upstream_url, &vault, &storage).await;
            }
            _ = shutdown.recv() => {
                tracing::info!("sync loop shutting down");
                break;
            }
        }
    }
}

async fn sync_all(client: &reqwest::Client, upstream_url: &str, vault: &Vault, storage: &Storage) {
    let credentials = match vault.get_all() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to snapshot credential vault for sync");
            return;
        }
    };

    let mut usernames: Vec<&String> = credentials.keys().collect();
    usernames.sort();

    for (i, username) in usernames.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(STAGGER_SECONDS * i as u64)).await;
        }
        let credential = &credentials[*username];
        match sync_user(client, upstream_url, storage, username, credential).await {
            Ok(summary) => {
                tracing::info!(
                    user = %username,
                    added = summary.added,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    deleted = summary.deleted,
                    "sync complete"
                );
            }
            Err(e) => {
                tracing::warn!(user = %username, error = %e, "sync failed for user, skipping this cycle");
            }
        }
    }
}

async fn sync_user(
    client: &reqwest::Client,
    upstream_url: &str,
    storage: &Storage,
    username: &str,
    credential: &Credential,
) -> Result<DiffSummary, AppError> {
    let songs = discover_library(client, upstream_url, username, credential).await?;
    storage.store_songs(username, &songs)
}

fn base_params<'a>(username: &'a str, credential: &'a Credential) -> Vec<(&'static str, std::borrow::Cow<'a, str>)> {
    let mut params: Vec<(&'static str, std::borrow::Cow<str>)> = vec![
        ("u", username.into()),
        ("v", SUBSONIC_VERSION.into()),
        ("c", CLIENT_ID.into()),
        ("f", "json".into()),
    ];
    match credential {
        Credential::Password(p) => params.push(("p", p.as_str().into())),
        Credential::Token { token, salt } => {
            params.push(("t", token.as_str().into()));
            params.push(("s", salt.as_str().into()));
        }
    }
    params
}

async fn get_json(
    client: &reqwest::Client,
    upstream_url: &str,
    endpoint: &str,
    username: &str,
    credential: &Credential,
    extra: &[(&str, &str)],
) -> Result<serde_json::Value, AppError> {
    let mut url = reqwest::Url::parse(&format!("{}/rest/{}", upstream_url, endpoint))
        .map_err(|e| AppError::network("bad_upstream_url", "could not build sync URL").with_cause(e))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in base_params(username, credential) {
            pairs.append_pair(k, &v);
        }
        for (k, v) in extra {
            pairs.append_pair(k, v);
        }
    }

    let response = client
        .get(url)
        .timeout(UPSTREAM_TIMEOUT)
        .send()
        .await
        .map_err(|e| AppError::network("sync_request_failed", format!("{} request failed", endpoint)).with_cause(e))?;

    if !response.status().is_success() {
        return Err(AppError::network(
            "sync_http_error",
            format!("{} returned HTTP {}", endpoint, response.status()),
        ));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AppError::network("sync_parse_failed", format!("{} response was not JSON", endpoint)).with_cause(e))?;

    let status = body
        .get("subsonic-response")
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("failed");

    if status != "ok" {
        return Err(AppError::auth(
            "sync_auth_failed",
            format!("{} rejected by upstream for user", endpoint),
        ));
    }

    Ok(body["subsonic-response"].clone())
}

/// Directory traversal: folders -> indexes -> artists -> albums -> songs.
async fn discover_library(
    client: &reqwest::Client,
    upstream_url: &str,
    username: &str,
    credential: &Credential,
) -> Result<Vec<SongMetadata>, AppError> {
    let folders_resp = get_json(client, upstream_url, "getMusicFolders", username, credential, &[]).await?;
    let folder_ids: Vec<String> = folders_resp["musicFolders"]["musicFolder"]
        .as_array()
        .map(|folders| folders.iter().filter_map(|f| f["id"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut songs = Vec::new();

    for folder_id in folder_ids {
        let indexes_resp = get_json(
            client,
            upstream_url,
            "getIndexes",
            username,
            credential,
            &[("musicFolderId", folder_id.as_str())],
        )
        .await?;

        let artist_ids = collect_artist_ids(&indexes_resp);
        for artist_id in artist_ids {
            traverse_directory(client, upstream_url, username, credential, &artist_id, &mut songs).await?;
        }
    }

    Ok(songs)
}

fn collect_artist_ids(indexes_resp: &serde_json::Value) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(index_array) = indexes_resp["indexes"]["index"].as_array() {
        for index in index_array {
            if let Some(artists) = index["artist"].as_array() {
                for artist in artists {
                    if let Some(id) = artist["id"].as_str() {
                        ids.push(id.to_string());
                    }
                }
            }
        }
    }
    ids
}

/// A directory's children are either further directories (albums) or songs.
/// Recurse into child directories, collect song leaves.
fn traverse_directory<'a>(
    client: &'a reqwest::Client,
    upstream_url: &'a str,
    username: &'a str,
    credential: &'a Credential,
    directory_id: &'a str,
    out: &'a mut Vec<SongMetadata>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AppError>> + Send + 'a>> {
    Box::pin(async move {
        let dir_resp = get_json(
            client,
            upstream_url,
            "getMusicDirectory",
            username,
            credential,
            &[("id", directory_id)],
        )
        .await?;

        let children = dir_resp["directory"]["child"].as_array().cloned().unwrap_or_default();
        for child in children {
            if child["isDir"].as_bool().unwrap_or(false) {
                if let Some(child_id) = child["id"].as_str() {
                    traverse_directory(client, upstream_url, username, credential, child_id, out).await?;
                }
            } else if let Some(metadata) = song_metadata_from_child(&child) {
                out.push(metadata);
            }
        }
        Ok(())
    })
}

fn song_metadata_from_child(child: &serde_json::Value) -> Option<SongMetadata> {
    let id = child["id"].as_str()?.to_string();
    Some(SongMetadata {
        id,
        title: child["title"].as_str().unwrap_or("").to_string(),
        artist: child["artist"].as_str().unwrap_or("").to_string(),
        album: child["album"].as_str().unwrap_or("").to_string(),
        duration: child["duration"].as_i64().unwrap_or(0),
        cover_art: child["coverArt"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_artist_ids_flattens_nested_indexes() {
        let resp = serde_json::json!({
            "indexes": {
                "index": [
                    { "name": "A", "artist": [{ "id": "art-1", "name": "Artist One" }] },
                    { "name": "B", "artist": [{ "id": "art-2", "name": "Artist Two" }, { "id": "art-3", "name": "Artist Three" }] }
                ]
            }
        });
        let ids = collect_artist_ids(&resp);
        assert_eq!(ids, vec!["art-1", "art-2", "art-3"]);
    }

    #[test]
    fn song_metadata_from_child_reads_fields() {
        let child = serde_json::json!({
            "id": "song-1",
            "title": "Title",
            "artist": "Artist",
            "album": "Album",
            "duration": 210,
            "coverArt": "cover-1",
            "isDir": false
        });
        let metadata = song_metadata_from_child(&child).unwrap();
        assert_eq!(metadata.id, "song-1");
        assert_eq!(metadata.duration, 210);
        assert_eq!(metadata.cover_art, Some("cover-1".to_string()));
    }

    #[test]
    fn song_metadata_from_child_requires_id() {
        let child = serde_json::json!({ "title": "No id" });
        assert!(song_metadata_from_child(&child).is_none());
    }
}
