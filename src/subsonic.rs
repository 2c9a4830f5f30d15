//! Subsonic wire format
//!
//! Serializes shuffle results into the `subsonic-response` envelope, in
//! either JSON (`serde_json`) or XML (`quick-xml`), selected by the
//! client's `f` query parameter.

use serde::Serialize;

use crate::models::Song;

pub const SUBSONIC_VERSION: &str = "1.15.0";
pub const CLIENT_ID: &str = "subsoxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
}

impl ResponseFormat {
    /// Parse the `f` query parameter; anything other than exactly `"xml"` is JSON.
    pub fn from_param(f: Option<&str>) -> Self {
        match f {
            Some(v) if v.eq_ignore_ascii_case("xml") => ResponseFormat::Xml,
            _ => ResponseFormat::Json,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ResponseFormat::Json => "application/json",
            ResponseFormat::Xml => "application/xml",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SongDto {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: i64,
    #[serde(rename = "coverArt", skip_serializing_if = "Option::is_none")]
    pub cover_art: Option<String>,
}

impl From<&Song> for SongDto {
    fn from(song: &Song) -> Self {
        SongDto {
            id: song.id.clone(),
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            duration: song.duration,
            cover_art: song.cover_art.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "songs")]
struct SongsDto {
    song: Vec<SongDto>,
}

#[derive(Debug, Serialize)]
struct SubsonicResponseDto {
    status: &'static str,
    version: &'static str,
    songs: SongsDto,
}

#[derive(Debug, Serialize)]
struct EnvelopeDto {
    #[serde(rename = "subsonic-response")]
    subsonic_response: SubsonicResponseDto,
}

/// Render `getRandomSongs`'s song list as a JSON body.
pub fn random_songs_json(songs: &[Song]) -> String {
    let envelope = EnvelopeDto {
        subsonic_response: SubsonicResponseDto {
            status: "ok",
            version: SUBSONIC_VERSION,
            songs: SongsDto { song: songs.iter().map(SongDto::from).collect() },
        },
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| {
        r#"{"subsonic-response":{"status":"failed","version":"1.15.0"}}"#.to_string()
    })
}

/// Render `getRandomSongs`'s song list as an XML body.
///
/// `quick-xml`'s serde support has no natural representation for the
/// `<subsonic-response status="..." version="...">` attribute-bearing root,
/// so the envelope is written by hand around a `quick-xml`-serialized
/// `<songs>` body.
pub fn random_songs_xml(songs: &[Song]) -> String {
    let songs_dto = SongsDto { song: songs.iter().map(SongDto::from).collect() };
    let songs_xml = quick_xml::se::to_string(&songs_dto).unwrap_or_else(|_| "<songs/>".to_string());
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><subsonic-response status="ok" version="{}">{}</subsonic-response>"#,
        SUBSONIC_VERSION, songs_xml
    )
}

pub fn random_songs_body(format: ResponseFormat, songs: &[Song]) -> String {
    match format {
        ResponseFormat::Json => random_songs_json(songs),
        ResponseFormat::Xml => random_songs_xml(songs),
    }
}
