use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::extractor::youtube::{YoutubeExtractor, YoutubeSearcher};
use crate::extractor::{Extractor, Provider, ProviderConfig, Searcher, Track};

const API_URL: &str = "https://api.spotify.com/v1";

#[derive(Debug, Clone, Copy, PartialEq)]
enum UrlKind {
    Track,
    Album,
    Playlist,
}

fn classify(input: &str) -> Option<(String, UrlKind)> {
    let url = reqwest::Url::parse(input).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if url.host_str()? != "open.spotify.com" {
        return None;
    }
    let segments: Vec<&str> = url.path().split('/').collect();
    if segments.len() != 3 || !segments[0].is_empty() {
        return None;
    }
    let kind = match segments[1] {
        "track" => UrlKind::Track,
        "album" => UrlKind::Album,
        "playlist" => UrlKind::Playlist,
        _ => return None,
    };
    Some((segments[2].to_string(), kind))
}

struct ApiToken {
    token: String,
    expires: DateTime<Utc>,
}

impl Default for ApiToken {
    fn default() -> Self {
        Self {
            token: String::new(),
            expires: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// Resolves Spotify URLs by matching tracks against the video provider.
pub struct SpotifyExtractor {
    http: reqwest::Client,
    token: Mutex<ApiToken>,
    yt_searcher: YoutubeSearcher,
    yt_searcher_cfg: ProviderConfig,
    yt_extractor: YoutubeExtractor,
    yt_extractor_cfg: ProviderConfig,
}

impl SpotifyExtractor {
    pub fn new() -> Self {
        let yt_searcher = YoutubeSearcher::new();
        let yt_searcher_cfg = yt_searcher.default_config();
        let yt_extractor = YoutubeExtractor::new();
        let yt_extractor_cfg = yt_extractor.default_config();
        Self {
            http: reqwest::Client::new(),
            token: Mutex::new(ApiToken::default()),
            yt_searcher,
            yt_searcher_cfg,
            yt_extractor,
            yt_extractor_cfg,
        }
    }

    /// The anonymous web API token, refreshed from the site HTML when
    /// stale.
    async fn api_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if Utc::now() < token.expires {
            return Ok(token.token.clone());
        }
        let body = self
            .http
            .get("https://open.spotify.com")
            .send()
            .await?
            .text()
            .await?;
        let session = parse_session_data(&body)?;
        token.token = session.access_token;
        token.expires = DateTime::from_timestamp_millis(session.access_token_expiration_timestamp_ms)
            .ok_or(Error::SessionData)?;
        Ok(token.token.clone())
    }

    async fn api_get(&self, url: &str) -> Result<reqwest::Response> {
        let token = self.api_token().await?;
        Ok(self
            .http
            .get(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .bearer_auth(token)
            .send()
            .await?)
    }

    async fn get_track(&self, id: &str) -> Result<Track> {
        let resp = self.api_get(&format!("{API_URL}/tracks/{id}")).await?;
        let data: TrackData = resp.json().await.map_err(|_| Error::ApiResponse)?;
        if data.artists.is_empty() {
            return Err(Error::InvalidTrackData);
        }

        let query = format!("{} - {}", data.name, data.artists_string());
        let results = self
            .yt_searcher
            .search(&self.yt_searcher_cfg, &query)
            .await?;
        if results.is_empty() {
            return Err(Error::TrackNotFound);
        }

        let meta = MatchMeta::from_track(&data);
        let (best_idx, _) = results
            .iter()
            .enumerate()
            .min_by_key(|(idx, candidate)| score_candidate(&meta, candidate, *idx))
            .ok_or(Error::TrackNotFound)?;

        let video = self
            .yt_extractor
            .extract(&self.yt_extractor_cfg, &results[best_idx].source_url)
            .await?;
        if video.len() != 1 {
            return Err(Error::UnableToGetStream);
        }
        let video = video.into_iter().next().ok_or(Error::UnableToGetStream)?;

        Ok(Track {
            stream_url: video.stream_url,
            title: format!("{} - {}", data.artists_string(), data.name),
            uploader: data.artists_string(),
            duration: video.duration,
            expires: video.expires,
            source_url: data.external_urls.spotify,
            ..Default::default()
        })
    }

    async fn get_playlist(&self, id: &str) -> Result<Vec<Track>> {
        let mut url = format!("{API_URL}/playlists/{id}");
        let mut page_only = false;
        let mut playlist_url = String::new();
        let mut playlist_title = String::new();
        let mut res = Vec::new();
        loop {
            let resp = self.api_get(&url).await?;
            let (items, next) = if page_only {
                let page: PlaylistTracks = resp.json().await.map_err(|_| Error::ApiResponse)?;
                (page.items, page.next)
            } else {
                let data: PlaylistData = resp.json().await.map_err(|_| Error::ApiResponse)?;
                playlist_url = data.external_urls.spotify;
                playlist_title = data.name;
                (data.tracks.items, data.tracks.next)
            };
            for item in items {
                res.push(superficial_track(
                    item.track,
                    &playlist_url,
                    &playlist_title,
                ));
            }
            match next {
                Some(n) if !n.is_empty() => {
                    url = n;
                    page_only = true;
                }
                _ => break,
            }
        }
        Ok(res)
    }

    async fn get_album(&self, id: &str) -> Result<Vec<Track>> {
        let mut url = format!("{API_URL}/albums/{id}");
        let mut page_only = false;
        let mut album_url = String::new();
        let mut album_title = String::new();
        let mut res = Vec::new();
        loop {
            let resp = self.api_get(&url).await?;
            let (items, next) = if page_only {
                let page: AlbumTracks = resp.json().await.map_err(|_| Error::ApiResponse)?;
                (page.items, page.next)
            } else {
                let data: AlbumData = resp.json().await.map_err(|_| Error::ApiResponse)?;
                album_url = data.external_urls.spotify;
                album_title = data.name;
                (data.tracks.items, data.tracks.next)
            };
            for track in items {
                res.push(superficial_track(track, &album_url, &album_title));
            }
            match next {
                Some(n) if !n.is_empty() => {
                    url = n;
                    page_only = true;
                }
                _ => break,
            }
        }
        Ok(res)
    }
}

impl Provider for SpotifyExtractor {}

#[async_trait]
impl Extractor for SpotifyExtractor {
    fn matches(&self, _cfg: &ProviderConfig, input: &str) -> bool {
        classify(input).is_some()
    }

    async fn extract(&self, _cfg: &ProviderConfig, input: &str) -> Result<Vec<Track>> {
        match classify(input) {
            Some((id, UrlKind::Track)) => Ok(vec![self.get_track(&id).await?]),
            Some((id, UrlKind::Album)) => self.get_album(&id).await,
            Some((id, UrlKind::Playlist)) => self.get_playlist(&id).await,
            None => Err(Error::InvalidInput),
        }
    }
}

/// A collection entry before re-extraction fills in the stream URL.
fn superficial_track(track: TrackData, collection_url: &str, collection_title: &str) -> Track {
    Track {
        source_url: track.external_urls.spotify.clone(),
        title: format!("{} - {}", track.artists_string(), track.name),
        uploader: track.artists_string(),
        playlist_url: collection_url.to_string(),
        playlist_title: collection_title.to_string(),
        ..Default::default()
    }
}

pub(crate) struct MatchMeta {
    name: String,
    artists: Vec<String>,
    joined_artists: String,
    duration_secs: i64,
}

impl MatchMeta {
    fn from_track(data: &TrackData) -> Self {
        Self::new(
            data.name.clone(),
            data.artists.iter().map(|a| a.name.clone()).collect(),
            data.duration_ms / 1000,
        )
    }

    pub(crate) fn new(name: String, artists: Vec<String>, duration_secs: i64) -> Self {
        let joined_artists = artists.join(", ");
        Self {
            name,
            artists,
            joined_artists,
            duration_secs,
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_uppercase().contains(&needle.to_uppercase())
}

/// How likely `candidate` is the right video for the track; lower wins.
///
/// The general shape is `rank - accuracy / penalty`: accuracy rewards
/// superficial matches (title, artists, duration), penalty punishes hints
/// of a wrong upload (remix, live, far-off duration). Both are
/// multiplicative, so stacked signals weigh exponentially; an official
/// artist upload makes penalties more credible, so they get squared.
pub(crate) fn score_candidate(meta: &MatchMeta, candidate: &Track, rank: usize) -> i64 {
    let mut accuracy = 1.0f64;
    let mut penalty = 1.0f64;
    let mut square_penalty = false;

    if candidate.official_artist || candidate.uploader.ends_with(" - Topic") {
        accuracy *= 4.0;
        square_penalty = true;
    }
    if contains_ci(&candidate.title, &meta.name) {
        accuracy *= 4.0;
    }

    let mut matching = 0.0;
    let mut first_matches = false;
    for (i, artist) in meta.artists.iter().enumerate() {
        if contains_ci(&candidate.uploader, artist) || contains_ci(&candidate.title, artist) {
            matching += 1.0;
            if i == 0 {
                first_matches = true;
            }
        }
    }
    if first_matches {
        accuracy *= 2.0;
    }
    accuracy *= 2.0 * (matching / meta.artists.len() as f64);

    let duration_dist = (candidate.duration - meta.duration_secs).abs();
    if duration_dist <= 5 {
        accuracy *= 8.0;
    } else if duration_dist >= 300 {
        penalty *= 16.0;
    }

    let only_title_has = |word: &str| {
        contains_ci(&candidate.title, word)
            && !contains_ci(&meta.name, word)
            && !contains_ci(&meta.joined_artists, word)
    };
    if ["instrumental", "cover", "live", "album"]
        .iter()
        .any(|w| only_title_has(w))
    {
        penalty *= 8.0;
    }
    if only_title_has("remix") || only_title_has("rmx") {
        penalty *= 8.0;
    } else if only_title_has("mix") {
        penalty *= 6.0;
    }
    if only_title_has("vip") {
        penalty *= 6.0;
    }

    let total = if square_penalty { penalty * penalty } else { penalty };
    rank as i64 - (accuracy / total) as i64
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionData {
    access_token: String,
    access_token_expiration_timestamp_ms: i64,
}

/// Pulls the embedded session blob out of the site HTML.
fn parse_session_data(body: &str) -> Result<SessionData> {
    let start = body
        .find("{\"accessToken\":\"")
        .ok_or(Error::SessionData)?;
    serde_json::Deserializer::from_str(&body[start..])
        .into_iter::<SessionData>()
        .next()
        .ok_or(Error::SessionData)?
        .map_err(|_| Error::SessionData)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct TrackData {
    artists: Vec<ArtistData>,
    duration_ms: i64,
    external_urls: ExternalUrls,
    name: String,
}

impl TrackData {
    fn artists_string(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ArtistData {
    name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ExternalUrls {
    spotify: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PlaylistData {
    external_urls: ExternalUrls,
    name: String,
    tracks: PlaylistTracks,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PlaylistTracks {
    items: Vec<PlaylistItem>,
    next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PlaylistItem {
    track: TrackData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AlbumData {
    external_urls: ExternalUrls,
    name: String,
    tracks: AlbumTracks,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AlbumTracks {
    items: Vec<TrackData>,
    next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_spotify_urls() {
        assert_eq!(
            classify("https://open.spotify.com/track/abc"),
            Some(("abc".to_string(), UrlKind::Track))
        );
        assert_eq!(
            classify("https://open.spotify.com/album/xyz"),
            Some(("xyz".to_string(), UrlKind::Album))
        );
        assert_eq!(
            classify("https://open.spotify.com/playlist/p1"),
            Some(("p1".to_string(), UrlKind::Playlist))
        );
        assert_eq!(classify("https://open.spotify.com/artist/a1"), None);
        assert_eq!(classify("https://example.com/track/abc"), None);
        assert_eq!(classify("open.spotify.com/track/abc"), None);
    }

    #[test]
    fn parses_the_session_blob_out_of_html() {
        let body = r#"<script>stuff</script><script>{"accessToken":"tok-1","accessTokenExpirationTimestampMs":1700000000000,"isAnonymous":true}</script>"#;
        let session = parse_session_data(body).unwrap();
        assert_eq!(session.access_token, "tok-1");
        assert_eq!(session.access_token_expiration_timestamp_ms, 1700000000000);
        assert!(parse_session_data("<html>no token here</html>").is_err());
    }

    fn candidate(title: &str, uploader: &str, duration: i64, official: bool) -> Track {
        Track {
            title: title.to_string(),
            uploader: uploader.to_string(),
            duration,
            official_artist: official,
            ..Default::default()
        }
    }

    fn meta() -> MatchMeta {
        MatchMeta::new(
            "Black Velvet".to_string(),
            vec!["Infected Mushroom".to_string(), "Ninet Tayeb".to_string()],
            263,
        )
    }

    #[test]
    fn prefers_official_artist_uploads() {
        let meta = meta();
        let worse = candidate("Black Velvet", "randomchannel", 263, false);
        let better = candidate("Black Velvet", "Infected Mushroom - Topic", 263, false);
        assert!(score_candidate(&meta, &better, 1) < score_candidate(&meta, &worse, 0));
    }

    #[test]
    fn punishes_far_off_durations() {
        let meta = meta();
        let close = candidate("Infected Mushroom - Black Velvet", "x", 261, false);
        let far = candidate("Infected Mushroom - Black Velvet", "x", 1200, false);
        assert!(score_candidate(&meta, &close, 0) < score_candidate(&meta, &far, 0));
    }

    #[test]
    fn punishes_title_only_remix_markers() {
        let meta = meta();
        let plain = candidate("Infected Mushroom - Black Velvet", "x", 263, false);
        let remix = candidate("Infected Mushroom - Black Velvet (Remix)", "x", 263, false);
        let vip = candidate("Infected Mushroom - Black Velvet VIP", "x", 263, false);
        assert!(score_candidate(&meta, &plain, 0) < score_candidate(&meta, &remix, 0));
        assert!(score_candidate(&meta, &plain, 0) < score_candidate(&meta, &vip, 0));
    }

    #[test]
    fn remix_marker_in_the_track_name_is_not_penalized() {
        let meta = MatchMeta::new("Song (Remix)".to_string(), vec!["Artist".to_string()], 100);
        let a = candidate("Artist - Song (Remix)", "Artist", 100, false);
        let b = candidate("Artist - Song", "Artist", 100, false);
        assert!(score_candidate(&meta, &a, 0) <= score_candidate(&meta, &b, 0));
    }

    #[test]
    fn rank_breaks_ties() {
        let meta = meta();
        let c = candidate("Infected Mushroom - Black Velvet", "Infected Mushroom", 263, false);
        let results = vec![c.clone(), c.clone(), c];
        let best = results
            .iter()
            .enumerate()
            .min_by_key(|(idx, cand)| score_candidate(&meta, cand, *idx))
            .map(|(idx, _)| idx)
            .unwrap();
        assert_eq!(best, 0);
    }
}
