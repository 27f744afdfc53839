mod decrypt;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::extractor::{Extractor, Provider, ProviderConfig, Searcher, Suggester, Track};
use crate::util;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const PLAYLIST_URL: &str = "https://www.youtube.com/playlist?list=";
const VERIFIED_ARTIST_BADGE: &str = "BADGE_STYLE_TYPE_VERIFIED_ARTIST";

#[derive(Debug, Clone, Copy, PartialEq)]
enum UrlKind {
    Video,
    Playlist,
}

fn classify(require_direct_playlist_url: bool, input: &str) -> Option<UrlKind> {
    let url = reqwest::Url::parse(input).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    match url.host_str()? {
        "www.youtube.com" | "youtube.com" => {
            if url.path() != "/watch" && url.path() != "/playlist" {
                return None;
            }
            let has_list = url.query_pairs().any(|(k, _)| k == "list");
            if has_list && (!require_direct_playlist_url || url.path() == "/playlist") {
                Some(UrlKind::Playlist)
            } else {
                Some(UrlKind::Video)
            }
        }
        "youtu.be" => Some(UrlKind::Video),
        _ => None,
    }
}

pub struct YoutubeExtractor {
    http: reqwest::Client,
    decryptor: Mutex<decrypt::Decryptor>,
}

impl YoutubeExtractor {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            decryptor: Mutex::new(decrypt::Decryptor::new()),
        }
    }

    /// Resolves a watch URL into a playable track. Scraped stream URLs are
    /// occasionally dead on arrival, so each one is probed and the scrape
    /// repeated a few times before giving up on the decryptor.
    async fn get_video(&self, video_url: &str) -> Result<Track> {
        for _ in 0..10 {
            let track = self.scrape_video(video_url).await?;
            if stream_ok(&self.http, &track.stream_url).await {
                return Ok(track);
            }
            log::debug!("got an unusable stream URL for {video_url}, retrying");
        }
        Err(Error::DecryptorBroken)
    }

    async fn scrape_video(&self, video_url: &str) -> Result<Track> {
        let body = self.http.get(video_url).send().await?.text().await?;
        let data: PlayerData = first_json(extract_js_var(&body, "ytInitialPlayerResponse")?)?;

        let best = data
            .streaming_data
            .adaptive_formats
            .iter()
            .filter(|f| f.mime_type.starts_with("audio/"))
            .max_by_key(|f| f.bitrate)
            .ok_or(Error::NoSuitableFormat)?;

        let duration = data.video_details.length_seconds.parse::<i64>().unwrap_or(-1);
        let expires_in = data
            .streaming_data
            .expires_in_seconds
            .parse::<i64>()
            .map_err(|_| Error::MalformedJson)?;

        let stream_url = if !best.url.is_empty() {
            best.url.clone()
        } else {
            // Music streams hide the URL behind a signature cipher.
            let cipher = &best.signature_cipher;
            let sig = query_param(cipher, "s").ok_or(Error::SignatureCipher)?;
            let sig_param = query_param(cipher, "sp").ok_or(Error::SignatureCipher)?;
            let base_url = query_param(cipher, "url").ok_or(Error::SignatureCipher)?;
            let decrypted = self
                .decryptor
                .lock()
                .await
                .decrypt(&self.http, &sig)
                .await?;
            format!("{base_url}&{sig_param}={decrypted}")
        };

        Ok(Track {
            source_url: video_url.to_string(),
            stream_url,
            title: data.video_details.title,
            description: data.video_details.short_description,
            uploader: data.video_details.author,
            duration,
            expires: Utc::now() + chrono::Duration::seconds(expires_in),
            ..Default::default()
        })
    }

    /// Walks a playlist through the watch-page sidebar: each page carries a
    /// window of upcoming entries, the last of which seeds the next fetch.
    /// Superficial metadata only; stream URLs come from re-extraction.
    async fn get_playlist(&self, playlist_url: &str) -> Result<Vec<Track>> {
        let url = reqwest::Url::parse(playlist_url).map_err(|_| Error::InvalidInput)?;
        let list_id = url
            .query_pairs()
            .find(|(k, _)| k == "list")
            .map(|(_, v)| v.into_owned())
            .ok_or(Error::InvalidInput)?;

        let mut video_id = String::new();
        let mut index: usize = 0;
        let mut res: Vec<Track> = Vec::new();
        loop {
            let watch = format!(
                "{WATCH_URL}{video_id}&list={list_id}&index={}",
                index + 1
            );
            let body = self.http.get(&watch).send().await?.text().await?;
            let data: SidebarData = first_json(extract_js_var(&body, "ytInitialData")?)?;
            let playlist = data
                .contents
                .two_column_watch_next_results
                .playlist
                .playlist;

            let mut added = false;
            for item in &playlist.contents {
                let entry = &item.playlist_panel_video_renderer;
                video_id = entry.navigation_endpoint.watch_endpoint.video_id.clone();
                index = entry.navigation_endpoint.watch_endpoint.index;

                if index == res.len() {
                    let uploader = entry
                        .short_byline_text
                        .runs
                        .first()
                        .ok_or(Error::MalformedJson)?
                        .text
                        .clone();
                    let duration = util::parse_duration_seconds(&entry.length_text.simple_text)
                        .map(i64::from)
                        .unwrap_or(-1);
                    res.push(Track {
                        source_url: format!("{WATCH_URL}{video_id}"),
                        title: entry.title.simple_text.clone(),
                        playlist_url: format!("{PLAYLIST_URL}{list_id}"),
                        playlist_title: playlist.title.clone(),
                        uploader,
                        duration,
                        ..Default::default()
                    });
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        Ok(res)
    }
}

impl Provider for YoutubeExtractor {
    fn default_config(&self) -> ProviderConfig {
        ProviderConfig::from([(
            "require-direct-playlist-url".to_string(),
            false.into(),
        )])
    }
}

#[async_trait]
impl Extractor for YoutubeExtractor {
    fn matches(&self, cfg: &ProviderConfig, input: &str) -> bool {
        let direct_only = cfg
            .get("require-direct-playlist-url")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        classify(direct_only, input).is_some()
    }

    async fn extract(&self, cfg: &ProviderConfig, input: &str) -> Result<Vec<Track>> {
        let direct_only = cfg
            .get("require-direct-playlist-url")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        match classify(direct_only, input) {
            Some(UrlKind::Video) => Ok(vec![self.get_video(input).await?]),
            Some(UrlKind::Playlist) => self.get_playlist(input).await,
            None => Err(Error::InvalidInput),
        }
    }
}

pub struct YoutubeSearcher {
    http: reqwest::Client,
}

impl YoutubeSearcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Provider for YoutubeSearcher {}

#[async_trait]
impl Searcher for YoutubeSearcher {
    async fn search(&self, _cfg: &ProviderConfig, input: &str) -> Result<Vec<Track>> {
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencoding::encode(input)
        );
        let body = self.http.get(&url).send().await?.text().await?;
        parse_search(extract_js_var(&body, "ytInitialData")?)
    }
}

pub struct YoutubeSuggester {
    http: reqwest::Client,
}

impl YoutubeSuggester {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Provider for YoutubeSuggester {}

#[async_trait]
impl Suggester for YoutubeSuggester {
    async fn suggest(&self, _cfg: &ProviderConfig, input: &str) -> Result<Vec<String>> {
        let url = format!(
            "https://suggestqueries-clients6.youtube.com/complete/search?client=youtube&ds=yt&q={}",
            urlencoding::encode(input)
        );
        let body = self.http.get(&url).send().await?.text().await?;
        parse_suggestions(&body)
    }
}

async fn stream_ok(http: &reqwest::Client, stream_url: &str) -> bool {
    match http.get(stream_url).send().await {
        Ok(resp) => resp.status() == reqwest::StatusCode::OK,
        Err(_) => false,
    }
}

/// Cuts a `var NAME = {...};` JSON literal out of a scraped page.
fn extract_js_var<'a>(body: &'a str, name: &str) -> Result<&'a str> {
    let marker = format!("var {name} = ");
    let start = body.find(&marker).ok_or(Error::MalformedJson)? + marker.len();
    let rest = &body[start..];
    let end = rest.find(";</script>").ok_or(Error::MalformedJson)?;
    Ok(&rest[..end])
}

/// Parses the leading JSON value, tolerating trailing script code.
fn first_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::Deserializer::from_str(raw)
        .into_iter::<T>()
        .next()
        .ok_or(Error::MalformedJson)?
        .map_err(Error::from)
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k != name {
            return None;
        }
        urlencoding::decode(v).ok().map(|s| s.into_owned())
    })
}

fn parse_search(raw: &str) -> Result<Vec<Track>> {
    let data: SearchData = first_json(raw)?;
    let mut res = Vec::new();
    for section in data
        .contents
        .two_column_search_results_renderer
        .primary_contents
        .section_list_renderer
        .contents
    {
        for item in section.item_section_renderer.contents {
            let video = item.video_renderer;
            if !video.video_id.is_empty() {
                let title = video
                    .title
                    .runs
                    .first()
                    .ok_or(Error::MalformedJson)?
                    .text
                    .clone();
                let uploader = video
                    .long_byline_text
                    .runs
                    .first()
                    .ok_or(Error::MalformedJson)?
                    .text
                    .clone();
                let duration = util::parse_duration_seconds(&video.length_text.simple_text)
                    .map(i64::from)
                    .unwrap_or(-1);
                let official = video
                    .owner_badges
                    .first()
                    .map(|b| b.metadata_badge_renderer.style == VERIFIED_ARTIST_BADGE)
                    .unwrap_or(false);
                res.push(Track {
                    source_url: format!("{WATCH_URL}{}", video.video_id),
                    title,
                    duration,
                    uploader,
                    official_artist: official,
                    ..Default::default()
                });
            } else if !item.playlist_renderer.playlist_id.is_empty() {
                res.push(Track {
                    playlist_url: format!("{PLAYLIST_URL}{}", item.playlist_renderer.playlist_id),
                    playlist_title: item.playlist_renderer.title.simple_text,
                    ..Default::default()
                });
            }
        }
    }
    Ok(res)
}

/// Unwraps the JSONP envelope of the suggestion endpoint.
fn parse_suggestions(raw: &str) -> Result<Vec<String>> {
    let body = raw.strip_prefix("window.google.ac.h(").unwrap_or(raw);
    let body = body.strip_suffix(')').unwrap_or(body);

    let data: Vec<serde_json::Value> = serde_json::from_str(body)?;
    if data.len() != 3 {
        return Err(Error::MalformedJson);
    }
    let entries = data[1].as_array().ok_or(Error::MalformedJson)?;

    let mut res = Vec::new();
    for entry in entries {
        let parts = entry
            .as_array()
            .filter(|a| a.len() == 3)
            .ok_or(Error::MalformedJson)?;
        let suggestion = parts[0].as_str().ok_or(Error::MalformedJson)?;
        res.push(suggestion.to_string());
    }
    Ok(res)
}

// Scraped document shapes, reduced to the fields in use.

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlayerData {
    streaming_data: StreamingData,
    video_details: VideoDetails,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StreamingData {
    expires_in_seconds: String,
    adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AdaptiveFormat {
    url: String,
    signature_cipher: String,
    mime_type: String,
    bitrate: i64,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoDetails {
    title: String,
    length_seconds: String,
    short_description: String,
    author: String,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchData {
    contents: SearchContents,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchContents {
    two_column_search_results_renderer: TwoColumnSearch,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TwoColumnSearch {
    primary_contents: PrimaryContents,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PrimaryContents {
    section_list_renderer: SectionList,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SectionList {
    contents: Vec<SectionItem>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SectionItem {
    item_section_renderer: ItemSection,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ItemSection {
    contents: Vec<SearchResultItem>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchResultItem {
    video_renderer: VideoRenderer,
    playlist_renderer: PlaylistRenderer,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoRenderer {
    video_id: String,
    title: Runs,
    long_byline_text: Runs,
    length_text: SimpleText,
    owner_badges: Vec<Badge>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistRenderer {
    playlist_id: String,
    title: SimpleText,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct Runs {
    runs: Vec<RunText>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RunText {
    text: String,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimpleText {
    simple_text: String,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Badge {
    metadata_badge_renderer: BadgeRenderer,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BadgeRenderer {
    style: String,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SidebarData {
    contents: SidebarContents,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SidebarContents {
    two_column_watch_next_results: WatchNext,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WatchNext {
    playlist: PlaylistWrap,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistWrap {
    playlist: SidebarPlaylist,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SidebarPlaylist {
    title: String,
    contents: Vec<SidebarItem>,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SidebarItem {
    playlist_panel_video_renderer: PanelVideo,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PanelVideo {
    navigation_endpoint: NavigationEndpoint,
    title: SimpleText,
    short_byline_text: Runs,
    length_text: SimpleText,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct NavigationEndpoint {
    watch_endpoint: WatchEndpoint,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WatchEndpoint {
    video_id: String,
    index: usize,
}
