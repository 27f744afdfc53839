use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::extractor::{Extractor, Provider, ProviderConfig, Track};

const DEFAULT_DOWNLOADER: &str = "yt-dlp";

/// Catch-all extractor shelling out to a youtube-dl-compatible downloader.
/// Registered last, it picks up every http(s) URL the native providers
/// don't claim.
pub struct YtdlExtractor;

impl YtdlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Provider for YtdlExtractor {
    fn default_config(&self) -> ProviderConfig {
        ProviderConfig::from([("youtube-dl-path".to_string(), DEFAULT_DOWNLOADER.into())])
    }
}

#[async_trait]
impl Extractor for YtdlExtractor {
    fn matches(&self, _cfg: &ProviderConfig, input: &str) -> bool {
        input.starts_with("http://") || input.starts_with("https://")
    }

    async fn extract(&self, cfg: &ProviderConfig, input: &str) -> Result<Vec<Track>> {
        let path = cfg
            .get("youtube-dl-path")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_DOWNLOADER);
        ytdl_get(path, input).await
    }
}

/// Runs the downloader in metadata mode and converts its JSON documents.
async fn ytdl_get(downloader_path: &str, input: &str) -> Result<Vec<Track>> {
    let mut child = Command::new(downloader_path)
        .arg("-j")
        .arg(input)
        // The downloader mangles some characters under LC_ALL=C.
        .env("LC_ALL", "en_US.UTF-8")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");

    let error_scan = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(msg) = line.strip_prefix("ERROR: ") {
                last = Some(msg.to_string());
            }
        }
        last
    });

    let mut raw = String::new();
    BufReader::new(stdout).read_to_string(&mut raw).await?;

    let status = child.wait().await?;
    let tool_error = error_scan.await.unwrap_or(None);
    if !status.success() {
        return Err(match tool_error {
            Some(msg) if msg.starts_with("Unsupported URL: ") => Error::UnsupportedUrl,
            Some(msg) => Error::Downloader(msg),
            None => Error::Downloader(format!("downloader exited with {status}")),
        });
    }

    parse_metadata_stream(&raw)
}

/// One metadata document per line; tracks keep the last video-free format,
/// which the downloader orders best-last.
fn parse_metadata_stream(raw: &str) -> Result<Vec<Track>> {
    let mut res = Vec::new();
    for document in serde_json::Deserializer::from_str(raw).into_iter::<YtdlMetadata>() {
        let m = document?;
        if let Some(format) = m.formats.iter().rev().find(|f| f.vcodec == "none") {
            res.push(Track {
                source_url: m.webpage_url,
                stream_url: format.url.clone(),
                title: m.title,
                playlist_title: m.playlist.unwrap_or_default(),
                description: m.description,
                uploader: m.uploader,
                duration: m.duration as i64,
                expires: Utc::now() + chrono::Duration::days(3650),
                ..Default::default()
            });
        }
    }
    Ok(res)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct YtdlMetadata {
    title: String,
    duration: f64,
    webpage_url: String,
    playlist: Option<String>,
    uploader: String,
    description: String,
    formats: Vec<YtdlFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct YtdlFormat {
    url: String,
    vcodec: String,
}
