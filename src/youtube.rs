//! yt-dlp backed fetch backend.
//!
//! Metadata and playlist expansion go through the `youtube_dl` crate's JSON
//! interface; payload downloads spawn yt-dlp directly with `-o -` so the
//! audio never touches disk outside the cache. Direct (non-YouTube) URLs
//! bypass yt-dlp and are fetched over plain HTTP.

use crate::error::AudioError;
use crate::fetch::{FetchedAudio, Fetcher};
use crate::source::{SourceKind, SourceRef, TrackMetadata};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use youtube_dl::{download_yt_dlp, YoutubeDl};

pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpFetcher {
    pub fn new() -> YtDlpFetcher {
        YtDlpFetcher {
            binary: PathBuf::from("./yt-dlp"),
        }
    }

    /// Download the yt-dlp binary next to the executable if it is missing.
    pub async fn ensure() -> anyhow::Result<YtDlpFetcher> {
        let exists = tokio::task::spawn_blocking(|| Path::new("./yt-dlp").exists()).await?;
        if !exists {
            info!("Downloading yt-dlp binary");
            download_yt_dlp(".").await?;
        }
        Ok(YtDlpFetcher::new())
    }

    async fn download_audio(&self, source: &SourceRef) -> Result<FetchedAudio, AudioError> {
        let output = tokio::process::Command::new(&self.binary)
            .arg(&source.url)
            .arg("--no-progress")
            .arg("--no-playlist")
            // until symphonia has opus support
            .arg("--format")
            .arg("bestaudio[ext=m4a]")
            .arg("-o")
            .arg("-")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .map_err(|e| AudioError::FetchTransient(format!("failed to run yt-dlp: {e}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!("yt-dlp stderr: {line}");
        }

        if !output.status.success() {
            return Err(classify_failure(&stderr, &source.url));
        }
        if output.stdout.is_empty() {
            return Err(AudioError::FetchUnavailable(format!(
                "yt-dlp produced no audio for {}",
                source.url
            )));
        }

        Ok(FetchedAudio {
            data: output.stdout,
            extension: Some("m4a".to_string()),
        })
    }

    async fn fetch_direct(&self, source: &SourceRef) -> Result<FetchedAudio, AudioError> {
        let response = reqwest::get(&source.url).await.map_err(|e| {
            AudioError::FetchTransient(format!("request to {} failed: {e}", source.url))
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = format!("{} returned {status}", source.url);
            return if status.is_server_error() {
                Err(AudioError::FetchTransient(err))
            } else {
                Err(AudioError::FetchUnavailable(err))
            };
        }

        let bytes = response.bytes().await.map_err(|e| {
            AudioError::FetchTransient(format!("reading body from {} failed: {e}", source.url))
        })?;
        if bytes.is_empty() {
            return Err(AudioError::FetchUnavailable(format!(
                "{} returned an empty body",
                source.url
            )));
        }

        let extension = Path::new(&source.url)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        Ok(FetchedAudio {
            data: bytes.to_vec(),
            extension,
        })
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch_metadata(&self, source: &SourceRef) -> Result<TrackMetadata, AudioError> {
        if source.kind == SourceKind::Direct {
            // Plain downloads carry no metadata of their own
            return Ok(TrackMetadata {
                url: source.url.clone(),
                title: source.url.clone(),
                duration_secs: 0,
            });
        }

        let output = YoutubeDl::new(&source.url)
            .youtube_dl_path(&self.binary)
            .extra_arg("--no-playlist")
            .run_async()
            .await
            .map_err(|e| classify_failure(&e.to_string(), &source.url))?;

        let video = output
            .into_single_video()
            .ok_or_else(|| AudioError::FetchUnavailable(format!("no video found: {}", source.url)))?;

        Ok(TrackMetadata {
            url: source.url.clone(),
            title: video.title.unwrap_or_else(|| source.url.clone()),
            duration_secs: video.duration.and_then(|d| d.as_u64()).unwrap_or(0),
        })
    }

    async fn fetch_audio(&self, source: &SourceRef) -> Result<FetchedAudio, AudioError> {
        match source.kind {
            SourceKind::Video => self.download_audio(source).await,
            SourceKind::Direct => self.fetch_direct(source).await,
        }
    }

    async fn search(&self, terms: &str) -> Result<SourceRef, AudioError> {
        let query = format!("ytsearch1:{terms}");
        let output = YoutubeDl::new(query)
            .youtube_dl_path(&self.binary)
            .extra_arg("--flat-playlist")
            .run_async()
            .await
            .map_err(|e| classify_failure(&e.to_string(), terms))?;

        let first_match = output.clone().into_single_video().or_else(|| {
            let playlist = output.into_playlist()?;
            let entries = playlist.entries?;
            entries.first().cloned()
        });

        let video = first_match.ok_or_else(|| {
            AudioError::FetchUnavailable(format!("no results for search: {terms}"))
        })?;
        SourceRef::from_video_id(&video.id)
    }

    async fn playlist_entries(&self, url: &str) -> Result<Vec<SourceRef>, AudioError> {
        let output = YoutubeDl::new(url)
            .youtube_dl_path(&self.binary)
            .extra_arg("--flat-playlist")
            .run_async()
            .await
            .map_err(|e| classify_failure(&e.to_string(), url))?;

        let playlist = output
            .into_playlist()
            .ok_or_else(|| AudioError::FetchUnavailable(format!("not a playlist: {url}")))?;

        playlist
            .entries
            .unwrap_or_default()
            .iter()
            .map(|video| SourceRef::from_video_id(&video.id))
            .collect()
    }
}

/// Map a backend failure message to the transient/permanent split. Messages
/// naming the video as gone or restricted are permanent; everything else
/// (network, throttling, process errors) is worth retrying.
fn classify_failure(message: &str, url: &str) -> AudioError {
    const PERMANENT: &[&str] = &[
        "unavailable",
        "private",
        "removed",
        "age-restricted",
        "not available",
        "no video found",
    ];

    let lowered = message.to_lowercase();
    if PERMANENT.iter().any(|marker| lowered.contains(marker)) {
        AudioError::FetchUnavailable(format!("{url}: {}", last_line(message)))
    } else {
        AudioError::FetchTransient(format!("{url}: {}", last_line(message)))
    }
}

fn last_line(message: &str) -> &str {
    message.lines().last().unwrap_or(message).trim()
}
