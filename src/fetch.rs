//! Bounded pool of fetch workers feeding the audio cache.
//!
//! A fetch job downloads the source payload and its metadata concurrently,
//! decodes the payload off the async runtime, and commits both through the
//! cache's temp-then-rename protocol. Concurrent requests for the same
//! source collapse onto a single job via the cache's pending map.

use crate::cache::{self, AudioCache, Begin, FetchResult, Ticket};
use crate::config::Config;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::decode;
use crate::error::AudioError;
use crate::source::{SourceRef, TrackMetadata};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const JOB_QUEUE_CAPACITY: usize = 128;

/// A downloaded but not yet decoded audio payload.
#[derive(Debug)]
pub struct FetchedAudio {
    pub data: Vec<u8>,
    /// Container extension hint for the decoder, when known.
    pub extension: Option<String>,
}

/// Backend that resolves sources into payloads and metadata.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_metadata(&self, source: &SourceRef) -> Result<TrackMetadata, AudioError>;
    async fn fetch_audio(&self, source: &SourceRef) -> Result<FetchedAudio, AudioError>;
    async fn search(&self, terms: &str) -> Result<SourceRef, AudioError>;
    async fn playlist_entries(&self, url: &str) -> Result<Vec<SourceRef>, AudioError>;
}

struct FetchJob {
    source: SourceRef,
    ticket: Ticket,
}

pub struct FetchPool {
    cache: Arc<AudioCache>,
    fetcher: Arc<dyn Fetcher>,
    jobs: mpsc::Sender<FetchJob>,
    timeout: std::time::Duration,
}

impl FetchPool {
    pub fn new(cache: Arc<AudioCache>, fetcher: Arc<dyn Fetcher>, config: &Config) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<FetchJob>(JOB_QUEUE_CAPACITY);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let pool = Arc::new(FetchPool {
            cache,
            fetcher,
            jobs: tx,
            timeout: config.fetch_timeout(),
        });

        for worker_id in 0..config.fetch_workers.max(1) {
            let pool = pool.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };

                    debug!("Worker {worker_id} fetching {}", job.source.id);
                    let result = pool.run_job(&job.source).await;
                    if let Err(e) = &result {
                        debug!("Worker {worker_id} failed to fetch {}: {e}", job.source.id);
                    }
                    pool.cache.complete(job.ticket, result);
                }
                debug!("Worker {worker_id} shutting down");
            });
        }

        pool
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Resolve a source to a committed cache entry, downloading it if
    /// necessary. Concurrent callers for the same source share one download.
    pub async fn fetch(&self, source: &SourceRef) -> FetchResult {
        if let Some(entry) = self.cache.get(source).await {
            return Ok(entry);
        }

        match self.cache.begin(&source.id) {
            Begin::Joined(waiter) => {
                debug!("Joining in-flight fetch for {}", source.id);
                cache::await_waiter(waiter).await
            }
            Begin::Claimed(ticket) => {
                // Someone may have committed between the fast path and the claim
                if let Some(entry) = self.cache.get(source).await {
                    self.cache.complete(ticket, Ok(entry.clone()));
                    return Ok(entry);
                }

                let waiter = ticket.waiter();
                let job = FetchJob {
                    source: source.clone(),
                    ticket,
                };
                if let Err(e) = self.jobs.try_send(job) {
                    let err = AudioError::FetchTransient(format!(
                        "fetch queue full for {}: {e}",
                        source.id
                    ));
                    match e {
                        mpsc::error::TrySendError::Full(job)
                        | mpsc::error::TrySendError::Closed(job) => {
                            self.cache.complete(job.ticket, Err(err.clone()));
                        }
                    }
                    return Err(err);
                }
                cache::await_waiter(waiter).await
            }
        }
    }

    /// Metadata without touching the payload: cached record if present,
    /// otherwise one backend call whose result is persisted for next time.
    pub async fn metadata(&self, source: &SourceRef) -> Result<TrackMetadata, AudioError> {
        resolve_metadata(&self.cache, &self.fetcher, source).await
    }

    /// Fire-and-forget payload prefetch.
    pub fn spawn_fetch(self: &Arc<Self>, source: SourceRef) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pool.fetch(&source).await {
                debug!("Prefetch of {} failed: {e}", source.id);
            }
        })
    }

    async fn run_job(&self, source: &SourceRef) -> FetchResult {
        let download = futures::future::try_join(
            self.fetcher.fetch_audio(source),
            resolve_metadata(&self.cache, &self.fetcher, source),
        );
        let (audio, mut meta) = tokio::time::timeout(self.timeout, download)
            .await
            .map_err(|_| {
                AudioError::FetchTransient(format!("fetch of {} timed out", source.id))
            })??;

        // Decoding can take seconds for long tracks; keep it off the runtime
        let pcm = tokio::task::spawn_blocking(move || {
            let samples = decode::decode_bytes(audio.data, audio.extension.as_deref())?;
            Ok::<_, AudioError>(decode::samples_to_bytes(&samples))
        })
        .await
        .map_err(|e| AudioError::DecodeError(format!("decode task panicked: {e}")))??;

        if meta.duration_secs == 0 {
            meta.duration_secs =
                (pcm.len() / (2 * CHANNELS as usize) / SAMPLE_RATE as usize) as u64;
        }

        let tmp = self.cache.temp_path(&source.id);
        if let Err(e) = tokio::fs::write(&tmp, &pcm).await {
            return Err(AudioError::FetchTransient(format!(
                "failed to write temp payload for {}: {e}",
                source.id
            )));
        }

        let committed = self.cache.commit(source, &tmp, &meta).await;
        match &committed {
            Ok(entry) => info!("Cached {} [{}]", entry.title, meta.duration_str()),
            Err(_) => {
                let _ = tokio::fs::remove_file(&tmp).await;
            }
        }
        committed
    }
}

async fn resolve_metadata(
    cache: &AudioCache,
    fetcher: &Arc<dyn Fetcher>,
    source: &SourceRef,
) -> Result<TrackMetadata, AudioError> {
    if let Some(meta) = cache.read_metadata(&source.id).await {
        return Ok(meta);
    }

    let meta = fetcher.fetch_metadata(source).await?;
    if let Err(e) = cache.write_metadata(&source.id, &meta).await {
        warn!("Failed to persist metadata for {}: {e}", source.id);
    }
    Ok(meta)
}
