//! Content-addressable audio cache with single-flight fetch deduplication.
//!
//! Cache paths derive deterministically from the source id, so the existence
//! of the canonical file *is* the index. Downloads land in a separate temp
//! directory and are moved into the canonical tree with one atomic rename;
//! a partially written file is never observable at a canonical path.

use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::AudioError;
use crate::source::{SourceRef, TrackMetadata};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::sync::watch;

/// A committed, ready-to-stream cache record. Immutable once created.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub source_id: String,
    pub local_path: PathBuf,
    pub title: String,
    pub duration_secs: u64,
    pub created_at: SystemTime,
}

pub type FetchResult = Result<CacheEntry, AudioError>;

/// Waiter half of a single-flight fetch: resolves to the shared result.
pub type Waiter = watch::Receiver<Option<FetchResult>>;

/// Exclusive right to perform the fetch for one source id. The holder must
/// hand it back through [`AudioCache::complete`].
pub struct Ticket {
    id: String,
    tx: watch::Sender<Option<FetchResult>>,
}

impl Ticket {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn waiter(&self) -> Waiter {
        self.tx.subscribe()
    }
}

/// Outcome of asking to fetch a source that is not yet cached.
pub enum Begin {
    /// Nobody is fetching this source; the caller now owns the job.
    Claimed(Ticket),
    /// A fetch is already in flight; wait for its result.
    Joined(Waiter),
}

pub struct AudioCache {
    cached_dir: PathBuf,
    tmp_dir: PathBuf,
    pending: Mutex<HashMap<String, watch::Sender<Option<FetchResult>>>>,
}

impl AudioCache {
    /// Open (creating if needed) the cache directories under `root` and
    /// purge leftover temp files from a previous run before trusting it.
    pub async fn open(root: impl AsRef<Path>) -> Result<AudioCache> {
        let root = root.as_ref();
        let cache = AudioCache {
            cached_dir: root.join("cached"),
            tmp_dir: root.join("downloading"),
            pending: Mutex::new(HashMap::new()),
        };

        tokio::fs::create_dir_all(&cache.cached_dir)
            .await
            .with_context(|| format!("creating cache dir {}", cache.cached_dir.display()))?;
        tokio::fs::create_dir_all(&cache.tmp_dir)
            .await
            .with_context(|| format!("creating temp dir {}", cache.tmp_dir.display()))?;

        cache.purge_temp().await;

        info!("Audio cache ready at {}", root.display());
        Ok(cache)
    }

    /// Delete anything in the temp directory. In-flight fetches never exist
    /// at startup, so everything found here is a leftover partial write.
    async fn purge_temp(&self) {
        let mut purged = 0usize;
        match tokio::fs::read_dir(&self.tmp_dir).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                        warn!("Failed to purge temp file {}: {e}", entry.path().display());
                    } else {
                        purged += 1;
                    }
                }
            }
            Err(e) => warn!("Failed to scan temp dir {}: {e}", self.tmp_dir.display()),
        }
        if purged > 0 {
            info!("Purged {purged} stale temp file(s) from previous run");
        }
    }

    /// Canonical path for a source's decoded PCM payload.
    pub fn audio_path(&self, source_id: &str) -> PathBuf {
        self.cached_dir
            .join(format!("{source_id}_{SAMPLE_RATE}Hz_{CHANNELS}ch.pcm"))
    }

    /// Path of the metadata side-channel record for a source.
    pub fn metadata_path(&self, source_id: &str) -> PathBuf {
        self.cached_dir.join(format!("{source_id}_metadata.json"))
    }

    /// Temp path a fetch job writes its PCM payload to before commit.
    pub fn temp_path(&self, source_id: &str) -> PathBuf {
        self.tmp_dir.join(format!("{source_id}.pcm.part"))
    }

    /// Look up a committed entry; `None` when absent (or corrupt, which
    /// callers treat the same as a miss and re-fetch).
    pub async fn get(&self, source: &SourceRef) -> Option<CacheEntry> {
        let path = self.audio_path(&source.id);
        let file_meta = tokio::fs::metadata(&path).await.ok()?;
        if !file_meta.is_file() {
            return None;
        }
        let created_at = file_meta
            .created()
            .or_else(|_| file_meta.modified())
            .unwrap_or_else(|_| SystemTime::now());

        let track = self
            .read_metadata(&source.id)
            .await
            .unwrap_or_else(|| TrackMetadata {
                url: source.url.clone(),
                title: source.url.clone(),
                duration_secs: 0,
            });

        Some(CacheEntry {
            source_id: source.id.clone(),
            local_path: path,
            title: track.title,
            duration_secs: track.duration_secs,
            created_at,
        })
    }

    pub async fn is_ready(&self, source_id: &str) -> bool {
        tokio::fs::try_exists(self.audio_path(source_id))
            .await
            .unwrap_or(false)
    }

    pub fn is_pending(&self, source_id: &str) -> bool {
        self.lock_pending().contains_key(source_id)
    }

    /// Atomically either claim the fetch for `source_id` or join the one
    /// already in flight.
    pub fn begin(&self, source_id: &str) -> Begin {
        let mut pending = self.lock_pending();
        if let Some(tx) = pending.get(source_id) {
            return Begin::Joined(tx.subscribe());
        }
        let (tx, _rx) = watch::channel(None);
        pending.insert(source_id.to_string(), tx.clone());
        Begin::Claimed(Ticket {
            id: source_id.to_string(),
            tx,
        })
    }

    /// Publish the result of a claimed fetch, releasing every waiter
    /// (success and failure alike) and clearing the single-flight slot.
    pub fn complete(&self, ticket: Ticket, result: FetchResult) {
        self.lock_pending().remove(&ticket.id);
        // Waiters may all have detached; that is fine
        let _ = ticket.tx.send(Some(result));
    }

    /// Move a fully written temp payload into the canonical tree, then write
    /// the metadata record beside it.
    pub async fn commit(
        &self,
        source: &SourceRef,
        pcm_tmp: &Path,
        meta: &TrackMetadata,
    ) -> FetchResult {
        let final_path = self.audio_path(&source.id);
        tokio::fs::rename(pcm_tmp, &final_path)
            .await
            .map_err(|e| {
                AudioError::FetchTransient(format!(
                    "failed to commit cache entry for {}: {e}",
                    source.id
                ))
            })?;

        // Metadata is written only after the payload is in place
        if let Err(e) = self.write_metadata(&source.id, meta).await {
            warn!("Failed to write metadata record for {}: {e}", source.id);
        }

        debug!("Committed cache entry {}", final_path.display());
        Ok(CacheEntry {
            source_id: source.id.clone(),
            local_path: final_path,
            title: meta.title.clone(),
            duration_secs: meta.duration_secs,
            created_at: SystemTime::now(),
        })
    }

    pub async fn read_metadata(&self, source_id: &str) -> Option<TrackMetadata> {
        let raw = tokio::fs::read(self.metadata_path(source_id)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub async fn write_metadata(
        &self,
        source_id: &str,
        meta: &TrackMetadata,
    ) -> std::io::Result<()> {
        let json = serde_json::to_vec(meta)?;
        tokio::fs::write(self.metadata_path(source_id), json).await
    }

    /// Remove a committed entry and its metadata record. Silently does
    /// nothing when the entry is absent or a fetch for it is in flight.
    pub async fn evict(&self, source_id: &str) {
        if self.is_pending(source_id) {
            debug!("Not evicting {source_id}: fetch in flight");
            return;
        }
        let _ = tokio::fs::remove_file(self.audio_path(source_id)).await;
        let _ = tokio::fs::remove_file(self.metadata_path(source_id)).await;
        debug!("Evicted cache entry {source_id}");
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<Option<FetchResult>>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Wait for the shared result of an in-flight fetch.
pub async fn await_waiter(mut waiter: Waiter) -> FetchResult {
    loop {
        {
            let value = waiter.borrow();
            if let Some(result) = value.as_ref() {
                return result.clone();
            }
        }
        if waiter.changed().await.is_err() {
            return Err(AudioError::FetchTransient(
                "fetch was abandoned before completing".to_string(),
            ));
        }
    }
}
