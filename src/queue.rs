//! Per-session playback queue.
//!
//! The queue keeps its full history in one vector; `current` points at the
//! playing entry and `played` is the watermark below which entries are
//! history. Positions exposed to callers are relative to the playing entry
//! (0 = now playing, 1 = up next), so history never shifts user-visible
//! indices.

use crate::source::SourceRef;

#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub source: SourceRef,
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
    /// Metadata prefetch already dispatched for this entry.
    pub meta_requested: bool,
    /// Payload prefetch already dispatched for this entry.
    pub audio_requested: bool,
}

impl QueueEntry {
    fn new(source: SourceRef) -> QueueEntry {
        QueueEntry {
            source,
            title: None,
            duration_secs: None,
            meta_requested: false,
            audio_requested: false,
        }
    }

    /// Display title, falling back to the source URL until metadata lands.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source.url)
    }
}

#[derive(Default)]
pub struct PlaybackQueue {
    entries: Vec<QueueEntry>,
    current: Option<usize>,
    played: usize,
}

impl PlaybackQueue {
    pub fn new() -> PlaybackQueue {
        Default::default()
    }

    /// Absolute index that relative position 0 maps to.
    fn base(&self) -> usize {
        self.current.unwrap_or(self.played)
    }

    /// Append a source and return its relative position.
    pub fn push(&mut self, source: SourceRef) -> usize {
        self.entries.push(QueueEntry::new(source));
        self.entries.len() - 1 - self.base()
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current.map(|i| &self.entries[i])
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Move to the next entry, retiring the current one into history.
    /// Returns the new current entry, or None when the queue ran dry.
    pub fn advance(&mut self) -> Option<&QueueEntry> {
        match self.current {
            Some(i) => {
                self.played = i + 1;
                self.current = (i + 1 < self.entries.len()).then_some(i + 1);
            }
            None => {
                if self.played < self.entries.len() {
                    self.current = Some(self.played);
                }
            }
        }
        self.current()
    }

    /// Remove the pending entry at a relative position (1 = up next).
    /// Position 0 is the playing entry and is not removable here.
    pub fn remove(&mut self, position: usize) -> Option<QueueEntry> {
        if position == 0 {
            return None;
        }
        let abs = self.base() + position;
        if abs < self.entries.len() {
            Some(self.entries.remove(abs))
        } else {
            None
        }
    }

    /// Drop every pending entry, keeping history and the playing entry.
    /// Returns how many entries were dropped.
    pub fn clear_pending(&mut self) -> usize {
        let keep = match self.current {
            Some(i) => i + 1,
            None => self.played,
        };
        let dropped = self.entries.len().saturating_sub(keep);
        self.entries.truncate(keep);
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.entries.len() - self.base() - usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.base() >= self.entries.len()
    }

    /// Entries from the playing one onward, with their relative positions.
    pub fn list(&self, limit: usize) -> Vec<(usize, &QueueEntry)> {
        self.entries[self.base()..]
            .iter()
            .take(limit)
            .enumerate()
            .collect()
    }

    /// Sources in the metadata prefetch window that have not been requested
    /// yet. Marks them requested so a source is dispatched at most once.
    pub fn prefetch_batch(&mut self, horizon: usize) -> Vec<SourceRef> {
        let base = self.base();
        let end = (base + horizon).min(self.entries.len());
        let mut batch = Vec::new();
        for entry in &mut self.entries[base..end] {
            if entry.title.is_some() || entry.meta_requested {
                continue;
            }
            entry.meta_requested = true;
            batch.push(entry.source.clone());
        }
        batch
    }

    /// The up-next entry's source, if a payload prefetch for it has not
    /// been dispatched yet.
    pub fn take_audio_prefetch(&mut self) -> Option<SourceRef> {
        let next = self.current? + 1;
        let entry = self.entries.get_mut(next)?;
        if entry.audio_requested {
            return None;
        }
        entry.audio_requested = true;
        Some(entry.source.clone())
    }

    /// Record resolved metadata on every entry for this source.
    pub fn set_metadata(&mut self, source_id: &str, title: &str, duration_secs: u64) {
        for entry in &mut self.entries {
            if entry.source.id == source_id {
                entry.title = Some(title.to_string());
                entry.duration_secs = Some(duration_secs);
            }
        }
    }
}
