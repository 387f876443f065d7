//! Session registry and the typed front-end API.
//!
//! Each session owns one queue and one mixer. All mutation goes through
//! `Sessions`, which also listens on the event bus so a finished or failed
//! track advances its session's queue without any caller involvement.

use crate::cache::AudioCache;
use crate::config::Config;
use crate::effects::EffectLibrary;
use crate::error::AudioError;
use crate::event::{Event, EventBus};
use crate::fetch::FetchPool;
use crate::mixer::{self, Mixer};
use crate::queue::{PlaybackQueue, QueueEntry};
use crate::source::{self, InputKind, SourceRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cap on how many entries one playlist link may enqueue.
const PLAYLIST_LIMIT: usize = 50;

/// One row of a queue listing, positions relative to the playing track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueItem {
    pub position: usize,
    pub title: String,
    pub duration_secs: Option<u64>,
    pub url: String,
}

impl QueueItem {
    fn from_entry(position: usize, entry: &QueueEntry) -> QueueItem {
        QueueItem {
            position,
            title: entry.display_title().to_string(),
            duration_secs: entry.duration_secs,
            url: entry.source.url.clone(),
        }
    }
}

pub struct Session {
    pub id: u64,
    queue: tokio::sync::Mutex<PlaybackQueue>,
    mixer: Arc<Mixer>,
}

pub struct Sessions {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    cache: Arc<AudioCache>,
    pool: Arc<FetchPool>,
    effects: Arc<EffectLibrary>,
    bus: EventBus,
    config: Config,
}

impl Sessions {
    pub fn new(
        cache: Arc<AudioCache>,
        pool: Arc<FetchPool>,
        effects: Arc<EffectLibrary>,
        bus: EventBus,
        config: Config,
    ) -> Arc<Sessions> {
        let sessions = Arc::new(Sessions {
            sessions: Mutex::new(HashMap::new()),
            cache,
            pool,
            effects,
            bus,
            config,
        });
        sessions.clone().listen();
        sessions
    }

    /// React to playback lifecycle events for all sessions.
    fn listen(self: Arc<Self>) {
        let mut subscriber = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match subscriber.recv().await {
                    Event::TrackFinished { session_id } => {
                        let sessions = self.clone();
                        tokio::spawn(async move {
                            sessions.advance_session(session_id).await;
                        });
                    }
                    Event::TrackFailed {
                        session_id,
                        url,
                        error,
                    } => {
                        warn!("Track {url} failed in session {session_id}: {error}");
                        let sessions = self.clone();
                        tokio::spawn(async move {
                            sessions.advance_session(session_id).await;
                        });
                    }
                    Event::TrackStarted { .. } => {}
                }
            }
        });
    }

    /// Look up a session, creating it on first use.
    pub fn session(self: &Arc<Self>, id: u64) -> Arc<Session> {
        let mut sessions = self.lock_sessions();
        sessions
            .entry(id)
            .or_insert_with(|| {
                debug!("Creating session {id}");
                Arc::new(Session {
                    id,
                    queue: tokio::sync::Mutex::new(PlaybackQueue::new()),
                    mixer: Arc::new(Mixer::new(id, self.bus.clone())),
                })
            })
            .clone()
    }

    fn existing_session(&self, id: u64) -> Result<Arc<Session>, AudioError> {
        self.lock_sessions()
            .get(&id)
            .cloned()
            .ok_or(AudioError::UnknownSession(id))
    }

    /// Resolve an input string and append the resulting sources to the
    /// session's queue. Returns the relative position of the first new
    /// entry. Starts playback when the session was idle.
    pub async fn enqueue(self: &Arc<Self>, session_id: u64, input: &str) -> Result<usize, AudioError> {
        let sources = self.resolve_input(input).await?;
        let session = self.session(session_id);

        let (position, start) = {
            let mut queue = session.queue.lock().await;
            let mut first = 0;
            for (i, source) in sources.into_iter().enumerate() {
                let pos = queue.push(source);
                if i == 0 {
                    first = pos;
                }
            }
            let start = if queue.current().is_none() {
                queue.advance().cloned()
            } else {
                None
            };
            self.schedule_prefetch(&session, &mut queue);
            (first, start)
        };

        if let Some(entry) = start {
            self.start_playback(&session, entry);
        }
        Ok(position)
    }

    async fn resolve_input(&self, input: &str) -> Result<Vec<SourceRef>, AudioError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AudioError::InvalidSource("empty input".to_string()));
        }

        match source::classify(input) {
            InputKind::VideoUrl => Ok(vec![SourceRef::from_url(input)?]),
            InputKind::DirectUrl => Ok(vec![SourceRef::direct(input)]),
            InputKind::Playlist => {
                let mut entries = self.pool.fetcher().playlist_entries(input).await?;
                if entries.is_empty() {
                    return Err(AudioError::FetchUnavailable(format!(
                        "playlist has no entries: {input}"
                    )));
                }
                entries.truncate(PLAYLIST_LIMIT);
                Ok(entries)
            }
            InputKind::Search => Ok(vec![self.pool.fetcher().search(input).await?]),
        }
    }

    /// Spawn the load task for a queue entry. The mixer epoch taken here
    /// makes the load a no-op if the user skips before it lands.
    fn start_playback(self: &Arc<Self>, session: &Arc<Session>, entry: QueueEntry) {
        let epoch = session.mixer.prepare_track();
        let sessions = self.clone();
        let session = session.clone();

        tokio::spawn(async move {
            let source = entry.source.clone();
            match sessions.materialise(&source).await {
                Ok((samples, title, duration_secs)) => {
                    {
                        let mut queue = session.queue.lock().await;
                        queue.set_metadata(&source.id, &title, duration_secs);
                    }
                    if session.mixer.set_track(epoch, &title, &source.url, &samples) {
                        info!("Now playing in session {}: {title}", session.id);
                        sessions.bus.send(Event::TrackStarted {
                            session_id: session.id,
                            title,
                        });
                    }
                }
                Err(error) => {
                    sessions.bus.send(Event::TrackFailed {
                        session_id: session.id,
                        url: source.url,
                        error,
                    });
                }
            }
        });
    }

    /// Fetch, load, and optionally normalise a source's samples. Transient
    /// fetch failures are retried; a corrupt cached payload is evicted and
    /// refetched once.
    async fn materialise(
        &self,
        source: &SourceRef,
    ) -> Result<(Vec<mixer::Sample>, String, u64), AudioError> {
        let mut evicted = false;
        loop {
            let entry = self.fetch_with_retries(source).await?;
            match mixer::load_samples(entry.local_path.clone(), self.config.normalise_audio).await {
                Ok(samples) => return Ok((samples, entry.title, entry.duration_secs)),
                Err(e) if !evicted => {
                    warn!("Cached payload for {} unusable, refetching: {e}", source.id);
                    self.cache.evict(&source.id).await;
                    evicted = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_with_retries(
        &self,
        source: &SourceRef,
    ) -> Result<crate::cache::CacheEntry, AudioError> {
        let mut attempt = 0;
        loop {
            match self.pool.fetch(source).await {
                Ok(entry) => return Ok(entry),
                Err(e) if e.is_transient() && attempt < self.config.fetch_retries => {
                    attempt += 1;
                    warn!(
                        "Transient failure fetching {} (attempt {attempt}): {e}",
                        source.id
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn advance_session(self: &Arc<Self>, session_id: u64) {
        let Ok(session) = self.existing_session(session_id) else {
            return;
        };

        let next = {
            let mut queue = session.queue.lock().await;
            let next = queue.advance().cloned();
            self.schedule_prefetch(&session, &mut queue);
            next
        };

        match next {
            Some(entry) => self.start_playback(&session, entry),
            None => info!("Session {session_id} queue ran dry"),
        }
    }

    /// Skip the playing track. Returns the title of the next track, if any.
    pub async fn skip(self: &Arc<Self>, session_id: u64) -> Result<Option<String>, AudioError> {
        let session = self.existing_session(session_id)?;

        let next = {
            let mut queue = session.queue.lock().await;
            if queue.current().is_none() {
                return Err(AudioError::NoCurrentTrack);
            }
            session.mixer.stop_track();
            let next = queue.advance().cloned();
            self.schedule_prefetch(&session, &mut queue);
            next
        };

        match next {
            Some(entry) => {
                let title = entry.display_title().to_string();
                self.start_playback(&session, entry);
                Ok(Some(title))
            }
            None => Ok(None),
        }
    }

    /// Remove a queue entry by relative position. Position 0 skips the
    /// playing track; positions 1.. drop pending entries.
    pub async fn remove(self: &Arc<Self>, session_id: u64, position: usize) -> Result<String, AudioError> {
        let session = self.existing_session(session_id)?;

        if position == 0 {
            let title = {
                let queue = session.queue.lock().await;
                queue
                    .current()
                    .map(|e| e.display_title().to_string())
                    .ok_or(AudioError::NoCurrentTrack)?
            };
            self.skip(session_id).await?;
            return Ok(title);
        }

        let mut queue = session.queue.lock().await;
        queue
            .remove(position)
            .map(|e| e.display_title().to_string())
            .ok_or(AudioError::NoSuchPosition(position))
    }

    /// Drop all pending entries, leaving the playing track untouched.
    pub async fn clear(&self, session_id: u64) -> Result<usize, AudioError> {
        let session = self.existing_session(session_id)?;
        let mut queue = session.queue.lock().await;
        Ok(queue.clear_pending())
    }

    /// The playing track and pending entries, up to `limit` rows.
    pub async fn list_queue(&self, session_id: u64, limit: usize) -> Result<Vec<QueueItem>, AudioError> {
        let session = self.existing_session(session_id)?;
        let queue = session.queue.lock().await;
        if queue.is_empty() {
            return Err(AudioError::QueueEmpty);
        }
        Ok(queue
            .list(limit)
            .into_iter()
            .map(|(pos, entry)| QueueItem::from_entry(pos, entry))
            .collect())
    }

    /// Overlay a named effect clip on the session's output.
    pub fn trigger_effect(self: &Arc<Self>, session_id: u64, name: &str) -> Result<u64, AudioError> {
        let clip = self.effects.get(name)?;
        let session = self.session(session_id);
        debug!("Triggering effect '{name}' in session {session_id}");
        Ok(session.mixer.play_effect(name, clip))
    }

    pub fn effect_names(&self) -> Vec<String> {
        self.effects.names()
    }

    /// Cut all active effect overlays without touching the track.
    pub fn stop_effects(&self, session_id: u64) -> Result<(), AudioError> {
        let session = self.existing_session(session_id)?;
        session.mixer.clear_effects();
        Ok(())
    }

    pub fn pause(&self, session_id: u64) -> Result<(), AudioError> {
        let session = self.existing_session(session_id)?;
        session.mixer.pause();
        Ok(())
    }

    pub fn resume(&self, session_id: u64) -> Result<(), AudioError> {
        let session = self.existing_session(session_id)?;
        session.mixer.resume();
        Ok(())
    }

    /// Real-time frame pull for the transport. Unknown sessions yield
    /// silence so the tick never stalls on registry state.
    pub fn next_frame(&self, session_id: u64) -> Vec<u8> {
        match self.lock_sessions().get(&session_id) {
            Some(session) => session.mixer.next_frame(),
            None => mixer::silent_frame(),
        }
    }

    /// Dispatch metadata lookups for the prefetch window and at most one
    /// payload prefetch for the up-next entry. Must be called with the
    /// queue lock held; the spawned work re-acquires it to write back.
    fn schedule_prefetch(self: &Arc<Self>, session: &Arc<Session>, queue: &mut PlaybackQueue) {
        for source in queue.prefetch_batch(self.config.prefetch_horizon) {
            let pool = self.pool.clone();
            let session = session.clone();
            tokio::spawn(async move {
                match pool.metadata(&source).await {
                    Ok(meta) => {
                        let mut queue = session.queue.lock().await;
                        queue.set_metadata(&source.id, &meta.title, meta.duration_secs);
                    }
                    Err(e) => debug!("Metadata prefetch for {} failed: {e}", source.id),
                }
            });
        }

        if let Some(source) = queue.take_audio_prefetch() {
            let _handle = self.pool.spawn_fetch(source);
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<u64, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}
