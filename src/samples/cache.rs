// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! A bounded cache of decoded samples.
//!
//! Loads are asynchronous and deduplicated: while a sample is loading, every caller
//! waits on the same in-flight fetch and decode. The number of loaded samples is
//! bounded, and the least recently used loaded samples are evicted first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::decode::{DecodedSample, SampleDecoder};
use super::fetch::{extension_hint, SampleFetcher};
use crate::pattern::Sample;

/// Default maximum number of loaded samples.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 200;

/// A failed fetch or decode. Every waiter on the same load receives the same error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Failed to load sample {sample_id}: {message}")]
pub struct SampleLoadError {
    sample_id: String,
    message: String,
}

impl SampleLoadError {
    pub fn new(sample_id: &str, message: &str) -> SampleLoadError {
        SampleLoadError {
            sample_id: sample_id.to_string(),
            message: message.to_string(),
        }
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The result of a load.
pub type LoadResult = Result<DecodedSample, SampleLoadError>;

/// The load state of a cached sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    /// Known to the cache but not in memory (never loaded, or evicted).
    Idle,
    Loading,
    Loaded,
    /// The last load failed. The next load retries from scratch.
    Error,
}

/// A snapshot of a sample's cache status.
#[derive(Clone, Debug)]
pub struct SampleStatus {
    pub state: LoadState,
    pub last_used: Instant,
    pub error: Option<String>,
}

enum EntryState {
    Idle,
    Loading(watch::Receiver<Option<LoadResult>>),
    Loaded(DecodedSample),
    Error(String),
}

struct CacheEntry {
    state: EntryState,
    last_used: Instant,
    /// Monotonic access order. Ties on wall time are impossible with this.
    access: u64,
}

impl CacheEntry {
    fn new() -> CacheEntry {
        CacheEntry {
            state: EntryState::Idle,
            last_used: Instant::now(),
            access: 0,
        }
    }

    fn touch(&mut self, access: u64) {
        self.last_used = Instant::now();
        self.access = access;
    }

    fn status(&self) -> SampleStatus {
        let (state, error) = match &self.state {
            EntryState::Idle => (LoadState::Idle, None),
            EntryState::Loading(_) => (LoadState::Loading, None),
            EntryState::Loaded(_) => (LoadState::Loaded, None),
            EntryState::Error(message) => (LoadState::Error, Some(message.clone())),
        };
        SampleStatus {
            state,
            last_used: self.last_used,
            error,
        }
    }
}

struct Entries {
    entries: HashMap<String, CacheEntry>,
    access_counter: u64,
    max_size: usize,
}

impl Entries {
    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn loaded_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| matches!(entry.state, EntryState::Loaded(_)))
            .count()
    }

    /// Evicts least recently used loaded entries until one more can be added.
    /// Loading entries are never candidates.
    fn make_room(&mut self) {
        while self.loaded_count() >= self.max_size {
            let oldest = self
                .entries
                .iter()
                .filter(|(_, entry)| matches!(entry.state, EntryState::Loaded(_)))
                .min_by_key(|(_, entry)| entry.access)
                .map(|(id, _)| id.clone());

            match oldest {
                Some(id) => {
                    if let Some(entry) = self.entries.get_mut(&id) {
                        entry.state = EntryState::Idle;
                    }
                    info!(sample = id, "Evicted sample from cache");
                }
                None => return,
            }
        }
    }
}

/// Maps sample identities to decoded, playable audio with bounded memory use.
pub struct SampleCache {
    entries: Arc<Mutex<Entries>>,
    fetcher: Arc<dyn SampleFetcher>,
    decoder: Arc<dyn SampleDecoder>,
}

impl SampleCache {
    /// Creates a new cache holding at most `max_size` loaded samples.
    pub fn new(
        fetcher: Arc<dyn SampleFetcher>,
        decoder: Arc<dyn SampleDecoder>,
        max_size: usize,
    ) -> SampleCache {
        SampleCache {
            entries: Arc::new(Mutex::new(Entries {
                entries: HashMap::new(),
                access_counter: 0,
                max_size: max_size.max(1),
            })),
            fetcher,
            decoder,
        }
    }

    /// Loads the sample, returning the cached buffer if it's already loaded. Concurrent
    /// loads of the same sample share one fetch and decode.
    pub async fn load(&self, sample: &Sample) -> LoadResult {
        let mut in_flight = {
            let mut entries = self.entries.lock();
            let access = entries.next_access();
            let entry = entries
                .entries
                .entry(sample.id().to_string())
                .or_insert_with(CacheEntry::new);

            if let EntryState::Loaded(buffer) = &entry.state {
                let buffer = buffer.clone();
                entry.touch(access);
                debug!(sample = sample.id(), "Using cached sample");
                return Ok(buffer);
            }

            if let EntryState::Loading(in_flight) = &entry.state {
                debug!(sample = sample.id(), "Waiting on in-flight load");
                in_flight.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                entry.state = EntryState::Loading(rx.clone());
                entry.touch(access);
                self.spawn_load(sample.clone(), tx);
                rx
            }
        };

        let result = match in_flight.wait_for(Option::is_some).await {
            Ok(result) => match result.as_ref() {
                Some(result) => result.clone(),
                None => Err(SampleLoadError::new(sample.id(), "load produced no result")),
            },
            Err(_) => Err(SampleLoadError::new(sample.id(), "load was abandoned")),
        };
        result
    }

    /// Runs the fetch and decode on a background task so that no single caller
    /// dropping its future can strand the other waiters.
    fn spawn_load(&self, sample: Sample, tx: watch::Sender<Option<LoadResult>>) {
        let entries = self.entries.clone();
        let fetcher = self.fetcher.clone();
        let decoder = self.decoder.clone();

        tokio::spawn(async move {
            let id = sample.id().to_string();
            let started = Instant::now();
            info!(sample = id, source = sample.source(), "Loading sample into memory");

            let decoded = tokio::task::spawn_blocking(move || -> Result<DecodedSample, String> {
                let bytes = fetcher.fetch(sample.source()).map_err(|e| e.to_string())?;
                decoder
                    .decode(bytes, extension_hint(sample.source()))
                    .map_err(|e| e.to_string())
            })
            .await;

            let result: LoadResult = match decoded {
                Ok(Ok(buffer)) => Ok(buffer),
                Ok(Err(message)) => Err(SampleLoadError::new(&id, &message)),
                Err(e) => Err(SampleLoadError::new(&id, &format!("load task failed: {}", e))),
            };

            {
                let mut entries = entries.lock();
                let access = entries.next_access();
                match &result {
                    Ok(buffer) => {
                        entries.make_room();
                        let entry = entries
                            .entries
                            .entry(id.clone())
                            .or_insert_with(CacheEntry::new);
                        entry.state = EntryState::Loaded(buffer.clone());
                        entry.touch(access);
                        info!(
                            sample = id,
                            channels = buffer.channel_count(),
                            sample_rate = buffer.sample_rate(),
                            duration_ms = buffer.duration().as_millis(),
                            memory_kb = buffer.memory_size() / 1024,
                            elapsed_ms = started.elapsed().as_millis(),
                            "Sample loaded"
                        );
                    }
                    Err(e) => {
                        let entry = entries
                            .entries
                            .entry(id.clone())
                            .or_insert_with(CacheEntry::new);
                        entry.state = EntryState::Error(e.message().to_string());
                        entry.touch(access);
                        warn!(sample = id, error = %e, "Failed to load sample");
                    }
                }
            }

            // Nobody waiting is fine.
            let _ = tx.send(Some(result));
        });
    }

    /// Returns the status of the sample without blocking or loading anything.
    pub fn status(&self, id: &str) -> Option<SampleStatus> {
        self.entries.lock().entries.get(id).map(CacheEntry::status)
    }

    /// Returns true if the sample is loaded.
    pub fn is_loaded(&self, id: &str) -> bool {
        matches!(
            self.entries.lock().entries.get(id).map(|e| &e.state),
            Some(EntryState::Loaded(_))
        )
    }

    /// The number of loaded samples.
    pub fn loaded_count(&self) -> usize {
        self.entries.lock().loaded_count()
    }

    pub fn max_size(&self) -> usize {
        self.entries.lock().max_size
    }

    /// Returns the total memory used by loaded samples.
    pub fn memory_usage(&self) -> usize {
        self.entries
            .lock()
            .entries
            .values()
            .map(|entry| match &entry.state {
                EntryState::Loaded(buffer) => buffer.memory_size(),
                _ => 0,
            })
            .sum()
    }
}

impl std::fmt::Debug for SampleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleCache")
            .field("loaded_samples", &self.loaded_count())
            .field("max_size", &self.max_size())
            .field("total_memory_kb", &(self.memory_usage() / 1024))
            .finish()
    }
}
