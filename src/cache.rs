//! Per-client engine counter cache
//!
//! fdinfo only reports cumulative engine time, so busy percentages come
//! from the difference between two polling cycles. The cache keeps two
//! generations: `previous` holds the last cycle's counters and is consumed
//! by lookups, `current` collects this cycle's samples. [`ProcessCache::swap`]
//! drops whatever was not consumed, so a client that stops showing up is
//! forgotten after exactly one missed cycle.

use std::collections::HashMap;
use std::time::Instant;

use log::warn;

use crate::error::CacheError;
use crate::types::{ClientKey, EngineClass, EngineTimes, ProcessUsage};

/// Cached counters of one DRM client
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: ClientKey,
    engines: EngineTimes,
    last_measurement: Instant,
}

impl CacheEntry {
    fn new(key: ClientKey, now: Instant) -> Self {
        Self {
            key,
            engines: EngineTimes::default(),
            last_measurement: now,
        }
    }

    /// Client this entry belongs to
    pub fn key(&self) -> ClientKey {
        self.key
    }

    /// Cumulative engine times of the last sample
    pub fn engines(&self) -> &EngineTimes {
        &self.engines
    }

    /// When the last sample was taken
    pub fn last_measurement(&self) -> Instant {
        self.last_measurement
    }
}

/// Double-buffered counter cache of one device
#[derive(Debug, Default)]
pub struct ProcessCache {
    previous: HashMap<ClientKey, CacheEntry>,
    current: HashMap<ClientKey, CacheEntry>,
}

impl ProcessCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client's sample and derive its busy percentages
    ///
    /// Percentages are written to `process` for every engine class sampled
    /// in both this cycle and the previous one. A client may only be
    /// recorded once per cycle.
    pub fn update(
        &mut self,
        key: ClientKey,
        sample: &EngineTimes,
        now: Instant,
        process: &mut ProcessUsage,
    ) -> Result<(), CacheError> {
        debug_assert!(
            !self.current.contains_key(&key),
            "client {} of pid {} processed twice in one cycle",
            key.client_id,
            key.pid
        );
        if self.current.contains_key(&key) {
            warn!(
                "Ignoring second fdinfo record of client {} (pid {}) in this cycle",
                key.client_id, key.pid
            );
            return Err(CacheError::DuplicateClient(key));
        }

        let mut entry = match self.previous.remove(&key) {
            Some(entry) => {
                let elapsed = now.saturating_duration_since(entry.last_measurement);
                let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
                let targets = [
                    (EngineClass::Render, &mut process.gpu_usage),
                    (EngineClass::Video, &mut process.decode_usage),
                    (EngineClass::VideoEnhance, &mut process.encode_usage),
                ];
                for (class, target) in targets {
                    if let (Some(current), Some(previous)) =
                        (sample.get(class), entry.engines.get(class))
                    {
                        if let Some(busy) =
                            busy_usage_from_time_usage_round(current, previous, elapsed_ns)
                        {
                            *target = Some(busy);
                        }
                    }
                }
                entry
            }
            None => CacheEntry::new(key, now),
        };

        entry.engines = *sample;
        entry.last_measurement = now;
        self.current.insert(key, entry);
        Ok(())
    }

    /// Start a new cycle
    ///
    /// Unconsumed entries of the previous cycle are dropped and this cycle's
    /// entries become the lookup source for the next one.
    pub fn swap(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    /// Entries still available for lookup
    pub fn previous_len(&self) -> usize {
        self.previous.len()
    }

    /// Entries recorded in this cycle
    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    /// Entry recorded for `key` in this cycle
    pub fn current_entry(&self, key: &ClientKey) -> Option<&CacheEntry> {
        self.current.get(key)
    }

    /// Entry of `key` from the previous cycle, if not consumed yet
    pub fn previous_entry(&self, key: &ClientKey) -> Option<&CacheEntry> {
        self.previous.get(key)
    }
}

/// Busy percentage of an engine between two cumulative samples
///
/// Returns `None` when the counter went backwards, when the delta is larger
/// than the elapsed time, or when no time elapsed.
pub fn busy_usage_from_time_usage_round(current: u64, previous: u64, elapsed_ns: u64) -> Option<u32> {
    if elapsed_ns == 0 || current < previous {
        return None;
    }
    let delta = current - previous;
    if delta > elapsed_ns {
        return None;
    }
    let elapsed = u128::from(elapsed_ns);
    let percent = (u128::from(delta) * 100 + elapsed / 2) / elapsed;
    Some(percent.min(100) as u32)
}
