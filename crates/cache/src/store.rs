use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tabviz_core::{Dataset, SourceFile};

use crate::fingerprint::{compute_fingerprint, name_key};
use crate::kv::{KvError, KvStore};

pub const DEFAULT_PREFIX: &str = "tabviz_cache_";
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub dataset: Dataset,
    pub row_count: usize,
    pub captured_at: i64,
    pub file_name: String,
    pub file_size: u64,
    pub fingerprint: String,
    /// Set on name-keyed entries: the fingerprint key they were written with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    Exact,
    Name,
    Miss,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub data: Option<Dataset>,
    pub should_update: bool,
    pub reason: Option<String>,
    pub hit: CacheHit,
}

impl CacheLookup {
    fn miss(reason: impl Into<String>) -> Self {
        Self {
            data: None,
            should_update: true,
            reason: Some(reason.into()),
            hit: CacheHit::Miss,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedFile {
    pub name: String,
    pub records: usize,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheInfo {
    pub total_entries: usize,
    pub total_size: usize,
    pub files: Vec<CachedFile>,
}

/// Fingerprint- and name-addressed dataset cache over a key-value substrate.
///
/// Storage failures never reach the caller. Reads degrade to a miss and
/// writes to a no-op, each with a warning in the log.
pub struct CacheStore<S: KvStore> {
    kv: S,
    clock: Box<dyn Clock>,
    ttl: Duration,
    prefix: String,
}

impl<S: KvStore> CacheStore<S> {
    pub fn open(kv: S) -> Self {
        Self {
            kv,
            clock: Box::new(SystemClock),
            ttl: DEFAULT_TTL,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn exact_key(&self, file: &SourceFile) -> String {
        format!("{}{}", self.prefix, compute_fingerprint(file))
    }

    pub fn name_key(&self, file_name: &str) -> String {
        format!("{}name_{}", self.prefix, name_key(file_name))
    }

    pub fn lookup(&self, file: &SourceFile) -> CacheLookup {
        let exact_key = self.exact_key(file);
        let name_key = self.name_key(&file.name);

        match self.read_entry(&exact_key) {
            Some(entry) if !self.is_expired(&entry) => {
                tracing::debug!(file = %file.name, rows = entry.row_count, "exact cache hit");
                return CacheLookup {
                    data: Some(entry.dataset),
                    should_update: false,
                    reason: None,
                    hit: CacheHit::Exact,
                };
            }
            Some(_) => {
                tracing::debug!(file = %file.name, "exact cache entry expired");
                self.remove_quiet(&exact_key);
            }
            None => {}
        }

        match self.read_entry(&name_key) {
            Some(entry) if !self.is_expired(&entry) => {
                tracing::debug!(
                    file = %file.name,
                    cached_from = %entry.file_name,
                    rows = entry.row_count,
                    "name cache hit"
                );
                CacheLookup {
                    reason: Some(format!(
                        "Checking if new file has more than {} records",
                        entry.row_count
                    )),
                    data: Some(entry.dataset),
                    should_update: true,
                    hit: CacheHit::Name,
                }
            }
            Some(entry) => {
                self.remove_quiet(&name_key);
                if let Some(linked) = entry.exact_key.as_deref() {
                    self.remove_quiet(linked);
                }
                CacheLookup::miss("Name-based cache expired")
            }
            None => CacheLookup::miss("No cache found"),
        }
    }

    /// Writes the fingerprint entry and the name entry that points back at it.
    pub fn store(&self, file: &SourceFile, dataset: &Dataset) -> bool {
        let fingerprint = compute_fingerprint(file);
        let exact_key = format!("{}{}", self.prefix, fingerprint);
        let mut entry = CacheEntry {
            dataset: dataset.clone(),
            row_count: dataset.len(),
            captured_at: self.clock.now_ms(),
            file_name: file.name.clone(),
            file_size: file.size(),
            fingerprint,
            exact_key: None,
        };
        if !self.write_entry(&exact_key, &entry) {
            return false;
        }
        entry.exact_key = Some(exact_key);
        let stored = self.write_entry(&self.name_key(&file.name), &entry);
        if stored {
            tracing::info!(file = %file.name, rows = entry.row_count, "cached dataset");
        }
        stored
    }

    /// Overwrites only when there was nothing before or the new dataset has
    /// strictly more rows. Returns whether the cache was written.
    pub fn reconcile(&self, file: &SourceFile, new: &Dataset, previous: Option<&Dataset>) -> bool {
        match previous {
            Some(prev) if new.len() <= prev.len() => {
                tracing::info!(
                    file = %file.name,
                    new_rows = new.len(),
                    cached_rows = prev.len(),
                    "keeping existing cache"
                );
                false
            }
            Some(prev) => {
                tracing::info!(
                    file = %file.name,
                    from = prev.len(),
                    to = new.len(),
                    "updating cache"
                );
                self.store(file, new)
            }
            None => self.store(file, new),
        }
    }

    /// Drops expired and unreadable entries; returns how many were removed.
    pub fn expire_and_cleanup(&self) -> usize {
        let mut removed = 0;
        for key in self.own_keys() {
            let stale = match self.kv.get(&key) {
                Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                    Ok(entry) => self.is_expired(&entry),
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "cache read failed during cleanup");
                    false
                }
            };
            if stale && self.remove_quiet(&key) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "cleaned up expired or corrupted cache entries");
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        let mut removed = 0;
        for key in self.own_keys() {
            if self.remove_quiet(&key) {
                removed += 1;
            }
        }
        tracing::info!(removed, "cache cleared");
        removed
    }

    pub fn info(&self) -> CacheInfo {
        let mut info = CacheInfo::default();
        let mut seen = HashSet::new();
        for key in self.own_keys() {
            let raw = match self.kv.get(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "cache read failed");
                    continue;
                }
            };
            info.total_entries += 1;
            info.total_size += raw.len();
            let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) else {
                continue;
            };
            if seen.insert(entry.file_name.clone()) {
                info.files.push(CachedFile {
                    name: entry.file_name,
                    records: entry.row_count,
                    captured_at: Utc
                        .timestamp_millis_opt(entry.captured_at)
                        .single()
                        .unwrap_or_default(),
                });
            }
        }
        info
    }

    pub fn close(self) {
        if let Err(err) = self.kv.close() {
            tracing::warn!(error = %err, "cache close failed");
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.clock.now_ms() - entry.captured_at > self.ttl.as_millis() as i64
    }

    fn own_keys(&self) -> Vec<String> {
        match self.kv.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter(|key| key.starts_with(&self.prefix))
                .collect(),
            Err(err) => {
                log_kv("list keys", &err);
                Vec::new()
            }
        }
    }

    fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = match self.kv.get(key) {
            Ok(raw) => raw?,
            Err(err) => {
                log_kv("read", &err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(key, error = %err, "corrupted cache entry removed");
                self.remove_quiet(key);
                None
            }
        }
    }

    fn write_entry(&self, key: &str, entry: &CacheEntry) -> bool {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache entry serialization failed");
                return false;
            }
        };
        match self.kv.set(key, &raw) {
            Ok(()) => true,
            Err(err) => {
                log_kv("write", &err);
                false
            }
        }
    }

    fn remove_quiet(&self, key: &str) -> bool {
        match self.kv.remove(key) {
            Ok(()) => true,
            Err(err) => {
                log_kv("remove", &err);
                false
            }
        }
    }
}

fn log_kv(op: &str, err: &KvError) {
    tracing::warn!(op, error = %err, "cache storage failed; continuing without cache");
}
