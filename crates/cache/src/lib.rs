mod fingerprint;
mod kv;
mod store;

pub use fingerprint::{compute_fingerprint, name_key};
pub use kv::{KvError, KvStore, MemoryKv, SqliteKv};
pub use store::{
    CacheEntry, CacheHit, CacheInfo, CacheLookup, CacheStore, CachedFile, Clock, ManualClock,
    SystemClock, DEFAULT_PREFIX, DEFAULT_TTL,
};
