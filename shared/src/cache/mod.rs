//! Response cache keyed by query fingerprint.
//!
//! - [`fingerprint`]: SHA-256 over the canonical query and backend id
//! - [`lru`]: bounded LRU index with lazy TTL expiry
//! - [`store`]: the single-flight [`FingerprintCache`]

pub mod fingerprint;
pub mod lru;
pub mod store;

pub use fingerprint::Fingerprint;
pub use store::{
    CacheEntry, CacheLookup, CacheSettings, CacheSource, CacheStats, FingerprintCache, Payload,
};
