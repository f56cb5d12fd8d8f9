//! Response cache module

mod manager;

pub use manager::{CacheConfig, CacheEntry, CacheStats, ResponseCache, spawn_sweep_task};
