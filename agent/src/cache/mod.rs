//! In-memory caches

pub mod ttl;

pub use ttl::TtlCache;
