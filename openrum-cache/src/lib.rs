//! The bounded in-memory beacon cache.
//!
//! Every record the beacon serializer produces is appended here under its
//! [`BeaconKey`] until the sender loop drains it.
//! Each entry holds two staging areas: an *active* buffer that report calls
//! append to, and a *sending* buffer that chunks are built from. The split
//! lets the sender retry a failed chunk without ever re-ordering records and
//! lets eviction shrink the cache without touching data that is in flight.
//!
//! Eviction runs on a dedicated background thread (the
//! [`BeaconCacheEvictor`]) and is two-dimensional: records past an age limit
//! are dropped on every pass, and when the cache outgrows its upper memory
//! boundary, the oldest records of every entry are dropped until the cache is
//! back below the lower boundary.

#![warn(missing_docs)]

mod cache;
mod entry;
mod eviction;
mod evictor;
mod record;

pub use self::cache::BeaconCache;
pub use self::eviction::{SpaceEvictionStrategy, TimeEvictionStrategy};
pub use self::evictor::BeaconCacheEvictor;
pub use self::record::{BeaconKey, BeaconRecord};
