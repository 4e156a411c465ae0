// ============================================================================
// Second-Level Cache
// ============================================================================
//
// Shared, cross-session cache of entity and collection state. Sessions read
// it concurrently; write actions keep it consistent through soft locks
// (see `access`) and query spaces are tracked by `UpdateTimestampsCache`.
//
// ============================================================================

pub mod access;
pub mod entry;
pub mod key;
pub mod region;
pub mod timestamper;
pub mod timestamps;

pub use access::{LockOwner, RegionAccessStrategy, SoftLock};
pub use entry::{CacheEntry, CacheValue, CollectionCacheEntry};
pub use key::CacheKey;
pub use region::ReadWriteRegion;
pub use timestamper::next_timestamp;
pub use timestamps::UpdateTimestampsCache;
