//! Provides a size constrained LRU Cache.
//!
//! An LRU cache drops the least recently used entry if it is about to grow beyond the given
//! memory limit. Each [Group](crate::group::Group) keeps its locally loaded values in one of
//! these caches. Values only have to implement [ByteSize](ByteSize) so that the cache can
//! account for the memory they occupy.
//!
//! Internally, the cache combines a hash map (key to handle) with a [RecencyList](list::RecencyList)
//! which keeps the entries ordered by their last access. Both a lookup and an eviction of the
//! least recently used entry are therefore O(1).
pub mod list;
mod lru_cache;

pub use lru_cache::ByteSize;
pub use lru_cache::EvictionHandler;
pub use lru_cache::LRUCache;
