//! Provides a consistent hash ring which maps keys to peers.
//!
//! Each peer is placed on the ring several times (once per *replica*, also known as virtual
//! node). The position of the i-th virtual node of a peer is the hash of the decimal index
//! followed by the peer name (`hash("0" + peer)`, `hash("1" + peer)`, ...). A key is owned by
//! the first virtual node whose position is greater than or equal to the hash of the key. If
//! there is no such node, we wrap around and the first (lowest) node owns the key.
//!
//! Using virtual nodes keeps the load evenly distributed and ensures that adding a peer only
//! moves the keys which fall into the intervals of the new virtual nodes.
//!
//! Unless a custom function is provided, positions are computed using the IEEE CRC-32 checksum
//! (see [default_hash]).
//!
//! # Examples
//! ```
//! # use peercache::consistenthash::HashRing;
//! let mut ring = HashRing::new(50, None);
//! ring.add(&["http://10.0.0.1:8001", "http://10.0.0.2:8001"]);
//!
//! // Routing is deterministic...
//! let owner = ring.route("some-key").unwrap().to_owned();
//! assert_eq!(ring.route("some-key"), Some(owner.as_str()));
//!
//! // An empty ring cannot route anything...
//! assert_eq!(HashRing::new(50, None).route("some-key"), None);
//! ```
use fnv::FnvHashMap;

/// Specifies the number of virtual nodes per peer which is used if no other value is configured.
pub const DEFAULT_REPLICAS: usize = 50;

/// Computes the 32 bit hash used to position keys and virtual nodes on the ring.
pub type Hash = fn(&[u8]) -> u32;

/// Provides the default hash function (the IEEE CRC-32 checksum).
///
/// Nodes which should agree on the owner of a key have to use the same hash function.
pub fn default_hash(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Represents a ring of virtual nodes.
pub struct HashRing {
    hash: Hash,
    replicas: usize,
    keys: Vec<u32>,
    peers: FnvHashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring which places each peer **replicas** times.
    ///
    /// If no **hash** function is given, [default_hash](default_hash) is used.
    pub fn new(replicas: usize, hash: Option<Hash>) -> Self {
        HashRing {
            hash: hash.unwrap_or(default_hash),
            replicas,
            keys: Vec::new(),
            peers: FnvHashMap::default(),
        }
    }

    /// Adds the given peers to the ring.
    ///
    /// Note that there is no protection against adding the same peer twice. This would simply
    /// place another set of virtual nodes for the same peer on the ring.
    pub fn add<S: AsRef<str>>(&mut self, peers: &[S]) {
        for peer in peers {
            let peer = peer.as_ref();
            for replica in 0..self.replicas {
                let hash = (self.hash)(format!("{}{}", replica, peer).as_bytes());
                self.keys.push(hash);
                let _ = self.peers.insert(hash, peer.to_owned());
            }
        }

        self.keys.sort_unstable();
    }

    /// Determines the peer which owns the given key.
    ///
    /// Returns **None** if the ring is empty.
    pub fn route(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let index = match self.keys.partition_point(|node| *node < hash) {
            index if index == self.keys.len() => 0,
            index => index,
        };

        self.peers.get(&self.keys[index]).map(|peer| peer.as_str())
    }

    /// Returns the number of virtual nodes on the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Determines if no peer has been added yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the number of virtual nodes placed per peer.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Lists all distinct peers on the ring in alphabetical order.
    pub fn peers(&self) -> Vec<&str> {
        let mut peers: Vec<&str> = self.peers.values().map(|peer| peer.as_str()).collect();
        peers.sort_unstable();
        peers.dedup();
        peers
    }
}

#[cfg(test)]
mod tests {
    use crate::consistenthash::{default_hash, HashRing};

    /// Uses the numeric value of the key as hash so that the ring layout can be computed by hand.
    fn numeric_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data).unwrap().parse().unwrap()
    }

    #[test]
    fn keys_are_routed_to_the_next_virtual_node() {
        let mut ring = HashRing::new(3, Some(numeric_hash));

        // Virtual nodes: 2, 4, 6, 12, 14, 16, 22, 24, 26
        ring.add(&["6", "4", "2"]);
        assert_eq!(ring.len(), 9);

        assert_eq!(ring.route("2"), Some("2"));
        assert_eq!(ring.route("11"), Some("2"));
        assert_eq!(ring.route("23"), Some("4"));
        // 27 is beyond the last virtual node and wraps around to 2...
        assert_eq!(ring.route("27"), Some("2"));
    }

    #[test]
    fn adding_a_peer_only_moves_its_own_intervals() {
        let mut ring = HashRing::new(3, Some(numeric_hash));
        ring.add(&["6", "4", "2"]);

        let keys = ["2", "11", "23", "27"];
        let before: Vec<String> = keys
            .iter()
            .map(|key| ring.route(key).unwrap().to_owned())
            .collect();

        // Adds 8, 18, 28 - so that 27 is now owned by 8...
        ring.add(&["8"]);
        assert_eq!(ring.route("27"), Some("8"));

        // ...while all other keys stay where they were.
        for (key, owner) in keys.iter().zip(before.iter()).take(3) {
            assert_eq!(ring.route(key), Some(owner.as_str()));
        }
    }

    #[test]
    fn routing_with_the_default_hash_is_deterministic_and_spread() {
        let mut ring = HashRing::new(50, None);
        ring.add(&["http://a:8001", "http://b:8001", "http://c:8001"]);
        assert_eq!(ring.peers(), vec!["http://a:8001", "http://b:8001", "http://c:8001"]);

        let mut counts = std::collections::HashMap::new();
        for i in 0..3000 {
            let key = format!("key-{}", i);
            let owner = ring.route(&key).unwrap();
            assert_eq!(ring.route(&key), Some(owner));
            *counts.entry(owner.to_owned()).or_insert(0) += 1;
        }

        // Each peer receives a noticeable share of the keys...
        assert_eq!(counts.len(), 3);
        for count in counts.values() {
            assert!(*count > 300, "unbalanced ring: {:?}", counts);
        }
    }

    #[test]
    fn default_hash_is_ieee_crc32() {
        // The well known check value of CRC-32...
        assert_eq!(default_hash(b"123456789"), 0xCBF4_3926);
        assert_eq!(default_hash(b""), 0);
    }

    #[test]
    fn empty_rings_route_nothing() {
        let ring = HashRing::new(3, None);
        assert_eq!(ring.is_empty(), true);
        assert_eq!(ring.route("key"), None);
    }
}
