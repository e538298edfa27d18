use std::collections::HashMap;

use crate::lru::list::{Handle, RecencyList};

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// Note that most probably this is an approximation and not the exact byte value. However,
    /// it should represent the "largest" part of an instance. (E.g. for a cached value, this
    /// would be the length of its payload and ignore the fields used to manage it.)
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl ByteSize for Vec<u8> {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

/// Represents the handler which is notified about each evicted entry.
///
/// The handler receives the key and value of the entry which has been dropped to make room for
/// newer entries. It is invoked exactly once per eviction. Entries which are removed explicitly
/// (via **remove** or **flush**) are not reported.
pub type EvictionHandler<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a size constrained LRU cache.
///
/// A cache behaves just like a **Map** as long as there is no shortage in storage. However, if
/// the allocated memory is above the given limit, old (least recently used) entries will be
/// evicted - hence the name LRU cache. The memory of an entry is accounted as the length of its
/// key plus the [ByteSize](ByteSize) of its value. A **max_memory** of 0 disables the limit.
///
/// # Examples
/// ```
/// # use peercache::lru::LRUCache;
/// // Specifies a cache which can allocate up to 24 bytes of memory.
/// let mut lru = LRUCache::new(24);
///
/// lru.add("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// lru.add("Foo1".to_owned(), "X".repeat(12));
/// assert_eq!(lru.get("Foo").is_some(), true);
/// assert_eq!(lru.get("Foo1").is_some(), true);
///
/// // this will hit the max memory constraint...
/// lru.add("Foo2".to_owned(), "X".repeat(12));
/// // ..and therefore will throw the two others out:
/// assert_eq!(lru.get("Foo").is_some(), false);
/// assert_eq!(lru.get("Foo1").is_some(), false);
/// assert_eq!(lru.get("Foo2").is_some(), true);
///```
pub struct LRUCache<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    evictions: usize,
    entries: RecencyList<Entry<V>>,
    index: HashMap<String, Handle>,
    on_evicted: Option<EvictionHandler<V>>,
}

struct Entry<V: ByteSize> {
    key: String,
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUCache<V> {
    /// Creates a new cache which can store as many entries until they allocated **max_memory**
    /// bytes. Use 0 to create an unbounded cache.
    pub fn new(max_memory: usize) -> Self {
        LRUCache {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            evictions: 0,
            entries: RecencyList::new(),
            index: HashMap::new(),
            on_evicted: None,
        }
    }

    /// Creates a new cache just like **new** which reports each evicted entry to the given handler.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let evicted_clone = evicted.clone();
    ///
    /// let mut lru = LRUCache::with_eviction_handler(
    ///     8,
    ///     Box::new(move |key, _value: String| evicted_clone.lock().unwrap().push(key)),
    /// );
    ///
    /// lru.add("A".to_owned(), "aaa".to_owned());
    /// lru.add("B".to_owned(), "bbb".to_owned());
    /// lru.add("C".to_owned(), "ccc".to_owned());
    ///
    /// assert_eq!(*evicted.lock().unwrap(), vec!["A".to_owned()]);
    /// ```
    pub fn with_eviction_handler(max_memory: usize, on_evicted: EvictionHandler<V>) -> Self {
        let mut cache = LRUCache::new(max_memory);
        cache.on_evicted = Some(on_evicted);
        cache
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced and the entry becomes the most
    /// recently used one. Afterwards, the least recently used entries are evicted until the
    /// cache fits into **max_memory** again. Note that an entry which is larger than the whole
    /// cache will therefore evict everything, including itself.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// lru.add("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.allocated_memory(), 6);
    ///
    /// lru.add("Foo".to_owned(), "Bar1".to_owned());
    /// assert_eq!(lru.allocated_memory(), 7);
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar1".to_owned());
    /// ```
    pub fn add(&mut self, key: String, value: V) {
        self.writes += 1;
        let mem_size = key.len() + value.allocated_size();

        let existing = self.index.get(&key).copied();
        match existing.and_then(|handle| self.entries.get_mut(handle).map(|e| (handle, e))) {
            Some((handle, entry)) => {
                self.allocated_memory = self.allocated_memory - entry.mem_size + mem_size;
                entry.mem_size = mem_size;
                entry.value = value;
                self.entries.move_to_front(handle);
            }
            None => {
                self.allocated_memory += mem_size;
                let handle = self.entries.push_front(Entry {
                    key: key.clone(),
                    mem_size,
                    value,
                });
                let _ = self.index.insert(key, handle);
            }
        }

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory != 0 && self.allocated_memory > self.max_memory {
            if !self.evict_oldest() {
                break;
            }
        }
    }

    /// Evicts the least recently used entry and reports it to the eviction handler.
    fn evict_oldest(&mut self) -> bool {
        match self.pop_oldest() {
            Some(entry) => {
                self.evictions += 1;
                if let Some(handler) = self.on_evicted.as_mut() {
                    handler(entry.key, entry.value);
                }
                true
            }
            None => false,
        }
    }

    fn pop_oldest(&mut self) -> Option<Entry<V>> {
        let entry = self.entries.pop_back()?;
        let _ = self.index.remove(&entry.key);
        self.allocated_memory -= entry.mem_size;
        Some(entry)
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A successful lookup marks the entry as most recently used.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // After inserting a value...
    /// lru.add("Foo".to_owned(), "Bar".to_owned());
    /// // ..it can be retrieved.
    /// assert_eq!(lru.get("Foo").unwrap(), &"Bar".to_owned());
    /// assert_eq!(lru.get("Unknown"), None);
    ///```
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        let handle = *self.index.get(key)?;
        self.hits += 1;
        self.entries.move_to_front(handle);
        self.entries.get(handle).map(|entry| &entry.value)
    }

    /// Determines if a value is present for the given key without touching its recency.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Removes the entry for the given key if present.
    ///
    /// Note that this is not considered an eviction and is therefore not reported to the
    /// eviction handler.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// lru.add("Foo".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.remove("Foo"), Some("Bar".to_owned()));
    ///
    /// // ..it's no longer accessible.
    /// assert_eq!(lru.get("Foo"), None);
    /// assert_eq!(lru.allocated_memory(), 0);
    /// ```
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.writes += 1;

        let handle = self.index.remove(key)?;
        let entry = self.entries.remove(handle)?;
        self.allocated_memory -= entry.mem_size;

        Some(entry.value)
    }

    /// Evicts the least recently used entry (if any) just as if the cache ran out of memory.
    pub fn remove_oldest(&mut self) {
        let _ = self.evict_oldest();
    }

    /// Removes all entries in this cache.
    ///
    /// Note that this will also zero all metrics (reads, writes, hits and evictions).
    pub fn flush(&mut self) {
        self.entries.clear();
        self.index = HashMap::new();
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
        self.evictions = 0;
    }

    /// Returns the number of elements in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lists all keys from the most recently used to the least recently used one.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.key.as_str()).collect()
    }

    /// Returns the maximal amount of memory to be (roughly) occupied by this cache.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Specifies the maximal amount of memory to be (roughly) occupied by this cache.
    ///
    /// If the limit is lowered, entries are evicted immediately until the cache fits.
    ///
    /// # Examples
    /// ```
    /// # use peercache::lru::LRUCache;
    /// let mut lru = LRUCache::new(1024);
    ///
    /// // Add some entries...
    /// lru.add("Foo0".to_owned(), "Bar".to_owned());
    /// lru.add("Foo1".to_owned(), "Bar".to_owned());
    /// lru.add("Foo2".to_owned(), "Bar".to_owned());
    /// lru.add("Foo3".to_owned(), "Bar".to_owned());
    /// assert_eq!(lru.len(), 4);
    ///
    /// // Now request that the cache is reduced to only 14 bytes...
    /// lru.set_max_memory(14);
    /// assert_eq!(lru.max_memory(), 14);
    ///
    /// // .. this will kick each but the last two entries out of the cache..
    /// assert_eq!(lru.len(), 2);
    /// ```
    pub fn set_max_memory(&mut self, max_memory: usize) {
        self.max_memory = max_memory;
        self.enforce_constraints();
    }

    /// Returns the amount of memory allocated to store the data of the keys and values of this
    /// cache.
    ///
    /// The returned value is in bytes. This is the figure which is compared against
    /// **max_memory**.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the total amount of memory allocated by this cache.
    ///
    /// In contrast to **allocated_memory()** this method also tries to account for the internal
    /// index and the recency list. These are only estimates.
    pub fn total_allocated_memory(&self) -> usize {
        self.allocated_memory
            + self.index.capacity() * (std::mem::size_of::<String>() + std::mem::size_of::<Handle>())
            + self.entries.capacity() * std::mem::size_of::<Entry<V>>()
    }

    /// Returns the memory utilization in percent.
    ///
    /// An unbounded cache always reports 0%.
    pub fn memory_utilization(&self) -> f32 {
        match self.max_memory {
            0 => 0.,
            max_memory => self.allocated_memory as f32 / max_memory as f32 * 100.,
        }
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of reads which found a value since the last flush.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Returns the number of entries evicted to enforce the memory limit since the last flush.
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}

#[cfg(test)]
mod tests {
    use crate::lru::LRUCache;
    use std::sync::{Arc, Mutex};

    #[test]
    fn max_memory_is_enforced() {
        let mut lru = LRUCache::new(12 * 4);

        // We expect 4 entries with a size of 12 bytes each to fully fit in the cache....
        lru.add("Hello0".to_owned(), "World0".to_owned());
        lru.add("Hello1".to_owned(), "World1".to_owned());
        lru.add("Hello2".to_owned(), "World2".to_owned());
        lru.add("Hello3".to_owned(), "World3".to_owned());
        assert_eq!(lru.len(), 4);
        assert_eq!(lru.allocated_memory(), 12 * 4);
        assert_eq!(lru.get("Hello0").unwrap(), &"World0".to_owned());
        assert_eq!(lru.get("Hello1").unwrap(), &"World1".to_owned());
        assert_eq!(lru.get("Hello2").unwrap(), &"World2".to_owned());
        assert_eq!(lru.get("Hello3").unwrap(), &"World3".to_owned());

        // If we remove an entry, the used memory is corrected...
        let _ = lru.remove("Hello0");
        assert_eq!(lru.len(), 3);
        assert_eq!(lru.allocated_memory(), 12 * 3);

        // If we replace an entry, the used memory is corrected...
        lru.add("Hello1".to_owned(), "".to_owned());
        assert_eq!(lru.allocated_memory(), 12 * 3 - 6);

        // Restore the original entry, so that the table as three entries with 12 bytes each...
        lru.add("Hello1".to_owned(), "World1".to_owned());
        assert_eq!(lru.allocated_memory(), 12 * 3);

        // If we now add an entry with is 13 bytes long, one entry has to be dropped and therefore
        // we end up with three remaining entries....
        lru.add("Hello0".to_owned(), "World01".to_owned());
        assert_eq!(lru.allocated_memory(), 12 * 2 + 13);
        assert_eq!(lru.len(), 3);
        // "Hello2" was the least recently touched/modified, so it will have been evicted to make
        // room for our new entry...
        assert_eq!(lru.get("Hello2"), None);
        assert_eq!(lru.evictions(), 1);
    }

    #[test]
    fn least_recently_used_entries_are_evicted_first() {
        let mut lru = LRUCache::new(3 * 4);

        lru.add("k1".to_owned(), "v1".to_owned());
        lru.add("k2".to_owned(), "v2".to_owned());
        lru.add("k3".to_owned(), "v3".to_owned());

        // Touching k1 "saves" it, so that k2 is the next candidate...
        let _ = lru.get("k1");
        lru.add("k4".to_owned(), "v4".to_owned());
        assert_eq!(lru.keys(), vec!["k4", "k1", "k3"]);

        // Replacing a value also counts as touch...
        lru.add("k3".to_owned(), "v3".to_owned());
        lru.add("k5".to_owned(), "v5".to_owned());
        assert_eq!(lru.keys(), vec!["k5", "k3", "k4"]);

        // The bound holds after every single insertion...
        for i in 0..100 {
            lru.add(format!("key{}", i), "x".repeat(i % 7));
            assert!(lru.allocated_memory() <= 12);
        }
    }

    #[test]
    fn oversized_entries_evict_everything() {
        let mut lru = LRUCache::new(10);
        lru.add("a".to_owned(), "1".to_owned());
        lru.add("big".to_owned(), "x".repeat(20));

        assert_eq!(lru.len(), 0);
        assert_eq!(lru.allocated_memory(), 0);
        assert_eq!(lru.evictions(), 2);
    }

    #[test]
    fn unbounded_caches_never_evict() {
        let mut lru = LRUCache::new(0);
        for i in 0..1000 {
            lru.add(format!("key{}", i), "value".to_owned());
        }

        assert_eq!(lru.len(), 1000);
        assert_eq!(lru.evictions(), 0);
        assert_eq!(lru.memory_utilization(), 0.);
    }

    #[test]
    fn eviction_handler_sees_each_evicted_entry_once() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let evicted_clone = evicted.clone();
        let mut lru = LRUCache::with_eviction_handler(
            10,
            Box::new(move |key: String, value: String| {
                evicted_clone.lock().unwrap().push((key, value))
            }),
        );

        lru.add("key1".to_owned(), "123456".to_owned());
        lru.add("k2".to_owned(), "k2".to_owned());
        lru.add("k3".to_owned(), "k3".to_owned());
        lru.add("k4".to_owned(), "k4".to_owned());

        assert_eq!(
            *evicted.lock().unwrap(),
            vec![
                ("key1".to_owned(), "123456".to_owned()),
                ("k2".to_owned(), "k2".to_owned())
            ]
        );

        // Explicit removals are not reported...
        let _ = lru.remove("k4");
        assert_eq!(evicted.lock().unwrap().len(), 2);

        // Shrinking the cache evicts as well...
        lru.set_max_memory(3);
        assert_eq!(
            evicted.lock().unwrap().last(),
            Some(&("k3".to_owned(), "k3".to_owned()))
        );
        assert_eq!(evicted.lock().unwrap().len(), 3);
        assert_eq!(lru.is_empty(), true);
    }

    #[test]
    fn metrics_are_computed_correctly() {
        let mut lru = LRUCache::new(10);

        // Write 3 values into the cache...
        lru.add("A".to_owned(), "A".to_owned());
        lru.add("B".to_owned(), "B".to_owned());
        lru.add("C".to_owned(), "C".to_owned());

        // Perform 4 reads, of which 3 hit a cache entry...
        assert_eq!(lru.get("A").is_some(), true);
        assert_eq!(lru.get("B").is_some(), true);
        assert_eq!(lru.get("C").is_some(), true);
        assert_eq!(lru.get("D").is_none(), true);

        // ... therefore we had 3 writes, 4 reads of which 3 hit a value which
        // yields a hit rate of 75%
        assert_eq!(lru.writes(), 3);
        assert_eq!(lru.reads(), 4);
        assert_eq!(lru.hits(), 3);
        assert_eq!(lru.hit_rate().round() as i32, 75);

        // We know our keys and values consume 6 bytes...
        assert_eq!(lru.allocated_memory(), 6);
        assert_eq!(lru.total_allocated_memory() > lru.allocated_memory(), true);

        // The cache contains 6 bytes of data and has a max memory of 10 -> 60% memory utilization..
        assert_eq!(lru.memory_utilization().round() as i32, 60);

        // Flushing drops all data and metrics...
        lru.remove_oldest();
        assert_eq!(lru.contains("A"), false);
        lru.flush();
        assert_eq!(lru.is_empty(), true);
        assert_eq!(lru.reads(), 0);
        assert_eq!(lru.evictions(), 0);
    }
}
