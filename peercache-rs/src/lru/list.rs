//! Provides the recency list which backs the [LRUCache](crate::lru::LRUCache).
//!
//! The list is a doubly linked list whose nodes live in a slab (a `Vec` of slots with a free
//! list). Nodes are linked via their slot index, so that a [Handle] stays valid until the node is
//! removed, independent of any other insertions or removals. This permits to move a node to the
//! front or to pop the back in O(1) without any pointer juggling.
//!
//! ```text
//!   head ─► [slot 2] ◄──► [slot 0] ◄──► [slot 1] ◄── tail
//!           (most recently used)        (least recently used)
//! ```

/// Addresses a node within a [RecencyList].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(usize);

struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A doubly linked list backed by a slab of nodes.
pub struct RecencyList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> RecencyList<T> {
    /// Creates an empty list without allocating any memory.
    pub fn new() -> Self {
        RecencyList {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Returns the number of nodes in the list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Determines if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots allocated in the underlying slab.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Inserts a value in front of the list (as most recently used).
    pub fn push_front(&mut self, value: T) -> Handle {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                index
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.len += 1;
        self.attach_front(index);
        Handle(index)
    }

    /// Moves the node addressed by the given handle to the front of the list.
    pub fn move_to_front(&mut self, handle: Handle) {
        if self.head == Some(handle.0) || self.node(handle.0).is_none() {
            return;
        }

        self.detach(handle.0);
        self.attach_front(handle.0);
    }

    /// Removes and returns the last (least recently used) value.
    pub fn pop_back(&mut self) -> Option<T> {
        self.tail.and_then(|index| self.remove(Handle(index)))
    }

    /// Removes the node addressed by the given handle.
    ///
    /// Returns **None** if the handle has already been removed.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if self.node(handle.0).is_none() {
            return None;
        }
        self.detach(handle.0);

        let node = self.slots.get_mut(handle.0)?.take()?;
        self.free.push(handle.0);
        self.len -= 1;

        Some(node.value)
    }

    /// Provides access to the value addressed by the given handle.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.node(handle.0).map(|node| &node.value)
    }

    /// Provides mutable access to the value addressed by the given handle.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .map(|node| &mut node.value)
    }

    /// Returns the last (least recently used) value without removing it.
    pub fn back(&self) -> Option<&T> {
        self.tail.and_then(|index| self.get(Handle(index)))
    }

    /// Iterates over all values from the front (most recently used) to the back.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let node = self.node(current?)?;
            current = node.next;
            Some(&node.value)
        })
    }

    /// Drops all nodes and releases the slab.
    pub fn clear(&mut self) {
        self.slots = Vec::new();
        self.free = Vec::new();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn node(&self, index: usize) -> Option<&Node<T>> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(index).and_then(|slot| slot.as_mut())
    }

    fn attach_front(&mut self, index: usize) {
        let previous_head = self.head;
        if let Some(node) = self.node_mut(index) {
            node.prev = None;
            node.next = previous_head;
        }

        match previous_head.and_then(|head| self.node_mut(head)) {
            Some(head) => head.prev = Some(index),
            None => self.tail = Some(index),
        }

        self.head = Some(index);
    }

    fn detach(&mut self, index: usize) {
        let (prev, next) = match self.node(index) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev.and_then(|prev| self.node_mut(prev)) {
            Some(prev_node) => prev_node.next = next,
            None => self.head = next,
        }

        match next.and_then(|next| self.node_mut(next)) {
            Some(next_node) => next_node.prev = prev,
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(index) {
            node.prev = None;
            node.next = None;
        }
    }
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        RecencyList::new()
    }
}
