use std::collections::HashMap;

use bytes::Bytes;

use super::CacheKey;

/// A node of the recency list.
///
/// Nodes live in [`MemoryLru::nodes`] and link to their neighbors by index,
/// so the list needs neither shared ownership nor unsafe code. A vacated slot
/// stays in the vector and is recycled through the free list.
#[derive(Debug)]
struct Node {
    key: CacheKey,
    blob: Bytes,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded in-memory blob cache with least-recently-used eviction.
///
/// A `HashMap` from key to node index gives O(1) lookup, while the nodes form
/// an index-linked doubly-linked list from most-recently-used (head) to
/// least-recently-used (tail). Every hit promotes the entry to the head;
/// inserting beyond capacity evicts exactly the tail.
///
/// This structure is not synchronized. All mutation must be serialized by the
/// owner (see [`BlobCache`](super::BlobCache), which wraps it in a mutex).
#[derive(Debug)]
pub struct MemoryLru {
    capacity: usize,
    map: HashMap<CacheKey, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl MemoryLru {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Looks up a blob and promotes it to most-recently-used.
    pub fn get(&mut self, key: &CacheKey) -> Option<Bytes> {
        let idx = *self.map.get(key)?;
        self.promote(idx);
        Some(self.nodes[idx].blob.clone())
    }

    /// Inserts or replaces a blob, making it the most-recently-used entry.
    ///
    /// If this pushes the cache over capacity, the current tail is evicted.
    /// Capacity can be exceeded by at most one entry after a single insert,
    /// so at most one eviction happens per call.
    pub fn put(&mut self, key: &CacheKey, blob: Bytes) {
        if let Some(&idx) = self.map.get(key) {
            self.nodes[idx].blob = blob;
            self.promote(idx);
            return;
        }

        let node = Node {
            key: key.clone(),
            blob,
            prev: None,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };

        match self.head {
            Some(head) => self.nodes[head].prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.map.insert(key.clone(), idx);

        if self.map.len() > self.capacity {
            self.evict_tail();
        }
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// The number of resident entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Moves the node at `idx` to the head of the recency list.
    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }

        self.unlink(idx);

        self.nodes[idx].prev = None;
        self.nodes[idx].next = self.head;
        if let Some(head) = self.head {
            self.nodes[head].prev = Some(idx);
        }
        self.head = Some(idx);
        // if `idx` was the tail, `unlink` already moved the tail pointer to
        // its former predecessor
    }

    /// Detaches the node at `idx` from the list, patching its two neighbors
    /// and the head/tail boundaries.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(prev) => self.nodes[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.nodes[next].prev = prev,
            None => self.tail = prev,
        }
    }

    /// Evicts the least-recently-used entry.
    fn evict_tail(&mut self) {
        let Some(idx) = self.tail else { return };
        self.unlink(idx);

        let node = &mut self.nodes[idx];
        node.blob = Bytes::new();
        let key = node.key.clone();
        tracing::trace!(key = %key, "evicting least-recently-used entry");

        self.map.remove(&key);
        self.free.push(idx);
    }

    /// The number of allocated node slots, including vacated ones.
    #[cfg(test)]
    pub(crate) fn node_slots(&self) -> usize {
        self.nodes.len()
    }

    /// The resident keys in most-recently-used-first order.
    #[cfg(test)]
    pub(crate) fn recency_order(&self) -> Vec<CacheKey> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            keys.push(self.nodes[idx].key.clone());
            cursor = self.nodes[idx].next;
        }
        keys
    }
}
