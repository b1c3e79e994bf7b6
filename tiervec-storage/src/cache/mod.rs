//! DRAM cache with pluggable eviction policies
//!
//! The cache composes a plain id->vector map with an [`EvictionPolicy`]
//! value holding the policy metadata. Both policies run `record_access` and
//! `on_insert` in amortized O(1): LRU keeps one intrusive recency list, LFU
//! keeps one recency list per frequency bucket with a floating minimum.

use std::collections::HashMap;

use tiervec_common::error::{Error, Result};
use tiervec_common::types::{CachePolicyKind, VectorId};

const NIL: usize = usize::MAX;

// ============================================================================
// Intrusive list arena
// ============================================================================

struct Node {
    id: VectorId,
    prev: usize,
    next: usize,
}

/// Slab of doubly-linked nodes; lists store head/tail indexes into it
#[derive(Default)]
struct NodeArena {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

impl NodeArena {
    fn alloc(&mut self, id: VectorId) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Node {
                id,
                prev: NIL,
                next: NIL,
            };
            idx
        } else {
            self.nodes.push(Node {
                id,
                prev: NIL,
                next: NIL,
            });
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, idx: usize) {
        self.free.push(idx);
    }
}

/// One recency list; the front is the most recently touched entry
#[derive(Clone, Copy)]
struct List {
    head: usize,
    tail: usize,
    len: usize,
}

impl List {
    fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    fn push_front(&mut self, arena: &mut NodeArena, idx: usize) {
        arena.nodes[idx].prev = NIL;
        arena.nodes[idx].next = self.head;
        if self.head != NIL {
            arena.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.len += 1;
    }

    fn unlink(&mut self, arena: &mut NodeArena, idx: usize) {
        let Node { prev, next, .. } = arena.nodes[idx];
        if prev != NIL {
            arena.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            arena.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.len -= 1;
    }

    fn pop_back(&mut self, arena: &mut NodeArena) -> Option<usize> {
        let idx = self.tail;
        if idx == NIL {
            return None;
        }
        self.unlink(arena, idx);
        Some(idx)
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ============================================================================
// LRU
// ============================================================================

struct LruPolicy {
    arena: NodeArena,
    list: List,
    index: HashMap<VectorId, usize>,
    capacity: usize,
}

impl LruPolicy {
    fn new(capacity: usize) -> Self {
        Self {
            arena: NodeArena::default(),
            list: List::new(),
            index: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    fn record_access(&mut self, id: VectorId) {
        if let Some(&idx) = self.index.get(&id) {
            self.list.unlink(&mut self.arena, idx);
            self.list.push_front(&mut self.arena, idx);
        }
    }

    fn on_insert(&mut self, id: VectorId) -> Option<VectorId> {
        if self.index.contains_key(&id) {
            self.record_access(id);
            return None;
        }

        let evicted = if self.index.len() == self.capacity {
            let idx = self.list.pop_back(&mut self.arena).expect("capacity >= 1");
            let victim = self.arena.nodes[idx].id;
            self.index.remove(&victim);
            self.arena.release(idx);
            Some(victim)
        } else {
            None
        };

        let idx = self.arena.alloc(id);
        self.list.push_front(&mut self.arena, idx);
        self.index.insert(id, idx);
        evicted
    }
}

// ============================================================================
// LFU
// ============================================================================

struct LfuEntry {
    freq: u64,
    slot: usize,
}

struct LfuPolicy {
    arena: NodeArena,
    buckets: HashMap<u64, List>,
    index: HashMap<VectorId, LfuEntry>,
    min_freq: u64,
    capacity: usize,
}

impl LfuPolicy {
    fn new(capacity: usize) -> Self {
        Self {
            arena: NodeArena::default(),
            buckets: HashMap::new(),
            index: HashMap::with_capacity(capacity),
            min_freq: 0,
            capacity,
        }
    }

    fn detach(&mut self, freq: u64, slot: usize) {
        let list = self.buckets.get_mut(&freq).expect("bucket exists");
        list.unlink(&mut self.arena, slot);
        if list.is_empty() {
            self.buckets.remove(&freq);
            if self.min_freq == freq {
                self.min_freq = freq + 1;
            }
        }
    }

    fn attach(&mut self, freq: u64, slot: usize) {
        self.buckets
            .entry(freq)
            .or_insert_with(List::new)
            .push_front(&mut self.arena, slot);
    }

    fn record_access(&mut self, id: VectorId) {
        let Some(entry) = self.index.get(&id) else {
            return;
        };
        let (freq, slot) = (entry.freq, entry.slot);
        self.detach(freq, slot);
        self.attach(freq + 1, slot);
        self.index.insert(
            id,
            LfuEntry {
                freq: freq + 1,
                slot,
            },
        );
    }

    fn on_insert(&mut self, id: VectorId) -> Option<VectorId> {
        if self.index.contains_key(&id) {
            self.record_access(id);
            return None;
        }

        let evicted = if self.index.len() == self.capacity {
            let list = self
                .buckets
                .get_mut(&self.min_freq)
                .expect("min bucket exists at capacity");
            let slot = list.pop_back(&mut self.arena).expect("capacity >= 1");
            if list.is_empty() {
                self.buckets.remove(&self.min_freq);
            }
            let victim = self.arena.nodes[slot].id;
            self.index.remove(&victim);
            self.arena.release(slot);
            Some(victim)
        } else {
            None
        };

        let slot = self.arena.alloc(id);
        self.attach(1, slot);
        self.index.insert(id, LfuEntry { freq: 1, slot });
        self.min_freq = 1;
        evicted
    }
}

// ============================================================================
// Policy dispatch
// ============================================================================

/// Eviction policy state machine over a fixed capacity
pub struct EvictionPolicy {
    inner: PolicyImpl,
}

enum PolicyImpl {
    Lru(LruPolicy),
    Lfu(LfuPolicy),
}

impl EvictionPolicy {
    pub fn new(kind: CachePolicyKind, capacity: usize) -> Self {
        let inner = match kind {
            CachePolicyKind::Lru => PolicyImpl::Lru(LruPolicy::new(capacity)),
            CachePolicyKind::Lfu => PolicyImpl::Lfu(LfuPolicy::new(capacity)),
        };
        Self { inner }
    }

    /// Hit path: update recency/frequency metadata, never inserts
    pub fn record_access(&mut self, id: VectorId) {
        match &mut self.inner {
            PolicyImpl::Lru(p) => p.record_access(id),
            PolicyImpl::Lfu(p) => p.record_access(id),
        }
    }

    /// Admission path: returns the evicted id when at capacity.
    ///
    /// Re-inserting a resident id is idempotent; it counts as one access.
    pub fn on_insert(&mut self, id: VectorId) -> Option<VectorId> {
        match &mut self.inner {
            PolicyImpl::Lru(p) => p.on_insert(id),
            PolicyImpl::Lfu(p) => p.on_insert(id),
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            PolicyImpl::Lru(p) => p.index.len(),
            PolicyImpl::Lfu(p) => p.index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: VectorId) -> bool {
        match &self.inner {
            PolicyImpl::Lru(p) => p.index.contains_key(&id),
            PolicyImpl::Lfu(p) => p.index.contains_key(&id),
        }
    }

    fn keys(&self) -> Vec<VectorId> {
        match &self.inner {
            PolicyImpl::Lru(p) => p.index.keys().copied().collect(),
            PolicyImpl::Lfu(p) => p.index.keys().copied().collect(),
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Bounded id->vector cache; the policy decides who leaves
pub struct VectorCache {
    map: HashMap<VectorId, Vec<f32>>,
    policy: EvictionPolicy,
    capacity: usize,
}

impl VectorCache {
    pub fn new(kind: CachePolicyKind, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidParameter(
                "cache capacity must be >= 1".into(),
            ));
        }
        Ok(Self {
            map: HashMap::with_capacity(capacity),
            policy: EvictionPolicy::new(kind, capacity),
            capacity,
        })
    }

    /// Look up `id`; a hit updates the policy metadata
    pub fn get(&mut self, id: VectorId) -> Option<&[f32]> {
        if self.map.contains_key(&id) {
            self.policy.record_access(id);
        }
        self.map.get(&id).map(Vec::as_slice)
    }

    /// Insert `id`, evicting per policy if at capacity; returns the victim
    pub fn insert(&mut self, id: VectorId, vector: Vec<f32>) -> Option<VectorId> {
        let evicted = self.policy.on_insert(id);
        if let Some(victim) = evicted {
            self.map.remove(&victim);
        }
        self.map.insert(id, vector);
        evicted
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.map.contains_key(&id)
    }

    /// The policy's key set must always equal the stored key set
    #[cfg(test)]
    fn check_consistency(&self) {
        assert!(self.map.len() <= self.capacity);
        let mut policy_keys = self.policy.keys();
        let mut map_keys: Vec<VectorId> = self.map.keys().copied().collect();
        policy_keys.sort_unstable();
        map_keys.sort_unstable();
        assert_eq!(policy_keys, map_keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(kind: CachePolicyKind, capacity: usize) -> VectorCache {
        VectorCache::new(kind, capacity).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(VectorCache::new(CachePolicyKind::Lru, 0).is_err());
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut c = cache(CachePolicyKind::Lru, 2);
        assert_eq!(c.insert(1, vec![1.0]), None);
        assert_eq!(c.insert(2, vec![2.0]), None);

        // Touch 1 so 2 becomes the victim.
        assert!(c.get(1).is_some());
        assert_eq!(c.insert(3, vec![3.0]), Some(2));
        assert!(c.contains(1));
        assert!(!c.contains(2));
        c.check_consistency();
    }

    #[test]
    fn test_lfu_evicts_lowest_frequency() {
        let mut c = cache(CachePolicyKind::Lfu, 2);
        c.insert(1, vec![1.0]);
        c.insert(2, vec![2.0]);
        c.get(1);
        c.get(1);
        c.get(2);

        // freq(1)=3, freq(2)=2 -> 2 leaves.
        assert_eq!(c.insert(3, vec![3.0]), Some(2));
        c.check_consistency();
    }

    #[test]
    fn test_lfu_ties_break_least_recently_seen() {
        let mut c = cache(CachePolicyKind::Lfu, 2);
        c.insert(1, vec![1.0]);
        c.insert(2, vec![2.0]);
        c.get(1);
        c.get(2);

        // Equal frequency; 1 was seen less recently.
        assert_eq!(c.insert(3, vec![3.0]), Some(1));
        c.check_consistency();
    }

    #[test]
    fn test_reinsert_is_idempotent() {
        for kind in [CachePolicyKind::Lru, CachePolicyKind::Lfu] {
            let mut c = cache(kind, 2);
            c.insert(1, vec![1.0]);
            c.insert(2, vec![2.0]);
            assert_eq!(c.insert(1, vec![1.5]), None);
            assert_eq!(c.len(), 2);
            assert_eq!(c.get(1).unwrap(), &[1.5][..]);
            c.check_consistency();
        }
    }

    #[test]
    fn test_occupancy_never_exceeds_capacity() {
        let mut c = cache(CachePolicyKind::Lru, 4);
        for id in 0..64u64 {
            c.insert(id, vec![id as f32]);
            assert!(c.len() <= 4);
        }
        c.check_consistency();
    }

    proptest! {
        #[test]
        fn prop_policy_and_map_stay_in_sync(
            ops in prop::collection::vec((0u64..32, prop::bool::ANY), 1..256),
            lfu in prop::bool::ANY,
        ) {
            let kind = if lfu { CachePolicyKind::Lfu } else { CachePolicyKind::Lru };
            let mut c = cache(kind, 8);
            for (id, is_insert) in ops {
                if is_insert {
                    c.insert(id, vec![id as f32]);
                } else {
                    c.get(id);
                }
                c.check_consistency();
            }
        }
    }
}
