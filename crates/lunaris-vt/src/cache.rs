//! The page cache: atlas slot ownership, LRU order, and the pinned tier.

use std::collections::HashMap;

use crate::request::{PageRequest, PageSlot};

/// Result of [`PageCache::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResidencyDecision {
    /// The slot to upload into, if one was found.
    pub slot: Option<PageSlot>,
    /// A request evicted to make room for `slot`. Its page-table entry
    /// must be cleared by the caller before the slot is reused.
    pub evicted: Option<PageRequest>,
}

/// Slab index into [`PageCache`]'s LRU list.
type NodeIndex = usize;

/// One node of the doubly linked LRU list, stored in a slab (`Vec`)
/// rather than behind pointers, so the whole list is built and spliced
/// without `unsafe`.
#[derive(Debug, Clone, Copy)]
struct LruNode {
    request: PageRequest,
    slot: PageSlot,
    prev: Option<NodeIndex>,
    next: Option<NodeIndex>,
}

/// Ownership of the atlas's physical slots: a free-list stack, an LRU
/// order over resident requests, and the map from request to slot.
///
/// See `spec.md` §4.2 for the full contract. The invariants this type
/// must uphold at every public boundary:
///
/// - every slot is in exactly one of: the free list, the LRU list, or
///   temporarily reserved by an in-flight load (tracked by the caller,
///   not by this type);
/// - `req_to_slot`'s key set equals the LRU list's key set;
/// - a request with `lod >= min_pinned_lod` is never returned as an
///   eviction victim;
/// - a request outside the virtual texture's grid never mutates any
///   state and is never returned as an eviction victim either.
pub struct PageCache {
    min_pinned_lod: u32,
    lods: u32,
    pages_x: u32,
    pages_y: u32,
    free_slots: Vec<PageSlot>,
    req_to_slot: HashMap<PageRequest, NodeIndex>,
    nodes: Vec<Option<LruNode>>,
    free_nodes: Vec<NodeIndex>,
    head: Option<NodeIndex>, // most recently used
    tail: Option<NodeIndex>, // least recently used
}

impl PageCache {
    /// Construct a cache over `atlas_slots_x * atlas_slots_y` slots, all
    /// initially free, with pinning threshold `min_pinned_lod`.
    ///
    /// `lods`, `pages_x`, and `pages_y` describe the virtual texture's
    /// own grid (mip count and mip-0 page dimensions) and are used to
    /// reject out-of-range requests in [`Self::acquire`] — the decoder
    /// performs no validation of its own, per `spec.md` §4.1, so this is
    /// the only bounds check a malformed feedback word passes through.
    #[must_use]
    pub fn new(
        atlas_slots_x: u32,
        atlas_slots_y: u32,
        min_pinned_lod: u32,
        lods: u32,
        pages_x: u32,
        pages_y: u32,
    ) -> Self {
        let mut free_slots = Vec::with_capacity((atlas_slots_x * atlas_slots_y) as usize);
        for y in 0..atlas_slots_y {
            for x in 0..atlas_slots_x {
                free_slots.push(PageSlot::new(x, y));
            }
        }
        Self {
            min_pinned_lod,
            lods,
            pages_x,
            pages_y,
            free_slots,
            req_to_slot: HashMap::new(),
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Total slot count the cache was constructed with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.free_slots.len() + self.req_to_slot.len()
    }

    /// Number of slots currently on the free list.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Whether `request` currently occupies a slot.
    #[must_use]
    pub fn is_resident(&self, request: PageRequest) -> bool {
        self.req_to_slot.contains_key(&request)
    }

    /// The slot `request` currently occupies, if any.
    #[must_use]
    pub fn slot_of(&self, request: PageRequest) -> Option<PageSlot> {
        self.req_to_slot
            .get(&request)
            .and_then(|&idx| self.nodes[idx])
            .map(|node| node.slot)
    }

    fn detach(&mut self, idx: NodeIndex) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node must exist");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: NodeIndex) {
        let old_head = self.head;
        {
            let node = self.nodes[idx].as_mut().unwrap();
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn alloc_node(&mut self, request: PageRequest, slot: PageSlot) -> NodeIndex {
        let node = LruNode {
            request,
            slot,
            prev: None,
            next: None,
        };
        if let Some(idx) = self.free_nodes.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn free_node(&mut self, idx: NodeIndex) {
        self.nodes[idx] = None;
        self.free_nodes.push(idx);
    }

    /// Record that `request` has just been uploaded into `slot`.
    ///
    /// # Panics
    ///
    /// Panics (via `debug_assert!`) if `request` is already resident;
    /// a duplicate commit is a caller bug, per `spec.md` §4.2/§7. In a
    /// release build the second commit is a no-op.
    pub fn commit(&mut self, request: PageRequest, slot: PageSlot) {
        debug_assert!(
            !self.is_resident(request),
            "duplicate Commit for already-resident request {request}"
        );
        if self.is_resident(request) {
            return;
        }
        let idx = self.alloc_node(request, slot);
        self.push_front(idx);
        self.req_to_slot.insert(request, idx);
    }

    /// Move `request` to the most-recently-used position.
    ///
    /// A no-op for pinned requests (`lod >= min_pinned_lod`) — pinned
    /// tiers are never reshuffled — and for non-resident requests,
    /// which the manager is responsible for requesting instead.
    pub fn touch(&mut self, request: PageRequest) {
        if request.lod >= self.min_pinned_lod {
            return;
        }
        if let Some(&idx) = self.req_to_slot.get(&request) {
            if self.head == Some(idx) {
                return;
            }
            self.detach(idx);
            self.push_front(idx);
        }
    }

    /// Acquire a slot for `request`: a cache hit, a free slot, or an
    /// evicted LRU victim, in that priority order.
    ///
    /// Returns a decision with `slot = None` if the cache is saturated
    /// with pinned and in-flight pages and no evictable victim exists,
    /// or if `request` falls outside the virtual texture's grid; the
    /// caller must drop the request in either case. An out-of-range
    /// request is rejected before anything else runs, so it never
    /// touches the free list or evicts a resident page.
    pub fn acquire(&mut self, request: PageRequest) -> ResidencyDecision {
        if !request.in_bounds(self.lods, self.pages_x, self.pages_y) {
            return ResidencyDecision::default();
        }

        if let Some(slot) = self.slot_of(request) {
            return ResidencyDecision {
                slot: Some(slot),
                evicted: None,
            };
        }

        if let Some(slot) = self.free_slots.pop() {
            return ResidencyDecision {
                slot: Some(slot),
                evicted: None,
            };
        }

        // Scan from the tail (least recently used) forward for the
        // first non-pinned entry.
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            let node = self.nodes[idx].expect("node must exist");
            if node.request.lod < self.min_pinned_lod {
                self.detach(idx);
                self.req_to_slot.remove(&node.request);
                self.free_node(idx);
                return ResidencyDecision {
                    slot: Some(node.slot),
                    evicted: Some(node.request),
                };
            }
            cursor = node.prev;
        }

        ResidencyDecision::default()
    }

    /// Return `slot` to the free list after a failed load that never
    /// reached [`Self::commit`].
    ///
    /// # Panics
    ///
    /// Debug builds assert the slot isn't already free; duplicate
    /// cancellation is a caller bug.
    pub fn cancel(&mut self, slot: PageSlot) {
        debug_assert!(
            !self.free_slots.contains(&slot),
            "duplicate Cancel of slot {slot:?}"
        );
        self.free_slots.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_PIN: u32 = 99;
    // A generous grid so ordinary tests never trip the bounds check
    // incidentally; grid-rejection itself gets its own dedicated test.
    const LODS: u32 = 16;
    const PAGES: u32 = 1 << 16;

    fn cache(atlas_slots: u32, min_pinned_lod: u32) -> PageCache {
        PageCache::new(atlas_slots, atlas_slots, min_pinned_lod, LODS, PAGES, PAGES)
    }

    #[test]
    fn s1_cold_hit() {
        let mut cache = cache(2, NO_PIN);
        let r = PageRequest::new(0, 0, 0);
        let decision = cache.acquire(r);
        assert_eq!(decision.evicted, None);
        let slot = decision.slot.expect("slot expected");
        cache.commit(r, slot);
        assert!(cache.is_resident(r));
        assert_eq!(cache.slot_of(r), Some(slot));
    }

    #[test]
    fn s2_eviction_order() {
        let mut cache = cache(2, NO_PIN);
        let reqs: Vec<_> = (1..=4).map(|i| PageRequest::new(0, i, 0)).collect();
        for &r in &reqs {
            let slot = cache.acquire(r).slot.unwrap();
            cache.commit(r, slot);
            cache.touch(r);
        }
        // MRU order is R4, R3, R2, R1 (R1 is the LRU victim).
        let r5 = PageRequest::new(0, 5, 0);
        let decision = cache.acquire(r5);
        assert_eq!(decision.evicted, Some(reqs[0]));
    }

    #[test]
    fn s3_cancel_restores_slot() {
        let mut cache = cache(2, NO_PIN);
        let r1 = PageRequest::new(0, 1, 0);
        let slot = cache.acquire(r1).slot.unwrap();
        cache.cancel(slot);

        let r2 = PageRequest::new(0, 2, 0);
        let decision = cache.acquire(r2);
        assert_eq!(decision.slot, Some(slot));
        assert_eq!(decision.evicted, None);
    }

    #[test]
    fn s4_pinned_protection() {
        let mut cache = cache(2, 1);
        for (i, (x, y)) in [(0, 0), (1, 0), (0, 1), (1, 1)].into_iter().enumerate() {
            let r = PageRequest::new(1, x, y);
            let slot = cache.acquire(r).slot.unwrap();
            cache.commit(r, slot);
            let _ = i;
        }
        let decision = cache.acquire(PageRequest::new(0, 0, 0));
        assert_eq!(decision, ResidencyDecision::default());
    }

    #[test]
    fn touch_is_idempotent() {
        let mut cache = cache(2, NO_PIN);
        let r1 = PageRequest::new(0, 1, 0);
        let r2 = PageRequest::new(0, 2, 0);
        for r in [r1, r2] {
            let slot = cache.acquire(r).slot.unwrap();
            cache.commit(r, slot);
        }
        cache.touch(r1);
        cache.touch(r1);
        // r2 is still the LRU victim since repeated touches of r1 are idempotent.
        let r3 = PageRequest::new(0, 3, 0);
        let decision = cache.acquire(r3);
        assert_eq!(decision.evicted, Some(r2));
    }

    #[test]
    fn touch_on_pinned_is_noop() {
        let mut cache = cache(1, 0);
        let r = PageRequest::new(0, 0, 0);
        let slot = cache.acquire(r).slot.unwrap();
        cache.commit(r, slot);
        cache.touch(r); // lod 0 >= min_pinned_lod 0, so this must not panic or reorder.
        assert!(cache.is_resident(r));
    }

    #[test]
    fn touch_on_nonresident_is_ignored() {
        let mut cache = cache(2, NO_PIN);
        cache.touch(PageRequest::new(0, 0, 0));
        assert_eq!(cache.free_count(), 4);
    }

    #[test]
    fn acquire_monotonicity_after_commit() {
        let mut cache = cache(2, NO_PIN);
        let r = PageRequest::new(0, 0, 0);
        let slot = cache.acquire(r).slot.unwrap();
        cache.commit(r, slot);
        let second = cache.acquire(r);
        assert_eq!(second.slot, Some(slot));
        assert_eq!(second.evicted, None);
    }

    #[test]
    fn capacity_invariant_i1() {
        let mut cache = cache(2, NO_PIN);
        let total = cache.capacity();
        let r1 = PageRequest::new(0, 0, 0);
        let slot = cache.acquire(r1).slot.unwrap();
        cache.commit(r1, slot);
        // free + resident always equals the fixed total slot count.
        assert_eq!(cache.free_count(), total - 1);
        assert_eq!(cache.capacity(), total);
    }

    #[test]
    fn out_of_range_request_is_dropped_without_mutation() {
        let mut cache = cache(2, NO_PIN);
        let r1 = PageRequest::new(0, 1, 0);
        let slot = cache.acquire(r1).slot.unwrap();
        cache.commit(r1, slot);

        let free_before = cache.free_count();
        let bogus = PageRequest::new(LODS + 5, 0, 0);
        let decision = cache.acquire(bogus);

        assert_eq!(decision, ResidencyDecision::default());
        assert!(!cache.is_resident(bogus));
        // the legitimate resident page must not have been evicted to
        // satisfy the bogus request.
        assert!(cache.is_resident(r1));
        assert_eq!(cache.free_count(), free_before);
    }

    #[test]
    fn out_of_range_request_does_not_evict_when_cache_is_full() {
        // With every slot resident and no free slot, a bogus request
        // must still be rejected rather than evicting the LRU victim.
        let mut cache = cache(1, NO_PIN);
        let r1 = PageRequest::new(0, 0, 0);
        let slot = cache.acquire(r1).slot.unwrap();
        cache.commit(r1, slot);

        let bogus = PageRequest::new(0, PAGES as i32 + 1, 0);
        let decision = cache.acquire(bogus);

        assert_eq!(decision, ResidencyDecision::default());
        assert!(cache.is_resident(r1));
    }
}
