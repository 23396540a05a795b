//! The resident-block set: an arena of block buffers indexed by a
//! multiplicative-hash table and threaded onto an intrusive LRU list.
//!
//! Blocks live in an arena and are addressed by stable integer slot
//! handles; hash-chain and recency links are `Option<usize>` fields on
//! the slots, giving O(1) unlink/relink without pointer aliasing. A
//! slot is never returned to the arena: once the table is full, the
//! least recently used slot's buffer is recycled for the incoming
//! block.

use crate::element::Element;

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total number of block lookups (one per voxel access).
    pub lookups: u64,
    /// Lookups answered by a resident block.
    pub hits: u64,
    /// Lookups that had to fault a block in.
    pub misses: u64,
    /// Resident blocks recycled to make room.
    pub evictions: u64,
    /// Blocks materialized from the backing file.
    pub block_reads: u64,
    /// Dirty blocks written back to the backing file.
    pub block_writes: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }

    /// Reset all statistics to zero.
    pub fn reset(&mut self) {
        *self = CacheStats::default();
    }
}

/// Fractional part of the golden ratio; disperses small consecutive
/// block indices well even in small tables.
const HASH_FUNCTION_CONSTANT: f64 = 0.618_033_988_749_894_8;

/// Bucket-array headroom over the resident-block capacity.
const HASH_TABLE_SIZE_FACTOR: usize = 3;

#[derive(Debug)]
struct BlockSlot<T> {
    /// Linear block index; unique among resident blocks.
    block_index: usize,
    data: Vec<T>,
    dirty: bool,
    prev_used: Option<usize>,
    next_used: Option<usize>,
    prev_hash: Option<usize>,
    next_hash: Option<usize>,
}

/// Hash-indexed, LRU-ordered set of resident blocks.
///
/// Purely an in-memory structure: the cache controller decides when to
/// fault, flush, or recycle; the table keeps the three views (arena,
/// hash chains, recency list) mutually consistent.
#[derive(Debug)]
pub(crate) struct BlockTable<T: Element> {
    slots: Vec<BlockSlot<T>>,
    buckets: Vec<Option<usize>>,
    head: Option<usize>,
    tail: Option<usize>,
    max_blocks: usize,
    block_len: usize,
    /// Fast path for repeated access to one block: (block index, slot).
    last_access: Option<(usize, usize)>,
}

impl<T: Element> BlockTable<T> {
    /// Create an empty table holding at most `max_blocks` blocks of
    /// `block_len` elements each.
    pub fn new(max_blocks: usize, block_len: usize) -> Self {
        Self {
            slots: Vec::new(),
            buckets: vec![None; max_blocks * HASH_TABLE_SIZE_FACTOR],
            head: None,
            tail: None,
            max_blocks,
            block_len,
            last_access: None,
        }
    }

    /// Number of resident blocks.
    pub fn n_blocks(&self) -> usize {
        self.slots.len()
    }

    /// Whether every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.max_blocks
    }

    /// The slot of the most recent access, if it holds `block_index`.
    ///
    /// Skips both the hash probe and the recency-list update; repeated
    /// operations on one block are the common case.
    #[inline]
    pub fn fast_path(&self, block_index: usize) -> Option<usize> {
        match self.last_access {
            Some((index, slot)) if index == block_index => Some(slot),
            _ => None,
        }
    }

    /// Look up a resident block by its linear index.
    ///
    /// On a hit the block is promoted to the head of the recency list
    /// and to the head of its hash chain, and the last-access memo is
    /// updated.
    pub fn find(&mut self, block_index: usize) -> Option<usize> {
        let bucket = self.bucket_of(block_index);

        let mut cursor = self.buckets[bucket];
        while let Some(slot) = cursor {
            if self.slots[slot].block_index == block_index {
                if self.head != Some(slot) {
                    self.unlink_used(slot);
                    self.push_used_front(slot);
                }
                if self.buckets[bucket] != Some(slot) {
                    self.unlink_hash(slot);
                    self.push_hash_front(slot);
                }
                self.last_access = Some((block_index, slot));
                return Some(slot);
            }
            cursor = self.slots[slot].next_hash;
        }
        None
    }

    /// Allocate a fresh zero-filled slot for `block_index` and link it
    /// at the head of both the hash chain and the recency list.
    ///
    /// Must only be called while the table is not full.
    pub fn insert_new(&mut self, block_index: usize) -> usize {
        assert!(!self.is_full(), "block table over capacity");

        let slot = self.slots.len();
        self.slots.push(BlockSlot {
            block_index,
            data: vec![T::default(); self.block_len],
            dirty: false,
            prev_used: None,
            next_used: None,
            prev_hash: None,
            next_hash: None,
        });

        self.push_hash_front(slot);
        self.push_used_front(slot);
        self.last_access = Some((block_index, slot));
        slot
    }

    /// The least recently used slot, the eviction candidate.
    pub fn tail(&self) -> Option<usize> {
        self.tail
    }

    /// Rebind the LRU tail slot to a new block index, reusing its
    /// buffer. The caller must have written the block back if it was
    /// dirty; buffer contents are left untouched for the caller to
    /// overwrite or zero.
    pub fn recycle_tail(&mut self, new_block_index: usize) -> usize {
        let slot = self.tail.expect("recycle_tail on empty table");

        self.unlink_used(slot);
        self.unlink_hash(slot);

        let entry = &mut self.slots[slot];
        entry.block_index = new_block_index;
        entry.dirty = false;

        self.push_hash_front(slot);
        self.push_used_front(slot);
        self.last_access = Some((new_block_index, slot));
        slot
    }

    /// Drop every resident block and reset all structure. Buffers are
    /// released; the caller is responsible for having flushed first.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.buckets.iter_mut().for_each(|bucket| *bucket = None);
        self.head = None;
        self.tail = None;
        self.last_access = None;
    }

    /// Linear block index held by a slot.
    pub fn block_index_of(&self, slot: usize) -> usize {
        self.slots[slot].block_index
    }

    /// Whether a slot has been written since it was loaded or flushed.
    pub fn is_dirty(&self, slot: usize) -> bool {
        self.slots[slot].dirty
    }

    /// Read one element from a slot's buffer.
    #[inline]
    pub fn get(&self, slot: usize, offset: usize) -> T {
        self.slots[slot].data[offset]
    }

    /// Write one element into a slot's buffer, marking it dirty.
    #[inline]
    pub fn put(&mut self, slot: usize, offset: usize, value: T) {
        let entry = &mut self.slots[slot];
        entry.data[offset] = value;
        entry.dirty = true;
    }

    /// Borrow a slot's buffer for a file transfer.
    pub fn data(&self, slot: usize) -> &[T] {
        &self.slots[slot].data
    }

    /// Mutably borrow a slot's buffer for a file transfer.
    pub fn data_mut(&mut self, slot: usize) -> &mut [T] {
        &mut self.slots[slot].data
    }

    /// Clear a slot's dirty flag after a load or write-back.
    pub fn mark_clean(&mut self, slot: usize) {
        self.slots[slot].dirty = false;
    }

    /// Zero a slot's buffer (fresh blocks with no backing file content).
    pub fn fill_zero(&mut self, slot: usize) {
        self.slots[slot].data.fill(T::default());
    }

    /// All slot handles, for flush walks.
    pub fn slot_handles(&self) -> std::ops::Range<usize> {
        0..self.slots.len()
    }

    fn bucket_of(&self, block_index: usize) -> usize {
        let v = block_index as f64 * HASH_FUNCTION_CONSTANT;
        ((v - v.floor()) * self.buckets.len() as f64) as usize
    }

    fn push_used_front(&mut self, slot: usize) {
        self.slots[slot].prev_used = None;
        self.slots[slot].next_used = self.head;
        match self.head {
            Some(old_head) => self.slots[old_head].prev_used = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn unlink_used(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev_used, self.slots[slot].next_used);
        match prev {
            Some(p) => self.slots[p].next_used = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev_used = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev_used = None;
        self.slots[slot].next_used = None;
    }

    fn push_hash_front(&mut self, slot: usize) {
        let bucket = self.bucket_of(self.slots[slot].block_index);
        self.slots[slot].prev_hash = None;
        self.slots[slot].next_hash = self.buckets[bucket];
        if let Some(next) = self.buckets[bucket] {
            self.slots[next].prev_hash = Some(slot);
        }
        self.buckets[bucket] = Some(slot);
    }

    fn unlink_hash(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev_hash, self.slots[slot].next_hash);
        match prev {
            Some(p) => self.slots[p].next_hash = next,
            None => {
                let bucket = self.bucket_of(self.slots[slot].block_index);
                self.buckets[bucket] = next;
            }
        }
        if let Some(n) = next {
            self.slots[n].prev_hash = prev;
        }
        self.slots[slot].prev_hash = None;
        self.slots[slot].next_hash = None;
    }
}
