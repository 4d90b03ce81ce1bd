//! Buddy allocator core
//!
//! Pure in-memory power-of-two allocator over the segments of one buddy
//! memory block. Each order level keeps a free-segment bitmap plus a
//! second "set" bitmap with one bit per bitmap word, so the first free
//! segment is found by skipping empty words instead of scanning them.
//!
//! Segments returned by [`BuddyAllocator::alloc`] are expressed in base
//! entry units (`seg << order`); [`BuddyAllocator::free`] takes the same
//! representation back.

const BITS_PER_WORD: usize = u64::BITS as usize;

fn words_for(bits: usize) -> usize {
    (bits + BITS_PER_WORD - 1) / BITS_PER_WORD
}

fn set_bit(nr: usize, words: &mut [u64]) {
    words[nr / BITS_PER_WORD] |= 1u64 << (nr % BITS_PER_WORD);
}

fn clear_bit(nr: usize, words: &mut [u64]) {
    words[nr / BITS_PER_WORD] &= !(1u64 << (nr % BITS_PER_WORD));
}

fn test_bit(nr: usize, words: &[u64]) -> bool {
    words[nr / BITS_PER_WORD] & (1u64 << (nr % BITS_PER_WORD)) != 0
}

/// Buddy allocation state for one memory block of `2^max_order` entries.
#[derive(Debug)]
pub struct BuddyAllocator {
    /// Free-segment bitmap per order; a set bit means that segment is free
    /// and unsplit at that order.
    bits: Vec<Vec<u64>>,
    /// Accelerator bitmap per order: bit `w` set iff word `w` of
    /// `bits[order]` is non-zero.
    set_bit: Vec<Vec<u64>>,
    /// Free-segment count per order.
    num_free: Vec<usize>,
    max_order: u8,
}

impl BuddyAllocator {
    /// Create a core with a single free segment at `max_order`.
    pub fn new(max_order: u8) -> Self {
        let levels = max_order as usize + 1;
        let mut bits = Vec::with_capacity(levels);
        let mut set_bits = Vec::with_capacity(levels);
        let mut num_free = vec![0usize; levels];

        for order in 0..levels {
            let segments = 1usize << (max_order as usize - order);
            let words = words_for(segments);
            bits.push(vec![0u64; words]);
            set_bits.push(vec![0u64; words_for(words)]);
        }

        set_bit(0, &mut bits[max_order as usize]);
        set_bit(0, &mut set_bits[max_order as usize]);
        num_free[max_order as usize] = 1;

        BuddyAllocator {
            bits,
            set_bit: set_bits,
            num_free,
            max_order,
        }
    }

    pub fn max_order(&self) -> u8 {
        self.max_order
    }

    /// Free-segment count at one order, for tests and stats.
    pub fn num_free(&self, order: u8) -> usize {
        self.num_free[order as usize]
    }

    /// First free segment index at `order`, using the set bitmap to skip
    /// empty words.
    fn find_first_free(&self, order: u8) -> Option<usize> {
        let bits = &self.bits[order as usize];
        let set = &self.set_bit[order as usize];
        let segments = 1usize << (self.max_order - order) as usize;

        for (set_word_idx, &set_word) in set.iter().enumerate() {
            if set_word == 0 {
                continue;
            }
            let word_idx =
                set_word_idx * BITS_PER_WORD + set_word.trailing_zeros() as usize;
            let word = bits[word_idx];
            debug_assert_ne!(word, 0, "set bitmap out of step with free bitmap");
            let seg = word_idx * BITS_PER_WORD + word.trailing_zeros() as usize;
            if seg < segments {
                return Some(seg);
            }
        }
        None
    }

    fn mark_free(&mut self, seg: usize, order: u8) {
        set_bit(seg, &mut self.bits[order as usize]);
        set_bit(seg / BITS_PER_WORD, &mut self.set_bit[order as usize]);
        self.num_free[order as usize] += 1;
    }

    fn mark_used(&mut self, seg: usize, order: u8) {
        clear_bit(seg, &mut self.bits[order as usize]);
        if self.bits[order as usize][seg / BITS_PER_WORD] == 0 {
            clear_bit(seg / BITS_PER_WORD, &mut self.set_bit[order as usize]);
        }
        self.num_free[order as usize] -= 1;
    }

    /// Allocate `2^order` contiguous entries.
    ///
    /// Scans orders upward from `order`, takes the first free segment at
    /// the smallest sufficient order, then splits downward, leaving each
    /// sibling free at its intermediate order. Returns the segment in base
    /// entry units, or `None` when no order has room.
    pub fn alloc(&mut self, order: u8) -> Option<u32> {
        if order > self.max_order {
            return None;
        }

        let (mut seg, found_order) = (order..=self.max_order).find_map(|o| {
            if self.num_free[o as usize] == 0 {
                return None;
            }
            self.find_first_free(o).map(|seg| (seg, o))
        })?;

        self.mark_used(seg, found_order);

        let mut o = found_order;
        while o > order {
            o -= 1;
            seg <<= 1;
            self.mark_free(seg ^ 1, o);
        }

        Some((seg << order) as u32)
    }

    /// Return `2^order` entries at `seg` (base entry units, as returned by
    /// [`alloc`](BuddyAllocator::alloc)). Merges with the buddy sibling
    /// eagerly, settling at the highest order whose sibling is not free.
    pub fn free(&mut self, seg: u32, order: u8) {
        let mut seg = seg as usize >> order;
        let mut order = order;

        while order < self.max_order && test_bit(seg ^ 1, &self.bits[order as usize]) {
            self.mark_used(seg ^ 1, order);
            seg >>= 1;
            order += 1;
        }

        self.mark_free(seg, order);
    }
}
