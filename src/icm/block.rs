//! Buddy memory block
//!
//! One block owns a single device-memory registration sized to the pool's
//! maximum chunk size, a buddy core describing its internal allocation
//! state, the accounting for chunks currently handed out, and the hot list
//! of chunks released by callers but not yet safe for the hardware to see
//! reused.

use tracing::warn;

use super::buddy::BuddyAllocator;
use super::chunk::IcmChunk;
use super::types::{BlockId, IcmError, IcmResult, ResourceClass};
use crate::device::{IcmRegion, SteeringDevice};

/// Accounting record for a chunk on the used list. The chunk object itself
/// is owned by the caller while allocated; the block only tracks which
/// segment is out and how many bytes it pins.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UsedChunk {
    pub seg: u32,
    pub byte_size: usize,
}

#[derive(Debug)]
pub(crate) struct BuddyBlock {
    pub id: BlockId,
    pub region: IcmRegion,
    buddy: BuddyAllocator,
    /// Chunks currently allocated out of this block. Hardware may be
    /// accessing this memory.
    used_list: Vec<UsedChunk>,
    /// Chunks the caller has released. Hardware may still be accessing
    /// them until the next successful sync; only then do their segments
    /// return to the buddy core.
    hot_list: Vec<IcmChunk>,
    hot_memory: usize,
    used_memory: usize,
}

impl BuddyBlock {
    /// Register device memory for a fresh block and initialize its buddy
    /// core. Rule-matching blocks request alignment equal to their own
    /// size; header-rewrite blocks request the fixed 64-byte base.
    pub fn create(
        device: &dyn SteeringDevice,
        class: ResourceClass,
        max_log_chunk_sz: u8,
        id: BlockId,
    ) -> IcmResult<Self> {
        let length = class.chunk_bytes(max_log_chunk_sz);
        let log_align = class.log_align(length);
        let region = device.register_icm(length, log_align, class)?;

        // The hardware address field cannot express a misaligned base.
        if region.device_addr & ((1u64 << log_align) - 1) != 0 {
            let addr = region.device_addr;
            if let Err(e) = device.unregister_icm(region) {
                warn!(block = id, error = %e, "failed to release misaligned registration");
            }
            return Err(IcmError::OutOfMemory(format!(
                "provider returned misaligned ICM base {:#x} (need 2^{})",
                addr, log_align
            )));
        }

        Ok(BuddyBlock {
            id,
            region,
            buddy: BuddyAllocator::new(max_log_chunk_sz),
            used_list: Vec::new(),
            hot_list: Vec::new(),
            hot_memory: 0,
            used_memory: 0,
        })
    }

    /// Total device memory this block registered.
    pub fn capacity_bytes(&self) -> usize {
        self.region.length
    }

    pub fn hot_memory(&self) -> usize {
        self.hot_memory
    }

    pub fn used_memory(&self) -> usize {
        self.used_memory
    }

    pub fn hot_count(&self) -> usize {
        self.hot_list.len()
    }

    /// Per-block sync trigger: hot memory beyond a quarter of the block's
    /// capacity means too much of it is wasted waiting for a sync.
    pub fn hot_threshold_exceeded(&self) -> bool {
        self.hot_memory > self.capacity_bytes() / 4
    }

    pub fn alloc_segment(&mut self, order: u8) -> Option<u32> {
        self.buddy.alloc(order)
    }

    /// Undo path for a segment whose chunk could not be completed.
    pub fn release_segment(&mut self, seg: u32, order: u8) {
        self.buddy.free(seg, order);
    }

    /// Record a successfully created chunk on the used list.
    pub fn note_allocated(&mut self, chunk: &IcmChunk) {
        self.used_list.push(UsedChunk {
            seg: chunk.seg(),
            byte_size: chunk.byte_size(),
        });
        self.used_memory += chunk.byte_size();
    }

    /// Move a caller-released chunk onto the hot list. No buddy mutation
    /// happens here; the segment stays unavailable until a sync pass.
    pub fn move_to_hot(&mut self, chunk: IcmChunk) {
        debug_assert_eq!(chunk.block_id(), self.id);
        match self.used_list.iter().position(|u| u.seg == chunk.seg()) {
            Some(idx) => {
                let record = self.used_list.swap_remove(idx);
                debug_assert_eq!(record.byte_size, chunk.byte_size());
                self.used_memory -= record.byte_size;
            }
            None => warn!(
                block = self.id,
                seg = chunk.seg(),
                "freed chunk missing from used list"
            ),
        }
        self.hot_memory += chunk.byte_size();
        self.hot_list.push(chunk);
    }

    /// Return every hot segment to the buddy core and destroy the chunks.
    /// Caller must only invoke this after a successful device sync.
    pub fn reclaim_hot(&mut self) {
        for chunk in self.hot_list.drain(..) {
            self.buddy.free(chunk.seg(), chunk.order());
            self.hot_memory -= chunk.byte_size();
            // Chunk (and any metadata arrays) dropped here.
        }
        debug_assert_eq!(self.hot_memory, 0);
    }

    /// Forced teardown: drain both lists without a buddy round trip.
    /// Valid only once the device is known quiesced. A non-empty used
    /// list here means callers leaked chunks.
    pub fn teardown(&mut self) {
        if !self.used_list.is_empty() {
            warn!(
                block = self.id,
                outstanding = self.used_list.len(),
                "destroying block with chunks still allocated"
            );
            self.used_list.clear();
            self.used_memory = 0;
        }
        self.hot_list.clear();
        self.hot_memory = 0;
    }

    #[cfg(test)]
    pub fn num_free(&self, order: u8) -> usize {
        self.buddy.num_free(order)
    }
}
