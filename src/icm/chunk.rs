//! ICM chunk handle
//!
//! A chunk is one allocation handed out by the pool: a contiguous run of
//! `2^order` base entries inside one buddy memory block. The caller owns
//! the chunk exclusively until it gives it back via
//! [`IcmPool::free_chunk`](super::pool::IcmPool::free_chunk); from then on
//! the owning block's hot list holds it until a sync pass reclaims it.
//!
//! Rule-matching chunks additionally carry three parallel per-entry host
//! arrays used by the rule-matching encoder: the entry shadow states, the
//! packed entry image written to the device, and the per-entry miss lists.

use super::types::{
    BlockId, IcmError, IcmResult, ResourceClass, RULE_ENTRY_IMAGE_SIZE,
};
use crate::device::IcmRegion;

/// Host-side shadow of one rule-matching entry.
///
/// The encoder keeps the unpacked form here so rewrites do not need to
/// read device memory back.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEntryState {
    /// Offset of this entry within its chunk, in entries.
    pub index: u32,
    /// Whether the encoder has written this entry since allocation.
    pub written: bool,
}

/// Per-entry host metadata for rule-matching chunks: three parallel arrays,
/// each sized to the chunk's entry count.
#[derive(Debug)]
pub struct RuleEntryArrays {
    /// Shadow state per entry.
    pub entries: Vec<RuleEntryState>,
    /// Packed device image, `RULE_ENTRY_IMAGE_SIZE` bytes per entry.
    pub packed_image: Vec<u8>,
    /// Collision-chain heads per entry: indices of entries whose lookup
    /// misses continue at this one.
    pub miss_lists: Vec<Vec<u32>>,
}

impl RuleEntryArrays {
    /// Allocate all three arrays for `num_entries` entries.
    ///
    /// Uses fallible reservation so a huge chunk on a memory-starved host
    /// surfaces as an error instead of an abort; the caller must return
    /// the buddy segment before propagating it.
    pub fn new(num_entries: usize) -> IcmResult<Self> {
        let mut entries: Vec<RuleEntryState> = Vec::new();
        entries
            .try_reserve_exact(num_entries)
            .map_err(|e| IcmError::MetadataAllocation(e.to_string()))?;
        entries.extend((0..num_entries).map(|i| RuleEntryState {
            index: i as u32,
            written: false,
        }));

        let image_len = num_entries * RULE_ENTRY_IMAGE_SIZE;
        let mut packed_image: Vec<u8> = Vec::new();
        packed_image
            .try_reserve_exact(image_len)
            .map_err(|e| IcmError::MetadataAllocation(e.to_string()))?;
        packed_image.resize(image_len, 0);

        let mut miss_lists: Vec<Vec<u32>> = Vec::new();
        miss_lists
            .try_reserve_exact(num_entries)
            .map_err(|e| IcmError::MetadataAllocation(e.to_string()))?;
        miss_lists.resize_with(num_entries, Vec::new);

        Ok(RuleEntryArrays {
            entries,
            packed_image,
            miss_lists,
        })
    }
}

/// One allocation from an ICM pool.
#[derive(Debug)]
pub struct IcmChunk {
    block_id: BlockId,
    seg: u32,
    order: u8,
    num_entries: usize,
    byte_size: usize,
    device_addr: u64,
    access_key: u32,
    region_offset: usize,
    /// Present for rule-matching chunks only.
    metadata: Option<RuleEntryArrays>,
}

impl IcmChunk {
    pub(crate) fn new(
        class: ResourceClass,
        region: &IcmRegion,
        block_id: BlockId,
        seg: u32,
        order: u8,
    ) -> IcmResult<Self> {
        let num_entries = 1usize << order;
        let region_offset = seg as usize * class.entry_size();

        let metadata = match class {
            ResourceClass::RuleMatching => Some(RuleEntryArrays::new(num_entries)?),
            ResourceClass::HeaderRewrite => None,
        };

        Ok(IcmChunk {
            block_id,
            seg,
            order,
            num_entries,
            byte_size: class.chunk_bytes(order),
            device_addr: region.device_addr + region_offset as u64,
            access_key: region.access_key,
            region_offset,
            metadata,
        })
    }

    /// Device address of the chunk's first entry. Stable for the chunk's
    /// lifetime; callers may cache it.
    pub fn device_addr(&self) -> u64 {
        self.device_addr
    }

    /// Access key of the owning registration.
    pub fn access_key(&self) -> u32 {
        self.access_key
    }

    /// Byte offset of the chunk within its registration.
    pub fn region_offset(&self) -> usize {
        self.region_offset
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    pub(crate) fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub(crate) fn seg(&self) -> u32 {
        self.seg
    }

    /// Per-entry metadata; `None` for header-rewrite chunks.
    pub fn metadata(&self) -> Option<&RuleEntryArrays> {
        self.metadata.as_ref()
    }

    /// Mutable per-entry metadata for the rule-matching encoder.
    pub fn metadata_mut(&mut self) -> Option<&mut RuleEntryArrays> {
        self.metadata.as_mut()
    }

    /// Device address of one entry within the chunk, strided by the
    /// class's entry size.
    pub fn entry_device_addr(&self, entry: usize) -> u64 {
        debug_assert!(entry < self.num_entries);
        let entry_size = self.byte_size / self.num_entries;
        self.device_addr + (entry * entry_size) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> IcmRegion {
        IcmRegion {
            device_addr: 0x10_0000,
            access_key: 7,
            length: 64 * 1024,
        }
    }

    #[test]
    fn test_rule_chunk_carries_parallel_arrays() {
        let chunk = IcmChunk::new(ResourceClass::RuleMatching, &region(), 0, 8, 3).unwrap();
        let meta = chunk.metadata().unwrap();
        assert_eq!(meta.entries.len(), 8);
        assert_eq!(meta.packed_image.len(), 8 * RULE_ENTRY_IMAGE_SIZE);
        assert_eq!(meta.miss_lists.len(), 8);
        assert_eq!(meta.entries[5].index, 5);
    }

    #[test]
    fn test_rewrite_chunk_has_no_metadata() {
        let chunk = IcmChunk::new(ResourceClass::HeaderRewrite, &region(), 0, 0, 4).unwrap();
        assert!(chunk.metadata().is_none());
        assert_eq!(chunk.byte_size(), 16 * 8);
    }

    #[test]
    fn test_entry_addrs_stride_by_class_entry_size() {
        // Rewrite entries are 8 bytes; every entry address must stay
        // inside the chunk's byte range.
        let chunk = IcmChunk::new(ResourceClass::HeaderRewrite, &region(), 0, 0, 3).unwrap();
        let end = chunk.device_addr() + chunk.byte_size() as u64;
        for entry in 0..chunk.num_entries() {
            let addr = chunk.entry_device_addr(entry);
            assert_eq!(addr, chunk.device_addr() + (entry * 8) as u64);
            assert!(addr < end);
        }

        let rule = IcmChunk::new(ResourceClass::RuleMatching, &region(), 0, 0, 3).unwrap();
        assert_eq!(rule.entry_device_addr(7), rule.device_addr() + 7 * 64);
    }

    #[test]
    fn test_device_addr_from_segment() {
        let chunk = IcmChunk::new(ResourceClass::RuleMatching, &region(), 0, 16, 2).unwrap();
        assert_eq!(chunk.region_offset(), 16 * 64);
        assert_eq!(chunk.device_addr(), 0x10_0000 + 16 * 64);
        assert_eq!(chunk.access_key(), 7);
        assert_eq!(chunk.entry_device_addr(3), chunk.device_addr() + 3 * 64);
    }
}
