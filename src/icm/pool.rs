//! ICM pool
//!
//! One pool manages all device-addressable memory of a single resource
//! class. It owns an ordered list of buddy memory blocks (most recently
//! created first, biasing allocation toward the least fragmented block),
//! creates blocks lazily, and decides when the hot lists have grown enough
//! to justify a blocking device sync.
//!
//! # Locking
//!
//! A single mutex serializes everything: block-list traversal, buddy
//! bitmap mutation, used/hot list movement, and the hot-memory accounting
//! behind the sync trigger. `alloc_chunk`, `free_chunk`, and `sync` hold
//! it for their entire duration - including the unbounded hardware round
//! trip of the sync command - so callers must not invoke them where
//! blocking is forbidden.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::block::BuddyBlock;
use super::chunk::IcmChunk;
use super::config::PoolConfig;
use super::types::{BlockId, IcmError, IcmResult, PoolStats, ResourceClass};
use crate::device::SteeringDevice;

struct PoolInner {
    /// Most recently created block first.
    blocks: Vec<BuddyBlock>,
    next_block_id: BlockId,
    sync_passes: u64,
}

/// Memory pool for one ICM resource class.
pub struct IcmPool {
    class: ResourceClass,
    config: PoolConfig,
    device: Arc<dyn SteeringDevice>,
    inner: Mutex<PoolInner>,
}

impl IcmPool {
    pub fn new(
        device: Arc<dyn SteeringDevice>,
        class: ResourceClass,
        config: PoolConfig,
    ) -> IcmResult<Self> {
        config.validate()?;
        Ok(IcmPool {
            class,
            config,
            device,
            inner: Mutex::new(PoolInner {
                blocks: Vec::new(),
                next_block_id: 0,
                sync_passes: 0,
            }),
        })
    }

    /// Pool with the per-class default configuration.
    pub fn with_defaults(device: Arc<dyn SteeringDevice>, class: ResourceClass) -> Self {
        let config = PoolConfig::for_class(class);
        IcmPool::new(device, class, config).expect("per-class defaults are valid")
    }

    pub fn resource_class(&self) -> ResourceClass {
        self.class
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Allocate a chunk of `2^order` entries.
    ///
    /// Tries every existing block in list order, then creates exactly one
    /// new maximally sized block and retries against it alone. Orders above
    /// the pool's configured maximum fail without creating anything.
    pub fn alloc_chunk(&self, order: u8) -> IcmResult<IcmChunk> {
        if order > self.config.max_log_chunk_sz {
            return Err(IcmError::PoolExhausted {
                order,
                max: self.config.max_log_chunk_sz,
            });
        }

        let mut inner = self.inner.lock()?;

        let (block_idx, seg) = match self.find_segment(&mut inner, order) {
            Some(found) => found,
            None => {
                // The trigger policy must hold before a new block is
                // created: reclaiming hot memory may make room in the
                // blocks we already have.
                if self.sync_required(&inner) {
                    self.sync_and_reclaim(&mut inner)?;
                    if let Some(found) = self.find_segment(&mut inner, order) {
                        found
                    } else {
                        self.grow_and_alloc(&mut inner, order)?
                    }
                } else {
                    self.grow_and_alloc(&mut inner, order)?
                }
            }
        };

        let block = &mut inner.blocks[block_idx];
        let chunk = match IcmChunk::new(self.class, &block.region, block.id, seg, order) {
            Ok(chunk) => chunk,
            Err(e) => {
                // Give the segment back before reporting, or the device
                // memory leaks until teardown.
                block.release_segment(seg, order);
                return Err(e);
            }
        };
        block.note_allocated(&chunk);
        Ok(chunk)
    }

    /// Release a chunk. The chunk moves to its block's hot list; its
    /// segment only returns to the buddy core after a successful sync.
    ///
    /// The release itself always takes effect. If it pushes hot memory
    /// past the sync trigger and the resulting device sync fails, that
    /// `SyncFailure` is returned here - the chunk stays safely hot and a
    /// later [`sync`](IcmPool::sync) can retry the reclaim.
    pub fn free_chunk(&self, chunk: IcmChunk) -> IcmResult<()> {
        let mut inner = self.inner.lock()?;

        let block_id = chunk.block_id();
        match inner.blocks.iter_mut().find(|b| b.id == block_id) {
            Some(block) => block.move_to_hot(chunk),
            None => {
                // Can only happen if a chunk outlived pool teardown paths;
                // nothing to reclaim.
                warn!(block = block_id, "freed chunk references unknown block");
                return Ok(());
            }
        }

        if self.sync_required(&inner) {
            self.sync_and_reclaim(&mut inner)?;
        }
        Ok(())
    }

    /// Run a device sync and reclaim every hot chunk in the pool.
    ///
    /// On failure nothing changes: hot lists, hot-memory accounting, and
    /// buddy bitmaps are exactly as they were before the call.
    pub fn sync(&self) -> IcmResult<()> {
        let mut inner = self.inner.lock()?;
        self.sync_and_reclaim(&mut inner)
    }

    pub fn stats(&self) -> IcmResult<PoolStats> {
        let inner = self.inner.lock()?;
        Ok(PoolStats {
            num_blocks: inner.blocks.len(),
            used_bytes: inner.blocks.iter().map(|b| b.used_memory()).sum(),
            hot_bytes: inner.blocks.iter().map(|b| b.hot_memory()).sum(),
            total_bytes: inner.blocks.iter().map(|b| b.capacity_bytes()).sum(),
            sync_passes: inner.sync_passes,
        })
    }

    /// First block (in list order) with a free segment at `order`.
    fn find_segment(&self, inner: &mut PoolInner, order: u8) -> Option<(usize, u32)> {
        inner
            .blocks
            .iter_mut()
            .enumerate()
            .find_map(|(idx, block)| block.alloc_segment(order).map(|seg| (idx, seg)))
    }

    /// Create one new block at the head of the list and allocate from it
    /// alone. A second failure is a hard exhaustion, not retried.
    fn grow_and_alloc(&self, inner: &mut PoolInner, order: u8) -> IcmResult<(usize, u32)> {
        let id = inner.next_block_id;
        let block = BuddyBlock::create(
            self.device.as_ref(),
            self.class,
            self.config.max_log_chunk_sz,
            id,
        )?;
        inner.next_block_id += 1;
        debug!(
            block = id,
            bytes = block.capacity_bytes(),
            class = ?self.class,
            "created buddy memory block"
        );
        // Head insertion: newest block is searched first.
        inner.blocks.insert(0, block);

        match inner.blocks[0].alloc_segment(order) {
            Some(seg) => Ok((0, seg)),
            None => Err(IcmError::PoolExhausted {
                order,
                max: self.config.max_log_chunk_sz,
            }),
        }
    }

    /// Trigger policy: any single block holding more than a quarter of its
    /// capacity hot, or the pool-wide hot sum past the configured
    /// threshold.
    fn sync_required(&self, inner: &PoolInner) -> bool {
        let mut all_hot = 0usize;
        for block in &inner.blocks {
            all_hot += block.hot_memory();
            if block.hot_threshold_exceeded() || all_hot > self.config.sync_threshold {
                return true;
            }
        }
        false
    }

    fn sync_and_reclaim(&self, inner: &mut PoolInner) -> IcmResult<()> {
        // All-or-nothing: hot state is only touched once the hardware has
        // confirmed it no longer references the freed memory.
        self.device.sync_steering()?;

        let mut reclaimed = 0usize;
        for block in &mut inner.blocks {
            reclaimed += block.hot_memory();
            block.reclaim_hot();
        }
        inner.sync_passes += 1;
        info!(
            bytes = reclaimed,
            pass = inner.sync_passes,
            class = ?self.class,
            "sync-reclaim pass completed"
        );
        Ok(())
    }
}

impl Drop for IcmPool {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        for block in &mut inner.blocks {
            block.teardown();
            let region = block.region;
            if let Err(e) = self.device.unregister_icm(region) {
                warn!(block = block.id, error = %e, "failed to unregister ICM block");
            }
        }
        inner.blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;

    const HUGE_THRESHOLD: usize = usize::MAX / 2;

    fn pool_with(
        class: ResourceClass,
        max_log: u8,
        threshold: usize,
    ) -> (Arc<MockDevice>, IcmPool) {
        let device = Arc::new(MockDevice::new());
        let config = PoolConfig::new(max_log, threshold).unwrap();
        let pool = IcmPool::new(device.clone(), class, config).unwrap();
        (device, pool)
    }

    #[test]
    fn test_first_alloc_creates_one_block() {
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);
        assert_eq!(pool.stats().unwrap().num_blocks, 0);

        let chunk = pool.alloc_chunk(0).unwrap();
        assert_eq!(pool.stats().unwrap().num_blocks, 1);
        assert_eq!(device.live_region_count(), 1);
        assert_eq!(chunk.num_entries(), 1);
        pool.free_chunk(chunk).unwrap();
    }

    #[test]
    fn test_order_above_max_fails_without_block() {
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);
        let err = pool.alloc_chunk(4).unwrap_err();
        assert!(matches!(err, IcmError::PoolExhausted { order: 4, max: 3 }));
        assert_eq!(pool.stats().unwrap().num_blocks, 0);
        assert_eq!(device.live_region_count(), 0);
    }

    #[test]
    fn test_eight_allocs_fill_block_ninth_grows() {
        let (_device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);

        let chunks: Vec<_> = (0..8).map(|_| pool.alloc_chunk(0).unwrap()).collect();
        assert_eq!(pool.stats().unwrap().num_blocks, 1);
        let offsets: Vec<_> = chunks.iter().map(|c| c.region_offset()).collect();
        let expected: Vec<_> = (0..8).map(|i| i * 64).collect();
        assert_eq!(offsets, expected);

        let ninth = pool.alloc_chunk(0).unwrap();
        assert_eq!(pool.stats().unwrap().num_blocks, 2);
        assert_eq!(ninth.region_offset(), 0);
    }

    #[test]
    fn test_full_block_order_forces_second_block() {
        let (_device, pool) = pool_with(ResourceClass::RuleMatching, 2, HUGE_THRESHOLD);

        let first = pool.alloc_chunk(2).unwrap();
        assert_eq!(first.region_offset(), 0);
        assert_eq!(pool.stats().unwrap().num_blocks, 1);

        let second = pool.alloc_chunk(2).unwrap();
        assert_eq!(pool.stats().unwrap().num_blocks, 2);
        assert_eq!(second.region_offset(), 0);
        assert_ne!(second.device_addr(), first.device_addr());
    }

    #[test]
    fn test_uncoalesced_siblings_force_new_block() {
        let (_device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);

        let mut chunks: Vec<_> = (0..8).map(|_| pool.alloc_chunk(0).unwrap()).collect();
        let b = chunks.remove(1);
        let a = chunks.remove(0);
        pool.free_chunk(a).unwrap();
        pool.free_chunk(b).unwrap();

        // Segments 0 and 1 are hot, not free: without a sync the order-1
        // request cannot be served from the original block.
        let order1 = pool.alloc_chunk(1).unwrap();
        assert_eq!(pool.stats().unwrap().num_blocks, 2);
        assert_eq!(order1.region_offset(), 0);
    }

    #[test]
    fn test_sync_coalesces_siblings() {
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);

        let mut chunks: Vec<_> = (0..8).map(|_| pool.alloc_chunk(0).unwrap()).collect();
        let base = chunks[0].device_addr();
        let b = chunks.remove(1);
        let a = chunks.remove(0);
        pool.free_chunk(a).unwrap();
        pool.free_chunk(b).unwrap();

        pool.sync().unwrap();
        assert_eq!(device.sync_count(), 1);
        assert_eq!(pool.stats().unwrap().hot_bytes, 0);

        // Coalesced: the order-1 request fits the original block at
        // segment 0, with no new block.
        let order1 = pool.alloc_chunk(1).unwrap();
        assert_eq!(pool.stats().unwrap().num_blocks, 1);
        assert_eq!(order1.device_addr(), base);
    }

    #[test]
    fn test_hot_accounting_across_free_and_sync() {
        let (_device, pool) = pool_with(ResourceClass::RuleMatching, 4, HUGE_THRESHOLD);

        let chunk = pool.alloc_chunk(1).unwrap();
        let size = chunk.byte_size();
        assert_eq!(pool.stats().unwrap().used_bytes, size);
        assert_eq!(pool.stats().unwrap().hot_bytes, 0);

        pool.free_chunk(chunk).unwrap();
        let stats = pool.stats().unwrap();
        assert_eq!(stats.used_bytes, 0);
        assert_eq!(stats.hot_bytes, size);

        pool.sync().unwrap();
        assert_eq!(pool.stats().unwrap().hot_bytes, 0);
    }

    #[test]
    fn test_failed_sync_leaves_hot_state_untouched() {
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 4, HUGE_THRESHOLD);

        let chunk = pool.alloc_chunk(0).unwrap();
        pool.free_chunk(chunk).unwrap();
        let before = pool.stats().unwrap();

        device.inject_sync_failures(1);
        let err = pool.sync().unwrap_err();
        assert!(matches!(err, IcmError::SyncFailure(_)));

        let after = pool.stats().unwrap();
        assert_eq!(after.hot_bytes, before.hot_bytes);
        assert_eq!(after.sync_passes, before.sync_passes);

        // Transient: the retry reclaims everything.
        pool.sync().unwrap();
        assert_eq!(pool.stats().unwrap().hot_bytes, 0);
    }

    #[test]
    fn test_pool_wide_threshold_triggers_sync_on_free() {
        // Per-block trigger can't fire (quarter capacity is 256 bytes);
        // the 64-byte pool threshold does.
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 4, 64);

        let chunk = pool.alloc_chunk(1).unwrap();
        pool.free_chunk(chunk).unwrap();
        assert_eq!(device.sync_count(), 1);
        assert_eq!(pool.stats().unwrap().hot_bytes, 0);
    }

    #[test]
    fn test_per_block_threshold_triggers_sync_on_free() {
        // Pool threshold unreachable; a 2-entry block hits the quarter
        // bound as soon as one entry goes hot.
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 1, HUGE_THRESHOLD);

        let chunk = pool.alloc_chunk(0).unwrap();
        pool.free_chunk(chunk).unwrap();
        assert_eq!(device.sync_count(), 1);
        assert_eq!(pool.stats().unwrap().hot_bytes, 0);
    }

    #[test]
    fn test_trigger_runs_before_block_creation() {
        // Drive hot memory past the per-block bound with the sync failing,
        // so the pool is full of unreclaimed hot chunks. The next
        // allocation must retry the reclaim instead of registering a
        // second block.
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);

        let mut chunks: Vec<_> = (0..4).map(|_| pool.alloc_chunk(1).unwrap()).collect();
        pool.free_chunk(chunks.remove(0)).unwrap();

        device.inject_sync_failures(1);
        // This free crosses quarter capacity; the triggered sync fails but
        // the release itself sticks.
        let err = pool.free_chunk(chunks.remove(0)).unwrap_err();
        assert!(matches!(err, IcmError::SyncFailure(_)));
        assert_eq!(device.sync_count(), 0);
        assert_eq!(pool.stats().unwrap().hot_bytes, 256);

        let chunk = pool.alloc_chunk(1).unwrap();
        assert_eq!(device.sync_count(), 1);
        assert_eq!(pool.stats().unwrap().num_blocks, 1);
        assert_eq!(chunk.region_offset(), 0);
    }

    #[test]
    fn test_registration_failure_surfaces_as_oom() {
        let (device, pool) = pool_with(ResourceClass::RuleMatching, 3, HUGE_THRESHOLD);
        device.inject_register_failures(1);

        let err = pool.alloc_chunk(0).unwrap_err();
        assert!(matches!(err, IcmError::OutOfMemory(_)));
        assert_eq!(pool.stats().unwrap().num_blocks, 0);

        // Transient backend pressure: the next attempt succeeds.
        assert!(pool.alloc_chunk(0).is_ok());
    }

    #[test]
    fn test_teardown_unregisters_blocks() {
        let device = Arc::new(MockDevice::new());
        {
            let pool = IcmPool::with_defaults(
                device.clone(),
                ResourceClass::HeaderRewrite,
            );
            let chunk = pool.alloc_chunk(4).unwrap();
            pool.free_chunk(chunk).unwrap();
            assert_eq!(device.live_region_count(), 1);
        }
        assert_eq!(device.live_region_count(), 0);
    }

    #[test]
    fn test_rewrite_pool_chunks_have_no_metadata() {
        let (_device, pool) = pool_with(ResourceClass::HeaderRewrite, 4, HUGE_THRESHOLD);
        let chunk = pool.alloc_chunk(2).unwrap();
        assert!(chunk.metadata().is_none());
        assert_eq!(chunk.byte_size(), 4 * 8);
        pool.free_chunk(chunk).unwrap();
    }
}
