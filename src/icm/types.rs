//! Core types for the ICM memory pool
//!
//! This module contains the error and result types, the resource-class
//! enumeration and its hardware layout constants, and the statistics
//! structures used throughout the ICM pool implementation.

use thiserror::Error;

/// Byte size of one rule-matching entry as laid out in device memory.
pub const RULE_ENTRY_SIZE: usize = 64;

/// Byte size of the packed (reduced) per-entry image kept host-side for
/// rule-matching chunks. The reduced image omits the match mask.
pub const RULE_ENTRY_IMAGE_SIZE: usize = 48;

/// Byte size of one header-rewrite instruction.
pub const REWRITE_ACTION_SIZE: usize = 8;

/// Fixed alignment for header-rewrite registrations, independent of the
/// registration size. The rewrite engine only requires cache-line alignment.
pub const REWRITE_ALIGN_BASE: usize = 64;

#[derive(Error, Debug)]
pub enum IcmError {
    /// A device-memory registration could not be created. Transient at the
    /// pool level: a later allocation may succeed once device memory frees up.
    #[error("Device memory registration failed: {0}")]
    OutOfMemory(String),
    /// A brand-new maximally sized block still cannot satisfy the request.
    /// This is a configuration error and is not retryable.
    #[error("Pool exhausted: order {order} exceeds pool maximum {max}")]
    PoolExhausted { order: u8, max: u8 },
    /// The device-sync round trip failed. All hot-list state is left
    /// untouched; the caller may retry later.
    #[error("Device sync failed: {0}")]
    SyncFailure(String),
    /// Per-entry bookkeeping arrays for a rule-matching chunk could not be
    /// allocated. The buddy segment has already been returned.
    #[error("Chunk metadata allocation failed: {0}")]
    MetadataAllocation(String),
    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for IcmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        IcmError::LockPoisoned(format!("Lock poisoned: {}", err))
    }
}

pub type IcmResult<T> = Result<T, IcmError>;

/// Block identifier type. Chunks reference their owning block by id rather
/// than by pointer; the pool resolves ids under its lock.
pub type BlockId = u32;

/// The two flavors of ICM a pool can manage. They differ in per-entry size,
/// registration alignment, and per-entry host metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    /// Rule-matching entries. Registrations must be aligned to their own
    /// size (the hardware address field has zero low bits relative to the
    /// chunk size), and chunks carry per-entry host metadata.
    RuleMatching,
    /// Header-rewrite instructions. Fixed 64-byte alignment, no per-entry
    /// host metadata.
    HeaderRewrite,
}

impl ResourceClass {
    /// Byte size of one base entry for this class.
    pub fn entry_size(self) -> usize {
        match self {
            ResourceClass::RuleMatching => RULE_ENTRY_SIZE,
            ResourceClass::HeaderRewrite => REWRITE_ACTION_SIZE,
        }
    }

    /// Byte size of a chunk of `1 << order` entries.
    pub fn chunk_bytes(self, order: u8) -> usize {
        (1usize << order) * self.entry_size()
    }

    /// Log2 of the registration alignment for a registration of
    /// `length` bytes.
    pub fn log_align(self, length: usize) -> u32 {
        match self {
            ResourceClass::RuleMatching => length.trailing_zeros(),
            ResourceClass::HeaderRewrite => REWRITE_ALIGN_BASE.trailing_zeros(),
        }
    }
}

/// Point-in-time pool statistics for monitoring and tests.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of buddy memory blocks currently registered.
    pub num_blocks: usize,
    /// Bytes held by chunks on used lists (caller-owned).
    pub used_bytes: usize,
    /// Bytes held by chunks on hot lists (released, awaiting sync).
    pub hot_bytes: usize,
    /// Total registered device memory in bytes.
    pub total_bytes: usize,
    /// Number of successful sync-reclaim passes since pool creation.
    pub sync_passes: u64,
}
