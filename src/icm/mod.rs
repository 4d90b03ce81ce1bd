//! ICM memory pool module
//!
//! Device-addressable memory management for the steering offload engine.
//! One [`IcmPool`] per resource class hands out power-of-two chunks of
//! registered device memory via a buddy allocator, and defers reclamation
//! of freed chunks until a hardware sync confirms the offload engine has
//! stopped reading them.

pub(crate) mod block;
pub mod buddy;
pub mod chunk;
pub mod config;
pub mod pool;
pub mod types;

// Re-export from pool
pub use pool::IcmPool;

// Re-export from chunk
pub use chunk::{IcmChunk, RuleEntryArrays, RuleEntryState};

// Re-export from buddy
pub use buddy::BuddyAllocator;

// Re-export from config
pub use config::PoolConfig;

// Re-export from types
pub use types::{
    BlockId, IcmError, IcmResult, PoolStats, ResourceClass, REWRITE_ACTION_SIZE,
    REWRITE_ALIGN_BASE, RULE_ENTRY_IMAGE_SIZE, RULE_ENTRY_SIZE,
};
