//! ICM pool configuration
//!
//! This module contains the pool tuning knobs: the size of a freshly
//! created buddy memory block and the pool-wide hot-memory threshold that
//! triggers a device sync. Both have per-class defaults taken from shipping
//! steering firmware limits, but are workload tuning knobs, not algorithmic
//! constants.

use super::types::{IcmError, IcmResult, ResourceClass};

/// Default pool-wide hot-memory threshold for rule-matching pools.
const RULE_SYNC_THRESHOLD: usize = 64 * 1024 * 1024;

/// Default pool-wide hot-memory threshold for header-rewrite pools.
/// Rewrite instructions are small and churn less, so a much lower bound
/// keeps the wasted-memory window tight.
const REWRITE_SYNC_THRESHOLD: usize = 1024 * 1024;

/// Widest supported block order. 2^24 rule-matching entries is 1 GiB of
/// device memory, already beyond what current steering hardware exposes.
const MAX_SUPPORTED_LOG_CHUNK_SZ: u8 = 24;

/// Configuration for one ICM pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// log2 of the entry count of a freshly created buddy memory block.
    /// This is also the largest order a single allocation can request.
    pub max_log_chunk_sz: u8,
    /// Pool-wide hot-memory bound in bytes. When the sum of hot memory
    /// across all blocks exceeds this, a sync-reclaim pass runs.
    pub sync_threshold: usize,
}

impl PoolConfig {
    pub fn new(max_log_chunk_sz: u8, sync_threshold: usize) -> IcmResult<Self> {
        let config = PoolConfig {
            max_log_chunk_sz,
            sync_threshold,
        };
        config.validate()?;
        Ok(config)
    }

    /// Default configuration for a resource class.
    ///
    /// Block size defaults to 2^19 entries; sync thresholds differ per
    /// class (rule-matching tolerates a larger hot window because its
    /// sync amortizes over much more memory).
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::RuleMatching => PoolConfig {
                max_log_chunk_sz: 19,
                sync_threshold: RULE_SYNC_THRESHOLD,
            },
            ResourceClass::HeaderRewrite => PoolConfig {
                max_log_chunk_sz: 19,
                sync_threshold: REWRITE_SYNC_THRESHOLD,
            },
        }
    }

    /// Override the block size, keeping the threshold.
    pub fn with_max_log_chunk_sz(mut self, max_log_chunk_sz: u8) -> Self {
        self.max_log_chunk_sz = max_log_chunk_sz;
        self
    }

    /// Override the sync threshold, keeping the block size.
    pub fn with_sync_threshold(mut self, sync_threshold: usize) -> Self {
        self.sync_threshold = sync_threshold;
        self
    }

    pub fn validate(&self) -> IcmResult<()> {
        if self.max_log_chunk_sz > MAX_SUPPORTED_LOG_CHUNK_SZ {
            return Err(IcmError::InvalidConfiguration(format!(
                "max_log_chunk_sz {} exceeds supported maximum {}",
                self.max_log_chunk_sz, MAX_SUPPORTED_LOG_CHUNK_SZ
            )));
        }
        if self.sync_threshold == 0 {
            return Err(IcmError::InvalidConfiguration(
                "sync_threshold must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_differ_per_class() {
        let rule = PoolConfig::for_class(ResourceClass::RuleMatching);
        let rewrite = PoolConfig::for_class(ResourceClass::HeaderRewrite);
        assert!(rule.sync_threshold > rewrite.sync_threshold);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PoolConfig::for_class(ResourceClass::RuleMatching)
            .with_max_log_chunk_sz(4)
            .with_sync_threshold(4096);
        assert_eq!(config.max_log_chunk_sz, 4);
        assert_eq!(config.sync_threshold, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_block() {
        let config = PoolConfig {
            max_log_chunk_sz: 40,
            sync_threshold: 4096,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_new_validates() {
        assert!(PoolConfig::new(8, 0).is_err());
        assert!(PoolConfig::new(8, 4096).is_ok());
    }
}
