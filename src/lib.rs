//! SteerForge - ICM memory pool for flow-steering offload engines
//!
//! Device-addressable memory (ICM) management for hardware rule-matching
//! and header-rewrite offload. The pool hands out power-of-two chunks of
//! registered device memory through a buddy allocator, and defers the
//! reuse of freed chunks until a blocking hardware sync confirms the
//! offload engine has stopped reading them.
//!
//! The host environment (kernel DMA allocation or a user-space
//! registration call) plugs in behind the [`SteeringDevice`] trait, so the
//! same allocation core serves both.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use steerforge::{IcmPool, MockDevice, ResourceClass};
//!
//! let device = Arc::new(MockDevice::new());
//! let pool = IcmPool::with_defaults(device, ResourceClass::RuleMatching);
//!
//! let chunk = pool.alloc_chunk(4).unwrap();
//! let _hw_handle = (chunk.device_addr(), chunk.access_key());
//! pool.free_chunk(chunk).unwrap();
//! ```

pub mod device;
pub mod error;
pub mod icm;
pub mod logging;

pub use device::{IcmRegion, MockDevice, SteeringDevice};
pub use error::{ErrorCategory, SteerForgeError, SteerForgeResult};
pub use icm::{
    IcmChunk, IcmError, IcmPool, IcmResult, PoolConfig, PoolStats, ResourceClass,
};
pub use logging::{init_logging_from_env, init_with_config, LoggingConfig};
