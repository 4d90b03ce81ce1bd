//! Device interfaces consumed by the ICM pool
//!
//! The pool never talks to hardware directly. It consumes two primitives
//! from whatever host environment it runs in (kernel DMA allocation or a
//! user-space device-memory registration call):
//!
//! - a memory-region provider that registers device-addressable memory and
//!   hands back a stable `{device_addr, access_key}` pair, and
//! - a blocking device-sync command that guarantees the hardware has ceased
//!   referencing memory freed before the call began.
//!
//! Both live behind the [`SteeringDevice`] trait so one algorithmic core
//! serves every environment.

pub mod mock;

pub use mock::MockDevice;

use crate::icm::types::{IcmResult, ResourceClass};

/// One device-memory registration.
///
/// The `{device_addr, access_key}` pair is the only externally visible
/// handle for the memory and stays stable for the registration's lifetime;
/// callers may cache it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmRegion {
    /// Base device address of the registered range.
    pub device_addr: u64,
    /// Access key the offload engine presents when reading the range.
    pub access_key: u32,
    /// Length of the registered range in bytes.
    pub length: usize,
}

/// Host-environment backend for the ICM pool.
///
/// Implementations must be usable from multiple threads; the pool holds an
/// `Arc<dyn SteeringDevice>` and calls into it with its own lock held.
pub trait SteeringDevice: Send + Sync {
    /// Register `length` bytes of device-addressable memory aligned to
    /// `1 << log_align` bytes. `class` selects the provider-side memory
    /// type; the alignment rule itself is chosen by the pool.
    ///
    /// # Errors
    /// `IcmError::OutOfMemory` when the device cannot satisfy the request.
    fn register_icm(
        &self,
        length: usize,
        log_align: u32,
        class: ResourceClass,
    ) -> IcmResult<IcmRegion>;

    /// Release a registration previously returned by [`register_icm`].
    ///
    /// [`register_icm`]: SteeringDevice::register_icm
    fn unregister_icm(&self, region: IcmRegion) -> IcmResult<()>;

    /// Blocking hardware sync. On success, memory freed before this call
    /// is no longer referenced by the offload engine. No partial-progress
    /// semantics: an error means nothing was reclaimed.
    ///
    /// # Errors
    /// `IcmError::SyncFailure` when the command times out or is rejected.
    fn sync_steering(&self) -> IcmResult<()>;
}
