//! In-memory steering device for tests and benchmarks
//!
//! Provides a [`MockDevice`] that hands out fake device addresses from a
//! bump counter, honors alignment requests, and supports failure injection
//! for both registration and sync so error paths can be exercised without
//! hardware.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{IcmRegion, SteeringDevice};
use crate::icm::types::{IcmError, IcmResult, ResourceClass};

/// Fake steering device backed by nothing but counters.
///
/// Registration returns monotonically increasing, properly aligned device
/// addresses starting at `BASE_ADDR`. A budget can be set to make the
/// provider run dry, and sync failures can be injected one call at a time.
#[derive(Debug)]
pub struct MockDevice {
    next_addr: AtomicU64,
    next_key: AtomicU32,
    /// Remaining registration budget in bytes; `usize::MAX` means unlimited.
    budget: AtomicUsize,
    /// Number of sync calls that should fail before syncs succeed again.
    fail_syncs: AtomicUsize,
    /// Number of registrations that should fail before succeeding again.
    fail_registers: AtomicUsize,
    sync_count: AtomicU64,
    live_regions: Mutex<Vec<IcmRegion>>,
}

const BASE_ADDR: u64 = 0x2000_0000;

impl MockDevice {
    pub fn new() -> Self {
        MockDevice {
            next_addr: AtomicU64::new(BASE_ADDR),
            next_key: AtomicU32::new(1),
            budget: AtomicUsize::new(usize::MAX),
            fail_syncs: AtomicUsize::new(0),
            fail_registers: AtomicUsize::new(0),
            sync_count: AtomicU64::new(0),
            live_regions: Mutex::new(Vec::new()),
        }
    }

    /// Limit the total bytes this device will register.
    pub fn with_budget(self, bytes: usize) -> Self {
        self.budget.store(bytes, Ordering::SeqCst);
        self
    }

    /// Make the next `n` sync calls fail.
    pub fn inject_sync_failures(&self, n: usize) {
        self.fail_syncs.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` registrations fail.
    pub fn inject_register_failures(&self, n: usize) {
        self.fail_registers.store(n, Ordering::SeqCst);
    }

    /// Number of successful sync round trips so far.
    pub fn sync_count(&self) -> u64 {
        self.sync_count.load(Ordering::SeqCst)
    }

    /// Number of registrations currently outstanding.
    pub fn live_region_count(&self) -> usize {
        self.live_regions.lock().unwrap().len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SteeringDevice for MockDevice {
    fn register_icm(
        &self,
        length: usize,
        log_align: u32,
        _class: ResourceClass,
    ) -> IcmResult<IcmRegion> {
        if Self::take_failure(&self.fail_registers) {
            return Err(IcmError::OutOfMemory(
                "injected registration failure".to_string(),
            ));
        }

        let over_budget = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| {
                b.checked_sub(length)
            })
            .is_err();
        if over_budget {
            return Err(IcmError::OutOfMemory(format!(
                "mock device budget exhausted ({} bytes requested)",
                length
            )));
        }

        let align = 1u64 << log_align;
        let device_addr = self
            .next_addr
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |addr| {
                let aligned = (addr + align - 1) & !(align - 1);
                Some(aligned + length as u64)
            })
            .map(|addr| (addr + align - 1) & !(align - 1))
            .expect("fetch_update closure never returns None");

        // Same check the real provider performs after registration.
        debug_assert_eq!(device_addr & (align - 1), 0);

        let region = IcmRegion {
            device_addr,
            access_key: self.next_key.fetch_add(1, Ordering::SeqCst),
            length,
        };
        self.live_regions.lock().unwrap().push(region);
        Ok(region)
    }

    fn unregister_icm(&self, region: IcmRegion) -> IcmResult<()> {
        let mut live = self.live_regions.lock().unwrap();
        // A caller bug, not device-memory pressure; fail the test loudly.
        let idx = live
            .iter()
            .position(|r| *r == region)
            .unwrap_or_else(|| {
                panic!("unregister of unknown region at {:#x}", region.device_addr)
            });
        live.swap_remove(idx);
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| {
                Some(b.saturating_add(region.length))
            })
            .ok();
        Ok(())
    }

    fn sync_steering(&self) -> IcmResult<()> {
        if Self::take_failure(&self.fail_syncs) {
            return Err(IcmError::SyncFailure("injected sync failure".to_string()));
        }
        self.sync_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
