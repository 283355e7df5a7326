use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::MantaError;
use crate::Result;

/// Memory space an array's buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host (main) memory.
    #[default]
    Host,
    /// Accelerator device memory, by device index.
    Accel(usize),
}

impl Device {
    /// Whether this is host memory.
    pub fn is_host(&self) -> bool {
        matches!(self, Device::Host)
    }

    /// Whether this is an accelerator device.
    pub fn is_accel(&self) -> bool {
        matches!(self, Device::Accel(_))
    }

    /// Get the accelerator index, if applicable.
    pub fn accel_index(&self) -> Option<usize> {
        match self {
            Device::Accel(idx) => Some(*idx),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Host => write!(f, "host"),
            Device::Accel(idx) => write!(f, "accel:{idx}"),
        }
    }
}

/// Opaque address of an allocation in accelerator memory.
///
/// Only meaningful to the [`AccelMemory`] implementation that produced it.
pub type AccelPtr = u64;

/// Raw memory primitives of one accelerator device.
///
/// This is the narrow interface the array core consumes; what sits behind
/// it (a driver API, an offload runtime, a host-staging emulator) is the
/// implementor's business. Implementations must be safe to call from any
/// thread.
pub trait AccelMemory: Send + Sync {
    /// Allocate `nbytes` of uninitialized device memory.
    fn alloc(&self, nbytes: usize) -> Result<AccelPtr>;

    /// Allocate `nbytes` of zero-filled device memory.
    fn alloc_zeroed(&self, nbytes: usize) -> Result<AccelPtr>;

    /// Release an allocation previously returned by this device.
    fn release(&self, ptr: AccelPtr, nbytes: usize);

    /// Copy host bytes into device memory at `ptr + offset`.
    fn upload(&self, ptr: AccelPtr, offset: usize, src: &[u8]) -> Result<()>;

    /// Copy device bytes at `ptr + offset` into host memory.
    fn download(&self, ptr: AccelPtr, offset: usize, dst: &mut [u8]) -> Result<()>;
}

/// Global registry of accelerator memory backends (one per device index).
static ACCELERATORS: OnceLock<Mutex<HashMap<usize, Arc<dyn AccelMemory>>>> = OnceLock::new();

fn accelerators() -> &'static Mutex<HashMap<usize, Arc<dyn AccelMemory>>> {
    ACCELERATORS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register the memory backend for an accelerator device index.
///
/// Re-registering an index replaces the previous backend; buffers already
/// allocated keep the backend they were allocated from.
pub fn register_accelerator(index: usize, memory: Arc<dyn AccelMemory>) {
    tracing::debug!(device = index, "registering accelerator memory backend");
    accelerators().lock().insert(index, memory);
}

/// Get the memory backend for a device index.
pub fn accelerator(index: usize) -> Result<Arc<dyn AccelMemory>> {
    let map = accelerators().lock();
    match map.get(&index) {
        Some(mem) => Ok(Arc::clone(mem)),
        None => Err(MantaError::InvalidDevice { count: map.len() }),
    }
}

/// Number of accelerator devices with a registered backend.
///
/// Valid device indices are `0..device_count()`; registration is expected
/// to be dense from zero.
pub fn device_count() -> usize {
    accelerators().lock().len()
}

/// Host-staging accelerator memory: device allocations backed by host
/// blocks behind the [`AccelMemory`] interface.
///
/// This is the reference backend used by the test suite; it is also usable
/// as a functional stand-in when no real accelerator runtime is present.
#[derive(Default)]
pub struct SysMemory {
    allocations: Mutex<HashMap<AccelPtr, Box<[u8]>>>,
    next: Mutex<AccelPtr>,
}

impl SysMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, block: Box<[u8]>) -> AccelPtr {
        let mut next = self.next.lock();
        *next += 1;
        let ptr = *next;
        self.allocations.lock().insert(ptr, block);
        ptr
    }
}

impl AccelMemory for SysMemory {
    fn alloc(&self, nbytes: usize) -> Result<AccelPtr> {
        // Uninitialized device memory is unobservable through this
        // interface, so the emulator zero-fills both variants.
        self.alloc_zeroed(nbytes)
    }

    fn alloc_zeroed(&self, nbytes: usize) -> Result<AccelPtr> {
        Ok(self.insert(vec![0u8; nbytes].into_boxed_slice()))
    }

    fn release(&self, ptr: AccelPtr, _nbytes: usize) {
        self.allocations.lock().remove(&ptr);
    }

    fn upload(&self, ptr: AccelPtr, offset: usize, src: &[u8]) -> Result<()> {
        let mut allocations = self.allocations.lock();
        let block = allocations
            .get_mut(&ptr)
            .ok_or_else(|| MantaError::CopyFailed("upload to unknown allocation".into()))?;
        block[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn download(&self, ptr: AccelPtr, offset: usize, dst: &mut [u8]) -> Result<()> {
        let allocations = self.allocations.lock();
        let block = allocations
            .get(&ptr)
            .ok_or_else(|| MantaError::CopyFailed("download from unknown allocation".into()))?;
        dst.copy_from_slice(&block[offset..offset + dst.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_properties() {
        assert!(Device::Host.is_host());
        assert!(!Device::Host.is_accel());
        assert!(Device::Accel(0).is_accel());
        assert_eq!(Device::Accel(1).accel_index(), Some(1));
        assert_eq!(Device::Host.accel_index(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Device::Host), "host");
        assert_eq!(format!("{}", Device::Accel(0)), "accel:0");
    }

    #[test]
    fn test_sysmemory_round_trip() {
        let mem = SysMemory::new();
        let ptr = mem.alloc_zeroed(8).unwrap();
        mem.upload(ptr, 2, &[1, 2, 3]).unwrap();

        let mut out = vec![0u8; 8];
        mem.download(ptr, 0, &mut out).unwrap();
        assert_eq!(out, &[0, 0, 1, 2, 3, 0, 0, 0]);

        mem.release(ptr, 8);
        assert!(mem.download(ptr, 0, &mut out).is_err());
    }
}
