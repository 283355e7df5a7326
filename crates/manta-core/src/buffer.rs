use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::device::{accelerator, AccelMemory, AccelPtr, Device};
use crate::error::MantaError;
use crate::Result;

/// Host allocation with explicit layout, released on drop.
struct HostAlloc {
    ptr: NonNull<u8>,
    layout: Layout,
}

enum BufferData {
    Host(HostAlloc),
    Accel {
        memory: Arc<dyn AccelMemory>,
        ptr: AccelPtr,
    },
}

/// A raw byte buffer in host or accelerator memory.
///
/// The buffer is released through the allocator that produced it when the
/// last `Arc` holding it drops. Views share the buffer by cloning the
/// `Arc`; concurrent access follows the raw-memory discipline (callers
/// serialize writes against reads of the same region, no internal
/// locking).
pub struct DeviceBuffer {
    data: BufferData,
    nbytes: usize,
    device: Device,
}

// The host pointer is uniquely owned by this buffer and the accelerator
// handle is opaque; sharing across threads is governed by the raw-memory
// discipline documented on the type.
unsafe impl Send for DeviceBuffer {}
unsafe impl Sync for DeviceBuffer {}

impl DeviceBuffer {
    /// Allocate `nbytes` (at least 1) in the given memory space.
    ///
    /// Zero-filled storage is requested with `zeroed`; uninitialized
    /// accelerator storage is at the backend's discretion.
    pub fn new(nbytes: usize, align: usize, device: Device, zeroed: bool) -> Result<Self> {
        let nbytes = nbytes.max(1);
        let data = match device {
            Device::Host => {
                let layout = Layout::from_size_align(nbytes, align.max(1))
                    .map_err(|_| MantaError::SizeOverflow)?;
                // SAFETY: layout has non-zero size.
                let raw = unsafe {
                    if zeroed {
                        alloc::alloc_zeroed(layout)
                    } else {
                        alloc::alloc(layout)
                    }
                };
                let ptr = NonNull::new(raw).ok_or_else(|| MantaError::OutOfMemory {
                    nbytes,
                    device: device.to_string(),
                })?;
                BufferData::Host(HostAlloc { ptr, layout })
            }
            Device::Accel(idx) => {
                let memory = accelerator(idx)?;
                let ptr = if zeroed {
                    memory.alloc_zeroed(nbytes)?
                } else {
                    memory.alloc(nbytes)?
                };
                BufferData::Accel { memory, ptr }
            }
        };
        tracing::trace!(nbytes, %device, zeroed, "allocated buffer");
        Ok(Self {
            data,
            nbytes,
            device,
        })
    }

    /// Host buffer initialized from existing bytes (foreign data adopted
    /// into an alignment-correct allocation).
    pub fn from_bytes(bytes: &[u8], align: usize) -> Result<Self> {
        let buf = Self::new(bytes.len(), align, Device::Host, false)?;
        if let BufferData::Host(ref block) = buf.data {
            // SAFETY: freshly allocated, sized to bytes.len().max(1).
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), block.ptr.as_ptr(), bytes.len());
            }
        }
        Ok(buf)
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Raw host data pointer; `None` for accelerator buffers.
    pub fn host_ptr(&self) -> Option<NonNull<u8>> {
        match &self.data {
            BufferData::Host(a) => Some(a.ptr),
            BufferData::Accel { .. } => None,
        }
    }

    /// Address for alignment checks: the host pointer value, or 0 for
    /// accelerator buffers (the opaque handle carries no address meaning
    /// and backends align allocations at least as strictly as host malloc).
    pub fn addr(&self) -> usize {
        match &self.data {
            BufferData::Host(a) => a.ptr.as_ptr() as usize,
            BufferData::Accel { .. } => 0,
        }
    }

    /// View the host bytes.
    ///
    /// # Safety
    /// Caller must ensure no write to this buffer overlaps the returned
    /// borrow's lifetime. Panics are avoided by only calling on host
    /// buffers (`host_ptr().is_some()`).
    pub unsafe fn as_bytes(&self) -> &[u8] {
        match &self.data {
            BufferData::Host(a) => std::slice::from_raw_parts(a.ptr.as_ptr(), self.nbytes),
            BufferData::Accel { .. } => &[],
        }
    }

    /// Copy host bytes into this buffer at `offset`.
    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        if offset + src.len() > self.nbytes {
            return Err(MantaError::CopyFailed("write past end of buffer".into()));
        }
        match &self.data {
            BufferData::Host(a) => {
                // SAFETY: bounds checked above; aliasing follows the
                // buffer's raw-memory discipline.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        src.as_ptr(),
                        a.ptr.as_ptr().add(offset),
                        src.len(),
                    );
                }
                Ok(())
            }
            BufferData::Accel { memory, ptr } => memory.upload(*ptr, offset, src),
        }
    }

    /// Copy bytes out of this buffer at `offset` into `dst`.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        if offset + dst.len() > self.nbytes {
            return Err(MantaError::CopyFailed("read past end of buffer".into()));
        }
        match &self.data {
            BufferData::Host(a) => {
                // SAFETY: bounds checked above.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        a.ptr.as_ptr().add(offset),
                        dst.as_mut_ptr(),
                        dst.len(),
                    );
                }
                Ok(())
            }
            BufferData::Accel { memory, ptr } => memory.download(*ptr, offset, dst),
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        tracing::trace!(nbytes = self.nbytes, device = %self.device, "releasing buffer");
        match &self.data {
            BufferData::Host(a) => {
                // SAFETY: allocated with this exact layout in `new`.
                unsafe { alloc::dealloc(a.ptr.as_ptr(), a.layout) }
            }
            BufferData::Accel { memory, ptr } => memory.release(*ptr, self.nbytes),
        }
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("nbytes", &self.nbytes)
            .finish()
    }
}
