use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::buffer::DeviceBuffer;
use crate::device::{device_count, Device};
use crate::dtype::{DType, DTypeKind};
use crate::error::MantaError;
use crate::flags::ArrayFlags;
use crate::layout::{compute_flags, fill_strides, sorted_stride_perm, MemoryOrder, Strides};
use crate::shape::{validate_dims, Shape, MAXDIMS};
use crate::Result;

/// What to do when flattening a sub-array descriptor would push the rank
/// past [`MAXDIMS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubarrayTruncation {
    /// Fail with an out-of-range error.
    #[default]
    Reject,
    /// Stop flattening and treat the remaining sub-array structure as an
    /// opaque element of its full size.
    Clamp,
}

/// Finalization hook invoked when an array of a registered variant is
/// created: `(new array, originating array or none)`.
pub type FinalizeHook = Arc<dyn Fn(&mut Array, Option<&Array>) -> Result<()> + Send + Sync>;

static FINALIZERS: OnceLock<RwLock<HashMap<&'static str, FinalizeHook>>> = OnceLock::new();

fn finalizers() -> &'static RwLock<HashMap<&'static str, FinalizeHook>> {
    FINALIZERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the finalize hook for an array variant tag.
///
/// Creating an array with this variant invokes the hook with the new
/// handle and the originating array (if any); a hook failure aborts the
/// creation.
pub fn register_finalize(variant: &'static str, hook: FinalizeHook) {
    finalizers().write().insert(variant, hook);
}

fn finalize_hook(variant: &str) -> Option<FinalizeHook> {
    finalizers().read().get(variant).map(Arc::clone)
}

/// A device-aware N-dimensional strided array.
///
/// Handles are created exclusively through the factory constructors; the
/// shape, strides and dtype of a handle never change after creation.
/// Cloning a handle is cheap and shares the underlying buffer.
#[derive(Clone)]
pub struct Array {
    device: Device,
    dtype: DType,
    shape: Shape,
    strides: Strides,
    buffer: Arc<DeviceBuffer>,
    flags: ArrayFlags,
    base: Option<Arc<Array>>,
    variant: Option<&'static str>,
}

impl Array {
    /// Generic creation routine. Internal full-parameter form; the public
    /// constructors are thin wrappers.
    ///
    /// Consumes `dtype` on every path, including errors. If `data` is
    /// given the handle borrows it (ownership stays with the supplier and
    /// the owns-data flag is never set); otherwise a fresh buffer is
    /// allocated and owned.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_from_descr_int(
        device: Device,
        dtype: DType,
        dims: &[isize],
        strides: Option<&[isize]>,
        data: Option<Arc<DeviceBuffer>>,
        fortran: bool,
        origin: Option<&Array>,
        variant: Option<&'static str>,
        zeroed: bool,
        allow_zero_width: bool,
        truncation: SubarrayTruncation,
    ) -> Result<Array> {
        let mut dtype = dtype;
        let mut dims: SmallVec<[isize; 8]> = SmallVec::from_slice(dims);
        let mut given_strides: Option<SmallVec<[isize; 8]>> =
            strides.map(SmallVec::from_slice);

        // Flatten sub-array descriptors into trailing dimensions,
        // recursively, until a plain descriptor remains. Trailing strides
        // are appended C-contiguous from the base element size and only
        // when the caller supplied strides (because data was supplied).
        loop {
            let Some(sub) = dtype.subarray() else { break };
            let sub_base = sub.base.clone();
            let sub_shape: SmallVec<[usize; 4]> = sub.shape.clone();

            if dims.len() + sub_shape.len() > MAXDIMS {
                match truncation {
                    SubarrayTruncation::Reject => {
                        return Err(MantaError::OutOfRange { max: MAXDIMS });
                    }
                    SubarrayTruncation::Clamp => break,
                }
            }

            if let Some(sv) = given_strides.as_mut() {
                let mut tail: SmallVec<[isize; 4]> = SmallVec::from_elem(0, sub_shape.len());
                let mut running = sub_base.elsize() as isize;
                for i in (0..sub_shape.len()).rev() {
                    tail[i] = running;
                    running *= if sub_shape[i] == 0 {
                        1
                    } else {
                        sub_shape[i] as isize
                    };
                }
                sv.extend_from_slice(&tail);
            }
            for &d in &sub_shape {
                dims.push(d as isize);
            }
            dtype = sub_base;
        }

        if let Device::Accel(idx) = device {
            let count = device_count();
            if idx >= count {
                return Err(MantaError::InvalidDevice { count });
            }
        }

        // A zero element size is only legal for flexible kinds; unless the
        // caller allows zero-width elements, substitute the minimal valid
        // width before sizing the buffer.
        if dtype.elsize() == 0 && !dtype.is_flexible() {
            return Err(MantaError::EmptyDtype);
        }
        if dtype.elsize() == 0 && !allow_zero_width {
            dtype = match dtype.kind() {
                DTypeKind::Bytes => dtype.with_elsize(1),
                _ => dtype.with_elsize(4),
            };
        }

        let validated = validate_dims(&dims, dtype.elsize())?;
        let shape = validated.shape;

        let strides: Strides = match given_strides {
            Some(sv) => {
                if sv.len() != shape.ndim() {
                    return Err(MantaError::InvalidShape);
                }
                // Caller-supplied strides are trusted verbatim.
                SmallVec::from_slice(&sv)
            }
            None => fill_strides(&shape, dtype.elsize(), fortran),
        };

        let (buffer, owns) = match data {
            Some(buf) => {
                if buf.device() != device {
                    return Err(MantaError::InvalidDevice {
                        count: device_count(),
                    });
                }
                (buf, false)
            }
            None => {
                // Allocate something even for zero-space arrays so raw
                // buffer access stays valid.
                let nbytes = if validated.is_empty {
                    dtype.elsize()
                } else {
                    validated.nbytes
                };
                let zero_fill = zeroed || dtype.needs_init();
                let buf =
                    DeviceBuffer::new(nbytes, dtype.alignment(), device, zero_fill)?;
                (Arc::new(buf), true)
            }
        };

        // The contiguity and alignment bits come from one pure computation
        // over the final layout; requested layout bits are never trusted.
        let mut flags = compute_flags(
            &shape,
            &strides,
            dtype.elsize(),
            dtype.alignment(),
            buffer.addr(),
        );
        flags |= ArrayFlags::WRITEABLE;
        if owns {
            flags |= ArrayFlags::OWNDATA;
        }

        let mut array = Array {
            device,
            dtype,
            shape,
            strides,
            buffer,
            flags,
            base: None,
            variant,
        };

        if let Some(tag) = variant {
            if let Some(hook) = finalize_hook(tag) {
                // A hook failure aborts creation; everything acquired so
                // far is released by ownership.
                hook(&mut array, origin)?;
            }
        }

        Ok(array)
    }

    /// Create a new array from a descriptor, allocating an uninitialized
    /// buffer on `device`. Consumes `dtype`.
    ///
    /// When `strides` is given it is used verbatim; otherwise a contiguous
    /// layout of the requested order is derived.
    pub fn new_from_descr(
        device: Device,
        dtype: DType,
        dims: &[isize],
        strides: Option<&[isize]>,
        order: MemoryOrder,
    ) -> Result<Array> {
        Self::new_from_descr_int(
            device,
            dtype,
            dims,
            strides,
            None,
            order == MemoryOrder::Fortran,
            None,
            None,
            false,
            false,
            SubarrayTruncation::Reject,
        )
    }

    /// Create a new array by element kind and width.
    ///
    /// For flexible kinds `itemsize` supplies the element width and must
    /// be at least 1.
    pub fn new_with_type(
        device: Device,
        kind: DTypeKind,
        itemsize: usize,
        dims: &[isize],
        order: MemoryOrder,
    ) -> Result<Array> {
        let dtype = DType::new(kind, itemsize);
        if dtype.elsize() == 0 {
            return Err(MantaError::EmptyDtype);
        }
        Self::new_from_descr(device, dtype, dims, None, order)
    }

    /// Create a zero-filled array. A `None` dtype defaults to f8.
    pub fn zeros(
        device: Device,
        dims: &[isize],
        dtype: Option<DType>,
        order: MemoryOrder,
    ) -> Result<Array> {
        let dtype = dtype.unwrap_or_else(DType::float64);
        Self::new_from_descr_int(
            device,
            dtype,
            dims,
            None,
            None,
            order == MemoryOrder::Fortran,
            None,
            None,
            true,
            false,
            SubarrayTruncation::Reject,
        )
    }

    /// Create an uninitialized-but-allocated array. A `None` dtype
    /// defaults to f8.
    pub fn empty(
        device: Device,
        dims: &[isize],
        dtype: Option<DType>,
        order: MemoryOrder,
    ) -> Result<Array> {
        let dtype = dtype.unwrap_or_else(DType::float64);
        Self::new_from_descr(device, dtype, dims, None, order)
    }

    /// Create a non-owning array over a supplied buffer. Consumes `dtype`.
    ///
    /// The handle borrows `data`; the owns-data flag stays clear and the
    /// buffer outlives the handle through the shared reference.
    ///
    /// # Panics
    /// Panics if the buffer is smaller than the layout requires.
    pub fn from_data(
        device: Device,
        dtype: DType,
        dims: &[isize],
        strides: Option<&[isize]>,
        data: Arc<DeviceBuffer>,
    ) -> Result<Array> {
        let elsize = dtype.elsize();
        let validated = validate_dims(dims, elsize.max(1))?;
        let needed = if validated.is_empty {
            elsize
        } else {
            validated.nbytes
        };
        assert!(
            data.nbytes() >= needed,
            "supplied buffer holds {} bytes, layout requires {}",
            data.nbytes(),
            needed
        );
        Self::new_from_descr_int(
            device,
            dtype,
            dims,
            strides,
            Some(data),
            false,
            None,
            None,
            false,
            false,
            SubarrayTruncation::Reject,
        )
    }

    /// Plan and allocate an array structurally similar to `prototype`:
    /// same shape, possibly different device, dtype, and layout order.
    ///
    /// `Any` resolves to Fortran when the prototype is Fortran-but-not-C
    /// contiguous, else C. `Keep` reproduces the prototype's memory
    /// visitation order even when it is neither pure C nor pure Fortran.
    /// With `subok` the prototype's variant (and its finalize hook) is
    /// carried over.
    pub fn new_like(
        device: Device,
        prototype: &Array,
        order: MemoryOrder,
        dtype: Option<DType>,
        subok: bool,
    ) -> Result<Array> {
        let mut dtype = match dtype {
            Some(d) => d,
            None => prototype.dtype.clone(),
        };
        if dtype.elsize() == 0 && dtype.is_flexible() {
            dtype = dtype.with_elsize(prototype.dtype.elsize());
        }

        let ndim = prototype.ndim();
        let order = match order {
            MemoryOrder::Any => {
                if prototype.is_fortran() {
                    MemoryOrder::Fortran
                } else {
                    MemoryOrder::C
                }
            }
            MemoryOrder::Keep => {
                if prototype.is_c_contiguous() || ndim <= 1 {
                    MemoryOrder::C
                } else if prototype.is_f_contiguous() {
                    MemoryOrder::Fortran
                } else {
                    MemoryOrder::Keep
                }
            }
            other => other,
        };

        let dims: SmallVec<[isize; 8]> =
            prototype.shape.dims().iter().map(|&d| d as isize).collect();
        let variant = if subok { prototype.variant } else { None };
        let origin = subok.then_some(prototype);

        if order != MemoryOrder::Keep {
            return Self::new_from_descr_int(
                device,
                dtype,
                &dims,
                None,
                None,
                order == MemoryOrder::Fortran,
                origin,
                variant,
                false,
                false,
                SubarrayTruncation::Reject,
            );
        }

        // Keep-order: lay the new strides along the prototype's axes
        // sorted by descending stride magnitude, growing from the element
        // size.
        let perm = sorted_stride_perm(&prototype.strides);
        let mut strides: Strides = SmallVec::from_elem(0, ndim);
        let mut stride = dtype.elsize() as isize;
        for idim in (0..ndim).rev() {
            let i_perm = perm[idim];
            strides[i_perm] = stride;
            stride *= prototype.shape.dims()[i_perm] as isize;
        }

        Self::new_from_descr_int(
            device,
            dtype,
            &dims,
            Some(&strides),
            None,
            false,
            origin,
            variant,
            false,
            false,
            SubarrayTruncation::Reject,
        )
    }

    /// A plain base-type view of this array: shares the buffer, same
    /// shape and strides, owns-data clear, `base` pointing back here.
    pub fn view(&self) -> Array {
        let mut flags = self.flags;
        flags.remove(ArrayFlags::OWNDATA | ArrayFlags::WRITEBACK);
        Array {
            device: self.device,
            dtype: self.dtype.clone(),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            buffer: Arc::clone(&self.buffer),
            flags,
            base: Some(Arc::new(self.clone())),
            variant: None,
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Byte strides per dimension (empty for rank 0).
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Logical data size in bytes; the backing buffer may be larger (an
    /// empty array still holds one element's worth).
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.elsize()
    }

    pub fn flags(&self) -> ArrayFlags {
        self.flags
    }

    pub fn base(&self) -> Option<&Arc<Array>> {
        self.base.as_ref()
    }

    pub fn variant(&self) -> Option<&'static str> {
        self.variant
    }

    pub fn buffer(&self) -> &Arc<DeviceBuffer> {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn is_c_contiguous(&self) -> bool {
        self.flags.contains(ArrayFlags::C_CONTIGUOUS)
    }

    pub fn is_f_contiguous(&self) -> bool {
        self.flags.contains(ArrayFlags::F_CONTIGUOUS)
    }

    /// Fortran-ordered and not also C-ordered.
    pub fn is_fortran(&self) -> bool {
        self.is_f_contiguous() && !self.is_c_contiguous()
    }

    pub fn is_aligned(&self) -> bool {
        self.flags.contains(ArrayFlags::ALIGNED)
    }

    pub fn is_writeable(&self) -> bool {
        self.flags.contains(ArrayFlags::WRITEABLE)
    }

    pub fn owns_data(&self) -> bool {
        self.flags.contains(ArrayFlags::OWNDATA)
    }

    /// Whether two handles are backed by the same buffer.
    pub fn shares_buffer(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    pub(crate) fn set_base(&mut self, base: Arc<Array>) {
        self.base = Some(base);
    }

    pub(crate) fn insert_flags(&mut self, flags: ArrayFlags) {
        self.flags |= flags;
    }

    // =========================================================================
    // Host data access
    // =========================================================================

    /// The host elements as a typed slice.
    ///
    /// `None` unless the array lives in host memory, is C-contiguous and
    /// aligned, and `T` matches the element width.
    pub fn as_slice<T: bytemuck::Pod>(&self) -> Option<&[T]> {
        if !self.device.is_host()
            || !self.is_c_contiguous()
            || !self.is_aligned()
            || std::mem::size_of::<T>() != self.dtype.elsize()
        {
            return None;
        }
        // SAFETY: host buffer at least nbytes long; callers follow the
        // buffer's raw-memory discipline.
        let bytes = unsafe { &self.buffer.as_bytes()[..self.nbytes()] };
        bytemuck::try_cast_slice(bytes).ok()
    }

    /// Copy the logical contents out as packed little-endian-native bytes
    /// in this array's own layout order (for tests and staging).
    pub fn to_host_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.buffer.nbytes()];
        self.buffer.read_at(0, &mut out)?;
        Ok(out)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Array(shape={}, dtype={}, device={}, flags={:?})",
            self.shape, self.dtype, self.device, self.flags
        )
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "array(shape={}, dtype={}, device={})",
            self.shape, self.dtype, self.device
        )
    }
}
