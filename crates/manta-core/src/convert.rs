//! Conversion pipeline: producing arrays from other arrays or foreign
//! data with copy-vs-view semantics.
//!
//! The decision procedure weighs the requested device, dtype, and layout
//! properties against what the source already satisfies and returns the
//! source unchanged, a view over it, or a freshly copied array.

use std::sync::Arc;

use crate::array::Array;
use crate::assign::assign_array;
use crate::buffer::DeviceBuffer;
use crate::device::Device;
use crate::dtype::{Casting, DType};
use crate::error::MantaError;
use crate::flags::{ArrayFlags, ConvertFlags};
use crate::layout::{element_strides_ok, MemoryOrder};
use crate::Result;

/// Something the pipeline can convert: an existing array, or foreign data
/// that can be materialized into a host array.
///
/// This is the seam to the external host-array builder; implementations
/// for plain slices and vectors of supported scalars are provided.
pub trait ArraySource {
    /// The source as an existing array, if it is one.
    fn as_array(&self) -> Option<&Array> {
        None
    }

    /// Materialize the source into a host array with its natural dtype.
    fn to_host_array(&self) -> Result<Array>;
}

/// Scalar types that map onto a native descriptor.
pub trait HostScalar: bytemuck::Pod {
    fn dtype() -> DType;
}

macro_rules! impl_host_scalar {
    ($($t:ty => $ctor:ident),* $(,)?) => {
        $(
            impl HostScalar for $t {
                fn dtype() -> DType {
                    DType::$ctor()
                }
            }
        )*
    };
}

impl_host_scalar!(
    i8 => int8, i16 => int16, i32 => int32, i64 => int64,
    u8 => uint8, u16 => uint16, u32 => uint32, u64 => uint64,
    f32 => float32, f64 => float64,
);

impl ArraySource for Array {
    fn as_array(&self) -> Option<&Array> {
        Some(self)
    }

    fn to_host_array(&self) -> Result<Array> {
        from_array(self, None, Device::Host, ConvertFlags::empty())
    }
}

impl<T: HostScalar> ArraySource for [T] {
    fn to_host_array(&self) -> Result<Array> {
        let dtype = T::dtype();
        let buf = DeviceBuffer::from_bytes(bytemuck::cast_slice(self), dtype.alignment())?;
        Array::from_data(
            Device::Host,
            dtype,
            &[self.len() as isize],
            None,
            Arc::new(buf),
        )
    }
}

impl<T: HostScalar> ArraySource for Vec<T> {
    fn to_host_array(&self) -> Result<Array> {
        self.as_slice().to_host_array()
    }
}

/// Convert an existing array to the requested device, dtype, and
/// properties. Consumes `newtype` if given.
///
/// Returns the source itself (shared handle) when nothing is requested
/// that the source does not already satisfy; a view when only a plain
/// base-type guarantee is needed; otherwise a freshly allocated copy on
/// the requested device.
pub fn from_array(
    src: &Array,
    newtype: Option<DType>,
    device: Device,
    flags: ConvertFlags,
) -> Result<Array> {
    let oldtype = src.dtype();

    let mut newtype = match newtype {
        Some(t) => t,
        None => {
            // Nothing requested beyond what the source already is.
            if src.device() == device && flags.is_empty() {
                return Ok(src.clone());
            }
            oldtype.clone()
        }
    };
    if newtype.elsize() == 0 {
        newtype = newtype.with_elsize(oldtype.elsize());
    }

    // Forced casting downgrades the rule to unsafe.
    let casting = if flags.contains(ConvertFlags::FORCECAST) {
        Casting::Unsafe
    } else {
        Casting::Safe
    };
    if !oldtype.can_cast_to(&newtype, casting) {
        return Err(MantaError::UnsafeCast {
            from: oldtype.clone(),
            to: newtype,
            rule: casting.as_str(),
        });
    }

    let copy = src.device() != device
        || flags.contains(ConvertFlags::ENSURECOPY)
        || (flags.contains(ConvertFlags::C_CONTIGUOUS) && !src.is_c_contiguous())
        || (flags.contains(ConvertFlags::ALIGNED) && !src.is_aligned())
        || (flags.contains(ConvertFlags::F_CONTIGUOUS) && !src.is_f_contiguous())
        || (flags.contains(ConvertFlags::WRITEABLE) && !src.is_writeable())
        || !oldtype.equiv(&newtype);

    if copy {
        if src.device() != device {
            tracing::debug!(from = %src.device(), to = %device, nbytes = src.nbytes(), "transferring array");
        }
        let order = if flags.contains(ConvertFlags::F_CONTIGUOUS) {
            MemoryOrder::Fortran
        } else if flags.contains(ConvertFlags::C_CONTIGUOUS) {
            MemoryOrder::C
        } else {
            MemoryOrder::Keep
        };
        let subok = !flags.contains(ConvertFlags::ENSUREARRAY);

        let mut ret = Array::new_like(device, src, order, Some(newtype), subok)?;
        assign_array(&ret, src, Casting::Unsafe)?;

        if flags.contains(ConvertFlags::UPDATEIFCOPY) {
            // Record where the data came from for later write-back.
            ret.set_base(Arc::new(src.clone()));
            ret.insert_flags(ArrayFlags::WRITEBACK);
        }
        return Ok(ret);
    }

    // No copy: take a plain view if one is required, otherwise hand the
    // source back.
    let needview = flags.contains(ConvertFlags::ENSUREARRAY) && src.variant().is_some();
    if needview {
        Ok(src.view())
    } else {
        Ok(src.clone())
    }
}

/// Convert an arbitrary source to an array on `device`.
///
/// Existing arrays go straight to [`from_array`]; foreign data is first
/// materialized into a host array and must land within the
/// `[min_rank, max_rank]` window (`max_rank == 0` means unbounded).
pub fn from_any<S: ArraySource + ?Sized>(
    device: Device,
    source: &S,
    newtype: Option<DType>,
    min_rank: usize,
    max_rank: usize,
    flags: ConvertFlags,
) -> Result<Array> {
    if let Some(arr) = source.as_array() {
        return from_array(arr, newtype, device, flags);
    }

    let host = source.to_host_array()?;
    if host.ndim() < min_rank {
        return Err(MantaError::InvalidShape);
    }
    if max_rank > 0 && host.ndim() > max_rank {
        return Err(MantaError::OutOfRange { max: max_rank });
    }
    from_array(&host, newtype, device, flags)
}

/// As [`from_any`], with required-property post-conditions: byte-order
/// normalization of the descriptor up front, and a forced contiguous copy
/// afterwards when packed element strides were required but not achieved.
pub fn check_from_any<S: ArraySource + ?Sized>(
    device: Device,
    source: &S,
    descr: Option<DType>,
    min_rank: usize,
    max_rank: usize,
    requires: ConvertFlags,
) -> Result<Array> {
    let mut descr = descr;
    if requires.contains(ConvertFlags::NOTSWAPPED) {
        if descr.is_none() {
            if let Some(arr) = source.as_array() {
                if !arr.dtype().is_native_order() {
                    descr = Some(arr.dtype().clone());
                }
            }
        }
        descr = descr.map(DType::to_native_order);
    }

    let obj = from_any(device, source, descr, min_rank, max_rank, requires)?;

    if requires.contains(ConvertFlags::ELEMENTSTRIDES)
        && !element_strides_ok(obj.strides(), obj.dtype().elsize())
    {
        return new_copy(&obj, MemoryOrder::Any);
    }
    Ok(obj)
}

/// Guarantee a plain base-type array: pass arrays through (viewing away a
/// variant tag), materialize anything else on `device`.
pub fn ensure_array<S: ArraySource + ?Sized>(source: &S, device: Device) -> Result<Array> {
    match source.as_array() {
        Some(arr) if arr.variant().is_none() => Ok(arr.clone()),
        Some(arr) => Ok(arr.view()),
        None => from_any(device, source, None, 0, 0, ConvertFlags::ENSUREARRAY),
    }
}

/// Allocate a like-shaped array on the source's device and copy the
/// contents into it.
pub fn new_copy(src: &Array, order: MemoryOrder) -> Result<Array> {
    let ret = Array::new_like(src.device(), src, order, None, true)?;
    copy_into(&ret, src)?;
    Ok(ret)
}

/// Copy `src` into `dst`, broadcasting to the destination shape.
/// Memory must not overlap; see [`move_into`] for the overlap-safe form.
pub fn copy_into(dst: &Array, src: &Array) -> Result<()> {
    assign_array(dst, src, Casting::Unsafe)
}

/// Copy a host array into a device array.
pub fn copy_into_from_host(dst: &Array, src: &Array) -> Result<()> {
    if !src.device().is_host() {
        return Err(MantaError::CopyFailed("source must be a host array".into()));
    }
    assign_array(dst, src, Casting::Unsafe)
}

/// Copy a device array into a host array.
pub fn copy_into_host(dst: &Array, src: &Array) -> Result<()> {
    if !dst.device().is_host() {
        return Err(MantaError::CopyFailed(
            "destination must be a host array".into(),
        ));
    }
    assign_array(dst, src, Casting::Unsafe)
}

/// Move `src` into `dst`, tolerating overlapping memory by staging the
/// source through a packed temporary when both share a buffer.
pub fn move_into(dst: &Array, src: &Array) -> Result<()> {
    if dst.shares_buffer(src) {
        let tmp = new_copy(src, MemoryOrder::C)?;
        assign_array(dst, &tmp, Casting::Unsafe)
    } else {
        assign_array(dst, src, Casting::Unsafe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::register_finalize;
    use crate::device::{register_accelerator, SysMemory};
    use crate::dtype::ByteOrder;

    fn accel(idx: usize) -> Device {
        register_accelerator(idx, Arc::new(SysMemory::new()));
        Device::Accel(idx)
    }

    fn host_f32(values: &[f32]) -> Array {
        values.to_vec().to_host_array().unwrap()
    }

    #[test]
    fn test_no_copy_same_device_no_flags() {
        let a = Array::zeros(Device::Host, &[4], None, MemoryOrder::C).unwrap();
        let b = from_array(&a, None, Device::Host, ConvertFlags::empty()).unwrap();
        assert!(b.shares_buffer(&a));
        assert!(b.owns_data() == a.owns_data());
    }

    #[test]
    fn test_ensure_copy_forces_fresh_buffer() {
        let a = host_f32(&[1.0, 2.0]);
        let b = from_array(&a, None, Device::Host, ConvertFlags::ENSURECOPY).unwrap();
        assert!(!b.shares_buffer(&a));
        assert_eq!(b.as_slice::<f32>().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_device_change_copies() {
        let dev = accel(0);
        let a = host_f32(&[1.0, 2.0, 3.0]);
        let b = from_array(&a, None, dev, ConvertFlags::empty()).unwrap();
        assert_eq!(b.device(), dev);
        assert!(!b.shares_buffer(&a));

        // And back again, element for element.
        let c = from_array(&b, None, Device::Host, ConvertFlags::empty()).unwrap();
        assert_eq!(c.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cross_device_copy() {
        let d0 = accel(0);
        let d1 = accel(1);
        let a = from_any(d0, &[5i32, 6, 7][..], None, 0, 0, ConvertFlags::empty()).unwrap();
        assert_eq!(a.device(), d0);
        let b = from_array(&a, None, d1, ConvertFlags::empty()).unwrap();
        assert_eq!(b.device(), d1);
        let back = from_array(&b, None, Device::Host, ConvertFlags::empty()).unwrap();
        assert_eq!(back.as_slice::<i32>().unwrap(), &[5, 6, 7]);
    }

    #[test]
    fn test_unsafe_cast_rejected_and_forced() {
        let a = host_f32(&[1.5, 2.5]);
        let err = from_array(
            &a,
            Some(DType::int32()),
            Device::Host,
            ConvertFlags::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, MantaError::UnsafeCast { .. }));

        let b = from_array(
            &a,
            Some(DType::int32()),
            Device::Host,
            ConvertFlags::FORCECAST,
        )
        .unwrap();
        assert_eq!(b.as_slice::<i32>().unwrap(), &[1, 2]);
    }

    #[test]
    fn test_dtype_widening_copies() {
        let a = host_f32(&[1.0, 2.0]);
        let b = from_array(
            &a,
            Some(DType::float64()),
            Device::Host,
            ConvertFlags::empty(),
        )
        .unwrap();
        assert!(!b.shares_buffer(&a));
        assert_eq!(b.as_slice::<f64>().unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn test_contiguity_request_copies_only_when_needed() {
        let a = Array::empty(
            Device::Host,
            &[2, 3],
            Some(DType::float32()),
            MemoryOrder::Fortran,
        )
        .unwrap();
        let b = from_array(&a, None, Device::Host, ConvertFlags::C_CONTIGUOUS).unwrap();
        assert!(!b.shares_buffer(&a));
        assert!(b.is_c_contiguous());

        let c = from_array(&b, None, Device::Host, ConvertFlags::C_CONTIGUOUS).unwrap();
        assert!(c.shares_buffer(&b));
    }

    #[test]
    fn test_update_if_copy_records_base() {
        let a = host_f32(&[1.0]);
        let b = from_array(
            &a,
            None,
            Device::Host,
            ConvertFlags::ENSURECOPY | ConvertFlags::UPDATEIFCOPY,
        )
        .unwrap();
        assert!(b.flags().contains(ArrayFlags::WRITEBACK));
        let base = b.base().unwrap();
        assert!(base.shares_buffer(&a));
    }

    #[test]
    fn test_ensure_array_views_variant() {
        register_finalize(
            "masked",
            Arc::new(|_a: &mut Array, _o: Option<&Array>| Ok(())),
        );
        let tagged = Array::new_from_descr_int(
            Device::Host,
            DType::float32(),
            &[2],
            None,
            None,
            false,
            None,
            Some("masked"),
            true,
            false,
            crate::array::SubarrayTruncation::Reject,
        )
        .unwrap();
        assert_eq!(tagged.variant(), Some("masked"));

        // A variant array is viewed down to the base type; a plain array
        // passes through untouched.
        let plain = ensure_array(&tagged, Device::Host).unwrap();
        assert!(plain.variant().is_none());
        assert!(plain.shares_buffer(&tagged));
        assert!(!plain.owns_data());

        let already = host_f32(&[1.0]);
        let same = ensure_array(&already, Device::Host).unwrap();
        assert!(same.shares_buffer(&already));

        // ENSUREARRAY through the pipeline takes the same view.
        let viewed = from_array(
            &tagged,
            None,
            Device::Host,
            ConvertFlags::ENSUREARRAY,
        )
        .unwrap();
        assert!(viewed.variant().is_none());
        assert!(viewed.shares_buffer(&tagged));
    }

    #[test]
    fn test_from_any_foreign_slice() {
        let a = from_any(
            Device::Host,
            &[1.0f64, 2.0, 3.0][..],
            None,
            0,
            0,
            ConvertFlags::empty(),
        )
        .unwrap();
        assert_eq!(a.ndim(), 1);
        assert_eq!(a.dtype(), &DType::float64());
        assert_eq!(a.as_slice::<f64>().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_from_any_rank_window() {
        let err = from_any(
            Device::Host,
            &[1.0f32, 2.0][..],
            None,
            2,
            0,
            ConvertFlags::empty(),
        )
        .unwrap_err();
        assert!(matches!(err, MantaError::InvalidShape));
    }

    #[test]
    fn test_check_from_any_normalizes_byte_order() {
        let swapped = if cfg!(target_endian = "little") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        let a = Array::zeros(
            Device::Host,
            &[2],
            Some(DType::float32().with_byteorder(swapped)),
            MemoryOrder::C,
        )
        .unwrap();
        let b = check_from_any(
            Device::Host,
            &a,
            None,
            0,
            0,
            ConvertFlags::NOTSWAPPED,
        )
        .unwrap();
        assert!(b.dtype().is_native_order());
        assert!(!b.shares_buffer(&a));
    }

    #[test]
    fn test_check_from_any_element_strides() {
        // 3-byte elements over a packed buffer have element strides; a
        // caller-supplied byte-misaligned stride does not.
        let buf = Arc::new(DeviceBuffer::from_bytes(&[0u8; 16], 1).unwrap());
        let odd = Array::from_data(
            Device::Host,
            DType::uint16(),
            &[4],
            Some(&[3]),
            buf,
        )
        .unwrap();
        assert!(!element_strides_ok(odd.strides(), 2));

        let fixed = check_from_any(
            Device::Host,
            &odd,
            None,
            0,
            0,
            ConvertFlags::ELEMENTSTRIDES,
        )
        .unwrap();
        assert!(element_strides_ok(fixed.strides(), 2));
        assert!(!fixed.shares_buffer(&odd));
    }

    #[test]
    fn test_copy_into_broadcasts() {
        let dst = Array::zeros(Device::Host, &[2, 2], Some(DType::float32()), MemoryOrder::C)
            .unwrap();
        let src = host_f32(&[7.0, 8.0]);
        copy_into(&dst, &src).unwrap();
        assert_eq!(dst.as_slice::<f32>().unwrap(), &[7.0, 8.0, 7.0, 8.0]);
    }

    #[test]
    fn test_copy_host_device_wrappers() {
        let dev = accel(0);
        let host = host_f32(&[1.0, 2.0]);
        let on_dev = Array::zeros(dev, &[2], Some(DType::float32()), MemoryOrder::C).unwrap();

        copy_into_from_host(&on_dev, &host).unwrap();
        assert!(copy_into_from_host(&on_dev, &on_dev).is_err());

        let back = Array::zeros(Device::Host, &[2], Some(DType::float32()), MemoryOrder::C)
            .unwrap();
        copy_into_host(&back, &on_dev).unwrap();
        assert_eq!(back.as_slice::<f32>().unwrap(), &[1.0, 2.0]);
        assert!(copy_into_host(&on_dev, &back).is_err());
    }

    #[test]
    fn test_move_into_overlapping_views() {
        let a = host_f32(&[1.0, 2.0, 3.0, 4.0]);
        let v = a.view();
        // Same buffer on both sides; staging keeps the values coherent.
        move_into(&a, &v).unwrap();
        assert_eq!(a.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_new_copy_keep_order() {
        let proto = Array::new_from_descr(
            Device::Host,
            DType::float32(),
            &[2, 3],
            Some(&[4, 8]),
            MemoryOrder::C,
        )
        .unwrap();
        // Fill through a packed staging copy.
        let values = host_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let values = from_array(
            &values,
            None,
            Device::Host,
            ConvertFlags::ENSURECOPY,
        )
        .unwrap();
        let reshaped = Array::from_data(
            Device::Host,
            DType::float32(),
            &[2, 3],
            None,
            Arc::clone(values.buffer()),
        )
        .unwrap();
        copy_into(&proto, &reshaped).unwrap();

        let copy = new_copy(&proto, MemoryOrder::Keep).unwrap();
        assert_eq!(copy.shape().dims(), proto.shape().dims());
        // Element-for-element equality via a C-ordered rendering of both.
        let a = new_copy(&proto, MemoryOrder::C).unwrap();
        let b = new_copy(&copy, MemoryOrder::C).unwrap();
        assert_eq!(
            a.as_slice::<f32>().unwrap(),
            b.as_slice::<f32>().unwrap()
        );
    }
}
