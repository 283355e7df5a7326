//! Element-wise assignment between arrays.
//!
//! Broadcasts the source to the destination shape, casts elements through
//! the descriptor's own conversion rules, and stages accelerator endpoints
//! through the device's upload/download primitives. Source and destination
//! memory must not overlap; overlap-tolerant movement is layered on top by
//! [`crate::convert::move_into`].

use smallvec::SmallVec;

use crate::array::Array;
use crate::buffer::DeviceBuffer;
use crate::device::Device;
use crate::dtype::{Casting, DType, DTypeKind};
use crate::error::MantaError;
use crate::layout::Strides;
use crate::shape::Shape;
use crate::strided::{byte_swap, strided_copy};
use crate::Result;

/// Assign `src` into `dst`, broadcasting and casting as needed.
///
/// Both arrays are borrowed; writes go through `dst`'s buffer under the
/// crate's raw-memory discipline. Fails with `UnsafeCast` when the element
/// conversion violates `casting` and `CopyFailed` for shape or transfer
/// problems.
pub fn assign_array(dst: &Array, src: &Array, casting: Casting) -> Result<()> {
    if !dst.is_writeable() {
        return Err(MantaError::CopyFailed(
            "destination is not writeable".into(),
        ));
    }
    if !src.dtype().can_cast_to(dst.dtype(), casting) {
        return Err(MantaError::UnsafeCast {
            from: src.dtype().clone(),
            to: dst.dtype().clone(),
            rule: casting.as_str(),
        });
    }
    if dst.numel() == 0 {
        return Ok(());
    }

    match (dst.device(), src.device()) {
        (Device::Host, Device::Host) => assign_host(dst, src),
        (Device::Host, _) => {
            let src_h = host_mirror(src)?;
            assign_host(dst, &src_h)
        }
        (_, _) => {
            // Accelerator destination: download, assign on host, upload.
            let src_h = if src.device().is_host() {
                src.clone()
            } else {
                host_mirror(src)?
            };
            let dst_h = host_mirror(dst)?;
            assign_host(&dst_h, &src_h)?;
            let bytes = dst_h.to_host_bytes()?;
            dst.buffer().write_at(0, &bytes)
        }
    }
}

/// Rebuild an accelerator array as a host array with the same dtype,
/// shape, and strides over a downloaded copy of its buffer.
fn host_mirror(a: &Array) -> Result<Array> {
    let bytes = a.to_host_bytes()?;
    let buf = DeviceBuffer::from_bytes(&bytes, a.dtype().alignment())?;
    let dims: SmallVec<[isize; 8]> = a.shape().dims().iter().map(|&d| d as isize).collect();
    Array::from_data(
        Device::Host,
        a.dtype().clone(),
        &dims,
        Some(a.strides()),
        std::sync::Arc::new(buf),
    )
}

/// Per-dimension source strides after broadcasting to the destination
/// shape: stretched dimensions step by zero.
fn broadcast_strides(src: &Array, dst_shape: &Shape) -> Result<Strides> {
    let sdims = src.shape().dims();
    let ddims = dst_shape.dims();
    if sdims.len() > ddims.len() {
        return Err(MantaError::CopyFailed(format!(
            "could not broadcast shape {} into {}",
            src.shape(),
            dst_shape
        )));
    }
    let offset = ddims.len() - sdims.len();
    let mut out: Strides = SmallVec::from_elem(0, ddims.len());
    for i in offset..ddims.len() {
        let sd = sdims[i - offset];
        if sd == ddims[i] {
            out[i] = src.strides()[i - offset];
        } else if sd == 1 {
            out[i] = 0;
        } else {
            return Err(MantaError::CopyFailed(format!(
                "could not broadcast shape {} into {}",
                src.shape(),
                dst_shape
            )));
        }
    }
    Ok(out)
}

fn assign_host(dst: &Array, src: &Array) -> Result<()> {
    let src_strides = broadcast_strides(src, dst.shape())?;

    let dst_ptr = dst
        .buffer()
        .host_ptr()
        .ok_or_else(|| MantaError::CopyFailed("expected host destination".into()))?
        .as_ptr();
    let src_ptr = src
        .buffer()
        .host_ptr()
        .ok_or_else(|| MantaError::CopyFailed("expected host source".into()))?
        .as_ptr();

    let dims = dst.shape().dims();
    let nd = dims.len();
    let raw = dst.dtype().equiv(src.dtype());

    if nd == 0 {
        // SAFETY: both buffers hold at least one element.
        unsafe {
            if raw {
                strided_copy(dst_ptr, 0, src_ptr, 0, 1, dst.dtype().elsize());
                return Ok(());
            }
            return cast_run(dst_ptr, 0, dst.dtype(), src_ptr, 0, src.dtype(), 1);
        }
    }

    let inner_n = dims[nd - 1];
    let inner_dst = dst.strides()[nd - 1];
    let inner_src = src_strides[nd - 1];

    // Odometer over the outer dimensions, one inner run per step.
    let mut index: SmallVec<[usize; 8]> = SmallVec::from_elem(0, nd - 1);
    loop {
        let mut dst_off = 0isize;
        let mut src_off = 0isize;
        for i in 0..nd - 1 {
            dst_off += index[i] as isize * dst.strides()[i];
            src_off += index[i] as isize * src_strides[i];
        }

        // SAFETY: offsets stay within each array's logical extent by
        // construction of the odometer and validated strides.
        unsafe {
            let d = dst_ptr.offset(dst_off);
            let s = src_ptr.offset(src_off);
            if raw {
                strided_copy(d, inner_dst, s, inner_src, inner_n, dst.dtype().elsize());
            } else {
                cast_run(d, inner_dst, dst.dtype(), s, inner_src, src.dtype(), inner_n)?;
            }
        }

        // Advance the odometer; finished when it wraps.
        let mut i = nd - 1;
        loop {
            if i == 0 {
                return Ok(());
            }
            i -= 1;
            index[i] += 1;
            if index[i] < dims[i] {
                break;
            }
            index[i] = 0;
        }
    }
}

#[derive(Clone, Copy)]
enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Complex { re: f64, im: f64 },
}

impl Scalar {
    fn to_f64(self) -> f64 {
        match self {
            Scalar::Bool(b) => b as u8 as f64,
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
            Scalar::Complex { re, .. } => re,
        }
    }

    fn to_i64(self) -> i64 {
        match self {
            Scalar::Bool(b) => b as i64,
            Scalar::Int(v) => v,
            Scalar::UInt(v) => v as i64,
            Scalar::Float(v) => v as i64,
            Scalar::Complex { re, .. } => re as i64,
        }
    }

    fn to_u64(self) -> u64 {
        match self {
            Scalar::Bool(b) => b as u64,
            Scalar::Int(v) => v as u64,
            Scalar::UInt(v) => v,
            Scalar::Float(v) => v as u64,
            Scalar::Complex { re, .. } => re as u64,
        }
    }

    fn to_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(v) => v != 0,
            Scalar::UInt(v) => v != 0,
            Scalar::Float(v) => v != 0.0,
            Scalar::Complex { re, im } => re != 0.0 || im != 0.0,
        }
    }

    fn to_complex(self) -> (f64, f64) {
        match self {
            Scalar::Complex { re, im } => (re, im),
            other => (other.to_f64(), 0.0),
        }
    }
}

/// Flip a native-order staging element to/from the descriptor's order.
/// Complex elements swap each component, not the whole element.
unsafe fn swap_element(p: *mut u8, dt: &DType) {
    if dt.is_native_order() {
        return;
    }
    match dt.kind() {
        DTypeKind::Complex => {
            let half = dt.elsize() / 2;
            byte_swap(p, half as isize, 2, half);
        }
        _ => byte_swap(p, dt.elsize() as isize, 1, dt.elsize()),
    }
}

fn read_value(elem: &[u8; 16], dt: &DType) -> Option<Scalar> {
    let k = dt.kind();
    let n = dt.elsize();
    Some(match (k, n) {
        (DTypeKind::Bool, 1) => Scalar::Bool(elem[0] != 0),
        (DTypeKind::Int, 1) => Scalar::Int(elem[0] as i8 as i64),
        (DTypeKind::Int, 2) => Scalar::Int(i16::from_ne_bytes([elem[0], elem[1]]) as i64),
        (DTypeKind::Int, 4) => {
            Scalar::Int(i32::from_ne_bytes([elem[0], elem[1], elem[2], elem[3]]) as i64)
        }
        (DTypeKind::Int, 8) => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&elem[..8]);
            Scalar::Int(i64::from_ne_bytes(b))
        }
        (DTypeKind::UInt, 1) => Scalar::UInt(elem[0] as u64),
        (DTypeKind::UInt, 2) => Scalar::UInt(u16::from_ne_bytes([elem[0], elem[1]]) as u64),
        (DTypeKind::UInt, 4) => {
            Scalar::UInt(u32::from_ne_bytes([elem[0], elem[1], elem[2], elem[3]]) as u64)
        }
        (DTypeKind::UInt, 8) => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&elem[..8]);
            Scalar::UInt(u64::from_ne_bytes(b))
        }
        (DTypeKind::Float, 4) => {
            Scalar::Float(f32::from_ne_bytes([elem[0], elem[1], elem[2], elem[3]]) as f64)
        }
        (DTypeKind::Float, 8) => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&elem[..8]);
            Scalar::Float(f64::from_ne_bytes(b))
        }
        (DTypeKind::Complex, 8) => {
            let re = f32::from_ne_bytes([elem[0], elem[1], elem[2], elem[3]]) as f64;
            let im = f32::from_ne_bytes([elem[4], elem[5], elem[6], elem[7]]) as f64;
            Scalar::Complex { re, im }
        }
        (DTypeKind::Complex, 16) => {
            let mut re = [0u8; 8];
            let mut im = [0u8; 8];
            re.copy_from_slice(&elem[..8]);
            im.copy_from_slice(&elem[8..16]);
            Scalar::Complex {
                re: f64::from_ne_bytes(re),
                im: f64::from_ne_bytes(im),
            }
        }
        _ => return None,
    })
}

fn write_value(value: Scalar, dt: &DType, out: &mut [u8; 16]) -> Option<()> {
    let k = dt.kind();
    let n = dt.elsize();
    match (k, n) {
        (DTypeKind::Bool, 1) => out[0] = value.to_bool() as u8,
        (DTypeKind::Int, 1) => out[0] = value.to_i64() as i8 as u8,
        (DTypeKind::Int, 2) => out[..2].copy_from_slice(&(value.to_i64() as i16).to_ne_bytes()),
        (DTypeKind::Int, 4) => out[..4].copy_from_slice(&(value.to_i64() as i32).to_ne_bytes()),
        (DTypeKind::Int, 8) => out[..8].copy_from_slice(&value.to_i64().to_ne_bytes()),
        (DTypeKind::UInt, 1) => out[0] = value.to_u64() as u8,
        (DTypeKind::UInt, 2) => out[..2].copy_from_slice(&(value.to_u64() as u16).to_ne_bytes()),
        (DTypeKind::UInt, 4) => out[..4].copy_from_slice(&(value.to_u64() as u32).to_ne_bytes()),
        (DTypeKind::UInt, 8) => out[..8].copy_from_slice(&value.to_u64().to_ne_bytes()),
        (DTypeKind::Float, 4) => {
            out[..4].copy_from_slice(&(value.to_f64() as f32).to_ne_bytes())
        }
        (DTypeKind::Float, 8) => out[..8].copy_from_slice(&value.to_f64().to_ne_bytes()),
        (DTypeKind::Complex, 8) => {
            let (re, im) = value.to_complex();
            out[..4].copy_from_slice(&(re as f32).to_ne_bytes());
            out[4..8].copy_from_slice(&(im as f32).to_ne_bytes());
        }
        (DTypeKind::Complex, 16) => {
            let (re, im) = value.to_complex();
            out[..8].copy_from_slice(&re.to_ne_bytes());
            out[8..16].copy_from_slice(&im.to_ne_bytes());
        }
        _ => return None,
    }
    Some(())
}

fn is_opaque(kind: DTypeKind) -> bool {
    matches!(
        kind,
        DTypeKind::Bytes | DTypeKind::Text | DTypeKind::Composite
    )
}

/// Convert `count` elements from `src` into `dst`, one at a time through
/// native-order staging.
///
/// # Safety
/// Both pointer runs must cover `count` valid, non-overlapping strided
/// elements.
unsafe fn cast_run(
    dst: *mut u8,
    dst_stride: isize,
    dst_dt: &DType,
    src: *const u8,
    src_stride: isize,
    src_dt: &DType,
    count: usize,
) -> Result<()> {
    // Opaque kinds convert by byte truncation / zero padding.
    if is_opaque(src_dt.kind()) || is_opaque(dst_dt.kind()) {
        let n = src_dt.elsize().min(dst_dt.elsize());
        let pad = dst_dt.elsize() - n;
        let mut s = src;
        let mut d = dst;
        for _ in 0..count {
            std::ptr::copy_nonoverlapping(s, d, n);
            if pad > 0 {
                std::ptr::write_bytes(d.add(n), 0, pad);
            }
            s = s.offset(src_stride);
            d = d.offset(dst_stride);
        }
        return Ok(());
    }

    let unsupported = || {
        MantaError::CopyFailed(format!(
            "no cast routine from {} to {}",
            src_dt, dst_dt
        ))
    };

    let mut s = src;
    let mut d = dst;
    for _ in 0..count {
        let mut in_buf = [0u8; 16];
        let mut out_buf = [0u8; 16];
        std::ptr::copy_nonoverlapping(s, in_buf.as_mut_ptr(), src_dt.elsize());
        swap_element(in_buf.as_mut_ptr(), src_dt);

        let value = read_value(&in_buf, src_dt).ok_or_else(unsupported)?;
        write_value(value, dst_dt, &mut out_buf).ok_or_else(unsupported)?;

        swap_element(out_buf.as_mut_ptr(), dst_dt);
        std::ptr::copy_nonoverlapping(out_buf.as_ptr(), d, dst_dt.elsize());
        s = s.offset(src_stride);
        d = d.offset(dst_stride);
    }
    Ok(())
}
