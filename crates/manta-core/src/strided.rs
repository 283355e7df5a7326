//! Raw strided copy and byte-swap primitives.
//!
//! These operate purely on pointers, byte strides, counts, and element
//! widths; they know nothing about dtypes or devices. Strides may be
//! negative or zero and neither contiguity nor alignment is assumed.

use std::ptr;

unsafe fn copy_fixed<const N: usize>(
    mut dst: *mut u8,
    dst_stride: isize,
    mut src: *const u8,
    src_stride: isize,
    count: usize,
) {
    for _ in 0..count {
        ptr::copy_nonoverlapping(src, dst, N);
        src = src.offset(src_stride);
        dst = dst.offset(dst_stride);
    }
}

/// Copy `count` elements of `elsize` bytes from `src` to `dst`, advancing
/// each pointer by its stride per element.
///
/// Common element widths get a fixed-size fast path; every other width
/// takes the generic byte copy with identical observable results.
///
/// # Safety
/// Every element touched on both sides must lie in valid memory, and the
/// source and destination element ranges must not overlap.
pub unsafe fn strided_copy(
    dst: *mut u8,
    dst_stride: isize,
    src: *const u8,
    src_stride: isize,
    count: usize,
    elsize: usize,
) {
    match elsize {
        1 => copy_fixed::<1>(dst, dst_stride, src, src_stride, count),
        2 => copy_fixed::<2>(dst, dst_stride, src, src_stride, count),
        4 => copy_fixed::<4>(dst, dst_stride, src, src_stride, count),
        8 => copy_fixed::<8>(dst, dst_stride, src, src_stride, count),
        16 => copy_fixed::<16>(dst, dst_stride, src, src_stride, count),
        _ => {
            let mut s = src;
            let mut d = dst;
            for _ in 0..count {
                ptr::copy_nonoverlapping(s, d, elsize);
                s = s.offset(src_stride);
                d = d.offset(dst_stride);
            }
        }
    }
}

unsafe fn swap_width<T>(mut p: *mut u8, stride: isize, count: usize, swap: fn(T) -> T)
where
    T: Copy,
{
    let width = std::mem::size_of::<T>();
    // One combined test covers both the base address and every step.
    if (p as usize | stride.unsigned_abs()) % width == 0 {
        for _ in 0..count {
            let t = p as *mut T;
            *t = swap(*t);
            p = p.offset(stride);
        }
    } else {
        for _ in 0..count {
            let t = p as *mut T;
            t.write_unaligned(swap(t.read_unaligned()));
            p = p.offset(stride);
        }
    }
}

/// Reverse the byte order of `count` elements of `elsize` bytes in place,
/// stepping `stride` bytes between elements.
///
/// Widths 2, 4 and 8 use an aligned fast path when the address and stride
/// allow it; other widths swap half the element's bytes pairwise. Width 1
/// is a no-op.
///
/// # Safety
/// Every element touched must lie in valid, writable memory and no other
/// access may overlap the call.
pub unsafe fn byte_swap(p: *mut u8, stride: isize, count: usize, elsize: usize) {
    match elsize {
        0 | 1 => {}
        2 => swap_width::<u16>(p, stride, count, u16::swap_bytes),
        4 => swap_width::<u32>(p, stride, count, u32::swap_bytes),
        8 => swap_width::<u64>(p, stride, count, u64::swap_bytes),
        _ => {
            let half = elsize / 2;
            let mut elem = p;
            for _ in 0..count {
                let mut a = elem;
                let mut b = elem.add(elsize - 1);
                for _ in 0..half {
                    ptr::swap(a, b);
                    a = a.add(1);
                    b = b.sub(1);
                }
                elem = elem.offset(stride);
            }
        }
    }
}

/// Byte-swap a packed vector of `count` elements in place.
///
/// # Safety
/// As [`byte_swap`] with `stride == elsize`.
pub unsafe fn byte_swap_vector(p: *mut u8, count: usize, elsize: usize) {
    byte_swap(p, elsize as isize, count, elsize);
}
