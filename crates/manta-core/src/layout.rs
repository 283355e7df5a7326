use smallvec::SmallVec;

use crate::flags::ArrayFlags;
use crate::shape::Shape;

/// Memory layout order requested for a new array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrder {
    /// Row-major.
    #[default]
    C,
    /// Column-major.
    Fortran,
    /// Fortran if the prototype is Fortran-contiguous, C otherwise.
    Any,
    /// Reproduce the prototype's memory visitation order.
    Keep,
}

pub type Strides = SmallVec<[isize; 4]>;

/// Derive per-dimension byte strides for a contiguous layout of the
/// requested order.
///
/// The running element size skips zero extents so an empty shape still
/// produces the strides its non-empty analogue would have (relaxed-strides
/// policy).
pub fn fill_strides(shape: &Shape, elsize: usize, fortran: bool) -> Strides {
    let dims = shape.dims();
    let nd = dims.len();
    let mut strides: Strides = SmallVec::from_elem(0, nd);
    let mut running = elsize as isize;

    if fortran {
        for i in 0..nd {
            strides[i] = running;
            if dims[i] != 0 {
                running *= dims[i] as isize;
            }
        }
    } else {
        for i in (0..nd).rev() {
            strides[i] = running;
            if dims[i] != 0 {
                running *= dims[i] as isize;
            }
        }
    }
    strides
}

fn is_contiguous(shape: &Shape, strides: &[isize], elsize: usize, fortran: bool) -> bool {
    let dims = shape.dims();
    let nd = dims.len();
    let mut expected = elsize as isize;

    let order: Box<dyn Iterator<Item = usize>> = if fortran {
        Box::new(0..nd)
    } else {
        Box::new((0..nd).rev())
    };
    for i in order {
        let dim = dims[i];
        // An empty array is contiguous in every order.
        if dim == 0 {
            return true;
        }
        // Unit extents place no constraint on the stride.
        if dim != 1 {
            if strides[i] != expected {
                return false;
            }
            expected *= dim as isize;
        }
    }
    true
}

/// Compute the layout-derived flag bits (contiguity and alignment) from an
/// array's final shape, strides, element size, and data address.
///
/// This is the only place those bits are decided; callers or-in ownership
/// and writability separately.
pub fn compute_flags(
    shape: &Shape,
    strides: &[isize],
    elsize: usize,
    alignment: usize,
    addr: usize,
) -> ArrayFlags {
    let mut flags = ArrayFlags::empty();

    if is_contiguous(shape, strides, elsize, false) {
        flags |= ArrayFlags::C_CONTIGUOUS;
    }
    if is_contiguous(shape, strides, elsize, true) {
        flags |= ArrayFlags::F_CONTIGUOUS;
    }

    let aligned = alignment <= 1
        || (addr % alignment == 0
            && strides
                .iter()
                .all(|&s| (s.unsigned_abs()) % alignment == 0));
    if aligned {
        flags |= ArrayFlags::ALIGNED;
    }

    flags
}

/// Axis permutation ordered by descending stride magnitude, ties broken by
/// original axis index. Visiting axes in this order walks the array's
/// memory from the most slowly to the most quickly varying dimension.
pub fn sorted_stride_perm(strides: &[isize]) -> SmallVec<[usize; 4]> {
    let mut perm: SmallVec<[usize; 4]> = (0..strides.len()).collect();
    perm.sort_by(|&a, &b| {
        strides[b]
            .unsigned_abs()
            .cmp(&strides[a].unsigned_abs())
            .then_with(|| a.cmp(&b))
    });
    perm
}

/// Whether every stride is a whole multiple of the element size, i.e. the
/// array can be addressed in element rather than byte units.
pub fn element_strides_ok(strides: &[isize], elsize: usize) -> bool {
    if elsize == 0 {
        return false;
    }
    strides.iter().all(|&s| s % elsize as isize == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_c_order() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(fill_strides(&s, 8, false).as_slice(), &[96, 32, 8]);
    }

    #[test]
    fn test_fill_f_order() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(fill_strides(&s, 8, true).as_slice(), &[8, 16, 48]);
    }

    #[test]
    fn test_fill_skips_zero_extent() {
        // The running size must not collapse to zero for empty shapes.
        let s = Shape::new(&[3, 0, 2]);
        assert_eq!(fill_strides(&s, 4, false).as_slice(), &[8, 8, 4]);
        assert_eq!(fill_strides(&s, 4, true).as_slice(), &[4, 12, 12]);
    }

    #[test]
    fn test_flags_plain_2d() {
        let s = Shape::new(&[2, 3]);
        let st = fill_strides(&s, 8, false);
        let f = compute_flags(&s, &st, 8, 8, 0);
        assert!(f.contains(ArrayFlags::C_CONTIGUOUS));
        assert!(!f.contains(ArrayFlags::F_CONTIGUOUS));

        let st = fill_strides(&s, 8, true);
        let f = compute_flags(&s, &st, 8, 8, 0);
        assert!(!f.contains(ArrayFlags::C_CONTIGUOUS));
        assert!(f.contains(ArrayFlags::F_CONTIGUOUS));
    }

    #[test]
    fn test_flags_degenerate_both() {
        // At most one extent > 1: both orders describe the same layout.
        for dims in [&[1usize, 1, 1][..], &[1, 5, 1][..], &[7][..]] {
            let s = Shape::new(dims);
            let st = fill_strides(&s, 4, false);
            let f = compute_flags(&s, &st, 4, 4, 0);
            assert!(f.contains(ArrayFlags::C_CONTIGUOUS), "dims {dims:?}");
            assert!(f.contains(ArrayFlags::F_CONTIGUOUS), "dims {dims:?}");
        }
    }

    #[test]
    fn test_flags_empty_both() {
        let s = Shape::new(&[2, 0, 3]);
        let st = fill_strides(&s, 4, false);
        let f = compute_flags(&s, &st, 4, 4, 0);
        assert!(f.contains(ArrayFlags::C_CONTIGUOUS));
        assert!(f.contains(ArrayFlags::F_CONTIGUOUS));
    }

    #[test]
    fn test_flags_rank0_both() {
        let s = Shape::scalar();
        let f = compute_flags(&s, &[], 8, 8, 0);
        assert!(f.contains(ArrayFlags::C_CONTIGUOUS));
        assert!(f.contains(ArrayFlags::F_CONTIGUOUS));
    }

    #[test]
    fn test_alignment_check() {
        let s = Shape::new(&[4]);
        let f = compute_flags(&s, &[8], 8, 8, 8);
        assert!(f.contains(ArrayFlags::ALIGNED));
        let f = compute_flags(&s, &[8], 8, 8, 4);
        assert!(!f.contains(ArrayFlags::ALIGNED));
        let f = compute_flags(&s, &[6], 8, 8, 0);
        assert!(!f.contains(ArrayFlags::ALIGNED));
    }

    #[test]
    fn test_sorted_stride_perm() {
        assert_eq!(sorted_stride_perm(&[4, 32, 8]).as_slice(), &[1, 2, 0]);
        // Ties preserve original axis order.
        assert_eq!(sorted_stride_perm(&[8, 8, 8]).as_slice(), &[0, 1, 2]);
        // Magnitude, not sign.
        assert_eq!(sorted_stride_perm(&[-16, 8]).as_slice(), &[0, 1]);
    }

    #[test]
    fn test_element_strides() {
        assert!(element_strides_ok(&[32, 8], 8));
        assert!(!element_strides_ok(&[30, 8], 8));
        assert!(element_strides_ok(&[], 8));
    }
}
