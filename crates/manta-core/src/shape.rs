use std::fmt;

use smallvec::SmallVec;

use crate::error::MantaError;
use crate::Result;

/// Maximum number of dimensions an array may have.
pub const MAXDIMS: usize = 32;

/// Array shape with stack-allocated storage for ≤4 dimensions.
///
/// Most arrays are 1D-4D, so the common case avoids heap allocation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Scalar shape (0 dimensions).
    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A scalar has one element; any zero extent
    /// makes this zero.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Whether any extent is zero.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Attempt to broadcast this shape with another.
    /// Returns the broadcast shape or None if incompatible.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let max_ndim = self.ndim().max(other.ndim());
        let mut result = SmallVec::with_capacity(max_ndim);

        for i in 0..max_ndim {
            let a = if i < self.ndim() {
                self.dims[self.ndim() - 1 - i]
            } else {
                1
            };
            let b = if i < other.ndim() {
                other.dims[other.ndim() - 1 - i]
            } else {
                1
            };

            if a == b {
                result.push(a);
            } else if a == 1 {
                result.push(b);
            } else if b == 1 {
                result.push(a);
            } else {
                return None;
            }
        }

        result.reverse();
        Some(Shape { dims: result })
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

/// Outcome of dimension validation: the accepted shape, the total byte
/// size of one full buffer, and whether the array is empty.
pub struct ValidatedDims {
    pub shape: Shape,
    pub nbytes: usize,
    pub is_empty: bool,
}

/// Check a candidate rank and shape, accumulating the total byte size with
/// overflow detection.
///
/// A negative extent is rejected; a zero extent marks the array empty but
/// does not short-circuit the remaining per-dimension checks. The byte size
/// is accumulated incrementally so overflow is caught before any
/// allocation, and is capped at `isize::MAX` like every Rust allocation.
pub fn validate_dims(dims: &[isize], elsize: usize) -> Result<ValidatedDims> {
    if dims.len() > MAXDIMS {
        return Err(MantaError::OutOfRange { max: MAXDIMS });
    }

    let mut nbytes = elsize;
    let mut is_empty = false;
    let mut shape: SmallVec<[usize; 4]> = SmallVec::with_capacity(dims.len());

    for &dim in dims {
        if dim == 0 {
            is_empty = true;
            shape.push(0);
            continue;
        }
        if dim < 0 {
            return Err(MantaError::InvalidShape);
        }
        nbytes = nbytes
            .checked_mul(dim as usize)
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or(MantaError::SizeOverflow)?;
        shape.push(dim as usize);
    }

    Ok(ValidatedDims {
        shape: Shape { dims: shape },
        nbytes,
        is_empty,
    })
}
