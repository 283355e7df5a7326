//! Convenient re-exports for typical use.

pub use crate::array::Array;
pub use crate::convert::{check_from_any, copy_into, from_any, from_array, move_into};
pub use crate::device::Device;
pub use crate::dtype::{Casting, DType, DTypeKind};
pub use crate::error::MantaError;
pub use crate::flags::{ArrayFlags, ConvertFlags};
pub use crate::layout::MemoryOrder;
pub use crate::shape::Shape;
pub use crate::Result;
