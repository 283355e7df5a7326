//! # manta-core
//!
//! Device-aware N-dimensional strided array engine.
//!
//! Provides the foundational [`Array`] type with:
//! - Host and numbered accelerator memory spaces behind one handle
//! - Runtime dtype descriptors with casting-safety checks
//! - Manual layout control: C/Fortran stride derivation, relaxed
//!   contiguity for degenerate shapes, overflow-safe size computation
//! - Copy-vs-view conversion with predictable ownership semantics
//! - Raw strided copy and byte-swap primitives

pub mod array;
pub mod assign;
pub mod buffer;
pub mod convert;
pub mod device;
pub mod dtype;
pub mod error;
pub mod flags;
pub mod layout;
pub mod prelude;
pub mod shape;
pub mod strided;

pub use array::{register_finalize, Array, FinalizeHook, SubarrayTruncation};
pub use buffer::DeviceBuffer;
pub use convert::{
    check_from_any, copy_into, copy_into_from_host, copy_into_host, ensure_array, from_any,
    from_array, move_into, new_copy, ArraySource, HostScalar,
};
pub use device::{register_accelerator, AccelMemory, Device, SysMemory};
pub use dtype::{ByteOrder, Casting, DType, DTypeKind};
pub use error::MantaError;
pub use flags::{ArrayFlags, ConvertFlags};
pub use layout::MemoryOrder;
pub use shape::{Shape, MAXDIMS};

pub type Result<T> = std::result::Result<T, MantaError>;
