use std::fmt;

use smallvec::SmallVec;

/// Element-type category of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DTypeKind {
    /// Boolean, one byte.
    Bool,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    UInt,
    /// IEEE floating point.
    Float,
    /// Complex floating point (two floats per element).
    Complex,
    /// Fixed-width byte string (flexible: width chosen per descriptor).
    Bytes,
    /// Fixed-width UCS-4 text (flexible: width chosen per descriptor).
    Text,
    /// Composite record of sub-fields, opaque to this crate.
    Composite,
}

/// Byte order of a descriptor's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Platform-native order.
    #[default]
    Native,
    Little,
    Big,
    /// Order is meaningless for this type (single-byte or opaque).
    Ignore,
}

/// Casting-safety rule used when converting between element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Casting {
    /// Only value-preserving casts.
    Safe,
    /// Safe casts plus casts within the same kind (e.g. f8 → f4).
    SameKind,
    /// Any cast.
    Unsafe,
}

impl Casting {
    pub fn as_str(&self) -> &'static str {
        match self {
            Casting::Safe => "safe",
            Casting::SameKind => "same_kind",
            Casting::Unsafe => "unsafe",
        }
    }
}

/// A descriptor that is itself a fixed-shape array of a base descriptor.
///
/// Flattened into trailing dimensions of the outer array at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subarray {
    pub base: DType,
    pub shape: SmallVec<[usize; 4]>,
}

/// Array element descriptor: item size, kind, byte order, and an optional
/// sub-array structure.
///
/// Descriptors are plain owned values. Functions documented as *consuming*
/// a descriptor take it by value; the caller cannot use it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DType {
    kind: DTypeKind,
    elsize: usize,
    byteorder: ByteOrder,
    subarray: Option<Box<Subarray>>,
}

impl DType {
    pub fn new(kind: DTypeKind, elsize: usize) -> Self {
        let byteorder = match kind {
            DTypeKind::Bool | DTypeKind::Bytes | DTypeKind::Composite => ByteOrder::Ignore,
            // Text is multi-byte per character even when the width is
            // still unresolved.
            DTypeKind::Text => ByteOrder::Native,
            _ if elsize <= 1 => ByteOrder::Ignore,
            _ => ByteOrder::Native,
        };
        Self {
            kind,
            elsize,
            byteorder,
            subarray: None,
        }
    }

    pub fn bool_() -> Self {
        Self::new(DTypeKind::Bool, 1)
    }

    pub fn int8() -> Self {
        Self::new(DTypeKind::Int, 1)
    }

    pub fn int16() -> Self {
        Self::new(DTypeKind::Int, 2)
    }

    pub fn int32() -> Self {
        Self::new(DTypeKind::Int, 4)
    }

    pub fn int64() -> Self {
        Self::new(DTypeKind::Int, 8)
    }

    pub fn uint8() -> Self {
        Self::new(DTypeKind::UInt, 1)
    }

    pub fn uint16() -> Self {
        Self::new(DTypeKind::UInt, 2)
    }

    pub fn uint32() -> Self {
        Self::new(DTypeKind::UInt, 4)
    }

    pub fn uint64() -> Self {
        Self::new(DTypeKind::UInt, 8)
    }

    pub fn float32() -> Self {
        Self::new(DTypeKind::Float, 4)
    }

    pub fn float64() -> Self {
        Self::new(DTypeKind::Float, 8)
    }

    pub fn complex64() -> Self {
        Self::new(DTypeKind::Complex, 8)
    }

    pub fn complex128() -> Self {
        Self::new(DTypeKind::Complex, 16)
    }

    /// Byte string of `width` bytes per element. Width 0 is a flexible
    /// descriptor whose concrete width is assigned at array creation.
    pub fn bytes(width: usize) -> Self {
        Self::new(DTypeKind::Bytes, width)
    }

    /// UCS-4 text of `chars` characters per element (4 bytes each).
    pub fn text(chars: usize) -> Self {
        Self::new(DTypeKind::Text, chars * 4)
    }

    /// Opaque composite record of `elsize` bytes.
    pub fn composite(elsize: usize) -> Self {
        Self::new(DTypeKind::Composite, elsize)
    }

    /// A descriptor describing a fixed-shape array of `base` elements.
    pub fn subarray_of(base: DType, shape: &[usize]) -> Self {
        let count: usize = shape.iter().product();
        let elsize = base
            .elsize
            .checked_mul(count)
            .expect("sub-array element size overflows");
        Self {
            kind: base.kind,
            elsize,
            byteorder: base.byteorder,
            subarray: Some(Box::new(Subarray {
                base,
                shape: SmallVec::from_slice(shape),
            })),
        }
    }

    pub fn kind(&self) -> DTypeKind {
        self.kind
    }

    /// Element size in bytes. Zero only for flexible kinds.
    pub fn elsize(&self) -> usize {
        self.elsize
    }

    pub fn byteorder(&self) -> ByteOrder {
        self.byteorder
    }

    pub fn subarray(&self) -> Option<&Subarray> {
        self.subarray.as_ref().map(|s| s.as_ref())
    }

    /// Consume this descriptor, returning it with a concrete element size.
    pub fn with_elsize(mut self, elsize: usize) -> Self {
        self.elsize = elsize;
        self
    }

    pub fn with_byteorder(mut self, byteorder: ByteOrder) -> Self {
        self.byteorder = byteorder;
        self
    }

    /// Whether the element width is chosen per descriptor rather than fixed
    /// by the kind.
    pub fn is_flexible(&self) -> bool {
        matches!(self.kind, DTypeKind::Bytes | DTypeKind::Text)
    }

    /// Whether freshly allocated storage of this type must be zero-filled
    /// before it is observable (composite records may carry slots that are
    /// unsafe to expose uninitialized).
    pub fn needs_init(&self) -> bool {
        matches!(self.kind, DTypeKind::Composite)
            || self
                .subarray
                .as_ref()
                .is_some_and(|s| s.base.needs_init())
    }

    /// Required element alignment in bytes.
    pub fn alignment(&self) -> usize {
        match self.kind {
            DTypeKind::Bool | DTypeKind::Bytes | DTypeKind::Text | DTypeKind::Composite => 1,
            DTypeKind::Complex => (self.elsize / 2).max(1),
            _ => {
                if self.elsize.is_power_of_two() {
                    self.elsize
                } else {
                    1
                }
            }
        }
    }

    /// Whether elements are stored in the platform's byte order.
    pub fn is_native_order(&self) -> bool {
        match self.byteorder {
            ByteOrder::Native | ByteOrder::Ignore => true,
            ByteOrder::Little => cfg!(target_endian = "little"),
            ByteOrder::Big => cfg!(target_endian = "big"),
        }
    }

    /// Consume this descriptor, returning the native-order equivalent.
    /// `Ignore` descriptors are returned unchanged.
    pub fn to_native_order(mut self) -> Self {
        if self.byteorder != ByteOrder::Ignore {
            self.byteorder = ByteOrder::Native;
        }
        self
    }

    /// Bit-for-bit equivalence: same kind, same width, same effective byte
    /// order. Equivalent types can share raw buffer bytes without
    /// conversion.
    pub fn equiv(&self, other: &DType) -> bool {
        self.kind == other.kind
            && self.elsize == other.elsize
            && self.is_native_order() == other.is_native_order()
    }

    /// Casting-safety verdict for converting elements of `self` into
    /// elements of `to` under the given rule.
    pub fn can_cast_to(&self, to: &DType, casting: Casting) -> bool {
        if casting == Casting::Unsafe {
            return true;
        }
        if self.can_cast_safely(to) {
            return true;
        }
        casting == Casting::SameKind && self.kind == to.kind
    }

    fn can_cast_safely(&self, to: &DType) -> bool {
        use DTypeKind::*;
        match (self.kind, to.kind) {
            // Identity-kind widening.
            (Bool, Bool) => true,
            (Int, Int) | (UInt, UInt) | (Float, Float) | (Complex, Complex) => {
                to.elsize >= self.elsize
            }
            // Bool promotes to any numeric type.
            (Bool, Int) | (Bool, UInt) | (Bool, Float) | (Bool, Complex) => true,
            // Unsigned fits in a strictly wider signed integer.
            (UInt, Int) => to.elsize > self.elsize,
            // Integers fit in a float of at least their width.
            (Int, Float) | (UInt, Float) => to.elsize >= self.elsize,
            // Real parts must not narrow when promoting to complex.
            (Float, Complex) => to.elsize >= self.elsize * 2,
            (Int, Complex) | (UInt, Complex) => to.elsize >= self.elsize * 2,
            // Flexible kinds widen within their own kind; byte strings also
            // promote to text of sufficient width.
            (Bytes, Bytes) | (Text, Text) => to.elsize >= self.elsize,
            (Bytes, Text) => to.elsize >= self.elsize * 4,
            // Composite types only match themselves bit-for-bit.
            (Composite, Composite) => self.equiv(to),
            _ => false,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.byteorder {
            ByteOrder::Little => write!(f, "<")?,
            ByteOrder::Big => write!(f, ">")?,
            ByteOrder::Native | ByteOrder::Ignore => {}
        }
        match self.kind {
            DTypeKind::Bool => write!(f, "b{}", self.elsize),
            DTypeKind::Int => write!(f, "i{}", self.elsize),
            DTypeKind::UInt => write!(f, "u{}", self.elsize),
            DTypeKind::Float => write!(f, "f{}", self.elsize),
            DTypeKind::Complex => write!(f, "c{}", self.elsize),
            DTypeKind::Bytes => write!(f, "S{}", self.elsize),
            DTypeKind::Text => write!(f, "U{}", self.elsize / 4),
            DTypeKind::Composite => write!(f, "V{}", self.elsize),
        }
    }
}
