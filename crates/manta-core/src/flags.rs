use bitflags::bitflags;

bitflags! {
    /// State bits of an array handle.
    ///
    /// Contiguity and alignment bits are always recomputed from the final
    /// shape, strides and data pointer by a single pure function at
    /// creation; they are never patched in place across branches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArrayFlags: u32 {
        /// Row-major contiguous layout.
        const C_CONTIGUOUS = 1 << 0;
        /// Column-major contiguous layout.
        const F_CONTIGUOUS = 1 << 1;
        /// The buffer was allocated for this handle and is released with it.
        const OWNDATA = 1 << 2;
        /// Data pointer and strides satisfy the dtype's alignment.
        const ALIGNED = 1 << 3;
        /// The buffer may be written through this handle.
        const WRITEABLE = 1 << 4;
        /// A copy was made with write-back requested; the base array is to
        /// receive the data when the copy is resolved.
        const WRITEBACK = 1 << 5;

        /// Well-behaved: aligned and writeable.
        const BEHAVED = Self::ALIGNED.bits() | Self::WRITEABLE.bits();
        /// Fresh-allocation default: C-contiguous and well-behaved.
        const DEFAULT = Self::C_CONTIGUOUS.bits() | Self::BEHAVED.bits();
    }
}

bitflags! {
    /// Properties requested from a conversion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConvertFlags: u32 {
        /// Result must be C-contiguous.
        const C_CONTIGUOUS = 1 << 0;
        /// Result must be Fortran-contiguous.
        const F_CONTIGUOUS = 1 << 1;
        /// Result must be aligned.
        const ALIGNED = 1 << 2;
        /// Result must be writeable.
        const WRITEABLE = 1 << 3;
        /// Downgrade the casting rule to unsafe.
        const FORCECAST = 1 << 4;
        /// Always produce a fresh copy.
        const ENSURECOPY = 1 << 5;
        /// Result must be a plain base-type array, not a registered
        /// variant.
        const ENSUREARRAY = 1 << 6;
        /// Result strides must be whole multiples of the element size.
        const ELEMENTSTRIDES = 1 << 7;
        /// Normalize the element byte order to native before converting.
        const NOTSWAPPED = 1 << 8;
        /// Record the source for write-back when a copy is made.
        const UPDATEIFCOPY = 1 << 9;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composites() {
        assert!(ArrayFlags::DEFAULT.contains(ArrayFlags::C_CONTIGUOUS));
        assert!(ArrayFlags::DEFAULT.contains(ArrayFlags::ALIGNED));
        assert!(ArrayFlags::DEFAULT.contains(ArrayFlags::WRITEABLE));
        assert!(!ArrayFlags::DEFAULT.contains(ArrayFlags::OWNDATA));
    }

    #[test]
    fn test_convert_flags_independent() {
        let f = ConvertFlags::C_CONTIGUOUS | ConvertFlags::FORCECAST;
        assert!(f.contains(ConvertFlags::FORCECAST));
        assert!(!f.contains(ConvertFlags::ENSURECOPY));
    }
}
