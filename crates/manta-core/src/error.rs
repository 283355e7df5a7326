use crate::dtype::DType;

/// Errors produced by array creation and conversion.
///
/// All failures are local and non-retryable: the first failure is surfaced
/// and no partially constructed handle is ever returned. Resources acquired
/// before the failure are released by ownership before the error leaves the
/// function.
#[derive(Debug, thiserror::Error)]
pub enum MantaError {
    #[error("device number must be within [0, {count})")]
    InvalidDevice { count: usize },

    #[error("number of dimensions must be within [0, {max}]")]
    OutOfRange { max: usize },

    #[error("negative dimensions are not allowed")]
    InvalidShape,

    #[error("array is too big; `size * itemsize` is larger than the maximum possible size")]
    SizeOverflow,

    #[error("empty data-type")]
    EmptyDtype,

    #[error("cannot cast array data from {from} to {to} according to the rule '{rule}'")]
    UnsafeCast {
        from: DType,
        to: DType,
        rule: &'static str,
    },

    #[error("out of memory allocating {nbytes} bytes on {device}")]
    OutOfMemory { nbytes: usize, device: String },

    #[error("strided assignment failed: {0}")]
    CopyFailed(String),

    #[error("finalize hook rejected new array: {0}")]
    FinalizeFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_messages() {
        let e = MantaError::InvalidDevice { count: 2 };
        assert!(e.to_string().contains("[0, 2)"));

        let e = MantaError::UnsafeCast {
            from: DType::float64(),
            to: DType::int32(),
            rule: "safe",
        };
        let msg = e.to_string();
        assert!(msg.contains("f8"));
        assert!(msg.contains("i4"));
        assert!(msg.contains("safe"));
    }
}
