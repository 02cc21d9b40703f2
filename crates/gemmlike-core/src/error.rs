use crate::dtype::DType;

/// Errors raised anywhere in the gemmlike stack.
///
/// The configuration variants (`ScaleLengthMismatch`, `HalfPrecisionUnavailable`,
/// `MissingQuantParams`) describe a model or caller that violates the kernel
/// contract. They are never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GemmlikeError {
    #[error("weight scale size must equal filter output channels: got {len} scales for {out_channels} channels")]
    ScaleLengthMismatch { len: usize, out_channels: usize },

    #[error("fp16 convolution requested but half precision support is not enabled (build with feature `fp16`)")]
    HalfPrecisionUnavailable,

    #[error("quantized convolution requires input/output/weight scales")]
    MissingQuantParams,

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("dtype mismatch for {what}: expected {expected}, got {got}")]
    DTypeMismatch {
        what: &'static str,
        expected: DType,
        got: DType,
    },

    #[error("invalid convolution parameter: {0}")]
    InvalidParam(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl GemmlikeError {
    /// Whether this error is a configuration contract violation, i.e. one
    /// that the hard-abort policy terminates on.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GemmlikeError::ScaleLengthMismatch { .. }
                | GemmlikeError::HalfPrecisionUnavailable
                | GemmlikeError::MissingQuantParams
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_mismatch_message_names_both_sides() {
        let e = GemmlikeError::ScaleLengthMismatch { len: 2, out_channels: 3 };
        let msg = e.to_string();
        assert!(msg.contains("2 scales"), "{msg}");
        assert!(msg.contains("3 channels"), "{msg}");
        assert!(e.is_configuration());
    }

    #[test]
    fn test_shape_mismatch_is_not_configuration() {
        let e = GemmlikeError::ShapeMismatch { expected: vec![1, 2], got: vec![2, 1] };
        assert!(!e.is_configuration());
    }
}
