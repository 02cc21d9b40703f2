//! Convolution geometry and fused activation descriptors.

use serde::{Deserialize, Serialize};

use crate::error::GemmlikeError;
use crate::Result;

/// Spatial configuration of a 2-D convolution.
///
/// Paddings follow the `[top, bottom, left, right]` convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub groups: usize,
}

impl Default for ConvGeometry {
    fn default() -> Self {
        Self::square(1, 1, 0)
    }
}

impl ConvGeometry {
    /// Square kernel with uniform stride and padding, no dilation, one group.
    pub fn square(kernel: usize, stride: usize, pad: usize) -> Self {
        Self {
            kernel_h: kernel,
            kernel_w: kernel,
            stride_h: stride,
            stride_w: stride,
            pad_top: pad,
            pad_bottom: pad,
            pad_left: pad,
            pad_right: pad,
            dilation_h: 1,
            dilation_w: 1,
            groups: 1,
        }
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_dilation(mut self, dh: usize, dw: usize) -> Self {
        self.dilation_h = dh;
        self.dilation_w = dw;
        self
    }

    pub fn with_stride(mut self, sh: usize, sw: usize) -> Self {
        self.stride_h = sh;
        self.stride_w = sw;
        self
    }

    pub fn with_padding(mut self, top: usize, bottom: usize, left: usize, right: usize) -> Self {
        self.pad_top = top;
        self.pad_bottom = bottom;
        self.pad_left = left;
        self.pad_right = right;
        self
    }

    /// Kernel extent once dilation is applied: `(k - 1) * d + 1`.
    pub fn effective_kernel(&self) -> (usize, usize) {
        (
            (self.kernel_h - 1) * self.dilation_h + 1,
            (self.kernel_w - 1) * self.dilation_w + 1,
        )
    }

    /// Output spatial extent for an `ih × iw` input.
    pub fn output_hw(&self, ih: usize, iw: usize) -> Result<(usize, usize)> {
        let (ekh, ekw) = self.effective_kernel();
        let padded_h = ih + self.pad_top + self.pad_bottom;
        let padded_w = iw + self.pad_left + self.pad_right;
        if padded_h < ekh || padded_w < ekw {
            return Err(GemmlikeError::ShapeMismatch {
                expected: vec![ekh, ekw],
                got: vec![padded_h, padded_w],
            });
        }
        Ok((
            (padded_h - ekh) / self.stride_h + 1,
            (padded_w - ekw) / self.stride_w + 1,
        ))
    }

    /// Reject zero-sized kernels, strides, dilations and groups.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("kernel_h", self.kernel_h),
            ("kernel_w", self.kernel_w),
            ("stride_h", self.stride_h),
            ("stride_w", self.stride_w),
            ("dilation_h", self.dilation_h),
            ("dilation_w", self.dilation_w),
            ("groups", self.groups),
        ];
        for (name, v) in fields {
            if v == 0 {
                return Err(GemmlikeError::InvalidParam(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Activation fused into the GEMM epilogue.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationKind {
    #[default]
    None,
    Relu,
    /// `min(max(0, x), clip)`
    Relu6 { clip: f32 },
    LeakyRelu { alpha: f32 },
    /// `x * min(max(0, x + offset), threshold) / scale`
    HardSwish { scale: f32, offset: f32, threshold: f32 },
}

/// Activation descriptor carried by a convolution parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivationParam {
    pub kind: ActivationKind,
}

impl ActivationParam {
    pub fn new(kind: ActivationKind) -> Self {
        Self { kind }
    }

    pub fn relu6() -> Self {
        Self::new(ActivationKind::Relu6 { clip: 6.0 })
    }

    pub fn hard_swish() -> Self {
        Self::new(ActivationKind::HardSwish { scale: 6.0, offset: 3.0, threshold: 6.0 })
    }

    /// Apply to one value.
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match self.kind {
            ActivationKind::None => x,
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::Relu6 { clip } => x.max(0.0).min(clip),
            ActivationKind::LeakyRelu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    x * alpha
                }
            }
            ActivationKind::HardSwish { scale, offset, threshold } => {
                x * (x + offset).max(0.0).min(threshold) / scale
            }
        }
    }

    /// The same activation expressed in a domain whose unit is `scale`.
    ///
    /// Only threshold-like parameters move; ReLU and LeakyReLU are
    /// scale-invariant.
    pub fn rescaled(&self, scale: f32) -> Self {
        let kind = match self.kind {
            ActivationKind::Relu6 { clip } => ActivationKind::Relu6 { clip: clip / scale },
            ActivationKind::HardSwish { scale: s, offset, threshold } => ActivationKind::HardSwish {
                scale: s / scale,
                offset: offset / scale,
                threshold: threshold / scale,
            },
            other => other,
        };
        Self { kind }
    }
}
