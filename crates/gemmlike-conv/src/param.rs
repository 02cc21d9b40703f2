//! Convolution parameter set consumed by a GEMM-like kernel.

use serde::{Deserialize, Serialize};

use gemmlike_core::{ActivationParam, ConvGeometry, GemmlikeError, Result, Shape, Tensor};

use crate::precision::Precision;

/// Quantization scales of an int8 convolution.
///
/// `weight_scale` holds either one per-tensor value or one value per output
/// channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub input_scale: f32,
    pub output_scale: f32,
    pub weight_scale: Vec<f32>,
}

impl QuantParams {
    pub fn new(input_scale: f32, output_scale: f32, weight_scale: Vec<f32>) -> Self {
        Self { input_scale, output_scale, weight_scale }
    }

    /// Per-tensor weight scale.
    pub fn per_tensor(input_scale: f32, output_scale: f32, weight_scale: f32) -> Self {
        Self::new(input_scale, output_scale, vec![weight_scale])
    }

    /// Scales must be finite and strictly positive.
    pub fn validate(&self) -> Result<()> {
        let bad = |v: f32| !v.is_finite() || v <= 0.0;
        if bad(self.input_scale) {
            return Err(GemmlikeError::InvalidParam(format!(
                "input_scale {} is not a positive number",
                self.input_scale
            )));
        }
        if bad(self.output_scale) {
            return Err(GemmlikeError::InvalidParam(format!(
                "output_scale {} is not a positive number",
                self.output_scale
            )));
        }
        if let Some(w) = self.weight_scale.iter().find(|&&w| bad(w)) {
            return Err(GemmlikeError::InvalidParam(format!("weight scale {w} is not a positive number")));
        }
        Ok(())
    }
}

/// Everything a convolution needs besides its input: geometry, filter,
/// optional bias, fused activation and, for the int8 variants, scales.
///
/// The filter is `[out_c, in_c / groups, kh, kw]` and the bias `[out_c]`.
#[derive(Debug, Clone)]
pub struct ConvParam {
    pub geometry: ConvGeometry,
    pub filter: Tensor,
    pub bias: Option<Tensor>,
    pub activation: ActivationParam,
    pub quant: Option<QuantParams>,
}

impl ConvParam {
    pub fn new(filter: Tensor, geometry: ConvGeometry) -> Self {
        Self {
            geometry,
            filter,
            bias: None,
            activation: ActivationParam::default(),
            quant: None,
        }
    }

    pub fn with_bias(mut self, bias: Tensor) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_activation(mut self, activation: ActivationParam) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_quant(mut self, quant: QuantParams) -> Self {
        self.quant = Some(quant);
        self
    }

    /// `[out_c, in_c / groups, kh, kw]` of the filter.
    pub fn filter_dims(&self) -> Result<[usize; 4]> {
        self.filter.shape().as_nchw()
    }

    pub fn out_channels(&self) -> usize {
        self.filter.shape().dim(0).unwrap_or(0)
    }

    /// Static checks that do not depend on the input shape.
    pub fn validate(&self, precision: Precision) -> Result<()> {
        self.geometry.validate()?;
        let [oc, icg, kh, kw] = self.filter_dims()?;
        let g = &self.geometry;
        if kh != g.kernel_h || kw != g.kernel_w {
            return Err(GemmlikeError::InvalidParam(format!(
                "filter is {kh}x{kw} but geometry says {}x{}",
                g.kernel_h, g.kernel_w
            )));
        }
        if oc == 0 || oc % g.groups != 0 {
            return Err(GemmlikeError::InvalidParam(format!(
                "{oc} output channels cannot be split into {} groups",
                g.groups
            )));
        }
        if icg == 0 {
            return Err(GemmlikeError::InvalidParam("filter has no input channels per group".into()));
        }
        if self.filter.dtype() != precision.input_dtype() {
            return Err(GemmlikeError::DTypeMismatch {
                what: "filter",
                expected: precision.input_dtype(),
                got: self.filter.dtype(),
            });
        }
        if let Some(bias) = &self.bias {
            if bias.numel() != oc {
                return Err(GemmlikeError::ShapeMismatch {
                    expected: vec![oc],
                    got: bias.shape().dims().to_vec(),
                });
            }
            if bias.dtype() != precision.bias_dtype() {
                return Err(GemmlikeError::DTypeMismatch {
                    what: "bias",
                    expected: precision.bias_dtype(),
                    got: bias.dtype(),
                });
            }
        }
        if let Some(q) = &self.quant {
            q.validate()?;
        }
        Ok(())
    }

    /// `input` must be NCHW with the channel count this filter expects.
    pub(crate) fn check_input(&self, input: &Shape) -> Result<()> {
        let [_, ic, _, _] = input.as_nchw()?;
        let [_, icg, _, _] = self.filter_dims()?;
        if ic != icg * self.geometry.groups {
            return Err(GemmlikeError::InvalidParam(format!(
                "input has {ic} channels, filter expects {} ({} groups of {icg})",
                icg * self.geometry.groups,
                self.geometry.groups
            )));
        }
        Ok(())
    }
}

/// NCHW output shape of convolving `input` with `param`.
pub fn conv_output_shape(input: &Shape, param: &ConvParam) -> Result<Shape> {
    let [n, _, ih, iw] = input.as_nchw()?;
    let (oh, ow) = param.geometry.output_hw(ih, iw)?;
    Ok(Shape::nchw(n, param.out_channels(), oh, ow))
}
