//! Quantization scale fusion.
//!
//! An int8 GEMM accumulates `sum(x_q * w_q)` in i32. Dequantizing that into
//! the output domain takes one multiplier per output channel:
//!
//! - i8 → f32: `w_scale[o] * input_scale`
//! - i8 → i8:  `w_scale[o] * input_scale / output_scale`
//!
//! For i8 output the epilogue runs in units of `output_scale`, so the bias and
//! any threshold-like activation parameters are divided by it as well.

use gemmlike_core::{ActivationParam, GemmlikeError, Result, Tensor};

use crate::param::{ConvParam, QuantParams};
use crate::precision::Precision;

/// Expand a weight scale vector to one entry per output channel.
///
/// A single value is replicated; a vector of length `out_channels` is
/// copied. Any other length is a configuration error.
pub fn broadcast_weight_scale(weight_scale: &[f32], out_channels: usize) -> Result<Vec<f32>> {
    match weight_scale.len() {
        1 => Ok(vec![weight_scale[0]; out_channels]),
        n if n == out_channels => Ok(weight_scale.to_vec()),
        n => Err(GemmlikeError::ScaleLengthMismatch { len: n, out_channels }),
    }
}

/// Per-channel multipliers for i8 input, f32 output.
pub fn fuse_int8_to_float(quant: &QuantParams, out_channels: usize) -> Result<Vec<f32>> {
    let mut scales = broadcast_weight_scale(&quant.weight_scale, out_channels)?;
    for s in &mut scales {
        *s *= quant.input_scale;
    }
    Ok(scales)
}

/// Per-channel multipliers for i8 input, i8 output.
pub fn fuse_int8_to_int8(quant: &QuantParams, out_channels: usize) -> Result<Vec<f32>> {
    let mut scales = broadcast_weight_scale(&quant.weight_scale, out_channels)?;
    for s in &mut scales {
        *s = *s * quant.input_scale / quant.output_scale;
    }
    Ok(scales)
}

/// `bias[i] / output_scale`, same shape as `bias`.
pub fn rescale_bias(bias: &Tensor, output_scale: f32) -> Result<Tensor> {
    let values = bias.as_f32_slice().ok_or(GemmlikeError::DTypeMismatch {
        what: "bias",
        expected: gemmlike_core::DType::F32,
        got: bias.dtype(),
    })?;
    let scaled: Vec<f32> = values.iter().map(|&b| b / output_scale).collect();
    Ok(Tensor::from_f32(&scaled, bias.shape().dims()))
}

/// Everything the epilogue needs after fusion.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FusedQuant {
    /// One multiplier per output channel; empty for float precisions.
    pub scales: Vec<f32>,
    /// Replacement bias for i8 output.
    pub bias: Option<Tensor>,
    /// Activation in the output domain.
    pub activation: ActivationParam,
}

/// Fuse the quantization parameters of `param` for `precision`.
///
/// Pure. A kernel computes this once and keeps it; applying it to an
/// already-rescaled param would divide twice.
pub fn fuse(precision: Precision, param: &ConvParam) -> Result<FusedQuant> {
    let oc = param.out_channels();
    match precision {
        Precision::FullPrecision | Precision::HalfPrecision => Ok(FusedQuant {
            activation: param.activation,
            ..FusedQuant::default()
        }),
        Precision::Int8ToFloat => {
            let quant = param.quant.as_ref().ok_or(GemmlikeError::MissingQuantParams)?;
            Ok(FusedQuant {
                scales: fuse_int8_to_float(quant, oc)?,
                bias: None,
                activation: param.activation,
            })
        }
        Precision::Int8ToInt8 => {
            let quant = param.quant.as_ref().ok_or(GemmlikeError::MissingQuantParams)?;
            let scales = fuse_int8_to_int8(quant, oc)?;
            let bias = param
                .bias
                .as_ref()
                .map(|b| rescale_bias(b, quant.output_scale))
                .transpose()?;
            Ok(FusedQuant {
                scales,
                bias,
                activation: param.activation.rescaled(quant.output_scale),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemmlike_core::{ActivationKind, ConvGeometry, DType};
    use proptest::prelude::*;

    fn int8_param(oc: usize, quant: QuantParams) -> ConvParam {
        ConvParam::new(Tensor::zeros(&[oc, 1, 1, 1], DType::I8), ConvGeometry::default()).with_quant(quant)
    }

    #[test]
    fn test_broadcast() {
        assert_eq!(broadcast_weight_scale(&[2.0], 3).unwrap(), vec![2.0; 3]);
        assert_eq!(broadcast_weight_scale(&[1.0, 2.0, 3.0], 3).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(broadcast_weight_scale(&[5.0], 1).unwrap(), vec![5.0]);
    }

    #[test]
    fn test_broadcast_rejects_wrong_length() {
        assert_eq!(
            broadcast_weight_scale(&[1.0, 2.0], 3),
            Err(GemmlikeError::ScaleLengthMismatch { len: 2, out_channels: 3 })
        );
        assert!(broadcast_weight_scale(&[], 3).is_err());
    }

    #[test]
    fn test_int8_to_float() {
        let q = QuantParams::per_tensor(0.5, 4.0, 2.0);
        assert_eq!(fuse_int8_to_float(&q, 3).unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn test_int8_to_int8() {
        let q = QuantParams::per_tensor(0.5, 4.0, 2.0);
        assert_eq!(fuse_int8_to_int8(&q, 3).unwrap(), vec![0.25; 3]);
    }

    #[test]
    fn test_int8_to_int8_bias_and_activation() {
        let param = int8_param(3, QuantParams::per_tensor(0.5, 4.0, 2.0))
            .with_bias(Tensor::from_f32(&[8.0, 12.0, 16.0], &[3]))
            .with_activation(ActivationParam::relu6());
        let fused = fuse(Precision::Int8ToInt8, &param).unwrap();
        assert_eq!(fused.scales, vec![0.25; 3]);
        assert_eq!(fused.bias.unwrap().as_f32_slice().unwrap(), &[2.0, 3.0, 4.0]);
        assert_eq!(fused.activation.kind, ActivationKind::Relu6 { clip: 1.5 });
        // the caller's parameters are left alone
        assert_eq!(param.activation, ActivationParam::relu6());
        assert_eq!(param.bias.unwrap().as_f32_slice().unwrap(), &[8.0, 12.0, 16.0]);
    }

    #[test]
    fn test_int8_to_int8_hard_swish() {
        let param = int8_param(2, QuantParams::per_tensor(1.0, 2.0, 1.0))
            .with_activation(ActivationParam::hard_swish());
        let fused = fuse(Precision::Int8ToInt8, &param).unwrap();
        assert_eq!(
            fused.activation.kind,
            ActivationKind::HardSwish { scale: 3.0, offset: 1.5, threshold: 3.0 }
        );
        assert!(fused.bias.is_none());
    }

    #[test]
    fn test_int8_to_float_leaves_bias_and_activation() {
        let param = int8_param(2, QuantParams::per_tensor(0.5, 4.0, 2.0))
            .with_bias(Tensor::from_f32(&[1.0, 2.0], &[2]))
            .with_activation(ActivationParam::relu6());
        let fused = fuse(Precision::Int8ToFloat, &param).unwrap();
        assert!(fused.bias.is_none());
        assert_eq!(fused.activation, ActivationParam::relu6());
    }

    #[test]
    fn test_float_precisions_do_not_fuse() {
        let param = ConvParam::new(Tensor::zeros(&[4, 1, 1, 1], DType::F32), ConvGeometry::default())
            .with_activation(ActivationParam::relu6());
        let fused = fuse(Precision::FullPrecision, &param).unwrap();
        assert!(fused.scales.is_empty());
        assert_eq!(fused.activation, ActivationParam::relu6());
    }

    #[test]
    fn test_missing_quant() {
        let param = ConvParam::new(Tensor::zeros(&[4, 1, 1, 1], DType::I8), ConvGeometry::default());
        assert_eq!(fuse(Precision::Int8ToFloat, &param), Err(GemmlikeError::MissingQuantParams));
    }

    proptest! {
        #[test]
        fn prop_fused_len_is_out_channels(
            oc in 1usize..64,
            per_channel in any::<bool>(),
            ws in 0.01f32..10.0,
            in_s in 0.01f32..10.0,
            out_s in 0.01f32..10.0,
        ) {
            let weight_scale = if per_channel {
                (0..oc).map(|i| ws + i as f32 * 0.01).collect()
            } else {
                vec![ws]
            };
            let q = QuantParams::new(in_s, out_s, weight_scale.clone());
            let to_f = fuse_int8_to_float(&q, oc).unwrap();
            let to_i = fuse_int8_to_int8(&q, oc).unwrap();
            prop_assert_eq!(to_f.len(), oc);
            prop_assert_eq!(to_i.len(), oc);
            for i in 0..oc {
                let w = if per_channel { weight_scale[i] } else { ws };
                prop_assert!((to_f[i] - w * in_s).abs() <= 1e-5 * (w * in_s).abs().max(1.0));
                let expected = w * in_s / out_s;
                prop_assert!((to_i[i] - expected).abs() <= 1e-5 * expected.abs().max(1.0));
            }
        }

        #[test]
        fn prop_wrong_length_rejected(oc in 2usize..32, len in 2usize..32) {
            prop_assume!(len != oc);
            let r = broadcast_weight_scale(&vec![1.0; len], oc);
            prop_assert_eq!(r, Err(GemmlikeError::ScaleLengthMismatch { len, out_channels: oc }));
        }
    }
}
