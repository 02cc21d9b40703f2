//! Convolution drivers: 1×1 stride-1 direct GEMM and im2col + GEMM.
//!
//! Every entry point walks `batch × groups` and issues one GEMM per pair:
//! `m = out_c / groups` output channels, `k = in_c / groups * kh * kw`,
//! `n = oh * ow` output pixels. The 1×1 driver multiplies the group's input
//! channels directly; the im2col driver first unrolls them into the
//! context workspace, which must already hold `k * n` elements.

#[cfg(feature = "fp16")]
use half::f16;

use gemmlike_core::{ActivationParam, ConvGeometry, GemmlikeError, Result, Shape};

use crate::context::{ExecContext, Parallelism};
use crate::element::GemmElement;
use crate::gemm::{self, GemmWeights, Int8Output};
use crate::im2col::im2col;

/// NCHW extents of one convolution launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvDims {
    pub batch: usize,
    pub in_c: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_c: usize,
    pub out_h: usize,
    pub out_w: usize,
}

impl ConvDims {
    pub fn from_shapes(input: &Shape, output: &Shape) -> Result<Self> {
        let [batch, in_c, in_h, in_w] = input.as_nchw()?;
        let [ob, out_c, out_h, out_w] = output.as_nchw()?;
        if ob != batch {
            return Err(GemmlikeError::ShapeMismatch {
                expected: vec![batch, out_c, out_h, out_w],
                got: output.dims().to_vec(),
            });
        }
        Ok(Self { batch, in_c, in_h, in_w, out_c, out_h, out_w })
    }

    /// GEMM `(m, n, k)` for one group.
    pub fn gemm_mnk(&self, geom: &ConvGeometry) -> (usize, usize, usize) {
        let m = self.out_c / geom.groups;
        let n = self.out_h * self.out_w;
        let k = self.in_c / geom.groups * geom.kernel_h * geom.kernel_w;
        (m, n, k)
    }
}

/// Walk batches and groups, handing each GEMM its operands.
fn for_each_group_1x1<T, O, G>(
    input: &[T],
    output: &mut [O],
    dims: &ConvDims,
    geom: &ConvGeometry,
    weights: GemmWeights<'_, T>,
    mut gemm: G,
) where
    T: GemmElement,
    G: FnMut(GemmWeights<'_, T>, &[T], &mut [O], usize),
{
    let (m, n, k) = dims.gemm_mnk(geom);
    let in_plane = dims.in_h * dims.in_w;
    let icg = dims.in_c / geom.groups;
    for b in 0..dims.batch {
        for g in 0..geom.groups {
            let src_off = (b * dims.in_c + g * icg) * in_plane;
            let dst_off = (b * dims.out_c + g * m) * n;
            gemm(
                weights.group(g, m, k),
                &input[src_off..src_off + icg * in_plane],
                &mut output[dst_off..dst_off + m * n],
                g * m,
            );
        }
    }
}

fn for_each_group_im2col<T, O, G>(
    input: &[T],
    output: &mut [O],
    dims: &ConvDims,
    geom: &ConvGeometry,
    weights: GemmWeights<'_, T>,
    ctx: &mut ExecContext,
    mut gemm: G,
) -> Result<()>
where
    T: GemmElement,
    G: FnMut(GemmWeights<'_, T>, &[T], &mut [O], usize, Parallelism<'_>),
{
    let (m, n, k) = dims.gemm_mnk(geom);
    let in_plane = dims.in_h * dims.in_w;
    let icg = dims.in_c / geom.groups;
    let (col, par) = ctx.split::<T>(k * n)?;
    for b in 0..dims.batch {
        for g in 0..geom.groups {
            let src_off = (b * dims.in_c + g * icg) * in_plane;
            im2col(
                &input[src_off..src_off + icg * in_plane],
                icg,
                dims.in_h,
                dims.in_w,
                geom,
                dims.out_h,
                dims.out_w,
                col,
            );
            let dst_off = (b * dims.out_c + g * m) * n;
            gemm(weights.group(g, m, k), &*col, &mut output[dst_off..dst_off + m * n], g * m, par);
        }
    }
    Ok(())
}

fn group_slice<T>(v: Option<&[T]>, offset: usize, m: usize) -> Option<&[T]> {
    v.map(|v| &v[offset..offset + m])
}

/// 1×1, stride 1, no padding, f32.
#[allow(clippy::too_many_arguments)]
pub fn conv1x1s1_gemm_f32(
    input: &[f32],
    output: &mut [f32],
    dims: &ConvDims,
    weights: GemmWeights<'_, f32>,
    bias: Option<&[f32]>,
    geom: &ConvGeometry,
    act: &ActivationParam,
    ctx: &ExecContext,
) {
    let (m, n, k) = dims.gemm_mnk(geom);
    let par = ctx.parallelism();
    for_each_group_1x1(input, output, dims, geom, weights, |a, b, c, off| {
        gemm::sgemm(a, b, c, m, n, k, group_slice(bias, off, m), act, par);
    });
}

/// im2col + GEMM, f32.
#[allow(clippy::too_many_arguments)]
pub fn conv_im2col_gemm_f32(
    input: &[f32],
    output: &mut [f32],
    dims: &ConvDims,
    weights: GemmWeights<'_, f32>,
    bias: Option<&[f32]>,
    geom: &ConvGeometry,
    act: &ActivationParam,
    ctx: &mut ExecContext,
) -> Result<()> {
    let (m, n, k) = dims.gemm_mnk(geom);
    for_each_group_im2col(input, output, dims, geom, weights, ctx, |a, b, c, off, par| {
        gemm::sgemm(a, b, c, m, n, k, group_slice(bias, off, m), act, par);
    })
}

/// 1×1, stride 1, no padding, int8 input with f32 or i8 output.
#[allow(clippy::too_many_arguments)]
pub fn conv1x1s1_gemm_int8<O: Int8Output>(
    input: &[i8],
    output: &mut [O],
    dims: &ConvDims,
    weights: GemmWeights<'_, i8>,
    bias: Option<&[f32]>,
    geom: &ConvGeometry,
    act: &ActivationParam,
    ctx: &ExecContext,
    scale: &[f32],
) {
    let (m, n, k) = dims.gemm_mnk(geom);
    let par = ctx.parallelism();
    for_each_group_1x1(input, output, dims, geom, weights, |a, b, c, off| {
        gemm::gemm_int8(a, b, c, m, n, k, &scale[off..off + m], group_slice(bias, off, m), act, par);
    });
}

/// im2col + GEMM, int8 input with f32 or i8 output.
#[allow(clippy::too_many_arguments)]
pub fn conv_im2col_gemm_int8<O: Int8Output>(
    input: &[i8],
    output: &mut [O],
    dims: &ConvDims,
    weights: GemmWeights<'_, i8>,
    bias: Option<&[f32]>,
    geom: &ConvGeometry,
    act: &ActivationParam,
    ctx: &mut ExecContext,
    scale: &[f32],
) -> Result<()> {
    let (m, n, k) = dims.gemm_mnk(geom);
    for_each_group_im2col(input, output, dims, geom, weights, ctx, |a, b, c, off, par| {
        gemm::gemm_int8(a, b, c, m, n, k, &scale[off..off + m], group_slice(bias, off, m), act, par);
    })
}

/// 1×1, stride 1, no padding, f16.
#[cfg(feature = "fp16")]
#[allow(clippy::too_many_arguments)]
pub fn conv1x1s1_gemm_fp16(
    input: &[f16],
    output: &mut [f16],
    dims: &ConvDims,
    weights: GemmWeights<'_, f16>,
    bias: Option<&[f16]>,
    geom: &ConvGeometry,
    act: &ActivationParam,
    ctx: &ExecContext,
) {
    let (m, n, k) = dims.gemm_mnk(geom);
    let par = ctx.parallelism();
    for_each_group_1x1(input, output, dims, geom, weights, |a, b, c, off| {
        gemm::hgemm(a, b, c, m, n, k, group_slice(bias, off, m), act, par);
    });
}

/// im2col + GEMM, f16.
#[cfg(feature = "fp16")]
#[allow(clippy::too_many_arguments)]
pub fn conv_im2col_gemm_fp16(
    input: &[f16],
    output: &mut [f16],
    dims: &ConvDims,
    weights: GemmWeights<'_, f16>,
    bias: Option<&[f16]>,
    geom: &ConvGeometry,
    act: &ActivationParam,
    ctx: &mut ExecContext,
) -> Result<()> {
    let (m, n, k) = dims.gemm_mnk(geom);
    for_each_group_im2col(input, output, dims, geom, weights, ctx, |a, b, c, off, par| {
        gemm::hgemm(a, b, c, m, n, k, group_slice(bias, off, m), act, par);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::pack_gemm_weights;

    /// Direct convolution, f32, for cross-checking the drivers.
    fn naive_conv(
        input: &[f32],
        weights: &[f32],
        bias: Option<&[f32]>,
        dims: &ConvDims,
        geom: &ConvGeometry,
    ) -> Vec<f32> {
        let icg = dims.in_c / geom.groups;
        let ocg = dims.out_c / geom.groups;
        let mut out = vec![0.0f32; dims.batch * dims.out_c * dims.out_h * dims.out_w];
        for b in 0..dims.batch {
            for oc in 0..dims.out_c {
                let g = oc / ocg;
                for oy in 0..dims.out_h {
                    for ox in 0..dims.out_w {
                        let mut acc = bias.map_or(0.0, |bs| bs[oc]);
                        for ic in 0..icg {
                            for ki in 0..geom.kernel_h {
                                for kj in 0..geom.kernel_w {
                                    let iy = (oy * geom.stride_h + ki * geom.dilation_h) as isize
                                        - geom.pad_top as isize;
                                    let ix = (ox * geom.stride_w + kj * geom.dilation_w) as isize
                                        - geom.pad_left as isize;
                                    if iy < 0 || ix < 0 || iy >= dims.in_h as isize || ix >= dims.in_w as isize {
                                        continue;
                                    }
                                    let x = input[((b * dims.in_c + g * icg + ic) * dims.in_h + iy as usize)
                                        * dims.in_w
                                        + ix as usize];
                                    let w = weights[((oc * icg + ic) * geom.kernel_h + ki) * geom.kernel_w + kj];
                                    acc += x * w;
                                }
                            }
                        }
                        out[((b * dims.out_c + oc) * dims.out_h + oy) * dims.out_w + ox] = acc;
                    }
                }
            }
        }
        out
    }

    fn make_dims(batch: usize, in_c: usize, ih: usize, iw: usize, out_c: usize, geom: &ConvGeometry) -> ConvDims {
        let (out_h, out_w) = geom.output_hw(ih, iw).unwrap();
        ConvDims { batch, in_c, in_h: ih, in_w: iw, out_c, out_h, out_w }
    }

    fn ramp(n: usize, modulo: usize, step: f32) -> Vec<f32> {
        (0..n).map(|i| (i % modulo) as f32 * step - 0.5).collect()
    }

    fn assert_close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < tol, "element {i} differs: {x} vs {y}");
        }
    }

    #[test]
    fn test_conv1x1_matches_naive() {
        let geom = ConvGeometry::square(1, 1, 0).with_groups(2);
        let dims = make_dims(2, 4, 3, 5, 6, &geom);
        let input = ramp(2 * 4 * 15, 7, 0.25);
        let weights = ramp(6 * 2, 5, 0.3);
        let bias = [0.1, 0.2, 0.3, -0.1, -0.2, -0.3];
        let mut out = vec![0.0f32; 2 * 6 * 15];
        let ctx = ExecContext::new();
        conv1x1s1_gemm_f32(
            &input, &mut out, &dims, GemmWeights::Raw(&weights), Some(&bias), &geom,
            &ActivationParam::default(), &ctx,
        );
        assert_close(&out, &naive_conv(&input, &weights, Some(&bias), &dims, &geom), 1e-4);
    }

    #[test]
    fn test_im2col_conv_matches_naive_packed() {
        let geom = ConvGeometry::square(3, 2, 1).with_groups(2).with_dilation(1, 2);
        let dims = make_dims(1, 4, 9, 8, 10, &geom);
        let (m, n, k) = dims.gemm_mnk(&geom);
        let input = ramp(4 * 72, 11, 0.2);
        let weights = ramp(10 * 2 * 9, 13, 0.1);
        let mut packed = Vec::new();
        pack_gemm_weights(&weights, m, k, geom.groups, &mut packed);

        let mut ctx = ExecContext::new();
        ctx.extend_workspace(k * n * 4);
        let mut out = vec![0.0f32; 10 * n];
        conv_im2col_gemm_f32(
            &input, &mut out, &dims, GemmWeights::Packed(&packed), None, &geom,
            &ActivationParam::default(), &mut ctx,
        )
        .unwrap();
        assert_close(&out, &naive_conv(&input, &weights, None, &dims, &geom), 1e-4);
    }

    #[test]
    fn test_im2col_conv_requires_workspace() {
        let geom = ConvGeometry::square(3, 1, 1);
        let dims = make_dims(1, 1, 4, 4, 1, &geom);
        let mut ctx = ExecContext::new();
        let mut out = vec![0.0f32; 16];
        let r = conv_im2col_gemm_f32(
            &[0.0; 16], &mut out, &dims, GemmWeights::Raw(&[0.0; 9]), None, &geom,
            &ActivationParam::default(), &mut ctx,
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_int8_im2col_matches_float_reference() {
        let geom = ConvGeometry::square(3, 1, 1);
        let dims = make_dims(1, 2, 4, 4, 3, &geom);
        let (_, n, k) = dims.gemm_mnk(&geom);
        let input: Vec<i8> = (0..32).map(|i| (i % 9) as i8 - 4).collect();
        let weights: Vec<i8> = (0..54).map(|i| (i % 7) as i8 - 3).collect();
        let scale = [0.5f32, 1.0, 0.25];

        let mut ctx = ExecContext::new();
        ctx.extend_workspace(k * n);
        let mut out = vec![0.0f32; 3 * n];
        conv_im2col_gemm_int8(
            &input, &mut out, &dims, GemmWeights::Raw(&weights), None, &geom,
            &ActivationParam::default(), &mut ctx, &scale,
        )
        .unwrap();

        let fi: Vec<f32> = input.iter().map(|&v| v as f32).collect();
        let fw: Vec<f32> = weights.iter().map(|&v| v as f32).collect();
        let mut expected = naive_conv(&fi, &fw, None, &dims, &geom);
        for (i, v) in expected.iter_mut().enumerate() {
            *v *= scale[i / n];
        }
        assert_close(&out, &expected, 1e-5);
    }

    #[cfg(feature = "fp16")]
    #[test]
    fn test_fp16_1x1() {
        let geom = ConvGeometry::square(1, 1, 0);
        let dims = make_dims(1, 2, 2, 2, 2, &geom);
        let input: Vec<f16> = [1.0f32, 2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0].iter().map(|&v| f16::from_f32(v)).collect();
        let weights: Vec<f16> = [1.0f32, 0.0, 0.5, 2.0].iter().map(|&v| f16::from_f32(v)).collect();
        let mut out = vec![f16::ZERO; 8];
        let ctx = ExecContext::new();
        conv1x1s1_gemm_fp16(
            &input, &mut out, &dims, GemmWeights::Raw(&weights), None, &geom,
            &ActivationParam::default(), &ctx,
        );
        let out: Vec<f32> = out.iter().map(|v| v.to_f32()).collect();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 2.5, 3.0, 3.5, 4.0]);
    }
}
