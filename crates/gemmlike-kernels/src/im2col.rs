//! im2col: unroll convolution patches into a `[k, n]` matrix.
//!
//! For a `[channels, ih, iw]` input, row `(c * kh + ki) * kw + kj` of the
//! column matrix holds, for every output pixel `(oy, ox)`, the input value
//! under kernel tap `(ki, kj)` of channel `c`; taps that land in padding
//! read zero. Row order matches the `[c, kh, kw]` flattening of a filter,
//! so `weights[m, k] · col[k, n]` is the convolution.

use gemmlike_core::ConvGeometry;

use crate::element::Element;

/// Unroll `input` (`[channels, ih, iw]`) into `col` (`[channels * kh * kw, oh * ow]`).
#[allow(clippy::too_many_arguments)]
pub fn im2col<T: Element>(
    input: &[T],
    channels: usize,
    ih: usize,
    iw: usize,
    geom: &ConvGeometry,
    oh: usize,
    ow: usize,
    col: &mut [T],
) {
    let n = oh * ow;
    let (kh, kw) = (geom.kernel_h, geom.kernel_w);
    debug_assert!(col.len() >= channels * kh * kw * n);

    for c in 0..channels {
        let plane = &input[c * ih * iw..(c + 1) * ih * iw];
        for ki in 0..kh {
            for kj in 0..kw {
                let row = (c * kh + ki) * kw + kj;
                let dst = &mut col[row * n..(row + 1) * n];
                for oy in 0..oh {
                    let iy = (oy * geom.stride_h + ki * geom.dilation_h) as isize - geom.pad_top as isize;
                    let dst_row = &mut dst[oy * ow..(oy + 1) * ow];
                    if iy < 0 || iy >= ih as isize {
                        dst_row.fill(T::default());
                        continue;
                    }
                    let src_row = &plane[iy as usize * iw..(iy as usize + 1) * iw];
                    for (ox, d) in dst_row.iter_mut().enumerate() {
                        let ix = (ox * geom.stride_w + kj * geom.dilation_w) as isize - geom.pad_left as isize;
                        *d = if ix < 0 || ix >= iw as isize {
                            T::default()
                        } else {
                            src_row[ix as usize]
                        };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_im2col_no_padding() {
        // 1 channel 3x3, kernel 2x2 stride 1 -> 2x2 output
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let geom = ConvGeometry::square(2, 1, 0);
        let mut col = vec![0.0f32; 4 * 4];
        im2col(&input, 1, 3, 3, &geom, 2, 2, &mut col);
        assert_eq!(&col[0..4], &[1.0, 2.0, 4.0, 5.0]); // tap (0,0)
        assert_eq!(&col[4..8], &[2.0, 3.0, 5.0, 6.0]); // tap (0,1)
        assert_eq!(&col[8..12], &[4.0, 5.0, 7.0, 8.0]); // tap (1,0)
        assert_eq!(&col[12..16], &[5.0, 6.0, 8.0, 9.0]); // tap (1,1)
    }

    #[test]
    fn test_im2col_padding_reads_zero() {
        let input = [1i8, 2, 3, 4]; // 2x2
        let geom = ConvGeometry::square(3, 1, 1);
        let mut col = vec![9i8; 9 * 4];
        im2col(&input, 1, 2, 2, &geom, 2, 2, &mut col);
        // tap (0,0) sees the top-left padding for every output but (1,1)
        assert_eq!(&col[0..4], &[0, 0, 0, 1]);
        // centre tap is the input itself
        assert_eq!(&col[16..20], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_im2col_stride_and_dilation() {
        // 1 channel 5x5, kernel 2x2 dilation 2 stride 2 -> effective 3, out 2x2
        let input: Vec<f32> = (0..25).map(|v| v as f32).collect();
        let geom = ConvGeometry::square(2, 2, 0).with_dilation(2, 2);
        let (oh, ow) = geom.output_hw(5, 5).unwrap();
        assert_eq!((oh, ow), (2, 2));
        let mut col = vec![0.0f32; 4 * 4];
        im2col(&input, 1, 5, 5, &geom, oh, ow, &mut col);
        assert_eq!(&col[0..4], &[0.0, 2.0, 10.0, 12.0]);
        assert_eq!(&col[12..16], &[12.0, 14.0, 22.0, 24.0]);
    }
}
