//! GEMM weight packing.
//!
//! A convolution filter `[out_c, in_c / groups, kh, kw]` is, per group, a
//! row-major `[m, k]` matrix with `m = out_c / groups` and
//! `k = in_c / groups * kh * kw`. Packing regroups each matrix into panels
//! of `MR` rows stored column-interleaved:
//!
//! ```text
//! panel[p * MR + r] = A[panel_row0 + r][p]     (zero for rows past m)
//! ```
//!
//! so the GEMM inner loop reads the `MR` weights it multiplies into one
//! input row from consecutive memory.

use crate::element::Element;

/// Rows per packed panel.
pub const MR: usize = 4;

/// Elements one packed group occupies.
pub fn packed_group_len(m: usize, k: usize) -> usize {
    m.div_ceil(MR) * MR * k
}

/// Elements the packed copy of a whole filter occupies.
pub fn packed_len(m: usize, k: usize, groups: usize) -> usize {
    packed_group_len(m, k) * groups
}

/// Pack `groups` row-major `[m, k]` weight matrices into `out`.
///
/// `out` is cleared and refilled, so a cached buffer keeps its allocation
/// across repacks.
pub fn pack_gemm_weights<T: Element>(weights: &[T], m: usize, k: usize, groups: usize, out: &mut Vec<T>) {
    debug_assert_eq!(weights.len(), m * k * groups);
    let group_len = packed_group_len(m, k);
    out.clear();
    out.resize(group_len * groups, T::default());
    if k == 0 {
        return;
    }

    for g in 0..groups {
        let src = &weights[g * m * k..(g + 1) * m * k];
        let dst = &mut out[g * group_len..(g + 1) * group_len];
        for (panel_idx, panel) in dst.chunks_mut(MR * k).enumerate() {
            let row0 = panel_idx * MR;
            for r in 0..MR.min(m - row0) {
                let row = &src[(row0 + r) * k..(row0 + r + 1) * k];
                for (p, &v) in row.iter().enumerate() {
                    panel[p * MR + r] = v;
                }
            }
        }
    }
}
