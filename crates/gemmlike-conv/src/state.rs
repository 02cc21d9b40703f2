//! Per-kernel state carried from `prepare` to `run`.
//!
//! Holds the input-shape fingerprint, the algorithm chosen for that shape,
//! the packed weight copy and the fused quantization parameters. Everything
//! here is derived from the kernel's `ConvParam` and the last input shape;
//! the param itself is never written.

use gemmlike_core::{ActivationParam, Shape, Tensor, TensorData};
use gemmlike_kernels::packing::pack_gemm_weights;
use gemmlike_kernels::Element;

use crate::scale::FusedQuant;
use crate::selector::{Algorithm, Selection};

#[derive(Debug, Default)]
pub struct PreparedState {
    fingerprint: Option<Shape>,
    selection: Option<Selection>,
    out_hw: (usize, usize),
    packed: Option<TensorData>,
    weights_packed: bool,
    repacks: usize,
    fused: Option<FusedQuant>,
}

impl PreparedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `shape` against the fingerprint of the last prepare.
    ///
    /// Returns `true` when the shape-dependent state must be recomputed. In
    /// that case the packed weights are marked stale until the next repack.
    pub fn invalidate_if_shape_changed(&mut self, shape: &Shape) -> bool {
        if self.fingerprint.as_ref() == Some(shape) {
            return false;
        }
        self.weights_packed = false;
        true
    }

    /// Record the outcome of a prepare pass for `shape`.
    pub(crate) fn commit(&mut self, shape: &Shape, selection: Selection, out_hw: (usize, usize)) {
        self.fingerprint = Some(shape.clone());
        self.selection = Some(selection);
        self.out_hw = out_hw;
    }

    /// Pack `filter` into the cached buffer, reusing its allocation.
    ///
    /// `filter` holds `groups` row-major `[m, k]` matrices.
    pub(crate) fn repack(&mut self, filter: &Tensor, m: usize, k: usize, groups: usize) {
        let prev = self.packed.take();
        let packed = match filter.data() {
            TensorData::F32(w) => TensorData::F32(pack_reusing(w, reclaim_f32(prev), m, k, groups)),
            TensorData::I8(w) => TensorData::I8(pack_reusing(w, reclaim_i8(prev), m, k, groups)),
            TensorData::F16(w) => TensorData::F16(pack_reusing(w, reclaim_f16(prev), m, k, groups)),
        };
        self.packed = Some(packed);
        self.weights_packed = true;
        self.repacks += 1;
        tracing::debug!(m, k, groups, repacks = self.repacks, "repacked conv weights");
    }

    /// Run on the raw filter for the current shape.
    pub(crate) fn use_raw_weights(&mut self) {
        self.weights_packed = false;
    }

    pub(crate) fn set_fused(&mut self, fused: FusedQuant) {
        self.fused = Some(fused);
    }

    pub fn fingerprint(&self) -> Option<&Shape> {
        self.fingerprint.as_ref()
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.selection.map(|s| s.algorithm)
    }

    /// Workspace bytes requested before every run; 0 before the first prepare.
    pub fn workspace_bytes(&self) -> usize {
        self.selection.map_or(0, |s| s.workspace_bytes)
    }

    pub fn out_hw(&self) -> (usize, usize) {
        self.out_hw
    }

    pub fn weights_packed(&self) -> bool {
        self.weights_packed
    }

    /// The packed filter, if it is valid for the current shape.
    pub fn packed_weights(&self) -> Option<&TensorData> {
        if self.weights_packed {
            self.packed.as_ref()
        } else {
            None
        }
    }

    /// Number of times the weights have been packed.
    pub fn repack_count(&self) -> usize {
        self.repacks
    }

    pub fn is_fused(&self) -> bool {
        self.fused.is_some()
    }

    /// Per-output-channel dequantization multipliers (int8 only).
    pub fn scales(&self) -> &[f32] {
        self.fused.as_ref().map(|f| f.scales.as_slice()).unwrap_or(&[])
    }

    pub fn use_rescaled_bias(&self) -> bool {
        self.rescaled_bias().is_some()
    }

    /// Bias divided by the output scale (int8 → int8 only).
    pub fn rescaled_bias(&self) -> Option<&Tensor> {
        self.fused.as_ref().and_then(|f| f.bias.as_ref())
    }

    /// Activation in the output domain.
    pub fn activation(&self) -> Option<&ActivationParam> {
        self.fused.as_ref().map(|f| &f.activation)
    }
}

fn pack_reusing<T: Element>(weights: &[T], prev: Option<Vec<T>>, m: usize, k: usize, groups: usize) -> Vec<T> {
    let mut buf = prev.unwrap_or_default();
    pack_gemm_weights(weights, m, k, groups, &mut buf);
    buf
}

fn reclaim_f32(prev: Option<TensorData>) -> Option<Vec<f32>> {
    match prev {
        Some(TensorData::F32(v)) => Some(v),
        _ => None,
    }
}

fn reclaim_i8(prev: Option<TensorData>) -> Option<Vec<i8>> {
    match prev {
        Some(TensorData::I8(v)) => Some(v),
        _ => None,
    }
}

fn reclaim_f16(prev: Option<TensorData>) -> Option<Vec<half::f16>> {
    match prev {
        Some(TensorData::F16(v)) => Some(v),
        _ => None,
    }
}
