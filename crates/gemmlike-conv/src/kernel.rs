//! GEMM-like convolution kernel.
//!
//! A kernel is built once per convolution op and called many times:
//!
//! 1. `prepare_for_run` fuses the quantization scales (first call only),
//!    then, whenever the input shape differs from the last one, re-selects
//!    the algorithm, sizes the im2col workspace and repacks the weights.
//! 2. `run` asks the context for the workspace and invokes exactly one
//!    backend primitive.
//!
//! `launch` does both.

use gemmlike_core::{ActivationParam, DType, GemmlikeError, Result, Shape, Tensor, TensorData};
use gemmlike_kernels::conv::{self as backend, ConvDims};
use gemmlike_kernels::{ExecContext, GemmWeights, Int8Output};

use crate::param::{conv_output_shape, ConvParam};
use crate::precision::Precision;
use crate::scale;
use crate::selector::{select_algorithm, Algorithm};
use crate::state::PreparedState;

/// What to do with a configuration error (scale length mismatch, missing
/// quantization parameters, half precision requested but not built).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Return it to the caller.
    #[default]
    Propagate,
    /// Log it and abort the process.
    Abort,
}

#[derive(Debug)]
pub struct GemmLikeConv {
    precision: Precision,
    param: ConvParam,
    state: PreparedState,
    policy: ErrorPolicy,
    kernel_func_name: Option<&'static str>,
}

impl GemmLikeConv {
    /// Build a kernel for `precision`. Checks everything that does not
    /// depend on the input shape.
    pub fn new(precision: Precision, param: ConvParam) -> Result<Self> {
        param.validate(precision)?;
        Ok(Self {
            precision,
            param,
            state: PreparedState::new(),
            policy: ErrorPolicy::default(),
            kernel_func_name: None,
        })
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn param(&self) -> &ConvParam {
        &self.param
    }

    pub fn state(&self) -> &PreparedState {
        &self.state
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Name of the backend primitive the last `run` invoked.
    pub fn kernel_func_name(&self) -> Option<&'static str> {
        self.kernel_func_name
    }

    pub fn output_shape(&self, input: &Shape) -> Result<Shape> {
        conv_output_shape(input, &self.param)
    }

    /// Bring the prepared state up to date for `input_shape`.
    ///
    /// Returns whether shape-dependent state was recomputed; `false` means
    /// the shape matched the previous call and nothing was done.
    pub fn prepare_for_run(&mut self, input_shape: &Shape, ctx: &mut ExecContext) -> Result<bool> {
        let result = self.prepare_inner(input_shape, ctx);
        self.enforce(result)
    }

    /// Execute the convolution prepared for `input`'s shape.
    pub fn run(&mut self, input: &Tensor, output: &mut Tensor, ctx: &mut ExecContext) -> Result<()> {
        let result = self.run_inner(input, output, ctx);
        self.enforce(result)
    }

    /// `prepare_for_run` followed by `run`.
    pub fn launch(&mut self, input: &Tensor, output: &mut Tensor, ctx: &mut ExecContext) -> Result<()> {
        self.prepare_for_run(input.shape(), ctx)?;
        self.run(input, output, ctx)
    }

    fn enforce<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.policy == ErrorPolicy::Abort && e.is_configuration() {
                tracing::error!(precision = %self.precision, error = %e, "fatal convolution configuration error");
                std::process::abort();
            }
        }
        result
    }

    fn prepare_inner(&mut self, input_shape: &Shape, ctx: &mut ExecContext) -> Result<bool> {
        if !self.precision.is_available() {
            return Err(GemmlikeError::HalfPrecisionUnavailable);
        }
        // Shape-independent and done once: rescaling must never compound.
        if !self.state.is_fused() {
            let fused = scale::fuse(self.precision, &self.param)?;
            self.state.set_fused(fused);
        }

        self.param.check_input(input_shape)?;
        let [_, in_c, ih, iw] = input_shape.as_nchw()?;
        let geom = self.param.geometry;
        let out_hw = geom.output_hw(ih, iw)?;
        if !self.state.invalidate_if_shape_changed(input_shape) {
            return Ok(false);
        }

        let selection = select_algorithm(&geom, in_c, out_hw, self.precision.workspace_element_size());

        let [oc, icg, kh, kw] = self.param.filter_dims()?;
        let m = oc / geom.groups;
        let k = icg * kh * kw;
        let n = out_hw.0 * out_hw.1;
        // fp16 weights stay in their raw layout.
        if m <= 1 || n <= 1 || self.precision == Precision::HalfPrecision {
            self.state.use_raw_weights();
        } else {
            self.state.repack(&self.param.filter, m, k, geom.groups);
        }
        self.state.commit(input_shape, selection, out_hw);
        ctx.extend_workspace(selection.workspace_bytes);

        tracing::debug!(
            precision = %self.precision,
            algorithm = %selection.algorithm,
            input = %input_shape,
            workspace_bytes = selection.workspace_bytes,
            packed = self.state.weights_packed(),
            "prepared gemm-like conv"
        );
        Ok(true)
    }

    fn run_inner(&mut self, input: &Tensor, output: &mut Tensor, ctx: &mut ExecContext) -> Result<()> {
        let algorithm = self
            .state
            .algorithm()
            .ok_or_else(|| GemmlikeError::InvalidParam("run called before prepare_for_run".into()))?;
        match self.state.fingerprint() {
            Some(prepared) if prepared == input.shape() => {}
            prepared => {
                return Err(GemmlikeError::ShapeMismatch {
                    expected: prepared.map(|s| s.dims().to_vec()).unwrap_or_default(),
                    got: input.shape().dims().to_vec(),
                })
            }
        }
        let [batch, _, _, _] = input.shape().as_nchw()?;
        let (oh, ow) = self.state.out_hw();
        let expected = Shape::nchw(batch, self.param.out_channels(), oh, ow);
        if output.shape() != &expected {
            return Err(GemmlikeError::ShapeMismatch {
                expected: expected.dims().to_vec(),
                got: output.shape().dims().to_vec(),
            });
        }

        ctx.extend_workspace(self.state.workspace_bytes());
        let dims = ConvDims::from_shapes(input.shape(), output.shape())?;
        let act = self.state.activation().copied().unwrap_or(self.param.activation);

        match self.precision {
            Precision::FullPrecision => self.run_fp32(algorithm, input, output, &dims, &act, ctx)?,
            Precision::Int8ToFloat | Precision::Int8ToInt8 => {
                self.run_int8(algorithm, input, output, &dims, &act, ctx)?
            }
            Precision::HalfPrecision => self.run_fp16(algorithm, input, output, &dims, &act, ctx)?,
        }

        let name = algorithm.kernel_name(self.precision);
        self.kernel_func_name = Some(name);
        tracing::debug!(kernel = name, batch = dims.batch, out_c = dims.out_c, "dispatched conv");
        Ok(())
    }

    fn run_fp32(
        &self,
        algorithm: Algorithm,
        input: &Tensor,
        output: &mut Tensor,
        dims: &ConvDims,
        act: &ActivationParam,
        ctx: &mut ExecContext,
    ) -> Result<()> {
        let x = typed(input.as_f32_slice(), "input", DType::F32, input.dtype())?;
        let got = output.dtype();
        let y = typed_mut(output.as_f32_slice_mut(), "output", DType::F32, got)?;
        let w = self.weights(self.param.filter.as_f32_slice(), TensorData::as_f32)?;
        let bias = self.param.bias.as_ref().and_then(Tensor::as_f32_slice);
        let geom = &self.param.geometry;
        match algorithm {
            Algorithm::Direct1x1 => {
                backend::conv1x1s1_gemm_f32(x, y, dims, w, bias, geom, act, ctx);
                Ok(())
            }
            Algorithm::Im2colGemm => backend::conv_im2col_gemm_f32(x, y, dims, w, bias, geom, act, ctx),
        }
    }

    fn run_int8(
        &self,
        algorithm: Algorithm,
        input: &Tensor,
        output: &mut Tensor,
        dims: &ConvDims,
        act: &ActivationParam,
        ctx: &mut ExecContext,
    ) -> Result<()> {
        let x = typed(input.as_i8_slice(), "input", DType::I8, input.dtype())?;
        let w = self.weights(self.param.filter.as_i8_slice(), TensorData::as_i8)?;
        let bias = match self.state.rescaled_bias() {
            Some(b) => b.as_f32_slice(),
            None => self.param.bias.as_ref().and_then(Tensor::as_f32_slice),
        };
        let op = Int8Op {
            algorithm,
            dims,
            weights: w,
            bias,
            geom: &self.param.geometry,
            act,
            scale: self.state.scales(),
        };
        let got = output.dtype();
        match self.precision {
            Precision::Int8ToInt8 => op.run(x, typed_mut(output.as_i8_slice_mut(), "output", DType::I8, got)?, ctx),
            _ => op.run(x, typed_mut(output.as_f32_slice_mut(), "output", DType::F32, got)?, ctx),
        }
    }

    #[cfg(feature = "fp16")]
    fn run_fp16(
        &self,
        algorithm: Algorithm,
        input: &Tensor,
        output: &mut Tensor,
        dims: &ConvDims,
        act: &ActivationParam,
        ctx: &mut ExecContext,
    ) -> Result<()> {
        let x = typed(input.as_f16_slice(), "input", DType::F16, input.dtype())?;
        let got = output.dtype();
        let y = typed_mut(output.as_f16_slice_mut(), "output", DType::F16, got)?;
        let w = self.weights(self.param.filter.as_f16_slice(), TensorData::as_f16)?;
        let bias = self.param.bias.as_ref().and_then(Tensor::as_f16_slice);
        let geom = &self.param.geometry;
        match algorithm {
            Algorithm::Direct1x1 => {
                backend::conv1x1s1_gemm_fp16(x, y, dims, w, bias, geom, act, ctx);
                Ok(())
            }
            Algorithm::Im2colGemm => backend::conv_im2col_gemm_fp16(x, y, dims, w, bias, geom, act, ctx),
        }
    }

    #[cfg(not(feature = "fp16"))]
    fn run_fp16(
        &self,
        _algorithm: Algorithm,
        _input: &Tensor,
        _output: &mut Tensor,
        _dims: &ConvDims,
        _act: &ActivationParam,
        _ctx: &mut ExecContext,
    ) -> Result<()> {
        Err(GemmlikeError::HalfPrecisionUnavailable)
    }

    /// Packed weights when the cache holds them, the raw filter otherwise.
    fn weights<'a, T>(
        &'a self,
        raw: Option<&'a [T]>,
        packed: fn(&TensorData) -> Option<&[T]>,
    ) -> Result<GemmWeights<'a, T>> {
        if let Some(p) = self.state.packed_weights().and_then(packed) {
            return Ok(GemmWeights::Packed(p));
        }
        raw.map(GemmWeights::Raw)
            .ok_or_else(|| mismatch("filter", self.precision.input_dtype(), self.param.filter.dtype()))
    }
}

/// Operands of one int8 launch, shared by the f32- and i8-output paths.
struct Int8Op<'a> {
    algorithm: Algorithm,
    dims: &'a ConvDims,
    weights: GemmWeights<'a, i8>,
    bias: Option<&'a [f32]>,
    geom: &'a gemmlike_core::ConvGeometry,
    act: &'a ActivationParam,
    scale: &'a [f32],
}

impl Int8Op<'_> {
    fn run<O: Int8Output>(&self, x: &[i8], y: &mut [O], ctx: &mut ExecContext) -> Result<()> {
        let Int8Op { algorithm, dims, weights, bias, geom, act, scale } = *self;
        match algorithm {
            Algorithm::Direct1x1 => {
                backend::conv1x1s1_gemm_int8(x, y, dims, weights, bias, geom, act, ctx, scale);
                Ok(())
            }
            Algorithm::Im2colGemm => backend::conv_im2col_gemm_int8(x, y, dims, weights, bias, geom, act, ctx, scale),
        }
    }
}

fn mismatch(what: &'static str, expected: DType, got: DType) -> GemmlikeError {
    GemmlikeError::DTypeMismatch { what, expected, got }
}

fn typed<'a, T>(v: Option<&'a [T]>, what: &'static str, expected: DType, got: DType) -> Result<&'a [T]> {
    v.ok_or_else(|| mismatch(what, expected, got))
}

fn typed_mut<'a, T>(v: Option<&'a mut [T]>, what: &'static str, expected: DType, got: DType) -> Result<&'a mut [T]> {
    v.ok_or_else(|| mismatch(what, expected, got))
}
