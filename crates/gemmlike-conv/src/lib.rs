//! # gemmlike-conv
//!
//! Precision-aware dispatch for GEMM-based convolutions.
//!
//! A [`GemmLikeConv`] owns one convolution's parameters and decides, per
//! input shape, between a direct 1×1 GEMM and im2col + GEMM. It keeps a
//! packed copy of the weights valid while the input shape stays the same,
//! fuses int8 quantization scales into per-channel multipliers, and rescales
//! bias and activation thresholds for int8 output.
//!
//! ```ignore
//! let mut conv = GemmLikeConv::new(Precision::FullPrecision, param)?;
//! let mut ctx = ExecContext::new();
//! conv.launch(&input, &mut output, &mut ctx)?;
//! ```

pub mod precision;
pub mod param;
pub mod selector;
pub mod scale;
pub mod state;
pub mod kernel;

pub use precision::Precision;
pub use param::{conv_output_shape, ConvParam, QuantParams};
pub use selector::{select_algorithm, Algorithm, Selection};
pub use scale::FusedQuant;
pub use state::PreparedState;
pub use kernel::{ErrorPolicy, GemmLikeConv};
