//! `ErrorPolicy::Abort` terminates on configuration errors and nothing else.
//!
//! The abort case re-runs this test binary as a child process, selected by
//! an environment variable, and checks how the child ended.

use std::process::{Command, Stdio};

use gemmlike_conv::{ConvParam, ErrorPolicy, GemmLikeConv, Precision, QuantParams};
use gemmlike_core::{ConvGeometry, DType, GemmlikeError, Shape, Tensor};
use gemmlike_kernels::ExecContext;

const CHILD_ENV: &str = "GEMMLIKE_ABORT_POLICY_CHILD";

/// Three output channels but only two weight scales.
fn mismatched_scales() -> GemmLikeConv {
    let filter = Tensor::zeros(&[3, 2, 3, 3], DType::I8);
    let param = ConvParam::new(filter, ConvGeometry::square(3, 1, 1))
        .with_quant(QuantParams::new(0.5, 4.0, vec![1.0, 2.0]));
    GemmLikeConv::new(Precision::Int8ToFloat, param).unwrap()
}

#[test]
fn abort_policy_terminates_on_scale_mismatch() {
    if std::env::var_os(CHILD_ENV).is_some() {
        let mut conv = mismatched_scales().with_error_policy(ErrorPolicy::Abort);
        let mut ctx = ExecContext::new();
        // Only reached if the policy failed to abort; the parent sees a clean exit.
        let _ = conv.prepare_for_run(&Shape::nchw(1, 2, 8, 8), &mut ctx);
        return;
    }

    let exe = std::env::current_exe().unwrap();
    let status = Command::new(exe)
        .args(["--exact", "abort_policy_terminates_on_scale_mismatch", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success(), "child exited cleanly: {status:?}");

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(6), "expected SIGABRT, got {status:?}");
    }
}

#[test]
fn propagate_policy_returns_scale_mismatch() {
    let mut conv = mismatched_scales();
    assert_eq!(conv.error_policy(), ErrorPolicy::Propagate);
    let mut ctx = ExecContext::new();
    assert_eq!(
        conv.prepare_for_run(&Shape::nchw(1, 2, 8, 8), &mut ctx),
        Err(GemmlikeError::ScaleLengthMismatch { len: 2, out_channels: 3 })
    );
}

#[test]
fn abort_policy_still_returns_caller_errors() {
    let filter = Tensor::from_f32(&[1.0; 4 * 2 * 9], &[4, 2, 3, 3]);
    let mut conv = GemmLikeConv::new(Precision::FullPrecision, ConvParam::new(filter, ConvGeometry::square(3, 1, 1)))
        .unwrap()
        .with_error_policy(ErrorPolicy::Abort);
    let mut ctx = ExecContext::new();

    // wrong channel count
    assert!(matches!(
        conv.prepare_for_run(&Shape::nchw(1, 3, 8, 8), &mut ctx),
        Err(GemmlikeError::InvalidParam(_))
    ));

    conv.prepare_for_run(&Shape::nchw(1, 2, 8, 8), &mut ctx).unwrap();
    let other = Tensor::zeros(&[1, 2, 6, 6], DType::F32);
    let mut out = Tensor::zeros(&[1, 4, 6, 6], DType::F32);
    assert!(matches!(
        conv.run(&other, &mut out, &mut ctx),
        Err(GemmlikeError::ShapeMismatch { .. })
    ));

    let input = Tensor::zeros(&[1, 2, 8, 8], DType::F32);
    let mut wrong_dtype = Tensor::zeros(&[1, 4, 8, 8], DType::I8);
    assert!(matches!(
        conv.run(&input, &mut wrong_dtype, &mut ctx),
        Err(GemmlikeError::DTypeMismatch { .. })
    ));
}
