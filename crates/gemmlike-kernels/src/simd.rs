//! Runtime SIMD capability detection.
//!
//! Probed once per process and cached.

use std::sync::OnceLock;

/// SIMD capabilities detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdCapability {
    pub avx2: bool,
    pub avx512f: bool,
    pub fma: bool,
    /// x86 half <-> single conversion instructions
    pub f16c: bool,
    pub neon: bool,
    /// ARMv8.2 half-precision arithmetic
    pub neon_fp16: bool,
}

static DETECTED: OnceLock<SimdCapability> = OnceLock::new();

impl SimdCapability {
    /// Detect SIMD capabilities for the current CPU.
    pub fn detect() -> &'static SimdCapability {
        DETECTED.get_or_init(|| {
            #[cfg(target_arch = "x86_64")]
            {
                SimdCapability {
                    avx2: is_x86_feature_detected!("avx2"),
                    avx512f: is_x86_feature_detected!("avx512f"),
                    fma: is_x86_feature_detected!("fma"),
                    f16c: is_x86_feature_detected!("f16c"),
                    neon: false,
                    neon_fp16: false,
                }
            }

            #[cfg(target_arch = "aarch64")]
            {
                SimdCapability {
                    avx2: false,
                    avx512f: false,
                    fma: false,
                    f16c: false,
                    neon: true,
                    neon_fp16: std::arch::is_aarch64_feature_detected!("fp16"),
                }
            }

            #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
            {
                SimdCapability::scalar()
            }
        })
    }

    /// A CPU with no SIMD at all.
    pub fn scalar() -> Self {
        SimdCapability {
            avx2: false,
            avx512f: false,
            fma: false,
            f16c: false,
            neon: false,
            neon_fp16: false,
        }
    }

    /// Best available SIMD tier as a human-readable string.
    pub fn best_tier(&self) -> &'static str {
        if self.avx512f {
            "AVX-512"
        } else if self.avx2 {
            "AVX2"
        } else if self.neon_fp16 {
            "NEON+FP16"
        } else if self.neon {
            "NEON"
        } else {
            "scalar"
        }
    }
}
