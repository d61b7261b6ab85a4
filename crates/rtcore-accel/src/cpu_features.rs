//! Runtime CPU capability probe, computed once per process.

use std::sync::OnceLock;

use log::debug;

/// SIMD extensions available on the running CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    /// SSE2 (always present on `x86_64`).
    pub sse2: bool,
    /// SSE4.1.
    pub sse41: bool,
    /// AVX2.
    pub avx2: bool,
    /// Fused multiply-add.
    pub fma: bool,
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

/// Features of the running CPU. The probe runs on first call only.
pub fn detect() -> CpuFeatures {
    *FEATURES.get_or_init(|| {
        let features = probe();
        debug!("detected CPU features: {features:?}");
        features
    })
}

/// True when the SIMD packet path is worth taking over single rays.
pub fn packet_simd() -> bool {
    detect().sse2
}

#[cfg(target_arch = "x86_64")]
fn probe() -> CpuFeatures {
    CpuFeatures {
        sse2: is_x86_feature_detected!("sse2"),
        sse41: is_x86_feature_detected!("sse4.1"),
        avx2: is_x86_feature_detected!("avx2"),
        fma: is_x86_feature_detected!("fma"),
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn probe() -> CpuFeatures {
    CpuFeatures::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_stable() {
        assert_eq!(detect(), detect());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_x86_64_has_sse2() {
        assert!(detect().sse2);
        assert!(packet_simd());
    }
}
