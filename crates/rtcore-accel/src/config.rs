//! BVH build settings.

use serde::{Deserialize, Serialize};

use crate::error::{AccelError, Result};

/// Upper bound on [`BvhConfig::bin_count`]; bins live in a fixed-size array.
pub const MAX_BINS: usize = 32;

/// Binned-SAH build parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhConfig {
    /// Nodes holding this many primitives or fewer are never split.
    pub max_leaf_size: u32,
    /// Number of uniform centroid bins per axis.
    pub bin_count: usize,
    /// Constant term of the SAH cost (relative to one primitive test).
    pub traversal_cost: f32,
    /// Padding applied to node bounds thinner than this on any axis.
    pub degenerate_pad: f32,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            bin_count: 12,
            traversal_cost: 1.0,
            degenerate_pad: 1e-5,
        }
    }
}

impl BvhConfig {
    /// Validate settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_leaf_size == 0 {
            return Err(AccelError::InvalidConfig(
                "max_leaf_size must be at least 1".into(),
            ));
        }
        if self.bin_count < 2 || self.bin_count > MAX_BINS {
            return Err(AccelError::InvalidConfig(format!(
                "bin_count must be between 2 and {MAX_BINS}, got {}",
                self.bin_count
            )));
        }
        if !self.traversal_cost.is_finite() || self.traversal_cost < 0.0 {
            return Err(AccelError::InvalidConfig(
                "traversal_cost must be finite and non-negative".into(),
            ));
        }
        if !self.degenerate_pad.is_finite() || self.degenerate_pad < 0.0 {
            return Err(AccelError::InvalidConfig(
                "degenerate_pad must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}
