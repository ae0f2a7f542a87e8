//! Engine configuration
//!
//! Values come from a builder or from the process environment. The
//! process-wide registry captures [`global()`] once, on first use.

use std::env;

use once_cell::sync::Lazy;

use crate::growth::{GrowthPolicy, DEFAULT_GROWTH_FACTOR, DEFAULT_MIN_CAPACITY_ROWS};
use crate::types::TagScheme;

/// Default largest size of one array dimension (dimensions travel as bytes).
pub const DEFAULT_MAX_DIMENSION: u32 = 255;

/// Default largest number of array dimensions.
pub const DEFAULT_MAX_RANK: usize = 3;

static GLOBAL: Lazy<EngineConfig> = Lazy::new(EngineConfig::from_env);

/// Configuration read from the environment the first time it is needed.
pub fn global() -> &'static EngineConfig {
    &GLOBAL
}

/// Tunables shared by every dataset of a registry
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    growth: GrowthPolicy,
    max_dimension: u32,
    max_rank: usize,
    tag_scheme: TagScheme,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            growth: GrowthPolicy::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_rank: DEFAULT_MAX_RANK,
            tag_scheme: TagScheme::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DSET_GROWTH_FACTOR`: geometric growth multiplier (default 1.5)
    /// - `DSET_MIN_CAPACITY_ROWS`: smallest non-zero row capacity (default 16)
    /// - `DSET_MAX_DIMENSION`: largest array dimension (default 255)
    /// - `DSET_MAX_RANK`: largest number of array dimensions (default 3)
    /// - `DSET_TAG_SCHEME`: "native" or "numpy"
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let growth_factor = env::var("DSET_GROWTH_FACTOR")
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(DEFAULT_GROWTH_FACTOR);

        let min_capacity_rows = env::var("DSET_MIN_CAPACITY_ROWS")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MIN_CAPACITY_ROWS);

        let max_dimension = env::var("DSET_MAX_DIMENSION")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_MAX_DIMENSION);

        let max_rank = env::var("DSET_MAX_RANK")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|r| *r > 0)
            .unwrap_or(DEFAULT_MAX_RANK);

        let tag_scheme = env::var("DSET_TAG_SCHEME")
            .ok()
            .and_then(|s| s.parse::<TagScheme>().ok())
            .unwrap_or_default();

        Self {
            growth: GrowthPolicy::new(growth_factor, min_capacity_rows),
            max_dimension,
            max_rank,
            tag_scheme,
        }
    }

    /// Get the growth policy.
    pub fn growth(&self) -> &GrowthPolicy {
        &self.growth
    }

    /// Get the largest accepted array dimension.
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Get the largest accepted number of array dimensions.
    pub fn max_rank(&self) -> usize {
        self.max_rank
    }

    /// Get the type-code scheme used by the binding.
    pub fn tag_scheme(&self) -> TagScheme {
        self.tag_scheme
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    growth_factor: Option<f64>,
    min_capacity_rows: Option<usize>,
    max_dimension: Option<u32>,
    max_rank: Option<usize>,
    tag_scheme: Option<TagScheme>,
}

impl EngineConfigBuilder {
    /// Set the geometric growth multiplier.
    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = Some(factor);
        self
    }

    /// Set the smallest non-zero row capacity.
    pub fn min_capacity_rows(mut self, rows: usize) -> Self {
        self.min_capacity_rows = Some(rows);
        self
    }

    /// Set the largest accepted array dimension.
    pub fn max_dimension(mut self, dim: u32) -> Self {
        self.max_dimension = Some(dim);
        self
    }

    /// Set the largest accepted number of array dimensions.
    pub fn max_rank(mut self, rank: usize) -> Self {
        self.max_rank = Some(rank);
        self
    }

    /// Set the type-code scheme.
    pub fn tag_scheme(mut self, scheme: TagScheme) -> Self {
        self.tag_scheme = Some(scheme);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            growth: GrowthPolicy::new(
                self.growth_factor.unwrap_or(defaults.growth.factor()),
                self.min_capacity_rows
                    .unwrap_or(defaults.growth.min_capacity()),
            ),
            max_dimension: self.max_dimension.unwrap_or(defaults.max_dimension),
            max_rank: self.max_rank.unwrap_or(defaults.max_rank),
            tag_scheme: self.tag_scheme.unwrap_or(defaults.tag_scheme),
        }
    }
}
