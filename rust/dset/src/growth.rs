//! Capacity policy for column buffers and the string arena
//!
//! Buffers grow geometrically so a run of small `add_rows` calls costs
//! amortized constant time per row. Compaction targets are computed by pure
//! functions of the used length and the current capacity.

/// Default geometric growth multiplier.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.5;

/// Default smallest non-zero row capacity.
pub const DEFAULT_MIN_CAPACITY_ROWS: usize = 16;

const MIN_FACTOR: f64 = 1.0;
const MAX_FACTOR: f64 = 4.0;

/// How buffers over-allocate when they must grow
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GrowthPolicy {
    factor: f64,
    min_capacity: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            factor: DEFAULT_GROWTH_FACTOR,
            min_capacity: DEFAULT_MIN_CAPACITY_ROWS,
        }
    }
}

impl GrowthPolicy {
    /// Build a policy; the factor is clamped to `[1.0, 4.0]` and a non-finite
    /// factor falls back to the default.
    pub fn new(factor: f64, min_capacity: usize) -> Self {
        let factor = if factor.is_finite() {
            factor.clamp(MIN_FACTOR, MAX_FACTOR)
        } else {
            DEFAULT_GROWTH_FACTOR
        };
        Self {
            factor,
            min_capacity,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn min_capacity(&self) -> usize {
        self.min_capacity
    }

    /// Capacity to allocate so that `required` units fit, given `current`.
    ///
    /// Returns `current` unchanged when it is already large enough.
    pub fn grow(&self, current: usize, required: usize) -> usize {
        if required <= current {
            return current;
        }
        // float-to-int casts saturate, so huge capacities cannot wrap
        let geometric = (current as f64 * self.factor).ceil() as usize;
        required.max(geometric).max(self.min_capacity)
    }
}

/// Target capacity of a compaction pass over a buffer holding `used` live
/// units out of `capacity`.
pub fn compact_capacity(used: usize, capacity: usize, shrink_to_fit: bool) -> usize {
    if shrink_to_fit {
        used
    } else {
        capacity.max(used)
    }
}
