//! Rounding of reported money figures.
//!
//! Amounts are kept unrounded while splitting and aggregating; rounding to
//! cents happens once, when a figure is reported.

use serde::{Deserialize, Serialize};

/// Largest difference between the shares of an expense and its amount that
/// is still accepted as rounding noise.
pub const SPLIT_TOLERANCE: f64 = 0.01;

/// Slack for binary floating point when comparing against [`SPLIT_TOLERANCE`].
const FLOAT_SLACK: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Ties go to the even cent (banker's rounding).
    #[default]
    HalfEven,
    /// Ties go away from zero.
    HalfAwayFromZero,
}

impl RoundingMode {
    /// Round `n` to 2 decimal places.
    ///
    /// Operates on the binary value of `n`, so a literal such as `2.675`
    /// (stored as 2.67499...) rounds down in both modes.
    pub fn round_to_2_decimals(self, n: f64) -> f64 {
        let cents = n * 100.0;
        let rounded = match self {
            RoundingMode::HalfEven => cents.round_ties_even(),
            RoundingMode::HalfAwayFromZero => cents.round(),
        };
        // Avoid reporting "-0.0".
        if rounded == 0.0 {
            0.0
        } else {
            rounded / 100.0
        }
    }
}

impl std::str::FromStr for RoundingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "half_even" | "bankers" => Ok(Self::HalfEven),
            "half_away_from_zero" | "half_up" => Ok(Self::HalfAwayFromZero),
            other => Err(format!("unknown rounding mode `{other}`")),
        }
    }
}

/// Whether two totals agree up to [`SPLIT_TOLERANCE`].
pub fn within_tolerance(a: f64, b: f64) -> bool {
    (a - b).abs() <= SPLIT_TOLERANCE + FLOAT_SLACK
}
