//! Points accrual rules.
//!
//! Converts a purchase amount into an integer point award. The earning rate is
//! a single value per calculator, injected at construction. Per-class data only
//! contributes a flat referral bonus and an optional per-transaction cap.
//!
//! ```
//! use redeem_kit::points::{ClassFeatures, PointsCalculator};
//!
//! let calc = PointsCalculator::default();
//! assert_eq!(calc.calculate_points_from_purchase(19.99), 199);
//!
//! let features = ClassFeatures::default()
//!     .with_referral_bonus(100)
//!     .with_max_points(400);
//! assert_eq!(calc.calculate_points_with_bonuses(50.0, Some(&features)), 400);
//! ```

use serde::{Deserialize, Serialize};

/// Standardized earning rate for all deployments.
pub const DEFAULT_POINTS_PER_DOLLAR: u32 = 10;

/// Per-class earning modifiers.
///
/// Stored class documents may also carry a points rate; that field is not
/// modelled here because the calculator never reads it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassFeatures {
    /// Flat bonus added once per awarded transaction.
    #[serde(default)]
    pub referral_bonus: u64,

    /// Hard ceiling on points awarded for one transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points_per_transaction: Option<u64>,
}

impl ClassFeatures {
    pub fn with_referral_bonus(mut self, bonus: u64) -> Self {
        self.referral_bonus = bonus;
        self
    }

    pub fn with_max_points(mut self, max: u64) -> Self {
        self.max_points_per_transaction = Some(max);
        self
    }
}

/// Pure points calculator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointsCalculator {
    points_per_dollar: u32,
}

impl PointsCalculator {
    /// Create a calculator with an explicit earning rate.
    pub fn new(points_per_dollar: u32) -> Self {
        PointsCalculator { points_per_dollar }
    }

    pub fn points_per_dollar(&self) -> u32 {
        self.points_per_dollar
    }

    /// Base points for a purchase: `floor(amount * rate)`.
    ///
    /// Non-positive, NaN and infinite amounts earn zero points.
    pub fn calculate_points_from_purchase(&self, amount: f64) -> u64 {
        if !amount.is_finite() || amount <= 0.0 {
            return 0;
        }

        // `as` saturates on overflow
        (amount * f64::from(self.points_per_dollar)).floor() as u64
    }

    /// Base points plus the class referral bonus, clamped to the class cap.
    pub fn calculate_points_with_bonuses(
        &self,
        amount: f64,
        features: Option<&ClassFeatures>,
    ) -> u64 {
        let base = self.calculate_points_from_purchase(amount);
        let Some(features) = features else {
            return base;
        };

        let total = base.saturating_add(features.referral_bonus);
        match features.max_points_per_transaction {
            Some(max) if total > max => max,
            _ => total,
        }
    }

    /// Human-readable earning rate, e.g. `"10 points per $1"`.
    pub fn rate_display(&self) -> String {
        format!("{} points per $1", self.points_per_dollar)
    }

    /// Check stored points against the current rate.
    ///
    /// Returns `false` for data recorded under a different rate.
    pub fn validate_points_calculation(&self, points: u64, amount: f64) -> bool {
        points == self.calculate_points_from_purchase(amount)
    }
}

impl Default for PointsCalculator {
    fn default() -> Self {
        PointsCalculator::new(DEFAULT_POINTS_PER_DOLLAR)
    }
}
