use crate::model::{Asset, ComparisonOp, NotificationRule};

/// Maximum absolute difference for `==` to hold.
pub const EQUALITY_EPSILON: f64 = 0.01;

impl ComparisonOp {
    pub fn is_satisfied(self, current: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterEqual => current >= threshold,
            Self::LessEqual => current <= threshold,
            Self::Greater => current > threshold,
            Self::Less => current < threshold,
            Self::Equal => (current - threshold).abs() < EQUALITY_EPSILON,
        }
    }
}

/// Rules in `rules` satisfied by `current_price`.
///
/// Inactive rules and rules for other assets never match. Pure: the same
/// inputs always produce the same output.
pub fn evaluate<'a>(
    rules: &'a [NotificationRule],
    asset: Asset,
    current_price: f64,
) -> Vec<&'a NotificationRule> {
    rules
        .iter()
        .filter(|r| r.active && r.asset == asset)
        .filter(|r| r.op.is_satisfied(current_price, r.threshold))
        .collect()
}
