// 🪙 Money - Decimal gold amounts
// Gold is never a float: every balance is a rust_decimal::Decimal and every
// committed mutation is rounded to minor units (2 places).

use rust_decimal::{Decimal, RoundingStrategy};

/// Gold amount (decimal, not float)
pub type Gold = Decimal;

/// Decimal places kept on committed amounts (1 gold = 100 minor units)
pub const GOLD_SCALE: u32 = 2;

/// Round to minor units, midpoint away from zero
pub fn round_gold(amount: Gold) -> Gold {
    amount.round_dp_with_strategy(GOLD_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `pct` percent of `amount` (unrounded); `None` on overflow
pub fn percent_of(amount: Gold, pct: Decimal) -> Option<Gold> {
    amount.checked_mul(pct)?.checked_div(Decimal::ONE_HUNDRED)
}

/// Render with exactly two decimals, e.g. "45.00"
pub fn format_gold(amount: Gold) -> String {
    format!("{:.2}", round_gold(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_gold_midpoint() {
        assert_eq!(round_gold(Decimal::new(9045, 3)), Decimal::new(905, 2));
        assert_eq!(round_gold(Decimal::new(9044, 3)), Decimal::new(904, 2));
    }

    #[test]
    fn test_format_gold() {
        assert_eq!(format_gold(Decimal::from(45)), "45.00");
        assert_eq!(format_gold(Decimal::new(1235, 1)), "123.50");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(Decimal::from(50), Decimal::from(10)), Some(Decimal::from(5)));
        assert_eq!(percent_of(Decimal::MAX, Decimal::from(200)), None);
    }
}
