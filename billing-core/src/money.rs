//! Monetary helpers shared by quotations, invoices and ledgers.

use rust_decimal::{Decimal, RoundingStrategy};

/// Differences at or below this amount are treated as zero when deciding
/// whether an invoice is fully paid. Keeps decimal drift from blocking
/// full-paid detection; the threshold is a preserved business decision and
/// has not been re-validated for other denominations.
pub const ROUNDING_BAND: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Quantize to 2 decimal places, rounding half-up.
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether the amount is a whole currency unit (no fractional sub-units).
pub fn is_whole_unit(amount: Decimal) -> bool {
    amount == amount.trunc()
}

/// Clamp negatives to zero.
pub fn clamp_non_negative(amount: Decimal) -> Decimal {
    if amount < Decimal::ZERO {
        Decimal::ZERO
    } else {
        amount
    }
}

/// Whether a balance is cleared within the rounding tolerance band.
pub fn balance_cleared(balance: Decimal) -> bool {
    balance <= ROUNDING_BAND
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn quantize_rounds_half_up() {
        assert_eq!(quantize(dec("1.005")), dec("1.01"));
        assert_eq!(quantize(dec("1.004")), dec("1.00"));
        assert_eq!(quantize(dec("2.675")), dec("2.68"));
        assert_eq!(quantize(dec("-1.005")), dec("-1.01"));
    }

    #[test]
    fn whole_unit_rejects_fractions() {
        assert!(is_whole_unit(dec("100")));
        assert!(is_whole_unit(dec("100.00")));
        assert!(!is_whole_unit(dec("100.50")));
        assert!(!is_whole_unit(dec("0.01")));
    }

    #[test]
    fn rounding_band_treats_small_balances_as_cleared() {
        assert!(balance_cleared(dec("0.00")));
        assert!(balance_cleared(dec("0.05")));
        assert!(balance_cleared(dec("-3.00")));
        assert!(!balance_cleared(dec("0.06")));
        assert!(!balance_cleared(dec("1.00")));
    }

    #[test]
    fn clamp_floors_at_zero() {
        assert_eq!(clamp_non_negative(dec("-5")), Decimal::ZERO);
        assert_eq!(clamp_non_negative(dec("5")), dec("5"));
    }
}
