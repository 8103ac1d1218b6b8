//! Line item valuation.

use billing_core::money::quantize;
use rust_decimal::Decimal;

/// Monetary total of a line: quantity x unit price, 2 dp round-half-up.
///
/// Pure; used identically by quotation and invoice line items.
pub fn line_total(quantity: Decimal, unit_price: Decimal) -> Decimal {
    quantize(quantity * unit_price)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn multiplies_and_quantizes() {
        assert_eq!(line_total(dec("2"), dec("50000")), dec("100000.00"));
        assert_eq!(line_total(dec("1.5"), dec("3.333")), dec("5.00"));
        assert_eq!(line_total(dec("3"), dec("0.335")), dec("1.01"));
    }

    #[test]
    fn negative_lines_are_allowed() {
        // Discount pseudo-lines carry a negative unit price.
        assert_eq!(line_total(dec("1"), dec("-10000")), dec("-10000.00"));
    }
}
