//! Building blocks shared by purchase and sales orders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::ProductId;
use crate::value_object::Money;

/// Requested line, as supplied by the caller creating an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Unit price to capture on the order.
    pub unit_price: Money,
}

impl NewLine {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }
}

/// Order line: product, quantity, unit price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price captured at order creation, independent of later catalog changes.
    pub unit_price: Money,
}

impl OrderLine {
    /// `quantity × unit_price`. Bounded at creation by [`price_lines`].
    pub fn subtotal(&self) -> Money {
        Money::from_minor(self.unit_price.minor().saturating_mul(self.quantity))
    }
}

/// Validate requested lines and number them, returning the lines with the order subtotal.
pub fn price_lines(lines: &[NewLine]) -> DomainResult<(Vec<OrderLine>, Money)> {
    if lines.is_empty() {
        return Err(DomainError::validation("order must have at least one line"));
    }

    let mut priced = Vec::with_capacity(lines.len());
    let mut subtotal = Money::ZERO;
    for (idx, line) in lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "line {}: quantity must be positive",
                idx + 1
            )));
        }
        if line.unit_price.is_negative() {
            return Err(DomainError::validation(format!(
                "line {}: unit_price cannot be negative",
                idx + 1
            )));
        }
        let line_total = line.unit_price.times(line.quantity)?;
        subtotal = subtotal.checked_add(line_total)?;
        priced.push(OrderLine {
            line_no: (idx as u32) + 1,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
        });
    }

    Ok((priced, subtotal))
}

/// Total quantity per product, ordered by product id.
///
/// The ordering is the lock acquisition order used by the stock ledger.
pub fn quantities_by_product(
    lines: impl IntoIterator<Item = (ProductId, i64)>,
) -> DomainResult<BTreeMap<ProductId, i64>> {
    let mut totals: BTreeMap<ProductId, i64> = BTreeMap::new();
    for (product_id, quantity) in lines {
        let total = totals.entry(product_id).or_insert(0);
        *total = total.checked_add(quantity).ok_or_else(|| {
            DomainError::validation(format!("total quantity for product {product_id} overflows"))
        })?;
    }
    Ok(totals)
}

/// Append a cancellation reason to free-text order notes.
pub fn append_cancellation_reason(notes: &str, reason: &str) -> String {
    let entry = format!("Cancellation reason: {reason}");
    if notes.is_empty() {
        entry
    } else {
        format!("{notes}\n\n{entry}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_lines_numbers_lines_and_sums_subtotal() {
        let a = ProductId::new();
        let b = ProductId::new();
        let (lines, subtotal) = price_lines(&[
            NewLine::new(a, 3, Money::from_minor(100)),
            NewLine::new(b, 1, Money::from_minor(50)),
        ])
        .unwrap();

        assert_eq!(subtotal, Money::from_minor(350));
        assert_eq!(lines[0].line_no, 1);
        assert_eq!(lines[1].line_no, 2);
        assert_eq!(lines[0].subtotal(), Money::from_minor(300));
    }

    #[test]
    fn empty_order_is_rejected() {
        let err = price_lines(&[]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("at least one line")));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let err = price_lines(&[NewLine::new(ProductId::new(), 0, Money::from_minor(10))])
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("quantity")));
    }

    #[test]
    fn quantities_are_summed_per_product() {
        let a = ProductId::new();
        let b = ProductId::new();
        let totals = quantities_by_product([(a, 2), (b, 1), (a, 3)]).unwrap();
        assert_eq!(totals[&a], 5);
        assert_eq!(totals[&b], 1);
        assert_eq!(totals.keys().copied().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn summed_quantity_overflow_is_a_validation_error() {
        let a = ProductId::new();
        let err = quantities_by_product([(a, i64::MAX), (a, 1)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("overflows")));
    }

    #[test]
    fn cancellation_reason_is_appended_after_existing_notes() {
        assert_eq!(
            append_cancellation_reason("", "supplier out of stock"),
            "Cancellation reason: supplier out of stock"
        );
        assert_eq!(
            append_cancellation_reason("rush", "duplicate"),
            "rush\n\nCancellation reason: duplicate"
        );
    }
}
