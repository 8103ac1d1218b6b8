//! Document number generation.
//!
//! Numbers are year-scoped and zero-padded: `INV-2025-00042`. When the
//! sequence counter cannot be reached the engine degrades to a
//! timestamp-derived number rather than blocking document creation; those
//! numbers share the prefix and year but carry a unix timestamp in place of
//! the padded counter value.

use chrono::Utc;
use tracing::{instrument, warn};

use billing_core::BillingError;

use crate::models::DocumentKind;
use crate::services::metrics::FALLBACK_NUMBERS_TOTAL;
use crate::store::{Store, StoreError};

const SEQUENCE_ATTEMPTS: u32 = 3;

/// Format a sequence value into a document number.
pub fn format_number(kind: DocumentKind, year: i32, value: i64) -> String {
    format!("{}-{}-{:05}", kind.prefix(), year, value)
}

/// Draw the next document number for `kind` in `year`.
///
/// Retries transient counter contention, then falls back to a
/// timestamp-derived number so a storage hiccup on the counter table never
/// blocks document creation.
#[instrument(skip(store))]
pub async fn next_number<S: Store>(
    store: &S,
    kind: DocumentKind,
    year: i32,
) -> Result<String, BillingError> {
    let mut last_err: Option<StoreError> = None;

    for _ in 0..SEQUENCE_ATTEMPTS {
        match store.next_sequence(kind, year).await {
            Ok(value) => return Ok(format_number(kind, year, value)),
            Err(err @ StoreError::Contention(_)) => {
                last_err = Some(err);
            }
            Err(err @ StoreError::Backend(_)) => {
                last_err = Some(err);
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let timestamp = Utc::now().timestamp();
    let number = format!("{}-{}-{}", kind.prefix(), year, timestamp);

    warn!(
        kind = kind.as_str(),
        year = year,
        number = %number,
        error = %last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        "Sequence counter unavailable, issuing timestamp fallback number"
    );
    FALLBACK_NUMBERS_TOTAL
        .with_label_values(&[kind.as_str()])
        .inc();

    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(
            format_number(DocumentKind::Invoice, 2025, 42),
            "INV-2025-00042"
        );
        assert_eq!(format_number(DocumentKind::Quotation, 2025, 7), "Q-2025-00007");
    }

    #[test]
    fn padding_does_not_truncate_large_values() {
        assert_eq!(
            format_number(DocumentKind::Invoice, 2025, 123456),
            "INV-2025-123456"
        );
    }
}
