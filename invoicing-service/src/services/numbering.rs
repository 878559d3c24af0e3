//! Invoice number allocation.
//!
//! Numbers look like `INV-<YYYY><MM>-<suffix>`. The suffix is random, so
//! uniqueness is ultimately enforced by the store; a collision surfaces as
//! `AppError::Conflict` and the allocation is retried with a fresh number.

use crate::services::metrics::NUMBER_COLLISIONS_TOTAL;
use chrono::{DateTime, Datelike, Utc};
use rand::Rng;
use service_core::error::AppError;
use std::future::Future;

/// Total allocation attempts before giving up.
pub const MAX_ATTEMPTS: u32 = 8;

/// Collisions tolerated before the suffix widens.
pub const WIDEN_AFTER: u32 = 3;

const NARROW_WIDTH: u32 = 4;
const WIDE_WIDTH: u32 = 6;

/// Suffix width for a given attempt (0-based).
pub fn suffix_width(attempt: u32) -> u32 {
    if attempt < WIDEN_AFTER {
        NARROW_WIDTH
    } else {
        WIDE_WIDTH
    }
}

pub fn format_invoice_number(now: DateTime<Utc>, suffix: u32, width: u32) -> String {
    format!(
        "INV-{:04}{:02}-{:0width$}",
        now.year(),
        now.month(),
        suffix,
        width = width as usize
    )
}

/// Random candidate number for `now` with a suffix of `width` digits.
pub fn generate_invoice_number(now: DateTime<Utc>, width: u32) -> String {
    let suffix = rand::thread_rng().gen_range(0..10u32.pow(width));
    format_invoice_number(now, suffix, width)
}

/// Run `insert` with fresh candidate numbers until the store accepts one.
///
/// Only `Conflict` triggers a retry; every other error is returned as is.
pub async fn with_unique_number<T, F, Fut>(now: DateTime<Utc>, mut insert: F) -> Result<T, AppError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    for attempt in 0..MAX_ATTEMPTS {
        let width = suffix_width(attempt);
        let candidate = generate_invoice_number(now, width);

        match insert(candidate.clone()).await {
            Err(AppError::Conflict(_)) => {
                NUMBER_COLLISIONS_TOTAL
                    .with_label_values(&[&width.to_string()])
                    .inc();
                tracing::warn!(
                    invoice_number = %candidate,
                    attempt = attempt + 1,
                    "Invoice number collision, regenerating"
                );
            }
            other => return other,
        }
    }

    tracing::error!(attempts = MAX_ATTEMPTS, "Invoice number allocation exhausted");
    Err(AppError::InternalError(anyhow::anyhow!(
        "Could not allocate a unique invoice number after {} attempts",
        MAX_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn october() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn number_format_carries_year_month_and_padded_suffix() {
        assert_eq!(format_invoice_number(october(), 42, 4), "INV-202610-0042");
        assert_eq!(format_invoice_number(october(), 42, 6), "INV-202610-000042");

        let generated = generate_invoice_number(october(), 4);
        assert!(generated.starts_with("INV-202610-"));
        assert_eq!(generated.len(), "INV-202610-0000".len());
    }

    #[test]
    fn suffix_widens_after_three_collisions() {
        assert_eq!(suffix_width(0), 4);
        assert_eq!(suffix_width(2), 4);
        assert_eq!(suffix_width(3), 6);
        assert_eq!(suffix_width(MAX_ATTEMPTS - 1), 6);
    }

    #[tokio::test]
    async fn ten_thousand_allocations_are_unique() {
        let taken: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        let collisions = Mutex::new(0u32);

        for _ in 0..10_000 {
            with_unique_number(october(), |candidate| {
                let result = if taken.lock().unwrap().insert(candidate.clone()) {
                    Ok(candidate)
                } else {
                    *collisions.lock().unwrap() += 1;
                    Err(AppError::Conflict(anyhow::anyhow!("duplicate")))
                };
                async move { result }
            })
            .await
            .unwrap();
        }

        assert_eq!(taken.lock().unwrap().len(), 10_000);
        assert!(*collisions.lock().unwrap() > 0);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), AppError> = with_unique_number(october(), |_| {
            calls += 1;
            async { Err(AppError::Conflict(anyhow::anyhow!("duplicate"))) }
        })
        .await;

        assert!(matches!(result, Err(AppError::InternalError(_))));
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), AppError> = with_unique_number(october(), |_| {
            calls += 1;
            async { Err(AppError::DatabaseError(anyhow::anyhow!("down"))) }
        })
        .await;

        assert!(matches!(result, Err(AppError::DatabaseError(_))));
        assert_eq!(calls, 1);
    }
}
