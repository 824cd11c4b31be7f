use tracing::debug;

use crate::error::EngineError;
use splitbook_store::BalanceStore;
use splitbook_types::InstanceId;

/// Result of running one weekly amount through the bubble rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmoothingOutcome {
    /// Amount visible to downstream aggregation. Zero while absorbed; the
    /// full accumulated balance when released.
    pub effective_minor: i64,
    pub balance_after_minor: i64,
    pub released: bool,
    pub explanation: String,
}

/// Threshold-based carry-forward for the one designated counterparty.
///
/// Weekly amounts accumulate in a running balance until the absolute value
/// crosses the threshold, at which point the whole accumulated amount is
/// released into the settlement and the balance resets.
#[derive(Debug, Clone, Copy)]
pub struct BubbleSmoother {
    threshold_minor: i64,
}

impl BubbleSmoother {
    pub fn new(threshold_minor: i64) -> Self {
        Self { threshold_minor }
    }

    /// Apply the bubble rule to one weekly amount, atomically updating the
    /// running balance in the store.
    pub async fn smooth(
        &self,
        store: &BalanceStore,
        instance: InstanceId,
        raw_minor: i64,
    ) -> Result<SmoothingOutcome, EngineError> {
        let threshold = self.threshold_minor;
        let change = store
            .apply(instance, |previous| {
                let candidate = previous + raw_minor;
                if candidate.abs() < threshold {
                    candidate
                } else {
                    0
                }
            })
            .await?;

        let candidate = change.previous_minor + raw_minor;
        let released = candidate.abs() >= threshold;

        let explanation = if released {
            if change.previous_minor != 0 {
                format!(
                    "{} this week plus {} accumulated; total {} crosses the {} threshold and settles in full",
                    fmt_dollars(raw_minor),
                    fmt_dollars(change.previous_minor),
                    fmt_dollars(candidate),
                    fmt_dollars(threshold),
                )
            } else {
                format!(
                    "{} crosses the {} threshold and settles in full",
                    fmt_dollars(raw_minor),
                    fmt_dollars(threshold),
                )
            }
        } else {
            format!(
                "{} added to running balance (now {}); weekly amount held at $0.00",
                fmt_dollars(raw_minor),
                fmt_dollars(candidate),
            )
        };

        debug!(%instance, raw_minor, candidate, released, "bubble rule applied");

        Ok(SmoothingOutcome {
            effective_minor: if released { candidate } else { 0 },
            balance_after_minor: change.next_minor,
            released,
            explanation,
        })
    }
}

/// Render minor units as a signed dollar string, e.g. `-$50.00`.
pub(crate) fn fmt_dollars(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}
