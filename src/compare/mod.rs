//! Deterministic response comparison across targets
//!
//! The baseline is always the first target of the pre-sorted target list, so
//! the produced diff is invariant to the insertion order of the response
//! mapping and to task completion order.

mod volatile;

pub use volatile::{detailed_compare, mask, VolatileConfig, VolatileDiff};

use crate::model::{MultiEnvResult, ReplayResult, ResponseDiff};
use std::collections::HashMap;

/// Body diffs are truncated to this many characters.
pub const BODY_TRUNCATE_LEN: usize = 200;

/// Sentinel emitted when a body difference vanished after masking.
pub const VOLATILE_ONLY_SENTINEL: &str = "<volatile-only>";

/// Compare one entry's responses across all targets.
///
/// `targets` must be sorted; the first element is the baseline. Returns
/// `None` when there is nothing to report: no mismatch at all, or only
/// volatile body differences while `show_volatile_diffs` is off.
pub fn compare_responses(
    responses: &HashMap<String, ReplayResult>,
    targets: &[String],
    volatile: Option<&VolatileConfig>,
    show_volatile_diffs: bool,
) -> Option<ResponseDiff> {
    if targets.len() < 2 {
        return None;
    }

    let baseline = &targets[0];
    let base_body = responses
        .get(baseline)
        .and_then(|r| r.body())
        .unwrap_or_default();

    let mut diff = ResponseDiff::default();

    let mut statuses = Vec::new();
    for target in targets {
        let Some(result) = responses.get(target) else {
            continue;
        };

        if let Some(status) = result.status() {
            diff.status_codes.insert(target.clone(), status);
            statuses.push(status);
        }

        diff.latency_diff.insert(target.clone(), result.latency_ms);
    }

    diff.status_mismatch = statuses.windows(2).any(|w| w[0] != w[1]);

    let mut volatile_only = true;

    for target in &targets[1..] {
        let body = responses
            .get(target)
            .and_then(|r| r.body())
            .unwrap_or_default();

        match volatile {
            Some(config) => match detailed_compare(base_body, body, config) {
                Ok(d) => {
                    for field in d.ignored_fields {
                        if !diff.ignored_fields.contains(&field) {
                            diff.ignored_fields.push(field);
                        }
                    }

                    if d.stable_fields_diff {
                        diff.body_mismatch = true;
                        volatile_only = false;
                        diff.body_diffs
                            .insert(target.clone(), truncate(body, BODY_TRUNCATE_LEN));
                    } else if d.volatile_only {
                        diff.body_mismatch = true;
                        diff.body_diffs
                            .insert(target.clone(), VOLATILE_ONLY_SENTINEL.to_string());
                    }
                }
                // Non-JSON on either side: fall back to raw comparison.
                Err(_) => {
                    if base_body != body {
                        diff.body_mismatch = true;
                        volatile_only = false;
                        diff.body_diffs
                            .insert(target.clone(), truncate(body, BODY_TRUNCATE_LEN));
                    }
                }
            },
            None => {
                if base_body != body {
                    diff.body_mismatch = true;
                    volatile_only = false;
                    diff.body_diffs
                        .insert(target.clone(), truncate(body, BODY_TRUNCATE_LEN));
                }
            }
        }
    }

    if diff.body_mismatch {
        diff.body_diffs
            .insert(baseline.clone(), truncate(base_body, BODY_TRUNCATE_LEN));
    }

    diff.volatile_only = volatile_only && diff.body_mismatch;
    diff.ignored_fields.sort();

    if (!diff.status_mismatch && !diff.body_mismatch)
        || (diff.volatile_only && !show_volatile_diffs)
    {
        return None;
    }

    Some(diff)
}

/// Truncate to `max` characters, appending `...` when anything was cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }

    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Whether any result in the run carries a reportable diff.
pub fn has_diffs(results: &[MultiEnvResult]) -> bool {
    results.iter().any(|r| r.diff.is_some())
}
