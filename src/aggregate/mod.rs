//! Result aggregation into per-target and overall summaries

use crate::model::{AggregatedStats, MultiEnvResult, Summary, TargetStats};
use crate::stats::calculate_latency_stats;
use std::collections::HashMap;

/// Aggregate replay results into per-target and overall tallies.
///
/// Targets are seeded from the first result with a non-empty response map;
/// a response with status below 400 counts as a success, everything else
/// (including transport failures) as a failure. The output is invariant
/// under any reordering of the input.
pub fn aggregate_results(results: &[MultiEnvResult]) -> AggregatedStats {
    let mut by_target: HashMap<String, TargetAccumulator> = HashMap::new();

    if let Some(first) = results.iter().find(|r| !r.responses.is_empty()) {
        for target in first.responses.keys() {
            by_target.insert(target.clone(), TargetAccumulator::default());
        }
    }

    let mut agg = AggregatedStats::default();

    for result in results {
        for (target, response) in &result.responses {
            agg.total_requests += 1;

            let accum = by_target.entry(target.clone()).or_default();
            if response.succeeded() {
                agg.succeeded += 1;
                accum.succeeded += 1;
            } else {
                agg.failed += 1;
                accum.failed += 1;
            }

            agg.latencies.push(response.latency_ms);
            accum.latencies.push(response.latency_ms);
        }
    }

    agg.by_target = by_target
        .into_iter()
        .map(|(target, accum)| (target, accum.finalize()))
        .collect();

    agg
}

/// Derive the summary from aggregated tallies.
pub fn to_summary(agg: AggregatedStats) -> Summary {
    Summary {
        total_requests: agg.total_requests,
        succeeded: agg.succeeded,
        failed: agg.failed,
        latency: calculate_latency_stats(&agg.latencies),
        by_target: agg.by_target,
    }
}

#[derive(Debug, Default)]
struct TargetAccumulator {
    succeeded: usize,
    failed: usize,
    latencies: Vec<i64>,
}

impl TargetAccumulator {
    fn finalize(self) -> TargetStats {
        TargetStats {
            succeeded: self.succeeded,
            failed: self.failed,
            latency: calculate_latency_stats(&self.latencies),
        }
    }
}
