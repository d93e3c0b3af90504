//! Run output: human summary, JSON envelope, rule verdicts

mod report;

pub use report::generate_html;

use crate::aggregate::{aggregate_results, to_summary};
use crate::compare::has_diffs;
use crate::error::Result;
use crate::model::{LatencyStats, MultiEnvResult, RunData};
use crate::rules::RuleEvaluation;

pub const COLOR_RESET: &str = "\x1b[0m";
pub const COLOR_RED: &str = "\x1b[31m";
pub const COLOR_GREEN: &str = "\x1b[32m";
pub const COLOR_YELLOW: &str = "\x1b[33m";
pub const COLOR_CYAN: &str = "\x1b[36m";
pub const COLOR_BOLD: &str = "\x1b[1m";

/// Print the human-readable run summary.
pub fn print_summary(results: &[MultiEnvResult], compare: bool) {
    println!("{}==== Summary ===={}", COLOR_BOLD, COLOR_RESET);

    let summary = to_summary(aggregate_results(results));
    let diff_count = if compare {
        results.iter().filter(|r| r.diff.is_some()).count()
    } else {
        0
    };

    println!(
        "Total Requests: {}\nSucceeded: {}{}{}\nFailed: {}{}{}",
        summary.total_requests,
        COLOR_GREEN,
        summary.succeeded,
        COLOR_RESET,
        COLOR_RED,
        summary.failed,
        COLOR_RESET,
    );

    if compare && diff_count > 0 {
        println!("Differences: {}{}{}", COLOR_YELLOW, diff_count, COLOR_RESET);
    }

    println!("\nLatency (ms):");
    print_latency_stats(&summary.latency);

    if summary.by_target.len() > 1 {
        println!("\nPer-Target Statistics:");

        let mut targets: Vec<_> = summary.by_target.iter().collect();
        targets.sort_by(|a, b| a.0.cmp(b.0));

        for (target, stats) in targets {
            println!(
                "\n{}{}:{}\n  Succeeded: {}\n  Failed: {}\n  Latency:",
                COLOR_CYAN, target, COLOR_RESET, stats.succeeded, stats.failed,
            );
            print_latency_stats(&stats.latency);
        }
    }
}

fn print_latency_stats(stats: &LatencyStats) {
    println!(
        "  p50: {}  p90: {}  p95: {}  p99: {}\n  min: {}  max: {}  avg: {}",
        stats.p50, stats.p90, stats.p95, stats.p99, stats.min, stats.max, stats.avg,
    );
}

/// Print per-request outcome lines, including diffs in compare mode.
pub fn print_results(results: &[MultiEnvResult], compare: bool) {
    for result in results {
        let mut targets: Vec<_> = result.responses.keys().collect();
        targets.sort();

        for target in targets {
            let response = &result.responses[target];
            match response.status() {
                Some(status) => {
                    let color = if response.succeeded() {
                        COLOR_GREEN
                    } else {
                        COLOR_RED
                    };
                    println!(
                        "[{}] {} {} -> {}{}{} ({}ms) [{}]",
                        result.index,
                        result.request.method,
                        result.request.path,
                        color,
                        status,
                        COLOR_RESET,
                        response.latency_ms,
                        target,
                    );
                }
                None => {
                    println!(
                        "[{}] {} {} -> {}ERROR{} {} [{}]",
                        result.index,
                        result.request.method,
                        result.request.path,
                        COLOR_RED,
                        COLOR_RESET,
                        response.error().unwrap_or("unknown"),
                        target,
                    );
                }
            }
        }

        if compare {
            if let Some(diff) = &result.diff {
                println!(
                    "  {}diff:{} status_mismatch={} body_mismatch={} volatile_only={}",
                    COLOR_YELLOW,
                    COLOR_RESET,
                    diff.status_mismatch,
                    diff.body_mismatch,
                    diff.volatile_only,
                );
                if !diff.ignored_fields.is_empty() {
                    println!("  ignored fields: {}", diff.ignored_fields.join(", "));
                }
            }
        }
    }
}

/// Write the `{results, summary}` envelope to stdout.
pub fn print_json(run: &RunData) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(run)?);
    Ok(())
}

/// Write the envelope plus the rule verdict to stdout.
pub fn print_rules_json(run: &RunData, evaluation: &RuleEvaluation) -> Result<()> {
    let output = serde_json::json!({
        "results": run.results,
        "summary": run.summary,
        "rule_evaluation": evaluation,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Human-readable rule verdict, written to stderr by the caller.
pub fn format_rule_result(evaluation: &RuleEvaluation) -> String {
    let rule_width = 55;
    let heavy = "\u{2550}".repeat(rule_width);
    let light = "\u{2500}".repeat(rule_width);

    let mut out = String::new();
    out.push('\n');
    out.push_str(&heavy);
    out.push_str("\n            REGRESSION RULES EVALUATION\n");
    out.push_str(&heavy);
    out.push_str("\n\n");

    if evaluation.passed {
        out.push_str("PASSED - All rules satisfied\n");
        out.push_str(&heavy);
        out.push('\n');
        return out;
    }

    out.push_str(&format!(
        "FAILED - {} rule violation(s) detected\n\n",
        evaluation.failures.len()
    ));

    for (i, failure) in evaluation.failures.iter().enumerate() {
        out.push_str(&light);
        out.push_str(&format!("\nFailure #{}\n", i + 1));
        out.push_str(&light);
        out.push('\n');
        out.push_str(&format!("Rule:    {}\n", failure.rule));
        out.push_str(&format!("Scope:   {}\n", failure.scope));
        out.push_str(&format!("Message: {}\n", failure.message));

        if let Some(details) = failure.details.as_object() {
            out.push_str("\nDetails:\n");
            for (key, value) in details {
                out.push_str(&format!("  {}: {}\n", key, value));
            }
        }
        out.push('\n');
    }

    out.push_str(&heavy);
    out.push('\n');
    out
}

/// Exit code for a plain replay run: diffs only matter in compare mode.
pub fn exit_for_results(results: &[MultiEnvResult], compare: bool) -> crate::error::ExitCode {
    if compare && has_diffs(results) {
        crate::error::ExitCode::Diffs
    } else {
        crate::error::ExitCode::Ok
    }
}
