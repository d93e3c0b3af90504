//! Rule evaluation over a replay run

use super::{BodyDiffRule, EndpointRule, LatencyRule, RulesConfig, StatusMismatchRule};
use crate::model::{LatencyStats, MultiEnvResult, RunData};
use crate::stats::calculate_latency_stats;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Verdict of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub passed: bool,
    pub failures: Vec<RuleFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule: String,
    pub scope: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Evaluate all rules against the current run and an optional baseline.
///
/// Global rules run first, then endpoint rules; failures are sorted by
/// (scope, rule) for deterministic output. Idempotent: re-evaluating the
/// same inputs yields an equal result.
pub fn evaluate(
    config: &RulesConfig,
    current: &RunData,
    baseline: Option<&RunData>,
) -> RuleEvaluation {
    let mut failures = Vec::new();
    let rules = &config.rules;

    if let Some(rule) = &rules.status_mismatch {
        failures.extend(evaluate_status_mismatch(rule, &current.results, "global"));
    }

    if let Some(rule) = &rules.body_diff {
        failures.extend(evaluate_body_diff(rule, &current.results, "global"));
    }

    if let (Some(rule), Some(baseline)) = (&rules.latency, baseline) {
        failures.extend(evaluate_latency(
            rule,
            &current.summary.latency,
            &baseline.summary.latency,
            "global",
        ));
    }

    for endpoint in &rules.endpoint_rules {
        failures.extend(evaluate_endpoint(endpoint, current, baseline));
    }

    failures.sort_by(|a, b| a.scope.cmp(&b.scope).then_with(|| a.rule.cmp(&b.rule)));

    RuleEvaluation {
        passed: failures.is_empty(),
        failures,
    }
}

fn evaluate_status_mismatch(
    rule: &StatusMismatchRule,
    results: &[MultiEnvResult],
    scope: &str,
) -> Vec<RuleFailure> {
    let affected: Vec<usize> = results
        .iter()
        .filter(|r| r.diff.as_ref().is_some_and(|d| d.status_mismatch))
        .map(|r| r.index)
        .collect();

    if affected.len() <= rule.max {
        return Vec::new();
    }

    vec![RuleFailure {
        rule: "status_mismatch".to_string(),
        scope: scope.to_string(),
        message: format!(
            "Found {} status mismatches, maximum allowed is {}",
            affected.len(),
            rule.max
        ),
        details: json!({
            "count": affected.len(),
            "max_allowed": rule.max,
            "affected_requests": affected,
        }),
    }]
}

fn evaluate_body_diff(
    rule: &BodyDiffRule,
    results: &[MultiEnvResult],
    scope: &str,
) -> Vec<RuleFailure> {
    if rule.allowed {
        return Vec::new();
    }

    let affected: Vec<usize> = results
        .iter()
        .filter(|r| {
            let Some(diff) = &r.diff else { return false };
            diff.body_mismatch
                && !diff.volatile_only
                && !all_ignored(&diff.ignored_fields, &rule.ignore)
        })
        .map(|r| r.index)
        .collect();

    if affected.is_empty() {
        return Vec::new();
    }

    vec![RuleFailure {
        rule: "body_diff".to_string(),
        scope: scope.to_string(),
        message: format!(
            "Found {} body differences (body diffs not allowed)",
            affected.len()
        ),
        details: json!({
            "count": affected.len(),
            "allowed": false,
            "affected_requests": affected,
        }),
    }]
}

fn all_ignored(ignored_fields: &[String], patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }

    ignored_fields
        .iter()
        .any(|field| patterns.iter().any(|p| match_pattern(field, p)))
}

/// Patterns: literal, `prefix.*`, or `*.suffix`.
fn match_pattern(field: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return field.ends_with(suffix);
    }

    if let Some(prefix) = pattern.strip_suffix(".*") {
        return field.starts_with(prefix);
    }

    field == pattern
}

fn evaluate_latency(
    rule: &LatencyRule,
    current: &LatencyStats,
    baseline: &LatencyStats,
    scope: &str,
) -> Vec<RuleFailure> {
    let current_value = rule.metric.of(current);
    let baseline_value = rule.metric.of(baseline);

    // No baseline signal to compare against.
    if baseline_value == 0 {
        return Vec::new();
    }

    let regression =
        (current_value as f64 - baseline_value as f64) / baseline_value as f64 * 100.0;

    if regression <= rule.regression_percent {
        return Vec::new();
    }

    vec![RuleFailure {
        rule: "latency".to_string(),
        scope: scope.to_string(),
        message: format!(
            "Latency regression of {:.2}% exceeds threshold of {:.2}% ({}: {}ms -> {}ms)",
            regression, rule.regression_percent, rule.metric, baseline_value, current_value
        ),
        details: json!({
            "metric": rule.metric.to_string(),
            "baseline_ms": baseline_value,
            "current_ms": current_value,
            "regression_percent": regression,
            "threshold_percent": rule.regression_percent,
        }),
    }]
}

fn evaluate_endpoint(
    rule: &EndpointRule,
    current: &RunData,
    baseline: Option<&RunData>,
) -> Vec<RuleFailure> {
    let matching = filter_by_endpoint(&current.results, &rule.path, rule.method.as_deref());
    if matching.is_empty() {
        return Vec::new();
    }

    let scope = match &rule.method {
        Some(method) => format!("endpoint:{} {}", method, rule.path),
        None => format!("endpoint:{}", rule.path),
    };

    let mut failures = Vec::new();

    if let Some(status_rule) = &rule.status_mismatch {
        failures.extend(evaluate_status_mismatch(status_rule, &matching, &scope));
    }

    if let (Some(latency_rule), Some(baseline)) = (&rule.latency, baseline) {
        let baseline_matching =
            filter_by_endpoint(&baseline.results, &rule.path, rule.method.as_deref());

        if !baseline_matching.is_empty() {
            failures.extend(evaluate_latency(
                latency_rule,
                &endpoint_latency(&matching),
                &endpoint_latency(&baseline_matching),
                &scope,
            ));
        }
    }

    failures
}

fn filter_by_endpoint(
    results: &[MultiEnvResult],
    path: &str,
    method: Option<&str>,
) -> Vec<MultiEnvResult> {
    results
        .iter()
        .filter(|r| r.request.path.starts_with(path))
        .filter(|r| method.map_or(true, |m| r.request.method == m))
        .cloned()
        .collect()
}

/// Latency stats recomputed over every response in the matching slice.
fn endpoint_latency(results: &[MultiEnvResult]) -> LatencyStats {
    let latencies: Vec<i64> = results
        .iter()
        .flat_map(|r| r.responses.values().map(|resp| resp.latency_ms))
        .collect();

    calculate_latency_stats(&latencies)
}
