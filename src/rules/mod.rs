//! Regression rules: configuration, validation, and evaluation
//!
//! A YAML rule tree is evaluated against the current run and an optional
//! prior run; the verdict maps to the process exit code. Evaluation is pure:
//! pass/fail is data, never an error.

mod engine;

pub use engine::{evaluate, RuleEvaluation, RuleFailure};

use crate::error::{ReverbError, Result};
use crate::model::{LatencyStats, RunData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Top-level rules file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Rules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_mismatch: Option<StatusMismatchRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_diff: Option<BodyDiffRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoint_rules: Vec<EndpointRule>,
}

/// Fail when the number of status-mismatching results exceeds `max`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMismatchRule {
    pub max: usize,
}

/// Fail on any non-volatile body difference, unless all its masked fields
/// match one of the `ignore` patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyDiffRule {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

/// Fail when a latency metric regressed more than `regression_percent`
/// relative to the baseline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyRule {
    pub metric: LatencyMetric,
    pub regression_percent: f64,
}

/// Rules scoped to requests whose path starts with `path` (and whose method
/// matches exactly, when given).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRule {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_mismatch: Option<StatusMismatchRule>,
}

/// Latency summary metric a rule can target. Unknown metric names are
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyMetric {
    P50,
    P90,
    P95,
    P99,
    Avg,
    Min,
    Max,
}

impl LatencyMetric {
    pub fn of(self, stats: &LatencyStats) -> i64 {
        match self {
            LatencyMetric::P50 => stats.p50,
            LatencyMetric::P90 => stats.p90,
            LatencyMetric::P95 => stats.p95,
            LatencyMetric::P99 => stats.p99,
            LatencyMetric::Avg => stats.avg,
            LatencyMetric::Min => stats.min,
            LatencyMetric::Max => stats.max,
        }
    }
}

impl fmt::Display for LatencyMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LatencyMetric::P50 => "p50",
            LatencyMetric::P90 => "p90",
            LatencyMetric::P95 => "p95",
            LatencyMetric::P99 => "p99",
            LatencyMetric::Avg => "avg",
            LatencyMetric::Min => "min",
            LatencyMetric::Max => "max",
        };
        f.write_str(name)
    }
}

/// Parse and validate a rules file.
pub fn parse_rules_file(path: &Path) -> Result<RulesConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ReverbError::Input(format!("failed to read rules file {:?}: {}", path, e)))?;

    let raw: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| ReverbError::Input(format!("malformed rules YAML: {}", e)))?;
    let config: RulesConfig = serde_yaml::from_value(raw)
        .map_err(|e| ReverbError::Config(format!("invalid rules configuration: {}", e)))?;
    validate_rules(&config)?;

    Ok(config)
}

/// Reject invalid rule configurations before evaluation.
pub fn validate_rules(config: &RulesConfig) -> Result<()> {
    if let Some(latency) = &config.rules.latency {
        validate_latency_rule(latency).map_err(|e| prefixed(e, "global latency rule"))?;
    }

    for (i, endpoint) in config.rules.endpoint_rules.iter().enumerate() {
        if endpoint.path.trim().is_empty() {
            return Err(ReverbError::Config(format!(
                "endpoint_rules[{}]: path is required",
                i
            )));
        }

        if let Some(latency) = &endpoint.latency {
            validate_latency_rule(latency)
                .map_err(|e| prefixed(e, &format!("endpoint_rules[{}].latency", i)))?;
        }
    }

    Ok(())
}

fn validate_latency_rule(rule: &LatencyRule) -> Result<()> {
    if rule.regression_percent < 0.0 {
        return Err(ReverbError::Config(format!(
            "regression_percent cannot be negative: {:.2}",
            rule.regression_percent
        )));
    }

    Ok(())
}

fn prefixed(err: ReverbError, scope: &str) -> ReverbError {
    ReverbError::Config(format!("{}: {}", scope, err))
}

/// Load a prior run's `{results, summary}` JSON for latency comparisons.
pub fn load_baseline(path: &Path) -> Result<RunData> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ReverbError::Input(format!("failed to read baseline file {:?}: {}", path, e))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| ReverbError::Input(format!("failed to parse baseline JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_rules(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_full_rules_file() {
        let file = write_rules(
            r#"
rules:
  status_mismatch:
    max: 2
  body_diff:
    allowed: false
    ignore:
      - "user.*"
      - "*.updated_at"
  latency:
    metric: p95
    regression_percent: 20.0
  endpoint_rules:
    - path: /api/users
      method: GET
      latency:
        metric: p99
        regression_percent: 10.0
"#,
        );

        let config = parse_rules_file(file.path()).unwrap();
        assert_eq!(config.rules.status_mismatch.as_ref().unwrap().max, 2);
        assert!(!config.rules.body_diff.as_ref().unwrap().allowed);
        assert_eq!(
            config.rules.latency.as_ref().unwrap().metric,
            LatencyMetric::P95
        );
        assert_eq!(config.rules.endpoint_rules.len(), 1);
        assert_eq!(
            config.rules.endpoint_rules[0].method.as_deref(),
            Some("GET")
        );
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let file = write_rules(
            r#"
rules:
  latency:
    metric: p42
    regression_percent: 10.0
"#,
        );

        assert!(parse_rules_file(file.path()).is_err());
    }

    #[test]
    fn test_negative_regression_rejected() {
        let file = write_rules(
            r#"
rules:
  latency:
    metric: p95
    regression_percent: -5.0
"#,
        );

        let err = parse_rules_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn test_endpoint_without_path_rejected() {
        let file = write_rules(
            r#"
rules:
  endpoint_rules:
    - method: GET
"#,
        );

        assert!(parse_rules_file(file.path()).is_err());
    }

    #[test]
    fn test_empty_rules_file_is_valid() {
        let file = write_rules("rules: {}\n");
        let config = parse_rules_file(file.path()).unwrap();
        assert!(config.rules.status_mismatch.is_none());
        assert!(config.rules.endpoint_rules.is_empty());
    }

    #[test]
    fn test_load_baseline_roundtrip() {
        let run = RunData::default();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&run).unwrap().as_bytes())
            .unwrap();

        let loaded = load_baseline(file.path()).unwrap();
        assert_eq!(loaded.summary.total_requests, 0);
    }

    #[test]
    fn test_load_baseline_invalid_json() {
        let file = write_rules("not json");
        assert!(load_baseline(file.path()).is_err());
    }

    #[test]
    fn test_metric_accessor() {
        let stats = LatencyStats {
            p50: 1,
            p90: 2,
            p95: 3,
            p99: 4,
            min: 5,
            max: 6,
            avg: 7,
        };
        assert_eq!(LatencyMetric::P50.of(&stats), 1);
        assert_eq!(LatencyMetric::Max.of(&stats), 6);
        assert_eq!(LatencyMetric::Avg.of(&stats), 7);
    }
}
