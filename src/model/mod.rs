//! Wire data model shared across the replay, capture, and rules pipelines
//!
//! Every struct here serializes to the JSON shapes the tool reads and writes:
//! input log lines, the `{results, summary}` output envelope, and baseline
//! files. `ReplayResult` is a tagged union internally but keeps the
//! three-optional-field layout on the wire for compatibility with existing
//! captured data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One captured request, one line of the input file.
///
/// The response-side fields are present when the record came from the capture
/// proxy; the replayer ignores them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    /// Base64-encoded bytes or a literal UTF-8 string; empty and `"null"`
    /// both mean no body.
    #[serde(default)]
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub latency_ms: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl LogEntry {
    /// Whether the entry carries a request body to send.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty() && self.body != "null"
    }

    /// A record is replayable only with a non-empty method and path.
    pub fn is_valid(&self) -> bool {
        !self.method.trim().is_empty() && !self.path.trim().is_empty()
    }
}

/// Outcome of a single replayed request: either the transport round trip
/// completed (any status code) or it did not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Ok { status: u16, body: String },
    Err { error: String },
}

/// Result of replaying one entry against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ReplayResultWire", from = "ReplayResultWire")]
pub struct ReplayResult {
    pub index: usize,
    /// Wall time from send to last byte read, rounded down to a 5 ms bucket.
    pub latency_ms: i64,
    pub outcome: ReplayOutcome,
}

impl ReplayResult {
    pub fn ok(index: usize, status: u16, body: String, latency_ms: i64) -> Self {
        Self {
            index,
            latency_ms,
            outcome: ReplayOutcome::Ok { status, body },
        }
    }

    pub fn err(index: usize, error: String, latency_ms: i64) -> Self {
        Self {
            index,
            latency_ms,
            outcome: ReplayOutcome::Err { error },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match &self.outcome {
            ReplayOutcome::Ok { status, .. } => Some(*status),
            ReplayOutcome::Err { .. } => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match &self.outcome {
            ReplayOutcome::Ok { body, .. } => Some(body.as_str()),
            ReplayOutcome::Err { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ReplayOutcome::Ok { .. } => None,
            ReplayOutcome::Err { error } => Some(error.as_str()),
        }
    }

    /// Transport completed and the status is below 400.
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, ReplayOutcome::Ok { status, .. } if *status < 400)
    }
}

/// Wire layout of [`ReplayResult`]: three optional fields whose presence
/// encodes the transport succeeded/failed dichotomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReplayResultWire {
    index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    latency_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl From<ReplayResult> for ReplayResultWire {
    fn from(r: ReplayResult) -> Self {
        match r.outcome {
            ReplayOutcome::Ok { status, body } => Self {
                index: r.index,
                status: Some(status),
                latency_ms: r.latency_ms,
                error: None,
                body: Some(body),
            },
            ReplayOutcome::Err { error } => Self {
                index: r.index,
                status: None,
                latency_ms: r.latency_ms,
                error: Some(error),
                body: None,
            },
        }
    }
}

impl From<ReplayResultWire> for ReplayResult {
    fn from(w: ReplayResultWire) -> Self {
        let outcome = match w.status {
            Some(status) => ReplayOutcome::Ok {
                status,
                body: w.body.unwrap_or_default(),
            },
            None => ReplayOutcome::Err {
                error: w.error.unwrap_or_else(|| "unknown error".to_string()),
            },
        };
        Self {
            index: w.index,
            latency_ms: w.latency_ms,
            outcome,
        }
    }
}

/// Outcome of one entry across all targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiEnvResult {
    pub index: usize,
    pub request: LogEntry,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub responses: HashMap<String, ReplayResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<ResponseDiff>,
}

/// Structured difference between responses across targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDiff {
    pub status_mismatch: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub status_codes: HashMap<String, u16>,
    pub body_mismatch: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub body_diffs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub latency_diff: HashMap<String, i64>,
    pub volatile_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_fields: Vec<String>,
}

/// Percentile and extrema summary over a latency population, in integer
/// milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50: i64,
    pub p90: i64,
    pub p95: i64,
    pub p99: i64,
    pub min: i64,
    pub max: i64,
    pub avg: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default)]
    pub latency: LatencyStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default)]
    pub latency: LatencyStats,
    #[serde(default)]
    pub by_target: HashMap<String, TargetStats>,
}

/// Intermediate aggregation form from which [`Summary`] is derived.
#[derive(Debug, Clone, Default)]
pub struct AggregatedStats {
    pub total_requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub latencies: Vec<i64>,
    pub by_target: HashMap<String, TargetStats>,
}

/// A full run: the per-entry results plus the aggregate summary. This is the
/// output envelope and the baseline-file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunData {
    #[serde(default)]
    pub results: Vec<MultiEnvResult>,
    #[serde(default)]
    pub summary: Summary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_body_presence() {
        let mut entry = LogEntry::default();
        assert!(!entry.has_body());
        entry.body = "null".to_string();
        assert!(!entry.has_body());
        entry.body = "eyJhIjoxfQ==".to_string();
        assert!(entry.has_body());
    }

    #[test]
    fn test_log_entry_validity() {
        let entry = LogEntry {
            method: "GET".to_string(),
            path: "/users".to_string(),
            ..Default::default()
        };
        assert!(entry.is_valid());

        let entry = LogEntry {
            method: "  ".to_string(),
            path: "/users".to_string(),
            ..Default::default()
        };
        assert!(!entry.is_valid());
    }

    #[test]
    fn test_replay_result_wire_roundtrip_ok() {
        let result = ReplayResult::ok(3, 200, "{\"a\":1}".to_string(), 15);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":200"));
        assert!(!json.contains("error"));

        let back: ReplayResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_replay_result_wire_roundtrip_err() {
        let result = ReplayResult::err(0, "connection refused".to_string(), 5);
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("status"));
        assert!(json.contains("connection refused"));

        let back: ReplayResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.status(), None);
        assert!(!back.succeeded());
    }

    #[test]
    fn test_replay_result_success_threshold() {
        assert!(ReplayResult::ok(0, 399, String::new(), 0).succeeded());
        assert!(!ReplayResult::ok(0, 400, String::new(), 0).succeeded());
        assert!(!ReplayResult::ok(0, 500, String::new(), 0).succeeded());
    }

    #[test]
    fn test_log_entry_parses_capture_record() {
        let line = r#"{"timestamp":"2024-12-07T10:15:30Z","method":"POST","path":"/api","headers":{"Content-Type":["application/json"]},"body":"eyJhIjoxfQ==","status":200,"response_headers":{},"response_body":"eyJiIjoyfQ==","latency_ms":12}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert_eq!(entry.method, "POST");
        assert_eq!(entry.status, Some(200));
        assert_eq!(entry.latency_ms, 12);
    }

    #[test]
    fn test_log_entry_parses_replay_only_record() {
        let line = r#"{"method":"GET","path":"/u","headers":{},"body":""}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();
        assert!(entry.is_valid());
        assert_eq!(entry.status, None);
    }
}
