//! Volatile-field masking for JSON body comparison
//!
//! Fields like timestamps and generated IDs change between runs; masking
//! drops them from both JSON trees before structural comparison so only
//! meaningful differences surface.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Field names and patterns to drop before comparing JSON bodies.
///
/// Exact names match the leaf key case-insensitively at every object depth;
/// patterns match against the original key. Immutable after construction.
#[derive(Debug, Clone)]
pub struct VolatileConfig {
    ignore_fields: Vec<String>,
    ignore_patterns: Vec<Regex>,
}

const DEFAULT_IGNORE_FIELDS: &[&str] = &[
    "timestamp",
    "createdAt",
    "updatedAt",
    "id",
    "uuid",
    "requestId",
    "traceId",
    "spanId",
    "date",
    "time",
    "version",
];

const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    r"(?i).*_at$",
    r"(?i).*_id$",
    r"(?i).*timestamp.*",
    r"(?i).*uuid.*",
];

impl Default for VolatileConfig {
    fn default() -> Self {
        Self {
            ignore_fields: DEFAULT_IGNORE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("default volatile pattern is valid"))
                .collect(),
        }
    }
}

impl VolatileConfig {
    /// Default set extended with user-supplied names and patterns.
    /// Patterns that fail to compile are skipped.
    pub fn from_flags(fields: &[String], patterns: &[String]) -> Self {
        let mut config = Self::default();

        config
            .ignore_fields
            .extend(fields.iter().map(|f| f.to_string()));

        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(re) => config.ignore_patterns.push(re),
                Err(e) => debug!(pattern = %pattern, "Skipping invalid ignore pattern: {}", e),
            }
        }

        config
    }

    /// Whether a key should be dropped before comparison.
    pub fn should_ignore(&self, field: &str) -> bool {
        if self
            .ignore_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(field))
        {
            return true;
        }

        self.ignore_patterns.iter().any(|re| re.is_match(field))
    }
}

/// Drop volatile keys from a JSON tree at every object depth; arrays recurse
/// into each element.
pub fn mask(value: &Value, config: &VolatileConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !config.should_ignore(key))
                .map(|(key, v)| (key.clone(), mask(v, config)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| mask(v, config)).collect()),
        other => other.clone(),
    }
}

/// Result of comparing two bodies under a volatile mask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolatileDiff {
    /// Raw bodies differ byte-wise.
    pub has_diff: bool,
    /// Raw bodies differ but the masked trees are equal.
    pub volatile_only: bool,
    /// Masked trees differ.
    pub stable_fields_diff: bool,
    /// Dotted paths of every key the mask dropped, across both sides,
    /// de-duplicated by path.
    pub ignored_fields: Vec<String>,
}

/// Compare two JSON bodies under the mask.
///
/// Returns `Err` when either body fails to parse as JSON; callers fall back
/// to raw string comparison for that pair.
pub fn detailed_compare(
    body1: &str,
    body2: &str,
    config: &VolatileConfig,
) -> Result<VolatileDiff, serde_json::Error> {
    let raw_diff = body1 != body2;

    let tree1: Value = serde_json::from_str(body1)?;
    let tree2: Value = serde_json::from_str(body2)?;

    let masked_equal = mask(&tree1, config) == mask(&tree2, config);

    let mut seen = HashSet::new();
    let mut ignored_fields = Vec::new();
    collect_ignored(&tree1, "", config, &mut seen, &mut ignored_fields);
    collect_ignored(&tree2, "", config, &mut seen, &mut ignored_fields);

    Ok(VolatileDiff {
        has_diff: raw_diff,
        volatile_only: raw_diff && masked_equal,
        stable_fields_diff: !masked_equal,
        ignored_fields,
    })
}

fn collect_ignored(
    value: &Value,
    prefix: &str,
    config: &VolatileConfig,
    seen: &mut HashSet<String>,
    fields: &mut Vec<String>,
) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };

                if config.should_ignore(key) && seen.insert(path.clone()) {
                    fields.push(path.clone());
                }

                collect_ignored(v, &path, config, seen, fields);
            }
        }
        Value::Array(items) => {
            // Array elements share the parent's path.
            for item in items {
                collect_ignored(item, prefix, config, seen, fields);
            }
        }
        _ => {}
    }
}
