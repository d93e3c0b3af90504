//! Input log reading and filtering
//!
//! The input file is JSON Lines: one [`LogEntry`] per line. Blank lines are
//! skipped; invalid lines are logged and skipped, never aborting the run.

pub mod nginx;

use crate::error::{ReverbError, Result};
use crate::model::LogEntry;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// Read entries from the input file. `limit > 0` caps the prefix read.
pub fn read_entries(path: &Path, limit: usize) -> Result<Vec<LogEntry>> {
    let file = File::open(path)
        .map_err(|e| ReverbError::Input(format!("failed to open {:?}: {}", path, e)))?;

    parse_entries(BufReader::new(file), limit)
}

/// Parse entries from any buffered reader, skipping invalid lines with a
/// warning.
pub fn parse_entries<R: BufRead>(reader: R, limit: usize) -> Result<Vec<LogEntry>> {
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        if limit > 0 && entries.len() >= limit {
            break;
        }

        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<LogEntry>(trimmed) {
            Ok(entry) if entry.is_valid() => entries.push(entry),
            Ok(_) => {
                warn!(line = line_num + 1, "Skipping entry with empty method or path");
            }
            Err(e) => {
                warn!(line = line_num + 1, "Skipping invalid line: {}", e);
            }
        }
    }

    Ok(entries)
}

/// Parse the input file and print each entry without replaying anything.
pub fn dry_run(path: &Path) -> Result<()> {
    if path.to_string_lossy().contains("..") {
        return Err(ReverbError::Input(format!("invalid input path: {:?}", path)));
    }

    let entries = read_entries(path, 0)?;
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "[DRY RUN] - {}: {} {} ({} header(s), body: {})",
            i + 1,
            entry.method,
            entry.path,
            entry.headers.len(),
            if entry.has_body() { "yes" } else { "no" },
        );
    }

    println!("[DRY RUN] {} entr(ies) parsed", entries.len());
    Ok(())
}

/// Pre-replay entry filter.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Case-insensitive exact method match.
    pub method: Option<String>,
    /// Substring path match.
    pub path: Option<String>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.method.is_none() && self.path.is_none()
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(method) = &self.method {
            if !entry.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }

        if let Some(path) = &self.path {
            if !entry.path.contains(path.as_str()) {
                return false;
            }
        }

        true
    }
}

/// Apply the filter, keeping input order.
pub fn apply_filter(entries: Vec<LogEntry>, filter: &Filter) -> Vec<LogEntry> {
    if filter.is_empty() {
        return entries;
    }

    entries.into_iter().filter(|e| filter.matches(e)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn entry(method: &str, path: &str) -> LogEntry {
        LogEntry {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_skips_blank_and_invalid_lines() {
        let input = "\n{\"method\":\"GET\",\"path\":\"/a\"}\nnot json\n\n{\"method\":\"POST\",\"path\":\"/b\"}\n";
        let entries = parse_entries(Cursor::new(input), 0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "/a");
        assert_eq!(entries[1].method, "POST");
    }

    #[test]
    fn test_parse_skips_empty_method_or_path() {
        let input = "{\"method\":\"\",\"path\":\"/a\"}\n{\"method\":\"GET\",\"path\":\"  \"}\n{\"method\":\"GET\",\"path\":\"/ok\"}\n";
        let entries = parse_entries(Cursor::new(input), 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/ok");
    }

    #[test]
    fn test_parse_respects_limit() {
        let input = "{\"method\":\"GET\",\"path\":\"/1\"}\n{\"method\":\"GET\",\"path\":\"/2\"}\n{\"method\":\"GET\",\"path\":\"/3\"}\n";
        let entries = parse_entries(Cursor::new(input), 2).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_read_entries_missing_file() {
        assert!(read_entries(Path::new("/nonexistent/input.jsonl"), 0).is_err());
    }

    #[test]
    fn test_filter_method_case_insensitive() {
        let filter = Filter {
            method: Some("get".to_string()),
            path: None,
        };

        let filtered = apply_filter(vec![entry("GET", "/a"), entry("POST", "/a")], &filter);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].method, "GET");
    }

    #[test]
    fn test_filter_path_substring() {
        let filter = Filter {
            method: None,
            path: Some("/api".to_string()),
        };

        let filtered = apply_filter(
            vec![entry("GET", "/api/users"), entry("GET", "/health")],
            &filter,
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].path, "/api/users");
    }

    #[test]
    fn test_empty_filter_keeps_everything() {
        let entries = vec![entry("GET", "/a"), entry("POST", "/b")];
        let filtered = apply_filter(entries.clone(), &Filter::default());
        assert_eq!(filtered, entries);
    }

    #[test]
    fn test_dry_run_rejects_path_traversal() {
        assert!(dry_run(Path::new("../etc/passwd")).is_err());
    }
}
