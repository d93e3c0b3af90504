//! Nginx access-log conversion to the replay input format

use crate::error::{ReverbError, Result};
use crate::model::LogEntry;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Supported nginx log grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NginxFormat {
    #[default]
    Combined,
    Common,
}

impl FromStr for NginxFormat {
    type Err = ReverbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "combined" => Ok(NginxFormat::Combined),
            "common" => Ok(NginxFormat::Common),
            other => Err(ReverbError::Input(format!(
                "unknown nginx format '{}', expected combined or common",
                other
            ))),
        }
    }
}

/// Conversion totals reported after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub parsed: usize,
    pub skipped: usize,
}

/// Converts nginx access logs into JSON-Lines [`LogEntry`] records.
pub struct NginxConverter {
    format: NginxFormat,
    combined: Regex,
    common: Regex,
}

impl NginxConverter {
    pub fn new(format: NginxFormat) -> Self {
        // Combined: 127.0.0.1 - - [07/Dec/2024:10:15:30 +0000] "GET /users/123 HTTP/1.1" 200 1234 "http://example.com" "Mozilla/5.0"
        // Common:   127.0.0.1 - - [07/Dec/2024:10:15:30 +0000] "GET /users/123 HTTP/1.1" 200 1234
        Self {
            format,
            combined: Regex::new(
                r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+) \S+" (\d+) (\d+) "([^"]*)" "([^"]*)""#,
            )
            .expect("combined log regex is valid"),
            common: Regex::new(r#"^(\S+) \S+ \S+ \[([^\]]+)\] "(\S+) (\S+) \S+" (\d+) (\d+)"#)
                .expect("common log regex is valid"),
        }
    }

    /// Convert a log file, writing one JSON line per matched input line.
    /// Path arguments containing `..` are rejected before any I/O.
    pub fn convert(&self, input: &Path, output: &Path) -> Result<ConvertStats> {
        for path in [input, output] {
            if path.to_string_lossy().contains("..") {
                return Err(ReverbError::Input(format!("invalid path: {:?}", path)));
            }
        }

        let in_file = File::open(input)
            .map_err(|e| ReverbError::Input(format!("failed to open input {:?}: {}", input, e)))?;
        let out_file = File::create(output).map_err(|e| {
            ReverbError::Input(format!("failed to create output {:?}: {}", output, e))
        })?;

        let reader = BufReader::new(in_file);
        let mut writer = BufWriter::new(out_file);
        let mut stats = ConvertStats::default();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match self.parse_line(&line) {
                Some(entry) => {
                    let json = serde_json::to_string(&entry)?;
                    writeln!(writer, "{}", json)?;
                    stats.parsed += 1;
                }
                None => {
                    warn!(
                        line = line_num + 1,
                        "Skipping line that does not match nginx log format"
                    );
                    stats.skipped += 1;
                }
            }
        }

        writer.flush()?;
        Ok(stats)
    }

    /// Parse one access-log line into a replayable entry.
    pub fn parse_line(&self, line: &str) -> Option<LogEntry> {
        let captures = match self.format {
            NginxFormat::Combined => self
                .combined
                .captures(line)
                .or_else(|| self.common.captures(line)),
            NginxFormat::Common => self.common.captures(line),
        }?;

        let method = captures.get(3)?.as_str();
        let path = captures.get(4)?.as_str();

        let mut entry = LogEntry {
            method: method.to_uppercase(),
            path: path.split('?').next().unwrap_or(path).to_string(),
            ..Default::default()
        };

        if let Some(user_agent) = captures.get(8).map(|m| m.as_str()) {
            if !user_agent.is_empty() && user_agent != "-" {
                entry
                    .headers
                    .insert("User-Agent".to_string(), vec![user_agent.to_string()]);
            }
        }

        if let Some(referrer) = captures.get(7).map(|m| m.as_str()) {
            if !referrer.is_empty() && referrer != "-" {
                entry
                    .headers
                    .insert("Referrer".to_string(), vec![referrer.to_string()]);
            }
        }

        Some(entry)
    }
}
