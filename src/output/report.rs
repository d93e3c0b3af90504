//! Self-contained HTML run report

use crate::aggregate::{aggregate_results, to_summary};
use crate::error::Result;
use crate::model::{LatencyStats, MultiEnvResult};
use chrono::Utc;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Generate an HTML report for a replay run.
pub fn generate_html(
    results: &[MultiEnvResult],
    input_file: &str,
    targets: &[String],
    compare: bool,
    output: &Path,
) -> Result<()> {
    let summary = to_summary(aggregate_results(results));
    let diff_count = results.iter().filter(|r| r.diff.is_some()).count();

    let file = File::create(output)?;
    let mut w = BufWriter::new(file);

    writeln!(
        w,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>reverb replay report</title>
<style>
body {{ font-family: -apple-system, 'Segoe UI', sans-serif; margin: 2rem; color: #1a1a2e; }}
h1 {{ font-size: 1.4rem; }}
table {{ border-collapse: collapse; margin: 1rem 0; }}
th, td {{ border: 1px solid #d0d0e0; padding: 0.35rem 0.7rem; text-align: left; font-size: 0.85rem; }}
th {{ background: #f0f0f8; }}
.cards {{ display: flex; gap: 1rem; }}
.card {{ border: 1px solid #d0d0e0; border-radius: 6px; padding: 0.8rem 1.2rem; }}
.card .n {{ font-size: 1.5rem; font-weight: 600; }}
.ok {{ color: #1a7f37; }}
.fail {{ color: #cf222e; }}
.diff {{ color: #9a6700; }}
.muted {{ color: #666; font-size: 0.8rem; }}
</style>
</head>
<body>
<h1>reverb replay report</h1>
<p class="muted">Generated {generated} &middot; input: {input} &middot; targets: {targets}</p>"#,
        generated = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        input = escape(input_file),
        targets = escape(&targets.join(", ")),
    )?;

    writeln!(
        w,
        r#"<div class="cards">
<div class="card"><div class="n">{total}</div>Total requests</div>
<div class="card"><div class="n ok">{ok}</div>Succeeded</div>
<div class="card"><div class="n fail">{fail}</div>Failed</div>"#,
        total = summary.total_requests,
        ok = summary.succeeded,
        fail = summary.failed,
    )?;
    if compare {
        writeln!(
            w,
            r#"<div class="card"><div class="n diff">{}</div>Differences</div>"#,
            diff_count
        )?;
    }
    writeln!(w, "</div>")?;

    writeln!(w, "<h2>Latency (ms)</h2>")?;
    write_latency_table(&mut w, "overall", &summary.latency)?;

    if summary.by_target.len() > 1 {
        writeln!(w, "<h2>Per target</h2>")?;
        writeln!(
            w,
            "<table><tr><th>Target</th><th>Succeeded</th><th>Failed</th><th>p50</th><th>p95</th><th>p99</th><th>max</th></tr>"
        )?;

        let mut entries: Vec<_> = summary.by_target.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (target, stats) in entries {
            writeln!(
                w,
                "<tr><td>{}</td><td class=\"ok\">{}</td><td class=\"fail\">{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(target),
                stats.succeeded,
                stats.failed,
                stats.latency.p50,
                stats.latency.p95,
                stats.latency.p99,
                stats.latency.max,
            )?;
        }
        writeln!(w, "</table>")?;
    }

    writeln!(w, "<h2>Requests</h2>")?;
    writeln!(
        w,
        "<table><tr><th>#</th><th>Method</th><th>Path</th><th>Request ID</th><th>Statuses</th><th>Diff</th></tr>"
    )?;

    for result in results {
        let mut statuses: Vec<String> = Vec::new();
        let mut targets_sorted: Vec<_> = result.responses.keys().collect();
        targets_sorted.sort();
        for target in targets_sorted {
            let response = &result.responses[target];
            match response.status() {
                Some(status) => statuses.push(format!("{}: {}", escape(target), status)),
                None => statuses.push(format!("{}: error", escape(target))),
            }
        }

        let diff_cell = match &result.diff {
            Some(diff) if diff.volatile_only => "volatile-only".to_string(),
            Some(diff) if diff.status_mismatch && diff.body_mismatch => "status + body".to_string(),
            Some(diff) if diff.status_mismatch => "status".to_string(),
            Some(_) => "body".to_string(),
            None => "&ndash;".to_string(),
        };

        writeln!(
            w,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td><code>{}</code></td><td>{}</td><td>{}</td></tr>",
            result.index,
            escape(&result.request.method),
            escape(&result.request.path),
            escape(&result.request_id),
            statuses.join("<br>"),
            diff_cell,
        )?;
    }

    writeln!(w, "</table>\n</body>\n</html>")?;
    w.flush()?;
    Ok(())
}

fn write_latency_table<W: Write>(w: &mut W, label: &str, stats: &LatencyStats) -> Result<()> {
    writeln!(
        w,
        "<table><tr><th></th><th>p50</th><th>p90</th><th>p95</th><th>p99</th><th>min</th><th>max</th><th>avg</th></tr>\
<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr></table>",
        escape(label),
        stats.p50,
        stats.p90,
        stats.p95,
        stats.p99,
        stats.min,
        stats.max,
        stats.avg,
    )?;
    Ok(())
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogEntry, ReplayResult, ResponseDiff};
    use std::collections::HashMap;

    #[test]
    fn test_escape() {
        assert_eq!(escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_generate_html_report() {
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), ReplayResult::ok(0, 200, String::new(), 10));
        responses.insert("b".to_string(), ReplayResult::ok(0, 500, String::new(), 20));

        let results = vec![MultiEnvResult {
            index: 0,
            request: LogEntry {
                method: "GET".to_string(),
                path: "/users".to_string(),
                ..Default::default()
            },
            request_id: "deadbeefdeadbeef".to_string(),
            responses,
            diff: Some(ResponseDiff {
                status_mismatch: true,
                ..Default::default()
            }),
        }];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");
        generate_html(
            &results,
            "input.jsonl",
            &["a".to_string(), "b".to_string()],
            true,
            &path,
        )
        .unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("/users"));
        assert!(html.contains("deadbeefdeadbeef"));
        assert!(html.contains("Differences"));
        assert!(html.contains("a: 200"));
        assert!(html.contains("b: 500"));
    }
}
