//! Terminal progress reporting for replay runs

use parking_lot::Mutex;
use std::io::Write;
use std::time::{Duration, Instant};

/// Sink for per-entry completion events.
///
/// The scheduler notifies the sink exactly once per completed entry and once
/// when the run ends.
pub trait ProgressSink: Send + Sync {
    fn increment(&self);
    fn finish(&self);
}

/// Sink used when progress display is disabled (JSON output).
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn increment(&self) {}
    fn finish(&self) {}
}

/// Terminal progress bar, rendered at most once per increment.
pub struct ProgressBar {
    total: usize,
    width: usize,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    current: usize,
    started: Instant,
}

impl ProgressBar {
    pub fn new(total: usize) -> Self {
        let bar = Self {
            total,
            width: 50,
            state: Mutex::new(ProgressState {
                current: 0,
                started: Instant::now(),
            }),
        };

        bar.render(&bar.state.lock());
        bar
    }

    fn render(&self, state: &ProgressState) {
        if self.total == 0 {
            return;
        }

        let percent = state.current as f64 / self.total as f64;
        let filled = (percent * self.width as f64) as usize;

        let bar: String = "\u{2588}".repeat(filled) + &"\u{2591}".repeat(self.width - filled);

        let elapsed = state.started.elapsed();
        let eta = if state.current > 0 {
            let rate = state.current as f64 / elapsed.as_secs_f64();
            let remaining = (self.total - state.current) as f64;
            Duration::from_secs_f64(remaining / rate)
        } else {
            Duration::ZERO
        };

        print!(
            "\r[{}] {}/{} ({:.1}%) | Elapsed: {} | ETA: {}  ",
            bar,
            state.current,
            self.total,
            percent * 100.0,
            format_duration(elapsed),
            format_duration(eta),
        );
        std::io::stdout().flush().ok();
    }
}

impl ProgressSink for ProgressBar {
    fn increment(&self) {
        let mut state = self.state.lock();
        state.current += 1;
        self.render(&state);
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.current = self.total;
        self.render(&state);
        println!();
    }
}

fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);

    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}
