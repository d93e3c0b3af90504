//! Replay scheduler
//!
//! Drives captured entries against one or more targets with bounded
//! concurrency, an optional requests-per-second ceiling, and optional
//! inter-request pacing. Entries are processed strictly in input order:
//! the fan-out for one entry joins before the next entry starts, while the
//! tasks within one entry run concurrently up to the permit pool's capacity.

mod progress;
mod request;

pub use progress::{NullProgress, ProgressBar, ProgressSink};
pub use request::{build_request, decode_body, fingerprint, USER_AGENT_TOKEN};

use crate::compare::{compare_responses, VolatileConfig};
use crate::error::Result;
use crate::model::{LogEntry, MultiEnvResult, ReplayResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Latencies are rounded down to this bucket size.
pub const LATENCY_BUCKET_MS: i64 = 5;

/// Configuration for a replay run.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Targets to replay against (`host:port`, optionally with scheme).
    pub targets: Vec<String>,
    /// Permit pool capacity shared across the whole run.
    pub concurrency: usize,
    /// Hard per-request wall-clock budget (connect + send + read).
    pub timeout: Duration,
    /// Sleep between entries, after the previous entry's tasks joined.
    pub delay: Duration,
    /// Requests-per-second ceiling; 0 means unlimited.
    pub rate_limit: u32,
    /// Compute diffs across targets.
    pub compare: bool,
    /// Report diffs whose body differences are all volatile.
    pub show_volatile_diffs: bool,
    /// Authorization header value applied to every request.
    pub auth: Option<String>,
    /// Extra headers in `"Key: Value"` form, overwriting entry headers.
    pub headers: Vec<String>,
    /// Replay over https (both TLS cert and key were configured).
    pub tls: bool,
    /// Volatile-field mask; `None` compares bodies byte-wise.
    pub volatile: Option<VolatileConfig>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            concurrency: 1,
            timeout: Duration::from_millis(5000),
            delay: Duration::ZERO,
            rate_limit: 0,
            compare: false,
            show_volatile_diffs: false,
            auth: None,
            headers: Vec::new(),
            tls: false,
            volatile: None,
        }
    }
}

/// Replays entries against the configured targets.
pub struct Replayer {
    config: ReplayConfig,
    client: reqwest::Client,
}

impl Replayer {
    pub fn new(config: ReplayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| crate::error::ReverbError::Build(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Run the replay. Returns results in source-entry order.
    ///
    /// On abort the scheduler stops starting new entries, cancels in-flight
    /// tasks, and returns the committed prefix; an entry is either complete
    /// or absent.
    pub async fn run(
        &self,
        entries: Vec<LogEntry>,
        progress: Arc<dyn ProgressSink>,
        abort: watch::Receiver<bool>,
    ) -> Vec<MultiEnvResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut targets = self.config.targets.clone();
        targets.sort();

        let mut pacer = (self.config.rate_limit > 0).then(|| {
            let period = Duration::from_secs_f64(1.0 / self.config.rate_limit as f64);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            interval
        });

        let mut results = Vec::with_capacity(entries.len());
        let mut abort = abort;

        'entries: for (index, entry) in entries.into_iter().enumerate() {
            if *abort.borrow() {
                break;
            }

            if let Some(pacer) = pacer.as_mut() {
                let mut abort_rx = abort.clone();
                tokio::select! {
                    _ = pacer.tick() => {}
                    _ = wait_abort(&mut abort_rx) => break 'entries,
                }
            }

            let mut handles = Vec::with_capacity(targets.len());
            for target in &targets {
                let semaphore = semaphore.clone();
                let client = self.client.clone();
                let config = self.config.clone();
                let entry = entry.clone();
                let target = target.clone();
                let mut abort_rx = abort.clone();

                handles.push(tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return None;
                    };

                    let result = tokio::select! {
                        result = replay_single(index, &entry, &client, &target, &config) => {
                            Some(result)
                        }
                        _ = wait_abort(&mut abort_rx) => None,
                    };

                    result.map(|r| (target, r))
                }));
            }

            let mut responses = HashMap::with_capacity(targets.len());
            let mut aborted = false;
            for joined in futures::future::join_all(handles).await {
                match joined {
                    Ok(Some((target, result))) => {
                        responses.insert(target, result);
                    }
                    _ => aborted = true,
                }
            }

            // Never commit a partial entry.
            if aborted || responses.len() != targets.len() {
                debug!(index, "Replay aborted mid-entry, dropping partial result");
                break;
            }

            let mut result = MultiEnvResult {
                index,
                request_id: fingerprint(&entry),
                request: entry,
                responses,
                diff: None,
            };

            if self.config.compare && targets.len() > 1 {
                result.diff = compare_responses(
                    &result.responses,
                    &targets,
                    self.config.volatile.as_ref(),
                    self.config.show_volatile_diffs,
                );
            }

            results.push(result);
            progress.increment();

            if !self.config.delay.is_zero() {
                let mut abort_rx = abort.clone();
                tokio::select! {
                    _ = tokio::time::sleep(self.config.delay) => {}
                    _ = wait_abort(&mut abort_rx) => break 'entries,
                }
            }
        }

        progress.finish();
        results
    }
}

/// Resolves when the abort flag flips to true; pends forever if the sender
/// is gone (no abort can arrive anymore).
async fn wait_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }

        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Replay one entry against one target.
///
/// Build and transport failures become error-outcome results; the scheduler
/// never fails the run on per-request errors.
async fn replay_single(
    index: usize,
    entry: &LogEntry,
    client: &reqwest::Client,
    target: &str,
    config: &ReplayConfig,
) -> ReplayResult {
    let request = match build_request(client, entry, target, config) {
        Ok(request) => request,
        Err(e) => return ReplayResult::err(index, e.to_string(), 0),
    };

    let start = Instant::now();

    match client.execute(request).await {
        Ok(response) => {
            let status = response.status().as_u16();
            match response.text().await {
                Ok(body) => {
                    let latency = normalize_latency(start.elapsed().as_millis() as i64);
                    ReplayResult::ok(index, status, body, latency)
                }
                Err(e) => {
                    let latency = normalize_latency(start.elapsed().as_millis() as i64);
                    ReplayResult::err(index, transport_error(&e, config), latency)
                }
            }
        }
        Err(e) => {
            let latency = normalize_latency(start.elapsed().as_millis() as i64);
            ReplayResult::err(index, transport_error(&e, config), latency)
        }
    }
}

fn transport_error(e: &reqwest::Error, config: &ReplayConfig) -> String {
    if e.is_timeout() {
        format!("request timed out after {}ms", config.timeout.as_millis())
    } else {
        e.to_string()
    }
}

/// Round down to the latency bucket.
pub fn normalize_latency(ms: i64) -> i64 {
    (ms / LATENCY_BUCKET_MS) * LATENCY_BUCKET_MS
}
