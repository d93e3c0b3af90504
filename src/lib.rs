//! Reverb - HTTP Traffic Replay & Comparison
//!
//! Replays captured HTTP traffic against one or more targets concurrently,
//! records status, latency, and body per response, and computes structured
//! diffs between targets so a new service version can be compared against a
//! baseline. A companion capture mode runs a recording reverse proxy that
//! writes live traffic into the same replayable log format.
//!
//! - **Scheduling**: bounded concurrency, rate ceiling, inter-request pacing
//! - **Comparison**: JSON-aware diffs with volatile-field masking
//! - **Verdicts**: declarative regression rules over aggregated results
//! - **Capture**: HTTP(S) reverse proxy appending JSON-Lines records
//!
//! # Quick Start
//!
//! ```no_run
//! use reverb::replay::{NullProgress, ReplayConfig, Replayer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> reverb::Result<()> {
//!     let entries = reverb::input::read_entries("requests.jsonl".as_ref(), 0)?;
//!
//!     let replayer = Replayer::new(ReplayConfig {
//!         targets: vec!["127.0.0.1:8080".to_string()],
//!         concurrency: 4,
//!         ..Default::default()
//!     })?;
//!
//!     let (_abort_tx, abort_rx) = tokio::sync::watch::channel(false);
//!     let results = replayer.run(entries, Arc::new(NullProgress), abort_rx).await;
//!     println!("{} entries replayed", results.len());
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod capture;
pub mod compare;
pub mod error;
pub mod input;
pub mod model;
pub mod output;
pub mod replay;
pub mod rules;
pub mod stats;

pub use error::{ExitCode, ReverbError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
