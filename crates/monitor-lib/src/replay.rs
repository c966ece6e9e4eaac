//! Warm-up replay of recorded batches
//!
//! History is not persisted, so a restarted monitor starts cold. Replaying
//! a JSON-lines file of recent batches (one object per line, oldest first)
//! rebuilds the rolling windows without firing alerts.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::anomaly::AnomalyMonitor;
use crate::models::Batch;

/// Outcome of a replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Batches folded into the history
    pub applied: usize,
    /// Lines that were not valid batches
    pub rejected: usize,
}

/// Replay batches from a JSON-lines file into the monitor's history
pub fn replay_file(monitor: &mut AnomalyMonitor, path: &Path) -> Result<ReplayStats> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    replay_reader(monitor, BufReader::new(file))
        .with_context(|| format!("Failed to read replay file {}", path.display()))
}

/// Replay batches from any line-oriented reader
///
/// Blank lines are skipped. Lines that fail to decode or parse, including
/// lines that are not valid UTF-8, are counted and skipped rather than
/// aborting the replay. Only I/O failures of the reader are returned.
pub fn replay_reader<R: BufRead>(monitor: &mut AnomalyMonitor, reader: R) -> Result<ReplayStats> {
    let metrics: Vec<String> = monitor.tracked_metrics().map(str::to_string).collect();
    let mut stats = ReplayStats::default();

    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let parsed = serde_json::from_slice::<serde_json::Value>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|value| Batch::from_json(&value, &metrics).map_err(anyhow::Error::from));

        match parsed {
            Ok(batch) => {
                monitor.warm_up(&batch);
                stats.applied += 1;
            }
            Err(e) => {
                stats.rejected += 1;
                warn!(line = index + 1, error = %e, "Skipping invalid replay line");
            }
        }
    }

    Ok(stats)
}
