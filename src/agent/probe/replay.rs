use super::{dispatch, ProbeEvent};
use crate::agent::engine::{Engine, DECODE_ERROR};

use anyhow::Context;
use tracing::{info, warn};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: u64,
    pub errors: u64,
}

/// Feeds newline-delimited JSON events to the engine in file order. Blank
/// lines and lines starting with `#` are skipped. Lines that fail to parse
/// are counted and skipped.
pub fn replay<R: BufRead>(reader: R, engine: &Engine) -> std::io::Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<ProbeEvent>(line) {
            Ok(event) => {
                dispatch(engine, &event);
                summary.events += 1;
            }
            Err(e) => {
                warn!("skipping line {}: {e}", idx + 1);
                DECODE_ERROR.increment();
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

pub fn spawn(path: PathBuf, engine: Arc<Engine>) -> anyhow::Result<JoinHandle<()>> {
    let file = File::open(&path)
        .with_context(|| format!("failed to open replay file: {}", path.display()))?;

    info!("replaying probe events from: {}", path.display());

    let handle = std::thread::Builder::new()
        .name("httpred-replay".to_string())
        .spawn(move || match replay(BufReader::new(file), &engine) {
            Ok(summary) => info!(
                "replay finished: {} events, {} errors",
                summary.events, summary.errors
            ),
            Err(e) => warn!("replay aborted: {e}"),
        })?;

    Ok(handle)
}
