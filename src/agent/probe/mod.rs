//! Delivers syscall observations to the engine.
//!
//! Observations come from one of two sources: the BPF programs attached to
//! the syscall tracepoints (feature `bpf`), or a file of previously recorded
//! events. Both end in the same four engine entry points.

use crate::agent::config::SourceKind;
use crate::agent::engine::{AddressInfo, ContextKey, Engine};
use crate::agent::Config;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::info;

use std::sync::Arc;
use std::thread::JoinHandle;

#[cfg(any(test, all(feature = "bpf", target_os = "linux")))]
mod record;
mod replay;

#[cfg(all(feature = "bpf", target_os = "linux"))]
mod bpf;

#[cfg(all(feature = "bpf", target_os = "linux"))]
use record::dispatch_record;

/// A single syscall observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProbeEvent {
    AcceptEntry {
        ctx: ContextKey,
        #[serde(default)]
        addr: AddressInfo,
    },
    AcceptExit {
        ctx: ContextKey,
        ret: i64,
    },
    WriteEntry {
        ctx: ContextKey,
        fd: u32,
        count: u64,
        #[serde(with = "payload")]
        payload: Vec<u8>,
    },
    CloseEntry {
        ctx: ContextKey,
        fd: u32,
    },
}

/// Forwards one observation to the matching engine entry point.
pub fn dispatch(engine: &Engine, event: &ProbeEvent) {
    match event {
        ProbeEvent::AcceptEntry { ctx, addr } => engine.on_accept_entry(*ctx, *addr),
        ProbeEvent::AcceptExit { ctx, ret } => engine.on_accept_exit(*ctx, *ret),
        ProbeEvent::WriteEntry {
            ctx,
            fd,
            count,
            payload,
        } => {
            let count = usize::try_from(*count).unwrap_or(usize::MAX);
            engine.on_write_entry(*ctx, *fd, payload, count)
        }
        ProbeEvent::CloseEntry { ctx, fd } => engine.on_close_entry(*ctx, *fd),
    }
}

/// Starts the configured event source. Returns the handle of the thread
/// feeding the engine, if any.
pub fn spawn(config: Arc<Config>, engine: Arc<Engine>) -> anyhow::Result<Option<JoinHandle<()>>> {
    match config.source().kind() {
        SourceKind::None => {
            info!("no probe source configured, connection counters will not advance");
            Ok(None)
        }
        SourceKind::Replay => {
            let path = config
                .source()
                .path()
                .ok_or_else(|| anyhow!("replay source requires a path"))?;

            replay::spawn(path.to_path_buf(), engine).map(Some)
        }
        #[cfg(all(feature = "bpf", target_os = "linux"))]
        SourceKind::Bpf => bpf::spawn(config, engine).map(Some),
        #[cfg(not(all(feature = "bpf", target_os = "linux")))]
        SourceKind::Bpf => Err(anyhow!(
            "this build does not include the bpf source, rebuild with `--features bpf` on linux"
        )),
    }
}

/// Payload bytes are written as text so that recorded events stay readable.
mod payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}
