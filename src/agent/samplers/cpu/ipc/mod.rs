//! Opens a hardware perf counter group on each CPU to collect cycles and
//! instructions.
//!
//! And produces these stats:
//! * `cpu_cycles`
//! * `cpu_instructions`
//!
//! IPC is the ratio of the two and is calculated in post-processing or in an
//! observability stack.

const NAME: &str = "cpu_ipc";

use crate::agent::metrics::MetricGroup;
use crate::agent::samplers::{Sampler, SamplerResult, SAMPLERS};
use crate::agent::Config;
use crate::common::{cpus, MAX_CPUS};

use async_trait::async_trait;
use linkme::distributed_slice;
use perf_event::events::Hardware;
use perf_event::ReadFormat;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use std::sync::Arc;

mod stats;

use stats::*;

#[distributed_slice(SAMPLERS)]
fn init(config: Arc<Config>) -> SamplerResult {
    if !config.enabled(NAME) {
        return Ok(None);
    }

    let mut cores = Vec::new();

    for id in cpus()?.into_iter().filter(|id| *id < MAX_CPUS) {
        match Core::new(id) {
            Ok(core) => cores.push(core),
            Err(e) => debug!("{NAME} failed to open perf counters on CPU{id}: {e}"),
        }
    }

    if cores.is_empty() {
        warn!("{NAME} hardware perf counters are unavailable, sampler disabled");
        return Ok(None);
    }

    debug!("{NAME} opened perf counters on {} CPUs", cores.len());

    for core in &cores {
        CPU_CYCLES.insert_metadata(core.id, "cpu".to_string(), core.id.to_string());
        CPU_INSTRUCTIONS.insert_metadata(core.id, "cpu".to_string(), core.id.to_string());
    }

    Ok(Some(Box::new(Ipc {
        cores: Mutex::new(cores),
    })))
}

struct Ipc {
    cores: Mutex<Vec<Core>>,
}

#[async_trait]
impl Sampler for Ipc {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn refresh(&self) {
        let mut cores = self.cores.lock().await;

        for core in cores.iter_mut() {
            core.refresh();
        }
    }
}

/// The perf counter group for a single logical CPU. Cycles leads the group
/// so that both counters are scheduled together.
struct Core {
    cycles: perf_event::Counter,
    instructions: perf_event::Counter,
    id: usize,
}

impl Core {
    fn new(id: usize) -> Result<Self, std::io::Error> {
        let mut cycles = perf_event::Builder::new(Hardware::CPU_CYCLES)
            .one_cpu(id)
            .any_pid()
            .exclude_hv(false)
            .exclude_kernel(false)
            .pinned(true)
            .read_format(
                ReadFormat::TOTAL_TIME_ENABLED | ReadFormat::TOTAL_TIME_RUNNING | ReadFormat::GROUP,
            )
            .build()?;

        let instructions = perf_event::Builder::new(Hardware::INSTRUCTIONS)
            .one_cpu(id)
            .any_pid()
            .exclude_hv(false)
            .exclude_kernel(false)
            .build_with_group(&mut cycles)?;

        cycles.enable_group()?;

        Ok(Self {
            cycles,
            instructions,
            id,
        })
    }

    fn refresh(&mut self) {
        if let Ok(group) = self.cycles.read_group() {
            if let (Some(cycles), Some(instructions)) =
                (group.get(&self.cycles), group.get(&self.instructions))
            {
                let _ = CPU_CYCLES.set(self.id, cycles.value());
                let _ = CPU_INSTRUCTIONS.set(self.id, instructions.value());
            }
        }
    }
}
