//! Kernel side of the probe. Attaches to:
//! * `syscalls/sys_enter_accept4` and `syscalls/sys_exit_accept4`
//! * `syscalls/sys_enter_accept` and `syscalls/sys_exit_accept`
//! * `syscalls/sys_enter_write`
//! * `syscalls/sys_enter_close`
//!
//! Writes and closes are only forwarded for descriptors in the `tracked` map,
//! which the accept exit handler fills. Records arrive on the `events` ring
//! buffer and are handed to the engine from a dedicated thread. Records the
//! kernel side could not deliver are summed from the per-cpu `drops` map.

mod skel {
    include!(concat!(env!("OUT_DIR"), "/http_red.bpf.rs"));
}

mod stats;

use skel::*;
use stats::*;

use super::dispatch_record;
use crate::agent::engine::Engine;
use crate::agent::Config;

use libbpf_rs::skel::{OpenSkel, Skel, SkelBuilder};
use libbpf_rs::{MapCore, MapFlags, OpenObject, PrintLevel, RingBuffer, RingBufferBuilder};
use metriken::LazyCounter;
use tracing::{debug, error, info};

use std::mem::MaybeUninit;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const DROPS_INTERVAL: Duration = Duration::from_secs(1);

// indexed by DROP_* in http_red.h
static DROPS: [&LazyCounter; 2] = [&RINGBUF_DROPPED, &TRACKED_DROPPED];

fn libbpf_print_fn(_level: PrintLevel, msg: String) {
    debug!("libbpf: {}", msg.trim_end());
}

/// Loads and attaches the probe, then drains the ring buffer until the
/// process exits. Returns once the probe is attached or has failed to load.
pub fn spawn(config: Arc<Config>, engine: Arc<Engine>) -> anyhow::Result<JoinHandle<()>> {
    let (tx, rx) = sync_channel(1);

    let btf_path = config.general().btf_path().map(|s| s.to_string());
    let target = engine.filter().target().unwrap_or(0);
    let (_, connections) = engine.capacities();
    let tracked = u32::try_from(connections).unwrap_or(u32::MAX);

    let thread = std::thread::Builder::new()
        .name("httpred-bpf".to_string())
        .spawn(move || run(btf_path, target, tracked, engine, tx))?;

    match rx.recv() {
        Ok(Ok(())) => {
            info!("bpf probe attached");
            Ok(thread)
        }
        Ok(Err(e)) => Err(anyhow::anyhow!("failed to attach bpf probe: {e}")),
        Err(_) => Err(anyhow::anyhow!("bpf thread exited during initialization")),
    }
}

fn run(
    btf_path: Option<String>,
    target: u32,
    tracked: u32,
    engine: Arc<Engine>,
    tx: SyncSender<Result<(), libbpf_rs::Error>>,
) {
    libbpf_rs::set_print(Some((PrintLevel::Debug, libbpf_print_fn)));

    // storage for the BPF object, the skeleton borrows from it
    let mut open_object = MaybeUninit::<OpenObject>::uninit();

    let skel = match load(&mut open_object, btf_path.as_deref(), target, tracked) {
        Ok(skel) => skel,
        Err(e) => {
            let _ = tx.send(Err(e));
            return;
        }
    };

    let ringbuffer = match ringbuffer(&skel, engine) {
        Ok(rb) => rb,
        Err(e) => {
            let _ = tx.send(Err(e));
            return;
        }
    };

    let _ = tx.send(Ok(()));

    let mut next_drops = Instant::now();

    loop {
        if let Err(e) = ringbuffer.poll(POLL_TIMEOUT) {
            if e.kind() != libbpf_rs::ErrorKind::Interrupted {
                error!("ring buffer poll failed: {e}");
                return;
            }
        }

        let now = Instant::now();

        if now >= next_drops {
            refresh_drops(&skel);
            next_drops = now + DROPS_INTERVAL;
        }
    }
}

fn refresh_drops(skel: &HttpRedSkel<'_>) {
    for (idx, counter) in DROPS.iter().enumerate() {
        let key = (idx as u32).to_ne_bytes();

        match skel.maps.drops.lookup_percpu(&key, MapFlags::ANY) {
            Ok(Some(values)) => {
                counter.set(sum_percpu(&values));
            }
            Ok(None) => {}
            Err(e) => debug!("failed to read probe drop counts: {e}"),
        }
    }
}

/// Sums the per-cpu `u64` values of a single map entry.
fn sum_percpu(values: &[Vec<u8>]) -> u64 {
    values
        .iter()
        .filter_map(|cpu| {
            let mut value = 0u64;
            plain::copy_from_bytes(&mut value, cpu).ok()?;
            Some(value)
        })
        .fold(0, u64::wrapping_add)
}

fn load<'obj>(
    open_object: &'obj mut MaybeUninit<OpenObject>,
    btf_path: Option<&str>,
    target: u32,
    tracked: u32,
) -> Result<HttpRedSkel<'obj>, libbpf_rs::Error> {
    let builder = HttpRedSkelBuilder::default();

    let mut open_skel = if let Some(btf_path) = btf_path {
        debug!("loading bpf probe with external BTF from: {btf_path}");

        let btf_path_cstr = std::ffi::CString::new(btf_path)
            .map_err(|_| libbpf_rs::Error::from_raw_os_error(libc::EINVAL))?;

        let open_opts = unsafe {
            let mut opts: libbpf_sys::bpf_object_open_opts = std::mem::zeroed();
            opts.sz = std::mem::size_of::<libbpf_sys::bpf_object_open_opts>() as libbpf_sys::size_t;
            opts.btf_custom_path = btf_path_cstr.as_ptr();
            opts
        };

        match builder.open_opts(open_opts, open_object) {
            Ok(skel) => skel,
            Err(e) => {
                error!("failed to load external BTF from {btf_path}: {e}");
                return Err(e);
            }
        }
    } else {
        builder.open(open_object)?
    };

    debug!(
        "http_red sys_enter_write() BPF instruction count: {}",
        open_skel.progs.sys_enter_write.insn_cnt()
    );

    open_skel.maps.tracked.set_max_entries(tracked)?;

    let mut skel = open_skel.load()?;

    skel.maps
        .target
        .update(&0u32.to_ne_bytes(), &target.to_ne_bytes(), MapFlags::ANY)?;

    skel.attach()?;

    Ok(skel)
}

fn ringbuffer<'skel>(
    skel: &'skel HttpRedSkel<'_>,
    engine: Arc<Engine>,
) -> Result<RingBuffer<'skel>, libbpf_rs::Error> {
    let mut builder = RingBufferBuilder::new();

    builder.add(&skel.maps.events, move |data: &[u8]| {
        dispatch_record(&engine, data)
    })?;

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_each_cpu() {
        let values = vec![
            3u64.to_ne_bytes().to_vec(),
            0u64.to_ne_bytes().to_vec(),
            39u64.to_ne_bytes().to_vec(),
        ];

        assert_eq!(sum_percpu(&values), 42);
    }

    #[test]
    fn skips_short_values() {
        let values = vec![7u64.to_ne_bytes().to_vec(), vec![1, 2, 3]];

        assert_eq!(sum_percpu(&values), 7);
    }

    #[test]
    fn no_cpus() {
        assert_eq!(sum_percpu(&[]), 0);
    }
}
