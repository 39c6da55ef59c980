use tracing::{debug, error, info};

use std::sync::Arc;

mod config;
mod engine;
mod exposition;
mod metrics;
mod probe;
mod samplers;

pub use config::Config;

use engine::{Aggregator, Engine, Settings};
use samplers::SAMPLERS;

/// Runs the agent: attaches the configured event source to the correlation
/// engine and exposes the resulting counters over HTTP until interrupted.
pub fn run(config: Config) {
    // configure debug log
    let level = config.log().level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level.to_level_filter())
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize debug log: {e}");
    }

    // forward records from crates that use `log`
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("failed to forward log records: {e}");
    }

    let config = Arc::new(config);

    let settings = Settings::from(config.as_ref());
    let aggregator = Arc::new(Aggregator::new(settings.aggregator_capacity));
    let engine = Arc::new(Engine::with_aggregator(settings, aggregator));

    match engine.filter().target() {
        Some(pid) => info!("observing process: {pid}"),
        None => info!("observing all processes"),
    }

    let (contexts, connections) = engine.capacities();
    debug!(
        "engine capacities: {contexts} contexts, {connections} connections, {} counter keys",
        settings.aggregator_capacity
    );

    let mut samplers = Vec::new();

    for init in SAMPLERS {
        match init(config.clone()) {
            Ok(Some(s)) => {
                debug!("'{}' sampler initialized", s.name());
                samplers.push(s);
            }
            Ok(None) => {}
            Err(e) => error!("failed to initialize sampler: {e}"),
        }
    }

    let samplers = Arc::new(samplers.into_boxed_slice());

    // initialize async runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(1)
        .thread_name("httpred")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to launch async runtime: {e}");
            std::process::exit(1);
        }
    };

    // the source thread runs detached until the process exits
    let _source = match probe::spawn(config.clone(), engine.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };

    let server = rt.spawn(exposition::http::serve(config, engine, samplers));

    rt.block_on(async move {
        tokio::select! {
            result = server => {
                match result {
                    Ok(Err(e)) => error!("{e:#}"),
                    Err(e) => error!("http server task failed: {e}"),
                    Ok(Ok(())) => {}
                }
                std::process::exit(1);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
            }
        }
    });
}
