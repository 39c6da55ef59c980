use crate::agent::Config;

use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::trace;

use std::sync::Arc;
use std::time::Instant;

mod cpu;

#[distributed_slice]
pub static SAMPLERS: [fn(config: Arc<Config>) -> SamplerResult] = [..];

#[async_trait]
pub trait Sampler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn refresh(&self);

    async fn refresh_with_logging(&self) {
        let start = Instant::now();
        self.refresh().await;
        trace!(
            "{} refresh took {} us",
            self.name(),
            start.elapsed().as_micros()
        );
    }
}

pub type SamplerResult = anyhow::Result<Option<Box<dyn Sampler>>>;
