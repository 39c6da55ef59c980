use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

mod engine;
mod general;
mod log;
mod sampler;
mod source;
mod target;

pub use engine::Engine;
pub use general::General;
pub use log::Log;
pub use sampler::Sampler as SamplerConfig;
pub use source::{Source, SourceKind};
pub use target::Target;

fn enabled() -> bool {
    true
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to open config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("ttl couldn't be parsed: {0}")]
    Ttl(#[from] humantime::DurationError),
    #[error("bad listen address: {0}")]
    Listen(String),
    #[error("BTF file not found: {0}")]
    BtfPath(PathBuf),
    #[error("replay source requires a path")]
    ReplayPath,
    #[error("replay file not found: {0}")]
    ReplayMissing(PathBuf),
    #[error("{0} must be greater than zero")]
    Capacity(&'static str),
}

#[derive(Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    general: General,
    #[serde(default)]
    log: Log,
    #[serde(default)]
    target: Target,
    #[serde(default)]
    engine: Engine,
    #[serde(default)]
    source: Source,
    #[serde(default)]
    defaults: SamplerConfig,
    #[serde(default)]
    samplers: HashMap<String, SamplerConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        config.check()?;

        Ok(config)
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        self.general.check()?;
        self.engine.check()?;
        self.source.check()?;

        Ok(())
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn general(&self) -> &General {
        &self.general
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Overrides the configured target process, used for the `--pid` flag.
    pub fn set_target_pid(&mut self, pid: u32) {
        self.target.set_pid(pid);
    }

    pub fn enabled(&self, name: &str) -> bool {
        let enabled = self
            .samplers
            .get(name)
            .and_then(|v| v.enabled())
            .unwrap_or(self.defaults.enabled().unwrap_or(enabled()));

        if enabled {
            debug!("'{name}' sampler is enabled");
        } else {
            debug!("'{name}' sampler is not enabled");
        }

        enabled
    }
}

fn resolve(listen: &str) -> Result<SocketAddr, ConfigError> {
    listen
        .to_socket_addrs()
        .map_err(|e| ConfigError::Listen(format!("{listen}: {e}")))?
        .next()
        .ok_or_else(|| ConfigError::Listen(format!("{listen}: could not resolve socket addr")))
}
