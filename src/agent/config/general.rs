use super::*;

use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_millis(10);

fn listen() -> String {
    "0.0.0.0:4243".into()
}

fn ttl() -> String {
    "10ms".into()
}

#[derive(Deserialize)]
pub struct General {
    #[serde(default = "listen")]
    listen: String,

    // snapshots are cached for this long so that scrapes don't contend with
    // the event source
    #[serde(default = "ttl")]
    ttl: String,

    // external BTF file for kernels without /sys/kernel/btf/vmlinux
    #[serde(default)]
    btf_path: Option<String>,
}

impl Default for General {
    fn default() -> Self {
        Self {
            listen: listen(),
            ttl: ttl(),
            btf_path: None,
        }
    }
}

impl General {
    pub fn check(&self) -> Result<(), ConfigError> {
        self.ttl.parse::<humantime::Duration>()?;

        self.listen()?;

        if let Some(ref btf_path) = self.btf_path {
            if !Path::new(btf_path).exists() {
                return Err(ConfigError::BtfPath(PathBuf::from(btf_path)));
            }
        }

        Ok(())
    }

    pub fn listen(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.listen)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
            .parse::<humantime::Duration>()
            .map(Into::into)
            .unwrap_or(DEFAULT_TTL)
    }

    #[cfg(any(test, all(feature = "bpf", target_os = "linux")))]
    pub fn btf_path(&self) -> Option<&str> {
        self.btf_path.as_deref()
    }
}
