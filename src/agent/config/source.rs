use super::*;

/// Where probe events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Syscall tracepoints, requires the `bpf` feature.
    Bpf,
    /// A file of newline-delimited JSON events.
    Replay,
    /// No events, only the samplers run.
    None,
}

impl Default for SourceKind {
    #[cfg(all(feature = "bpf", target_os = "linux"))]
    fn default() -> Self {
        Self::Bpf
    }

    #[cfg(not(all(feature = "bpf", target_os = "linux")))]
    fn default() -> Self {
        Self::None
    }
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Source {
    #[serde(default)]
    kind: SourceKind,

    #[serde(default)]
    path: Option<PathBuf>,
}

impl Source {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.kind == SourceKind::Replay {
            match self.path {
                None => return Err(ConfigError::ReplayPath),
                Some(ref path) if !path.exists() => {
                    return Err(ConfigError::ReplayMissing(path.clone()))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
