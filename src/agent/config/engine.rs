use super::*;

fn context_capacity() -> usize {
    10240
}

fn registry_capacity() -> usize {
    10240
}

fn aggregator_capacity() -> usize {
    4096
}

/// Table sizes for the correlation engine. These are fixed for the lifetime
/// of the process.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Engine {
    #[serde(default = "context_capacity")]
    context_capacity: usize,

    #[serde(default = "registry_capacity")]
    registry_capacity: usize,

    // distinct keys in each counter table, (pid) and (pid, status) are
    // bounded separately
    #[serde(default = "aggregator_capacity")]
    aggregator_capacity: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            context_capacity: context_capacity(),
            registry_capacity: registry_capacity(),
            aggregator_capacity: aggregator_capacity(),
        }
    }
}

impl Engine {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.context_capacity == 0 {
            return Err(ConfigError::Capacity("context_capacity"));
        }

        if self.registry_capacity == 0 {
            return Err(ConfigError::Capacity("registry_capacity"));
        }

        if self.aggregator_capacity == 0 {
            return Err(ConfigError::Capacity("aggregator_capacity"));
        }

        Ok(())
    }

    pub fn context_capacity(&self) -> usize {
        self.context_capacity
    }

    pub fn registry_capacity(&self) -> usize {
        self.registry_capacity
    }

    pub fn aggregator_capacity(&self) -> usize {
        self.aggregator_capacity
    }
}
