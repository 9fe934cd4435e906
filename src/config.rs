use std::env;
use std::sync::Arc;

use log::warn;

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::executor::ExecMode;
use crate::gateway::ShardConnector;
use crate::runtime::EngineRuntime;

/// Environment variable overriding the default fan-out parallelism.
pub const PARALLELISM_ENV: &str = "SHARDBRIDGE_PARALLELISM";

pub struct CoordinatorConfig {
    /// Opens one engine gateway per shard.
    pub connector: Arc<dyn ShardConnector>,
    /// Number of shards. Fixed for the lifetime of the coordinator.
    pub shards: usize,
    /// Fan-out parallelism; `<= 1` runs shards one at a time.
    pub parallelism: usize,
    /// Engine init/fin bracket shared by every shard gateway.
    pub runtime: EngineRuntime,
    /// Seed for keyless record placement. `None` seeds from entropy.
    pub routing_seed: Option<u64>,
}

impl CoordinatorConfig {
    /// Create a config with sane defaults.
    pub fn new(connector: Arc<dyn ShardConnector>, shards: usize) -> Self {
        Self {
            connector,
            shards,
            parallelism: default_parallelism(),
            runtime: EngineRuntime::noop(),
            routing_seed: None,
        }
    }

    pub fn exec_mode(&self) -> ExecMode {
        ExecMode::from_parallelism(self.parallelism)
    }
}

fn default_parallelism() -> usize {
    match env::var(PARALLELISM_ENV) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring {}={:?}: not a number", PARALLELISM_ENV, raw);
                num_cpus::get().max(1)
            }
        },
        Err(_) => num_cpus::get().max(1),
    }
}

/// Fluent construction of a [`Coordinator`].
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorBuilder {
    pub fn new(connector: Arc<dyn ShardConnector>) -> Self {
        Self {
            config: CoordinatorConfig::new(connector, 1),
        }
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.config.shards = shards;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.config.parallelism = parallelism;
        self
    }

    pub fn runtime(mut self, runtime: EngineRuntime) -> Self {
        self.config.runtime = runtime;
        self
    }

    pub fn routing_seed(mut self, seed: u64) -> Self {
        self.config.routing_seed = Some(seed);
        self
    }

    pub fn config(self) -> CoordinatorConfig {
        self.config
    }

    /// Opens every shard.
    pub fn build(self) -> Result<Coordinator> {
        Coordinator::open(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryConnector;

    #[test]
    fn builder_overrides_defaults() {
        let config = CoordinatorBuilder::new(Arc::new(MemoryConnector::new(3)))
            .shards(3)
            .parallelism(1)
            .routing_seed(7)
            .config();
        assert_eq!(config.shards, 3);
        assert_eq!(config.exec_mode(), ExecMode::Sequential);
        assert_eq!(config.routing_seed, Some(7));
    }

    #[test]
    fn defaults_use_at_least_one_worker() {
        let config = CoordinatorConfig::new(Arc::new(MemoryConnector::new(2)), 2);
        assert!(config.parallelism >= 1 || env::var(PARALLELISM_ENV).is_ok());
        assert_eq!(config.routing_seed, None);
        assert_eq!(config.runtime.active_leases(), 0);
    }
}
