use std::time::Duration;

use nebula_unsafe_collection::PoolConfig;

/// The plain struct the core engine is configured with. How this gets
/// built (file, env, CLI flags) is entirely peripheral -- see
/// `nebula-worker`'s config loader -- the engine itself only ever sees
/// this struct (spec §9 "Config").
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub worker_threads: usize,
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            worker_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
