use std::path::{Path, PathBuf};
use std::time::Duration;

use nebula_engine::{ConfigError, EngineConfig};

/// CLI surface (spec §6, "peripheral"): `--config-path`, `--workers`,
/// `--buffer-size`, `--query`. A CLI flag always wins over the same key in
/// the config file.
#[derive(clap::Parser, Debug)]
#[command(name = "nebula-worker", about = "single-node streaming query execution worker")]
pub struct Cli {
    /// Optional TOML file for settings not exposed as flags.
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Worker thread count. Defaults to available parallelism.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Buffer size in bytes for every pooled region.
    #[arg(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Path to the delimited-text input file the demo query reads from.
    #[arg(long)]
    pub query: PathBuf,
}

/// The subset of [`EngineConfig`] and demo-query knobs a config file may
/// set. Mirrors the teacher's pattern of a plain `serde::Deserialize`
/// struct for settings a CLI flag doesn't cover (spec §9 "Config" / §4.R).
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub workers: Option<usize>,
    pub buffer_size: Option<usize>,
    pub pool_capacity: Option<usize>,
    pub shutdown_timeout_secs: Option<u64>,
    pub window_size_ms: Option<u64>,
}

fn load_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|err| ConfigError(format!("reading {}: {err}", path.display())))?;
    toml::from_str(&text).map_err(|err| ConfigError(format!("parsing {}: {err}", path.display())))
}

/// What the engine and the demo query plan actually need, after folding
/// CLI flags over the optional config file.
pub struct ResolvedConfig {
    pub engine: EngineConfig,
    pub window_size_ms: u64,
    pub query_path: PathBuf,
}

pub fn resolve(cli: Cli) -> Result<ResolvedConfig, ConfigError> {
    let file = load_file_config(cli.config_path.as_deref())?;
    let mut engine = EngineConfig::default();

    if let Some(workers) = cli.workers.or(file.workers) {
        if workers == 0 {
            return Err(ConfigError("workers must be non-zero".to_string()));
        }
        engine.worker_threads = workers;
    }

    if let Some(buffer_size) = cli.buffer_size.or(file.buffer_size) {
        if buffer_size == 0 {
            return Err(ConfigError("buffer-size must be non-zero".to_string()));
        }
        engine.pool.buffer_size = buffer_size;
    }

    if let Some(capacity) = file.pool_capacity {
        if capacity == 0 {
            return Err(ConfigError("pool-capacity must be non-zero".to_string()));
        }
        engine.pool.pool_capacity = capacity;
    }

    if let Some(secs) = file.shutdown_timeout_secs {
        engine.shutdown_timeout = Duration::from_secs(secs);
    }

    let window_size_ms = file.window_size_ms.unwrap_or(1000);
    if window_size_ms == 0 {
        return Err(ConfigError("window-size-ms must be non-zero".to_string()));
    }

    Ok(ResolvedConfig {
        engine,
        window_size_ms,
        query_path: cli.query,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(query: &str) -> Cli {
        Cli {
            config_path: None,
            workers: None,
            buffer_size: None,
            query: PathBuf::from(query),
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_overridden() {
        let resolved = resolve(cli("data.csv")).unwrap();
        assert_eq!(resolved.window_size_ms, 1000);
        assert_eq!(resolved.query_path, PathBuf::from("data.csv"));
    }

    #[test]
    fn cli_worker_count_overrides_the_default() {
        let mut args = cli("data.csv");
        args.workers = Some(4);
        let resolved = resolve(args).unwrap();
        assert_eq!(resolved.engine.worker_threads, 4);
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let mut args = cli("data.csv");
        args.workers = Some(0);
        assert!(resolve(args).is_err());
    }

    #[test]
    fn missing_config_file_is_a_configuration_error() {
        let mut args = cli("data.csv");
        args.config_path = Some(PathBuf::from("/nonexistent/nebula-worker.toml"));
        assert!(resolve(args).is_err());
    }
}
