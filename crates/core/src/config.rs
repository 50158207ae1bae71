use anyhow::Context;
use aether_shared::ScanWindow;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::evolution::{EvolutionParams, DEFAULT_PIPELINE_ID};
use crate::risk::RiskLimits;
use crate::supervisor::{BackoffPolicy, SupervisorConfig};

/// Returns the directory containing the running executable.
/// Falls back to CWD if the exe path cannot be determined.
#[must_use]
pub fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(std::path::Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub supervisor: SupervisorConfig,
    pub evolution: EvolutionParams,
    pub risk: RiskLimits,
    pub event_history_size: usize,
}

fn env_or<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Failed to parse {} (got '{}')", key, raw))
}

impl AppConfig {
    #[allow(clippy::too_many_lines)]
    pub fn load() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
            let db_path = exe_dir().join("data").join("aether.db");
            format!("sqlite:{}", db_path.display())
        });

        let chains: Vec<String> = env::var("AETHER_CHAINS")
            .unwrap_or_else(|_| "ethereum,bsc,polygon".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if chains.is_empty() {
            anyhow::bail!("AETHER_CHAINS must name at least one chain");
        }

        let window_blocks: u64 = env_or("DISCOVERY_WINDOW_BLOCKS", "50")?;
        if window_blocks == 0 {
            anyhow::bail!("DISCOVERY_WINDOW_BLOCKS must be >= 1");
        }

        let cycle_interval_secs: u64 = env_or("CYCLE_INTERVAL_SECS", "60")?;
        if cycle_interval_secs > 86_400 {
            anyhow::bail!(
                "CYCLE_INTERVAL_SECS must be at most 86400 (got {})",
                cycle_interval_secs
            );
        }

        let stage_timeout_secs: u64 = env_or("STAGE_TIMEOUT_SECS", "30")?;
        if stage_timeout_secs == 0 || stage_timeout_secs > 300 {
            anyhow::bail!(
                "STAGE_TIMEOUT_SECS must be between 1 and 300 (got {})",
                stage_timeout_secs
            );
        }

        let max_retries: u32 = env_or("MAX_RETRIES", "3")?;
        if max_retries > 10 {
            anyhow::bail!("MAX_RETRIES must be at most 10 (got {})", max_retries);
        }

        let backoff = BackoffPolicy::new(
            Duration::from_millis(env_or("BACKOFF_BASE_MS", "500")?),
            Duration::from_millis(env_or("BACKOFF_CAP_MS", "30000")?),
        );

        let supervisor = SupervisorConfig {
            pipeline_id: DEFAULT_PIPELINE_ID.to_string(),
            chains,
            scan_window: ScanWindow {
                blocks: window_blocks,
            },
            max_retries,
            backoff,
            stage_timeout: Duration::from_secs(stage_timeout_secs),
            stale_data_max_cycles: env_or("STALE_DATA_MAX_CYCLES", "3")?,
            health_window: env_or("HEALTH_WINDOW_CYCLES", "10")?,
            health_alert_threshold: env_or("HEALTH_ALERT_THRESHOLD", "0.5")?,
            concurrency: env_or("COLLABORATOR_CONCURRENCY", "4")?,
            rate_per_sec: env_or("COLLABORATOR_RATE_PER_SEC", "10")?,
            signal_candidates: env_or("SIGNAL_CANDIDATES", "3")?,
            signal_symbol: env::var("SIGNAL_SYMBOL").unwrap_or_else(|_| "ETH/USDT".to_string()),
            cycle_interval: Duration::from_secs(cycle_interval_secs),
        };
        supervisor
            .validate()
            .context("Invalid supervisor configuration")?;

        let evolution = EvolutionParams {
            population_size: env_or("POPULATION_SIZE", "30")?,
            elitism_count: env_or("ELITISM_COUNT", "3")?,
            tournament_size: env_or("TOURNAMENT_SIZE", "5")?,
            mutation_rate: env_or("MUTATION_RATE", "0.1")?,
            mutation_scale: env_or("MUTATION_SCALE", "0.1")?,
            max_generations: env_or("MAX_GENERATIONS", "50")?,
            convergence_patience: env_or("CONVERGENCE_PATIENCE", "5")?,
            convergence_epsilon: env_or("CONVERGENCE_EPSILON", "0.001")?,
            seed: env_or("EVOLUTION_SEED", "42")?,
        };
        evolution
            .validate()
            .context("Invalid evolution configuration")?;

        let risk = RiskLimits {
            max_position_fraction: env_or("MAX_POSITION_FRACTION", "0.1")?,
            max_stop_loss: env_or("MAX_STOP_LOSS", "0.05")?,
            daily_loss_limit: env_or("DAILY_LOSS_LIMIT", "0.1")?,
            max_total_exposure: env_or("MAX_TOTAL_EXPOSURE", "0.5")?,
        };
        risk.validate().context("Invalid risk limits")?;

        let event_history_size: usize = env_or("EVENT_HISTORY_SIZE", "1000")?;
        if event_history_size == 0 {
            anyhow::bail!("EVENT_HISTORY_SIZE must be >= 1");
        }

        Ok(Self {
            database_url,
            supervisor,
            evolution,
            risk,
            event_history_size,
        })
    }
}
