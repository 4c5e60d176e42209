//! Configuration management for the Tesseract bridge engine
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every section has defaults, so an engine can also be built without a file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub monitor: MonitorConfig,
    pub protocol: ProtocolConfig,
    pub step_service: Option<StepServiceConfig>,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quote_ttl_secs: u64,
    pub quote_cache_capacity: u64,
    pub quote_retry: RetryConfig,
    pub recovery_enabled: bool,
    pub step_delay_ms: u64,
    pub max_server_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: 30,
            quote_cache_capacity: 10_000,
            quote_retry: RetryConfig::default(),
            recovery_enabled: true,
            step_delay_ms: 2_000,
            max_server_steps: 10,
        }
    }
}

impl EngineConfig {
    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Poll schedule of the status monitor and its recovery loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub recovery_initial_delay_ms: u64,
    pub recovery_max_attempts: u32,
    /// Retry of the recovery request itself
    pub recovery_retry: RetryConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            backoff_factor: 1.5,
            max_delay_ms: 60_000,
            max_attempts: 30,
            recovery_initial_delay_ms: 10_000,
            recovery_max_attempts: 20,
            recovery_retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub name: String,
    pub api_url: String,
    pub timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: "Axelar".to_string(),
            api_url: "http://localhost:8645".to_string(),
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepServiceConfig {
    pub url: String,
    #[serde(default = "default_agent_kind")]
    pub agent_kind: String,
}

fn default_agent_kind() -> String {
    "swap".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Per-chain connection settings, keyed by canonical chain name
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_gas_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    /// Extra token addresses by symbol, merged over the built-in registry
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_gas_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Eip1559
}

fn default_max_gas_price_gwei() -> u64 {
    500
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub private_key_env: Option<String>,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("TESSERACT_BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.protocol.api_url.is_empty() {
            anyhow::bail!("protocol.api_url must be set");
        }

        if self.engine.quote_retry.max_attempts == 0 {
            anyhow::bail!("engine.quote_retry.max_attempts must be at least 1");
        }

        if self.monitor.recovery_retry.max_attempts == 0 {
            anyhow::bail!("monitor.recovery_retry.max_attempts must be at least 1");
        }

        if self.monitor.max_attempts == 0 || self.monitor.recovery_max_attempts == 0 {
            anyhow::bail!("monitor attempt ceilings must be at least 1");
        }

        if self.monitor.backoff_factor < 1.0 || self.engine.quote_retry.backoff_factor < 1.0 {
            anyhow::bail!("backoff factors must be >= 1.0");
        }

        if self.engine.max_server_steps == 0 {
            anyhow::bail!("engine.max_server_steps must be at least 1");
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
