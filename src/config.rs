use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::firewall::RedirectRule;
use crate::modbus::DEFAULT_PORT;
use crate::mutation::MutationRule;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub modbus: ModbusConfig,

    #[serde(default)]
    pub nftables: NftablesConfig,

    #[serde(default)]
    pub mutation: MutationRule,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/modbus-intercept/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("modbus-intercept/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.mutation.validate().context("Invalid [mutation] section")?;
        if self.nftables.table_name.is_empty() || self.nftables.chain_name.is_empty() {
            anyhow::bail!("nftables table_name and chain_name must not be empty");
        }
        Ok(())
    }

    pub fn redirect_rule(&self) -> RedirectRule {
        RedirectRule { source_port: self.modbus.port, queue_num: self.queue.num }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log packet summaries and forward everything unmodified
    #[serde(default)]
    pub observe_only: bool,

    /// Seconds between statistics lines (0 = off)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            observe_only: false,
            stats_interval_secs: default_stats_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// NFQUEUE number
    #[serde(default = "default_queue_num")]
    pub num: u16,

    /// How long an idle receive waits before checking for shutdown
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Let the kernel accept packets when the queue is full
    #[serde(default = "default_true")]
    pub fail_open: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            num: default_queue_num(),
            poll_interval_ms: default_poll_interval(),
            fail_open: true,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Server port; segments from this port are responses
    #[serde(default = "default_modbus_port")]
    pub port: u16,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self { port: default_modbus_port() }
    }
}

/// Netfilter hook the redirect chain attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectHook {
    Prerouting,
    Input,
    Forward,
}

#[cfg(target_os = "linux")]
impl RedirectHook {
    pub fn nf_hook(&self) -> nftables::types::NfHook {
        use nftables::types::NfHook;
        match self {
            RedirectHook::Prerouting => NfHook::Prerouting,
            RedirectHook::Input => NfHook::Input,
            RedirectHook::Forward => NfHook::Forward,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftablesConfig {
    /// Table name to use
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Chain holding the queue rule
    #[serde(default = "default_chain_name")]
    pub chain_name: String,

    #[serde(default = "default_hook")]
    pub hook: RedirectHook,

    /// Priority for the chain (lower = earlier)
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Let packets through when no process is bound to the queue
    #[serde(default = "default_true")]
    pub bypass: bool,
}

impl Default for NftablesConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            chain_name: default_chain_name(),
            hook: default_hook(),
            priority: default_priority(),
            bypass: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    5
}

fn default_queue_num() -> u16 {
    1
}

fn default_poll_interval() -> u64 {
    10
}

fn default_modbus_port() -> u16 {
    DEFAULT_PORT
}

fn default_table_name() -> String {
    "modbus_intercept".to_string()
}

fn default_chain_name() -> String {
    "modbus_redirect".to_string()
}

fn default_hook() -> RedirectHook {
    RedirectHook::Prerouting
}

fn default_priority() -> i32 {
    -150 // mangle priority, ahead of filter chains
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.num, 1);
        assert_eq!(config.modbus.port, 502);
        assert_eq!(config.nftables.hook, RedirectHook::Prerouting);
        assert_eq!(config.mutation, MutationRule::default());
        assert_eq!(config.redirect_rule(), RedirectRule { source_port: 502, queue_num: 1 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [queue]
            num = 4

            [nftables]
            hook = "forward"

            [mutation]
            register_index = 3
            replacement = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.num, 4);
        assert_eq!(config.queue.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.nftables.hook, RedirectHook::Forward);
        assert_eq!(config.nftables.table_name, "modbus_intercept");
        assert_eq!(config.mutation.register_index, 3);
        assert_eq!(config.mutation.register_threshold, 11);
        assert_eq!(config.mutation.replacement, 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.general.observe_only = true;
        config.mutation.replacement = 1234;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_save_error_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("config.toml");

        let err = Config::default().save(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(&path.display().to_string()));
    }

    #[test]
    fn test_load_rejects_unreachable_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mutation]\nregister_threshold = 2\nregister_index = 5\n").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
