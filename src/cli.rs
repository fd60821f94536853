use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use modbus_intercept::config::Config;

#[derive(Parser)]
#[command(name = "modbus-intercept")]
#[command(author, version, about = "NFQUEUE-based Modbus/TCP register mutation proxy")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install redirection and intercept until Ctrl+C
    Run {
        /// Queue number (overrides config)
        #[arg(short, long)]
        queue: Option<u16>,

        /// Log packets without modifying them
        #[arg(long)]
        observe: bool,
    },

    /// Remove redirection rules left behind by a previous run
    Teardown,

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    /// `gen-config` writes defaults and never reads an existing file.
    pub fn needs_config(&self) -> bool {
        !matches!(self, Commands::GenConfig { .. })
    }
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    if !cli.command.needs_config() {
        return Ok(Config::default());
    }
    match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

pub fn run_command(cli: Cli, mut config: Config) -> Result<()> {
    match cli.command {
        Commands::Run { queue, observe } => {
            if let Some(queue) = queue {
                config.queue.num = queue;
            }
            config.general.observe_only |= observe;
            cmd_run(config)
        }
        Commands::Teardown => cmd_teardown(config),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

#[cfg(target_os = "linux")]
fn cmd_run(config: Config) -> Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use modbus_intercept::firewall::NftablesFirewall;
    use modbus_intercept::queue::NfQueue;
    use modbus_intercept::{Interceptor, Proxy};
    use tracing::{info, warn};

    let interceptor = Interceptor::new(config.mutation, config.modbus.port)
        .with_observe_only(config.general.observe_only);
    let firewall = NftablesFirewall::new(config.nftables.clone());
    let queue = NfQueue::open(config.queue.poll_interval(), config.queue.fail_open)?;

    let mut proxy = Proxy::new(firewall, queue, interceptor, config.redirect_rule())
        .with_stats_interval(Duration::from_secs(config.general.stats_interval_secs));

    // Set up signal handler for clean shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })?;

    proxy.start()?;
    if config.general.observe_only {
        info!("Observe mode: packets are logged and forwarded unmodified");
    }
    println!("{}", "Intercepting... (Press Ctrl+C to stop)".green().bold());

    let result = proxy.run(&shutdown);

    let report = proxy.shutdown();
    for (step, reason) in &report.failures {
        warn!("Cleanup step '{}' failed: {}", step, reason);
    }
    if !report.is_clean() {
        println!("{}", "Cleanup incomplete, run `modbus-intercept teardown`".yellow().bold());
    }

    result
}

#[cfg(not(target_os = "linux"))]
fn cmd_run(_config: Config) -> Result<()> {
    anyhow::bail!("Interception requires Linux netfilter queue support")
}

#[cfg(target_os = "linux")]
fn cmd_teardown(config: Config) -> Result<()> {
    use modbus_intercept::firewall::NftablesFirewall;
    use modbus_intercept::FirewallController;

    let firewall = NftablesFirewall::new(config.nftables);
    firewall.remove_redirect()?;
    firewall.flush_all()?;
    println!("{}", "Redirection rules removed".yellow().bold());
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn cmd_teardown(_config: Config) -> Result<()> {
    anyhow::bail!("Teardown requires Linux nftables support")
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}
