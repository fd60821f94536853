//! Proxy lifecycle
//!
//! `Stopped -> RulesInstalled -> Running -> RulesRemoved -> Stopped`
//!
//! The proxy owns the firewall controller, the queue and the interceptor.
//! Firewall changes happen only before and after the receive loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::firewall::{FirewallController, RedirectRule};
use crate::interceptor::Interceptor;
use crate::queue::PacketQueue;
use crate::stats::CaptureStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Stopped,
    RulesInstalled,
    Running,
    RulesRemoved,
}

/// Teardown step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Unbind,
    RemoveRedirect,
    FlushAll,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::Unbind => write!(f, "unbind queue"),
            TeardownStep::RemoveRedirect => write!(f, "remove redirect"),
            TeardownStep::FlushAll => write!(f, "flush firewall state"),
        }
    }
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<(TeardownStep, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Proxy<F: FirewallController, Q: PacketQueue> {
    firewall: F,
    queue: Q,
    interceptor: Interceptor,
    redirect: RedirectRule,
    state: ProxyState,
    stats: CaptureStats,
}

impl<F: FirewallController, Q: PacketQueue> Proxy<F, Q> {
    pub fn new(firewall: F, queue: Q, interceptor: Interceptor, redirect: RedirectRule) -> Self {
        Self {
            firewall,
            queue,
            interceptor,
            redirect,
            state: ProxyState::Stopped,
            stats: CaptureStats::default(),
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats = CaptureStats::new(interval);
        self
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn firewall(&self) -> &F {
        &self.firewall
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Install redirection and bind the queue. Any failure here is fatal.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ProxyState::Stopped {
            anyhow::bail!("Proxy already started ({:?})", self.state);
        }

        self.firewall
            .install_redirect(&self.redirect)
            .context("Failed to install traffic redirection")?;
        self.state = ProxyState::RulesInstalled;

        if let Err(e) = self.queue.bind(self.redirect.queue_num) {
            error!("Queue bind failed, removing installed rules");
            self.teardown_rules(&mut TeardownReport::default());
            self.state = ProxyState::Stopped;
            return Err(e.context(format!("Failed to bind queue {}", self.redirect.queue_num)));
        }
        self.state = ProxyState::Running;

        info!(
            "Intercepting tcp sport {} on queue {} (fc=0x{:02x}, >{} registers, register[{}] <- {})",
            self.redirect.source_port,
            self.redirect.queue_num,
            self.interceptor.rule().function_code,
            self.interceptor.rule().register_threshold,
            self.interceptor.rule().register_index,
            self.interceptor.rule().replacement,
        );
        Ok(())
    }

    /// Process packets until `shutdown` is set. The flag is checked between
    /// packets only.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        if self.state != ProxyState::Running {
            anyhow::bail!("Proxy is not running ({:?})", self.state);
        }

        while !shutdown.load(Ordering::Relaxed) {
            match self.queue.recv() {
                Ok(Some(message)) => {
                    let data = self.queue.payload(&message);
                    let len = data.len();
                    let (verdict, outcome) = self.interceptor.handle(data);
                    self.stats.record(len, outcome);

                    if let Err(e) = self.queue.verdict(message, verdict) {
                        error!("Failed to send verdict: {:#}", e);
                        self.stats.record_error();
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    error!("Queue receive error: {:#}", e);
                    self.stats.record_error();
                }
            }
            self.stats.maybe_log_interval();
        }

        info!("Shutdown requested, leaving receive loop");
        Ok(())
    }

    /// Unbind and remove redirection. Every step is attempted even if an
    /// earlier one fails. Calling it again after it completed is a no-op.
    pub fn shutdown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.state == ProxyState::Stopped {
            return report;
        }

        if let Err(e) = self.queue.unbind() {
            warn!("Teardown: failed to unbind queue: {:#}", e);
            report.failures.push((TeardownStep::Unbind, format!("{:#}", e)));
        }
        self.teardown_rules(&mut report);
        self.state = ProxyState::RulesRemoved;

        if report.is_clean() {
            info!("Teardown complete");
        } else {
            warn!("Teardown incomplete: {} step(s) failed", report.failures.len());
        }
        self.stats.log_final();

        self.state = ProxyState::Stopped;
        report
    }

    fn teardown_rules(&mut self, report: &mut TeardownReport) {
        if let Err(e) = self.firewall.remove_redirect() {
            warn!("Teardown: failed to remove redirect: {:#}", e);
            report.failures.push((TeardownStep::RemoveRedirect, format!("{:#}", e)));
        }
        if let Err(e) = self.firewall.flush_all() {
            warn!("Teardown: failed to flush firewall state: {:#}", e);
            report.failures.push((TeardownStep::FlushAll, format!("{:#}", e)));
        }
    }
}

impl<F: FirewallController, Q: PacketQueue> Drop for Proxy<F, Q> {
    fn drop(&mut self) {
        if self.state != ProxyState::Stopped {
            warn!("Proxy dropped while {:?}, tearing down", self.state);
            let _ = self.shutdown();
        }
    }
}
