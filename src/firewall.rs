//! Traffic redirection into the interception queue
//!
//! The proxy only talks to `FirewallController`; `NftablesFirewall` is the
//! nftables-backed implementation used by the binary.

use anyhow::Result;

use crate::modbus::DEFAULT_PORT;

/// Divert TCP segments with this source port into an NFQUEUE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectRule {
    pub source_port: u16,
    pub queue_num: u16,
}

impl Default for RedirectRule {
    fn default() -> Self {
        Self { source_port: DEFAULT_PORT, queue_num: 1 }
    }
}

pub trait FirewallController {
    fn install_redirect(&self, rule: &RedirectRule) -> Result<()>;

    /// Stop diverting traffic. Succeeds if nothing is installed.
    fn remove_redirect(&self) -> Result<()>;

    /// Remove every piece of state `install_redirect` created. Succeeds if
    /// nothing is left.
    fn flush_all(&self) -> Result<()>;
}

#[cfg(target_os = "linux")]
pub use nft::NftablesFirewall;

#[cfg(target_os = "linux")]
mod nft {
    use std::borrow::Cow;
    use std::collections::HashSet;

    use anyhow::{Context, Result};
    use nftables::{
        batch::Batch,
        expr::{Expression, NamedExpression, Payload, PayloadField},
        helper::{apply_ruleset, get_current_ruleset},
        schema::{Chain, FlushObject, NfCmd, NfListObject, NfObject, Rule, Table},
        stmt::{Match, Operator, Queue, QueueFlag, Statement},
        types::{NfChainPolicy, NfChainType, NfFamily},
    };
    use tracing::{debug, info, warn};

    use super::{FirewallController, RedirectRule};
    use crate::config::NftablesConfig;

    /// Firewall manager for nftables operations
    pub struct NftablesFirewall {
        config: NftablesConfig,
    }

    impl NftablesFirewall {
        pub fn new(config: NftablesConfig) -> Self {
            Self { config }
        }

        /// Check if our table exists
        fn table_exists(&self) -> Result<bool> {
            let ruleset = get_current_ruleset().context("Failed to list nftables ruleset")?;

            for obj in ruleset.objects.iter() {
                if let NfObject::ListObject(NfListObject::Table(table)) = obj {
                    if table.name == self.config.table_name && table.family == NfFamily::INet {
                        return Ok(true);
                    }
                }
            }

            Ok(false)
        }

        fn table(&self) -> Table<'static> {
            Table {
                family: NfFamily::INet,
                name: Cow::Owned(self.config.table_name.clone()),
                handle: None,
            }
        }

        fn chain(&self) -> Chain<'static> {
            Chain {
                family: NfFamily::INet,
                table: Cow::Owned(self.config.table_name.clone()),
                name: Cow::Owned(self.config.chain_name.clone()),
                newname: None,
                handle: None,
                _type: Some(NfChainType::Filter),
                hook: Some(self.config.hook.nf_hook()),
                prio: Some(self.config.priority),
                dev: None,
                policy: Some(NfChainPolicy::Accept),
            }
        }

        /// Add the queue rule to the batch
        fn add_queue_rule(&self, batch: &mut Batch, rule: &RedirectRule) {
            // nft add rule inet <table> <chain> meta l4proto tcp tcp sport 502 queue num 1 bypass
            let flags = self.config.bypass.then(|| HashSet::from([QueueFlag::Bypass]));

            batch.add(NfListObject::Rule(Rule {
                family: NfFamily::INet,
                table: Cow::Owned(self.config.table_name.clone()),
                chain: Cow::Owned(self.config.chain_name.clone()),
                handle: None,
                index: None,
                comment: Some(Cow::Owned(format!(
                    "Queue Modbus responses from port {} to NFQUEUE {}",
                    rule.source_port, rule.queue_num
                ))),
                expr: Cow::Owned(vec![
                    // Match TCP protocol
                    Statement::Match(Match {
                        left: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
                            PayloadField {
                                protocol: Cow::Borrowed("meta"),
                                field: Cow::Borrowed("l4proto"),
                            },
                        ))),
                        right: Expression::String(Cow::Borrowed("tcp")),
                        op: Operator::EQ,
                    }),
                    // Match server-side source port
                    Statement::Match(Match {
                        left: Expression::Named(NamedExpression::Payload(Payload::PayloadField(
                            PayloadField {
                                protocol: Cow::Borrowed("tcp"),
                                field: Cow::Borrowed("sport"),
                            },
                        ))),
                        right: Expression::Number(u32::from(rule.source_port)),
                        op: Operator::EQ,
                    }),
                    // Queue to userspace
                    Statement::Queue(Queue {
                        num: Expression::Number(u32::from(rule.queue_num)),
                        flags,
                    }),
                ]),
            }));
        }

        /// `nft flush chain inet <table> <chain>`
        fn flush_chain_cmd(&self) -> NfCmd<'static> {
            NfCmd::Flush(FlushObject::Chain(self.chain()))
        }
    }

    impl FirewallController for NftablesFirewall {
        fn install_redirect(&self, rule: &RedirectRule) -> Result<()> {
            info!(
                "Installing nftables redirect: tcp sport {} -> NFQUEUE {} ({} {:?}, priority {})",
                rule.source_port, rule.queue_num, self.config.table_name, self.config.hook, self.config.priority
            );

            let mut batch = Batch::new();

            // Stale table from a crashed run: start from scratch
            if self.table_exists()? {
                warn!("Table {} already exists, replacing it", self.config.table_name);
                batch.add_cmd(NfCmd::Delete(NfListObject::Table(self.table())));
            }

            batch.add(NfListObject::Table(self.table()));
            batch.add(NfListObject::Chain(self.chain()));
            self.add_queue_rule(&mut batch, rule);

            let ruleset = batch.to_nftables();
            apply_ruleset(&ruleset).context("Failed to apply nftables redirect rules")?;

            info!("nftables redirect installed");
            Ok(())
        }

        fn remove_redirect(&self) -> Result<()> {
            if !self.table_exists()? {
                debug!("Table {} does not exist, no redirect to remove", self.config.table_name);
                return Ok(());
            }

            let mut batch = Batch::new();
            batch.add_cmd(self.flush_chain_cmd());

            let ruleset = batch.to_nftables();
            apply_ruleset(&ruleset).context("Failed to flush nftables redirect chain")?;

            info!("Flushed redirect chain {}", self.config.chain_name);
            Ok(())
        }

        fn flush_all(&self) -> Result<()> {
            if !self.table_exists()? {
                warn!(
                    "Table {} does not exist, nothing to clean up",
                    self.config.table_name
                );
                return Ok(());
            }

            let mut batch = Batch::new();
            batch.add_cmd(NfCmd::Delete(NfListObject::Table(self.table())));

            let ruleset = batch.to_nftables();
            apply_ruleset(&ruleset).context("Failed to delete nftables table")?;

            info!("Removed nftables table: {}", self.config.table_name);
            Ok(())
        }
    }

}
