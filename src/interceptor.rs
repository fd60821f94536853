//! Per-packet pipeline: parse, match, mutate, repair, serialize
//!
//! Every packet gets exactly one verdict. Anything that goes wrong on the
//! way is logged and the packet is accepted unmodified.

use tracing::{debug, info, warn};

use crate::checksum;
use crate::error::Result;
use crate::modbus::DEFAULT_PORT;
use crate::mutation::MutationRule;
use crate::packet::{self, ParsedPacket};
use crate::stats::Outcome;

/// Decision handed back to the kernel queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the original bytes
    Accept,
    /// Forward these bytes instead
    Replace(Vec<u8>),
    Drop,
}

#[derive(Debug, Clone)]
pub struct Interceptor {
    rule: MutationRule,
    modbus_port: u16,
    observe_only: bool,
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new(MutationRule::default(), DEFAULT_PORT)
    }
}

impl Interceptor {
    pub fn new(rule: MutationRule, modbus_port: u16) -> Self {
        Self { rule, modbus_port, observe_only: false }
    }

    /// Log every packet and never rewrite anything.
    pub fn with_observe_only(mut self, observe_only: bool) -> Self {
        self.observe_only = observe_only;
        self
    }

    pub fn rule(&self) -> &MutationRule {
        &self.rule
    }

    /// Run one packet through the pipeline.
    pub fn handle(&self, data: &[u8]) -> (Verdict, Outcome) {
        let packet = match packet::parse_with_port(data, self.modbus_port) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Passing unparsed packet ({} bytes): {}", data.len(), e);
                return (Verdict::Accept, Outcome::Unparsed);
            }
        };

        if self.observe_only {
            info!("{}", packet.summary());
            return (Verdict::Accept, Outcome::Observed);
        }

        match self.rewrite(packet) {
            Ok(Some(bytes)) => (Verdict::Replace(bytes), Outcome::Mutated),
            Ok(None) => (Verdict::Accept, Outcome::Passed),
            Err(e) => {
                warn!("Mutation failed, forwarding unmodified: {}", e);
                (Verdict::Accept, Outcome::Failed)
            }
        }
    }

    /// `Ok(None)` when the policy does not apply.
    fn rewrite(&self, mut packet: ParsedPacket) -> Result<Option<Vec<u8>>> {
        let (src, dst) = (packet.source(), packet.destination());
        let Some(adu) = packet.adu.as_mut() else {
            return Ok(None);
        };
        if !self.rule.matches(&adu.pdu) {
            return Ok(None);
        }

        let mutated = self.rule.apply(&adu.pdu)?;
        info!(
            "Rewriting {} > {} tid={} register[{}]: {:?} -> {:?}",
            src,
            dst,
            adu.header.transaction_id,
            self.rule.register_index,
            adu.pdu.registers().and_then(|r| r.get(self.rule.register_index)),
            mutated.registers().and_then(|r| r.get(self.rule.register_index)),
        );
        debug!("ORIGINAL: {:?}", adu.pdu.registers());
        debug!("NEW:      {:?}", mutated.registers());
        adu.pdu = mutated;

        checksum::repair(&mut packet)?;
        let bytes = packet.serialize()?;
        debug!(
            "Reinjecting {} bytes, checksums valid: {:?}",
            bytes.len(),
            checksum::verify(&bytes).map(|status| status.is_valid())
        );
        Ok(Some(bytes))
    }
}
