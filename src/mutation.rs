//! Register mutation policy
//!
//! A `MutationRule` is plain data: which function code to target, how many
//! registers a response must carry before it is touched, which register to
//! overwrite and with what. Matching and applying are pure.

use serde::{Deserialize, Serialize};

use crate::error::{MutationError, MutationResult};
use crate::modbus::{Pdu, PduBody, READ_HOLDING_REGISTERS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRule {
    /// Function code of the responses to rewrite
    #[serde(default = "default_function_code")]
    pub function_code: u8,

    /// A response matches only if it carries strictly more registers than this
    #[serde(default = "default_register_threshold")]
    pub register_threshold: usize,

    /// Zero-based index of the register to overwrite
    #[serde(default = "default_register_index")]
    pub register_index: usize,

    /// Value written into the register (65526 is -10 as i16)
    #[serde(default = "default_replacement")]
    pub replacement: u16,
}

impl Default for MutationRule {
    fn default() -> Self {
        Self {
            function_code: default_function_code(),
            register_threshold: default_register_threshold(),
            register_index: default_register_index(),
            replacement: default_replacement(),
        }
    }
}

impl MutationRule {
    /// Does this PDU qualify for rewriting?
    pub fn matches(&self, pdu: &Pdu) -> bool {
        pdu.function_code == self.function_code
            && pdu.registers().map_or(false, |registers| registers.len() > self.register_threshold)
    }

    /// Copy of `pdu` with the target register replaced. Only call after
    /// `matches` returned true.
    pub fn apply(&self, pdu: &Pdu) -> MutationResult<Pdu> {
        let mut registers = match &pdu.body {
            PduBody::Registers(registers) => registers.clone(),
            _ => return Err(MutationError::NoRegisters(pdu.function_code)),
        };

        let len = registers.len();
        let slot = registers
            .get_mut(self.register_index)
            .ok_or(MutationError::IndexOutOfBounds { index: self.register_index, len })?;
        *slot = self.replacement;

        Ok(Pdu { function_code: pdu.function_code, body: PduBody::Registers(registers) })
    }

    /// Reject rules that could match a response too short for the index.
    pub fn validate(&self) -> MutationResult<()> {
        if self.register_index > self.register_threshold {
            // A response with threshold + 1 registers would match without
            // having the target slot.
            return Err(MutationError::IndexOutOfBounds {
                index: self.register_index,
                len: self.register_threshold + 1,
            });
        }
        Ok(())
    }
}

fn default_function_code() -> u8 {
    READ_HOLDING_REGISTERS
}

fn default_register_threshold() -> usize {
    11
}

fn default_register_index() -> usize {
    10
}

fn default_replacement() -> u16 {
    0xFFF6
}
