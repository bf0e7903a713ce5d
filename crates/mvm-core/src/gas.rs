//! Gas schedule.
//!
//! One budget per invocation. WASM instructions cost 1 unit each
//! (charged by the metering middleware); every bridge operation debits
//! an additional fixed amount plus a byte-proportional component for
//! payloads moved through the shared buffer. The amounts below are
//! tunable defaults, loadable from TOML config.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    /// Scalar reads: sender, contract address, block height/time, balance.
    pub scalar_read: u64,
    /// Object lookup by id or owner.
    pub object_lookup: u64,
    /// Object creation and owner change.
    pub object_write: u64,
    /// Field write.
    pub field_write: u64,
    /// Field read.
    pub field_read: u64,
    /// Event log append.
    pub log: u64,
    /// Balance transfer.
    pub transfer: u64,
    /// Base cost of a cross-contract call (the callee's own usage is
    /// debited separately when it returns).
    pub cross_call_base: u64,
    /// Gas withheld from a cross-contract call so the caller can still
    /// process the reply.
    pub cross_call_reserve: u64,
    /// Bytes moved through the shared buffer per 1 gas.
    pub bytes_per_gas: u64,
    /// Compilation precharge per KiB of module bytecode.
    pub compile_per_kib: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            scalar_read: 10,
            object_lookup: 50,
            object_write: 500,
            field_write: 1000,
            field_read: 50,
            log: 100,
            transfer: 200,
            cross_call_base: 2000,
            cross_call_reserve: 5000,
            bytes_per_gas: 8,
            compile_per_kib: 100,
        }
    }
}

impl GasSchedule {
    /// Byte-proportional component for a payload of `len` bytes.
    pub fn payload_cost(&self, len: usize) -> u64 {
        if self.bytes_per_gas == 0 {
            return 0;
        }
        (len as u64) / self.bytes_per_gas
    }

    /// Precharge for compiling `len` bytes of module bytecode.
    pub fn compile_cost(&self, len: usize) -> u64 {
        (len as u64 / 1024 + 1) * self.compile_per_kib
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_amounts() {
        let g = GasSchedule::default();
        assert_eq!(g.scalar_read, 10);
        assert_eq!(g.log, 100);
        assert_eq!(g.object_write, 500);
        assert_eq!(g.field_write, 1000);
        assert_eq!(g.object_lookup, 50);
    }

    #[test]
    fn payload_cost_scales_with_length() {
        let g = GasSchedule::default();
        assert_eq!(g.payload_cost(0), 0);
        assert_eq!(g.payload_cost(7), 0);
        assert_eq!(g.payload_cost(8), 1);
        assert_eq!(g.payload_cost(8192), 1024);
    }

    #[test]
    fn compile_cost_rounds_up_per_kib() {
        let g = GasSchedule::default();
        assert_eq!(g.compile_cost(0), 100);
        assert_eq!(g.compile_cost(1024), 200);
        assert_eq!(g.compile_cost(4096), 500);
    }

    #[test]
    fn schedule_loads_from_partial_toml() {
        let g: GasSchedule = toml::from_str("field_write = 5000").unwrap();
        assert_eq!(g.field_write, 5000);
        assert_eq!(g.scalar_read, 10);
    }
}
