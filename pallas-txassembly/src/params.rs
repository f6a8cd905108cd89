use std::collections::BTreeMap;

use pallas_primitives::conway::{RationalNumber, TransactionOutput};
use serde::{Deserialize, Serialize};

use crate::{cbor, transaction::ExUnits, utxo::Output};

pub use pallas_primitives::conway::{CostModel, Language};

/// Bytes the ledger charges for every UTxO entry on top of the serialized
/// output
pub const UTXO_ENTRY_OVERHEAD: u64 = 160;

/// The subset of protocol parameters needed to balance a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub min_fee_coefficient: u64,
    pub min_fee_constant: u64,
    pub max_tx_size: u64,
    pub max_value_size: u64,
    pub coins_per_utxo_byte: u64,
    pub collateral_percent: u64,
    pub max_collateral_inputs: u64,
    pub key_deposit: u64,
    pub pool_deposit: u64,
    pub price_mem: RationalNumber,
    pub price_step: RationalNumber,
    pub max_tx_ex_units: ExUnits,
    #[serde(default)]
    pub cost_models: BTreeMap<Language, CostModel>,
}

impl ProtocolParameters {
    pub fn mainnet() -> Self {
        Self {
            min_fee_coefficient: 44,
            min_fee_constant: 155381,
            max_tx_size: 16384,
            max_value_size: 5000,
            coins_per_utxo_byte: 4310,
            collateral_percent: 150,
            max_collateral_inputs: 3,
            key_deposit: 2_000_000,
            pool_deposit: 500_000_000,
            price_mem: RationalNumber {
                numerator: 577,
                denominator: 10_000,
            },
            price_step: RationalNumber {
                numerator: 721,
                denominator: 10_000_000,
            },
            max_tx_ex_units: ExUnits {
                mem: 14_000_000,
                steps: 10_000_000_000,
            },
            cost_models: BTreeMap::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Lovelace charged for executing scripts with the given budget, rounded
    /// up
    pub fn execution_cost(&self, ex_units: &ExUnits) -> u64 {
        let mem = &self.price_mem;
        let step = &self.price_step;

        let denominator = mem.denominator as u128 * step.denominator as u128;

        if denominator == 0 {
            return 0;
        }

        let numerator = ex_units.mem as u128 * mem.numerator as u128 * step.denominator as u128
            + ex_units.steps as u128 * step.numerator as u128 * mem.denominator as u128;

        numerator.div_ceil(denominator) as u64
    }

    /// Linear fee for a transaction of `size` bytes running scripts within
    /// `ex_units`
    pub fn min_fee(&self, size: u64, ex_units: &ExUnits) -> u64 {
        size * self.min_fee_coefficient + self.min_fee_constant + self.execution_cost(ex_units)
    }

    /// Fee of the largest transaction the ledger would accept
    pub fn max_tx_fee(&self) -> u64 {
        self.min_fee(self.max_tx_size, &self.max_tx_ex_units)
    }

    /// Collateral needed to cover `fee`
    pub fn collateral_for(&self, fee: u64) -> u64 {
        (fee as u128 * self.collateral_percent as u128).div_ceil(100) as u64
    }

    /// Collateral that covers any transaction the ledger would accept
    pub fn max_collateral(&self) -> u64 {
        self.collateral_for(self.max_tx_fee())
    }

    /// Minimum lovelace `output` must hold, evaluated at its current size
    pub fn min_lovelace(&self, output: &Output) -> u64 {
        let size = cbor::encoded_len(&TransactionOutput::from(output)) as u64;
        self.coins_per_utxo_byte * (UTXO_ENTRY_OVERHEAD + size)
    }

    pub fn satisfies_min_lovelace(&self, output: &Output) -> bool {
        output.value.coin() >= 0 && output.value.coin() as u64 >= self.min_lovelace(output)
    }

    /// Smallest coin that makes `output` satisfy the min-output rule once the
    /// coin itself is part of the output
    pub fn required_lovelace(&self, output: &Output) -> u64 {
        let mut candidate = output.clone();
        let mut required = 0;

        // the coin's width feeds back into the size, settles in a few rounds
        for _ in 0..4 {
            candidate.value.set_lovelace(required as i64);
            let next = self.min_lovelace(&candidate);

            if next == required {
                break;
            }

            required = next;
        }

        required
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::{utxo::placeholder_address, value::Value};

    fn output(coin: i64) -> Output {
        Output::new(placeholder_address(), Value::Coin(coin))
    }

    #[test]
    fn linear_fee_without_scripts() {
        let params = ProtocolParameters::mainnet();

        assert_eq!(params.min_fee(200, &ExUnits::default()), 200 * 44 + 155381);
    }

    #[test_case(1_000_000, 0, 57_700 ; "memory only")]
    #[test_case(0, 10_000_000, 721 ; "steps only")]
    #[test_case(1, 1, 1 ; "rounds up")]
    fn execution_cost(mem: u64, steps: u64, expected: u64) {
        let params = ProtocolParameters::mainnet();

        assert_eq!(params.execution_cost(&ExUnits { mem, steps }), expected);
    }

    #[test]
    fn max_fee_covers_full_budget() {
        let params = ProtocolParameters::mainnet();

        assert_eq!(params.max_tx_fee(), 16384 * 44 + 155381 + 807_800 + 721_000);
        assert_eq!(params.max_collateral(), (params.max_tx_fee() * 3).div_ceil(2));
    }

    #[test]
    fn collateral_rounds_up() {
        let params = ProtocolParameters::mainnet();

        assert_eq!(params.collateral_for(100), 150);
        assert_eq!(params.collateral_for(101), 152);
    }

    #[test]
    fn min_lovelace_scales_with_size() {
        let params = ProtocolParameters::mainnet();
        let out = output(1_000_000);

        let size = cbor::encoded_len(&TransactionOutput::from(&out)) as u64;
        assert_eq!(params.min_lovelace(&out), 4310 * (160 + size));
        assert!(params.satisfies_min_lovelace(&out));
        assert!(!params.satisfies_min_lovelace(&output(100)));
    }

    #[test]
    fn required_lovelace_is_a_fixed_point() {
        let params = ProtocolParameters::mainnet();
        let required = params.required_lovelace(&output(0));

        let settled = output(required as i64);
        assert_eq!(params.min_lovelace(&settled), required);
        assert!(params.satisfies_min_lovelace(&settled));
    }

    #[test]
    fn loads_from_json() {
        let json = include_str!("../test_data/protocol_parameters.json");
        let params = ProtocolParameters::from_json(json).unwrap();

        assert_eq!(params.min_fee_coefficient, 44);
        assert!(params.cost_models.contains_key(&Language::PlutusV2));
    }
}
