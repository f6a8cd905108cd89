use tracing::{instrument, trace};

use super::{check_cap, SelectionError, UtxoSelector};
use crate::{utxo::Utxo, value::Value};

/// Greedy selection on lovelace: keeps taking the richest remaining UTxO
/// until the target is covered. Deterministic for a given pool order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LargestFirst;

impl UtxoSelector for LargestFirst {
    #[instrument(skip_all, fields(pool = pool.len()))]
    fn select_target(
        &mut self,
        pool: &[Utxo],
        target: &Value,
        max_inputs: Option<usize>,
    ) -> Result<Vec<Utxo>, SelectionError> {
        let available: Value = pool.iter().map(Utxo::value).sum();

        if !available.greater_or_equal(target) {
            return Err(SelectionError::InsufficientUtxoBalance(format!(
                "pool holds {} lovelace across {} utxos, {} requested",
                available.coin(),
                pool.len(),
                target.coin()
            )));
        }

        // ascending, so the largest sits at the end; the sort is stable
        let mut candidates: Vec<_> = pool.iter().collect();
        candidates.sort_by_key(|x| x.value().coin());

        let mut selected = vec![];
        let mut total = Value::default();

        while !total.greater_or_equal(target) {
            let Some(next) = candidates.pop() else {
                return Err(SelectionError::InsufficientUtxoBalance(
                    "pool exhausted before covering the request".into(),
                ));
            };

            check_cap(selected.len(), max_inputs)?;

            trace!(input = %next.input, coin = next.value().coin(), "selected");

            total += next.value();
            selected.push(next.clone());
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use pallas_crypto::hash::Hash;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        asset::AssetName,
        params::ProtocolParameters,
        select::{SelectionConstraints, UtxoSelector},
        utxo::{placeholder_address, Input, Output},
    };

    fn utxo(id: u8, value: Value) -> Utxo {
        Utxo::new(
            Input::new(Hash::new([id; 32]), 0),
            Output::new(placeholder_address(), value),
        )
    }

    fn lovelace_pool(coins: &[i64]) -> Vec<Utxo> {
        coins
            .iter()
            .enumerate()
            .map(|(i, c)| utxo(i as u8, Value::Coin(*c)))
            .collect()
    }

    fn request(coin: i64) -> [Output; 1] {
        [Output::lovelace(placeholder_address(), coin)]
    }

    fn run(
        pool: &[Utxo],
        coin: i64,
        max_inputs: Option<usize>,
    ) -> Result<Vec<Utxo>, SelectionError> {
        let constraints = SelectionConstraints {
            max_inputs,
            ..Default::default()
        };

        LargestFirst
            .select(
                pool,
                &request(coin),
                &ProtocolParameters::mainnet(),
                &constraints,
            )
            .map(|x| x.selected)
    }

    #[test]
    fn takes_largest_first() {
        let pool = lovelace_pool(&[1_000_000, 7_000_000, 3_000_000, 5_000_000]);
        let selected = run(&pool, 10_000_000, None).unwrap();

        let coins: Vec<_> = selected.iter().map(|x| x.value().coin()).collect();
        assert_eq!(coins, vec![7_000_000, 5_000_000]);
    }

    #[test]
    fn needs_the_requested_assets() {
        let policy = Hash::new([9; 28]);
        let token = AssetName::new(b"token".to_vec()).unwrap();

        let mut with_token = Value::Coin(1_500_000);
        with_token.add_asset(policy, token.clone(), 10);

        let pool = vec![
            utxo(1, Value::Coin(50_000_000)),
            utxo(2, with_token),
            utxo(3, Value::Coin(20_000_000)),
        ];

        let mut wanted = Value::Coin(2_000_000);
        wanted.add_asset(policy, token.clone(), 5);

        let selected = LargestFirst.select_target(&pool, &wanted, None).unwrap();

        assert_eq!(selected.len(), 3);
        assert_eq!(selected.last().map(|x| x.input.tx_hash), Some(Hash::new([2; 32])));
    }

    #[test]
    fn cap_of_one_fails_when_two_are_needed() {
        let pool = lovelace_pool(&[3_000_000, 3_000_000, 3_000_000]);

        assert_eq!(
            run(&pool, 5_000_000, Some(1)),
            Err(SelectionError::MaxInputCountExceeded(1))
        );
    }

    #[test]
    fn insufficient_pool() {
        let pool = lovelace_pool(&[9_000_000; 10]);

        assert!(matches!(
            run(&pool, 1_000_000_000, None),
            Err(SelectionError::InsufficientUtxoBalance(_))
        ));
        assert!(matches!(
            run(&[], 1, None),
            Err(SelectionError::InsufficientUtxoBalance(_))
        ));
    }

    proptest! {
        #[test]
        fn selection_is_minimal(
            coins in prop::collection::vec(1i64..10_000_000, 1..20),
            fraction in 0.0f64..1.0,
        ) {
            let pool = lovelace_pool(&coins);
            let total: i64 = coins.iter().sum();
            let wanted = ((total as f64) * fraction).max(1.0) as i64;

            let selected = run(&pool, wanted, None).unwrap();
            let sum: i64 = selected.iter().map(|x| x.value().coin()).sum();
            let largest = selected.iter().map(|x| x.value().coin()).max().unwrap();

            prop_assert!(sum >= wanted);
            prop_assert!(sum - largest < wanted);
        }
    }
}
