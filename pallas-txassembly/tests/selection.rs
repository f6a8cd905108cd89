use pallas_crypto::hash::Hash;
use pallas_txassembly::{prelude::*, utxo::placeholder_address};
use proptest::prelude::*;

fn utxo(id: u16, value: Value) -> Utxo {
    let mut hash = [0; 32];
    hash[..2].copy_from_slice(&id.to_be_bytes());

    Utxo::new(
        Input::new(Hash::new(hash), 0),
        Output::new(placeholder_address(), value),
    )
}

fn policy() -> PolicyId {
    Hash::new([3; 28])
}

fn nft(name: &str) -> AssetName {
    AssetName::new(name.as_bytes().to_vec()).unwrap()
}

fn request(value: Value) -> [Output; 1] {
    [Output::new(placeholder_address(), value)]
}

fn wallet() -> Vec<Utxo> {
    let mut pool: Vec<_> = (0..8)
        .map(|i| utxo(i, Value::Coin(1_500_000 * (i as i64 + 1))))
        .collect();

    for (i, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
        let mut value = Value::Coin(1_400_000);
        value.add_asset(policy(), nft(name), 1);
        pool.push(utxo(100 + i as u16, value));
    }

    pool
}

#[test]
fn both_strategies_cover_assets_and_lovelace() {
    let params = ProtocolParameters::mainnet();

    let mut target = Value::Coin(12_000_000);
    target.add_asset(policy(), nft("beta"), 1);

    let strategies: Vec<Box<dyn UtxoSelector>> =
        vec![Box::new(LargestFirst), Box::new(RandomImprove::seeded(5))];

    for mut selector in strategies {
        let selection = selector
            .select(
                &wallet(),
                &request(target.clone()),
                &params,
                &SelectionConstraints {
                    respect_min_output: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(selection.total().greater_or_equal(&target));
        assert_eq!(&selection.total() - &target, selection.change);
        assert!(selection.change.is_non_negative());
    }
}

#[test]
fn largest_first_reports_missing_asset() {
    let mut target = Value::Coin(1_000_000);
    target.add_asset(policy(), nft("delta"), 1);

    let result = LargestFirst.select(
        &wallet(),
        &request(target),
        &ProtocolParameters::mainnet(),
        &SelectionConstraints::default(),
    );

    assert!(matches!(
        result,
        Err(SelectionError::InsufficientUtxoBalance(_))
    ));
}

#[test]
fn random_improve_reports_depletion() {
    let mut target = Value::Coin(1_000_000);
    target.add_asset(policy(), nft("delta"), 1);

    let result = RandomImprove::seeded(1).select(
        &wallet(),
        &request(target),
        &ProtocolParameters::mainnet(),
        &SelectionConstraints::default(),
    );

    assert_eq!(result, Err(SelectionError::InputUtxoDepleted));
}

#[test]
fn huge_token_holdings_saturate_instead_of_overflowing() {
    let half = i64::MAX / 2 + 1;

    let pool: Vec<_> = (0..2)
        .map(|i| {
            let mut value = Value::Coin(2_000_000);
            value.add_asset(policy(), nft("whale"), half);
            utxo(i, value)
        })
        .collect();

    let mut target = Value::Coin(0);
    target.add_asset(policy(), nft("whale"), 1);

    let largest = LargestFirst.select_target(&pool, &target, None).unwrap();
    assert_eq!(largest.len(), 1);

    let random = RandomImprove::seeded(3)
        .select_target(&pool, &target, None)
        .unwrap();
    assert!(!random.is_empty());
}

proptest! {
    #[test]
    fn selection_covers_reachable_targets(
        coins in prop::collection::vec(1_000_000i64..50_000_000, 1..40),
        share in 1u32..100,
        seed in any::<u64>(),
    ) {
        let pool: Vec<_> = coins
            .iter()
            .enumerate()
            .map(|(i, coin)| utxo(i as u16, Value::Coin(*coin)))
            .collect();

        let total: i64 = coins.iter().sum();
        let target = Value::Coin(total * share as i64 / 100);

        let largest = LargestFirst
            .select_target(&pool, &target, None)
            .unwrap();

        let random = RandomImprove::seeded(seed)
            .select_target(&pool, &target, None)
            .unwrap();

        for selected in [largest, random] {
            let sum: Value = selected.iter().map(Utxo::value).sum();
            prop_assert!(sum.greater_or_equal(&target));
        }
    }
}
