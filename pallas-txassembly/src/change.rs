//! Splitting change into outputs that respect the maximum value size.

use pallas_addresses::Address;
use tracing::debug;

use crate::{
    multiasset::MultiAsset, params::ProtocolParameters, select::SelectionError,
    utxo::Output, value::Value, TxBuilderError,
};

fn value_size(coin: i64, assets: &MultiAsset) -> usize {
    Value::CoinWithAssets(coin, assets.clone()).encoded_size()
}

fn below_minimum(output: &Output, params: &ProtocolParameters) -> TxBuilderError {
    SelectionError::InsufficientUtxoBalance(format!(
        "change output of {} lovelace needs at least {}",
        output.value.coin(),
        params.min_lovelace(output)
    ))
    .into()
}

/// Packs `change` into as many outputs to `address` as needed to keep every
/// value within `max_value_size`.
///
/// Assets are added greedily in canonical order. Every output but the last
/// gets just the lovelace it needs; the last one takes whatever remains. Each
/// output has to satisfy the min-output rule on its own.
pub fn pack_change(
    change: &Value,
    address: &Address,
    params: &ProtocolParameters,
) -> Result<Vec<Output>, TxBuilderError> {
    let change = change.normalized();
    let coin = change.coin();
    let max = params.max_value_size as usize;

    let Some(assets) = change.assets() else {
        let output = Output::new(address.clone(), change);

        if !params.satisfies_min_lovelace(&output) {
            return Err(below_minimum(&output, params));
        }

        return Ok(vec![output]);
    };

    let mut bundles = vec![];
    let mut current = MultiAsset::new();

    for (policy, name, quantity) in assets.flatten() {
        let mut single = MultiAsset::new();
        single.set(*policy, name.clone(), quantity);

        // sizes are taken with the full change coin, the widest any output
        // can end up with
        let alone = value_size(coin, &single);

        if alone > max {
            return Err(TxBuilderError::ValueTooBig { size: alone, max });
        }

        let mut candidate = current.clone();
        candidate.set(*policy, name.clone(), quantity);

        if value_size(coin, &candidate) > max {
            bundles.push(std::mem::replace(&mut current, single));
        } else {
            current = candidate;
        }
    }

    bundles.push(current);

    debug!(outputs = bundles.len(), "packed change assets");

    let mut outputs = Vec::with_capacity(bundles.len());
    let mut remaining = coin;
    let last = bundles.len() - 1;

    for (i, bundle) in bundles.into_iter().enumerate() {
        let mut output = Output::new(address.clone(), Value::CoinWithAssets(0, bundle));

        let lovelace = if i == last {
            remaining
        } else {
            params.required_lovelace(&output) as i64
        };

        output.value.set_lovelace(lovelace);
        remaining -= lovelace;

        if !params.satisfies_min_lovelace(&output) {
            return Err(below_minimum(&output, params));
        }

        outputs.push(output);
    }

    Ok(outputs)
}
