use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{instrument, trace};

use super::{check_cap, SelectionError, UtxoSelector};
use crate::{
    asset::{AssetName, PolicyId},
    utxo::Utxo,
    value::Value,
};

/// A single quantity the selection has to cover
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubRequest {
    Lovelace(i64),
    Asset(PolicyId, AssetName, i64),
}

impl SubRequest {
    fn quantity(&self) -> i64 {
        match self {
            SubRequest::Lovelace(x) => *x,
            SubRequest::Asset(_, _, x) => *x,
        }
    }

    /// How much of this request `value` carries
    fn held_by(&self, value: &Value) -> i64 {
        match self {
            SubRequest::Lovelace(_) => value.coin(),
            SubRequest::Asset(policy, name, _) => value.get(policy, name),
        }
    }

    fn split(target: &Value) -> Vec<SubRequest> {
        let mut out = vec![];

        if target.coin() > 0 {
            out.push(SubRequest::Lovelace(target.coin()));
        }

        if let Some(assets) = target.assets() {
            out.extend(
                assets
                    .flatten()
                    .filter(|(_, _, quantity)| *quantity > 0)
                    .map(|(policy, name, quantity)| {
                        SubRequest::Asset(*policy, name.clone(), quantity)
                    }),
            );
        }

        out
    }
}

/// Random-improve selection (CIP-2) generalised to one sub-request per asset.
///
/// The random phase covers each sub-request with randomly drawn UTxOs that
/// hold some of it, smallest request first. The improve phase then walks the
/// sub-requests from largest to smallest and keeps adding random UTxOs while
/// that brings the selected quantity closer to twice the request without
/// going over three times it.
#[derive(Debug, Clone)]
pub struct RandomImprove<R = StdRng> {
    rng: R,
}

impl RandomImprove<StdRng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng> RandomImprove<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> UtxoSelector for RandomImprove<R> {
    #[instrument(skip_all, fields(pool = pool.len()))]
    fn select_target(
        &mut self,
        pool: &[Utxo],
        target: &Value,
        max_inputs: Option<usize>,
    ) -> Result<Vec<Utxo>, SelectionError> {
        let mut requests = SubRequest::split(target);

        if pool.is_empty() && !requests.is_empty() {
            return Err(SelectionError::InsufficientUtxoBalance(
                "no utxos available to select from".into(),
            ));
        }

        requests.sort_by_key(SubRequest::quantity);

        let mut remaining: Vec<&Utxo> = pool.iter().collect();
        let mut selected: Vec<Utxo> = vec![];
        let mut amount = Value::default();

        for request in requests.iter() {
            while request.held_by(&amount) < request.quantity() {
                let relevant: Vec<usize> = (0..remaining.len())
                    .filter(|i| request.held_by(remaining[*i].value()) > 0)
                    .collect();

                if relevant.is_empty() {
                    return Err(SelectionError::InputUtxoDepleted);
                }

                check_cap(selected.len(), max_inputs)?;

                let pick = relevant[self.rng.gen_range(0..relevant.len())];
                let utxo = remaining.swap_remove(pick);

                trace!(input = %utxo.input, ?request, "random pick");

                amount += utxo.value();
                selected.push(utxo.clone());
            }
        }

        for request in requests.iter().rev() {
            let ideal = 2 * request.quantity() as i128;
            let upper = 3 * request.quantity() as i128;

            loop {
                if check_cap(selected.len(), max_inputs).is_err() {
                    break;
                }

                let relevant: Vec<usize> = (0..remaining.len())
                    .filter(|i| request.held_by(remaining[*i].value()) > 0)
                    .collect();

                if relevant.is_empty() {
                    break;
                }

                let pick = relevant[self.rng.gen_range(0..relevant.len())];

                let current = request.held_by(&amount) as i128;
                let candidate = current + request.held_by(remaining[pick].value()) as i128;

                let improves = (ideal - candidate).abs() < (ideal - current).abs();

                if !improves || candidate > upper {
                    break;
                }

                let utxo = remaining.swap_remove(pick);

                trace!(input = %utxo.input, ?request, "improvement");

                amount += utxo.value();
                selected.push(utxo.clone());
            }
        }

        Ok(selected)
    }
}
