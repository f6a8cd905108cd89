//! Coin selection: picking UTxOs from a pool so their combined value covers a
//! requested set of outputs.

use thiserror::Error;
use tracing::trace;

use crate::{
    params::ProtocolParameters,
    utxo::{placeholder_address, Output, Utxo},
    value::Value,
};

mod largest_first;
mod random_improve;

pub use largest_first::LargestFirst;
pub use random_improve::RandomImprove;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("insufficient utxo balance: {0}")]
    InsufficientUtxoBalance(String),

    #[error("selection needs more than {0} inputs")]
    MaxInputCountExceeded(usize),

    #[error("utxo pool depleted before the request was met")]
    InputUtxoDepleted,
}

/// Knobs shared by every selection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionConstraints {
    /// Upper bound on the number of selected inputs, unbounded when `None`
    pub max_inputs: Option<usize>,

    /// Add the ledger's maximum transaction fee on top of the request
    pub include_fee_buffer: bool,

    /// Keep selecting until the change can stand as an output on its own
    pub respect_min_output: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// UTxOs in the order they were picked
    pub selected: Vec<Utxo>,

    /// Selected value minus the requested value, fee buffer excluded
    pub change: Value,
}

impl Selection {
    pub fn total(&self) -> Value {
        self.selected.iter().map(Utxo::value).sum()
    }

    fn absorb(&mut self, other: Selection, covered: i64) {
        self.selected.extend(other.selected);
        self.change.add_lovelace(covered);
        self.change += &other.change;
    }
}

pub fn total_requested(outputs: &[Output]) -> Value {
    outputs.iter().map(|x| &x.value).sum()
}

pub(crate) fn check_cap(selected: usize, max_inputs: Option<usize>) -> Result<(), SelectionError> {
    match max_inputs {
        Some(max) if selected >= max => Err(SelectionError::MaxInputCountExceeded(max)),
        _ => Ok(()),
    }
}

pub trait UtxoSelector {
    /// Picks UTxOs from `pool` until their value reaches `target`.
    ///
    /// Returns the picked UTxOs in selection order; never more than
    /// `max_inputs`.
    fn select_target(
        &mut self,
        pool: &[Utxo],
        target: &Value,
        max_inputs: Option<usize>,
    ) -> Result<Vec<Utxo>, SelectionError>;

    /// Selects inputs covering `request`, applying the shared constraints on
    /// top of the strategy
    fn select(
        &mut self,
        pool: &[Utxo],
        request: &[Output],
        params: &ProtocolParameters,
        constraints: &SelectionConstraints,
    ) -> Result<Selection, SelectionError> {
        let requested = total_requested(request);

        let mut target = requested.clone();

        if constraints.include_fee_buffer {
            target.add_lovelace(params.max_tx_fee() as i64);
        }

        let selected = self.select_target(pool, &target, constraints.max_inputs)?;

        let mut selection = Selection {
            change: &selected.iter().map(Utxo::value).sum::<Value>() - &requested,
            selected,
        };

        if constraints.respect_min_output {
            self.cover_change_minimum(&mut selection, pool, params, constraints)?;
        }

        Ok(selection)
    }

    /// Tops up the selection while its change can't pay for its own output
    fn cover_change_minimum(
        &mut self,
        selection: &mut Selection,
        pool: &[Utxo],
        params: &ProtocolParameters,
        constraints: &SelectionConstraints,
    ) -> Result<(), SelectionError> {
        loop {
            let change = Output::new(placeholder_address(), selection.change.normalized());
            let shortfall = params.required_lovelace(&change) as i64 - selection.change.coin();

            if shortfall <= 0 {
                return Ok(());
            }

            check_cap(selection.selected.len(), constraints.max_inputs)?;

            trace!(shortfall, "change below minimum output value");

            let remaining: Vec<_> = pool
                .iter()
                .filter(|x| !selection.selected.iter().any(|s| s.input == x.input))
                .cloned()
                .collect();

            let nested = SelectionConstraints {
                max_inputs: constraints
                    .max_inputs
                    .map(|max| max - selection.selected.len()),
                include_fee_buffer: false,
                respect_min_output: false,
            };

            let request = [Output::new(placeholder_address(), Value::Coin(shortfall))];

            // the nested cap is what's left of the caller's, report the caller's
            let extra = self
                .select(&remaining, &request, params, &nested)
                .map_err(|err| match (err, constraints.max_inputs) {
                    (SelectionError::MaxInputCountExceeded(_), Some(max)) => {
                        SelectionError::MaxInputCountExceeded(max)
                    }
                    (other, _) => other,
                })?;

            selection.absorb(extra, shortfall);
        }
    }
}
