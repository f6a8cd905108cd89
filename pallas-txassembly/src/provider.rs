use std::{cell::RefCell, collections::BTreeMap};

use pallas_addresses::Address;
use thiserror::Error;
use tracing::debug;

use crate::{
    params::ProtocolParameters,
    transaction::{BuiltTransaction, ExUnits},
    utxo::{Input, TransactionId, Utxo},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("utxo query failed: {0}")]
    UtxoQuery(String),

    #[error("protocol parameters unavailable: {0}")]
    Parameters(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("submission rejected: {0}")]
    Submission(String),
}

/// Read access to ledger state plus script evaluation and submission.
///
/// Calls are blocking; retries and caching are up to the implementation.
pub trait LedgerProvider {
    fn utxos_at(&self, address: &Address) -> Result<Vec<Utxo>, ProviderError>;

    fn protocol_parameters(&self) -> Result<ProtocolParameters, ProviderError>;

    /// Execution budget per redeemer, keyed as `tag:index`
    fn evaluate_scripts(&self, tx_cbor: &[u8]) -> Result<BTreeMap<String, ExUnits>, ProviderError>;

    fn submit_transaction(&self, tx: &BuiltTransaction) -> Result<TransactionId, ProviderError>;

    fn max_transaction_fee(&self) -> Result<u64, ProviderError> {
        Ok(self.protocol_parameters()?.max_tx_fee())
    }
}

/// Ledger kept in memory: fixed parameters, a UTxO set that follows
/// submitted transactions and canned evaluation results
#[derive(Debug)]
pub struct MemoryProvider {
    params: ProtocolParameters,
    utxos: RefCell<Vec<Utxo>>,
    evaluation: BTreeMap<String, ExUnits>,
    submitted: RefCell<Vec<Vec<u8>>>,
}

impl MemoryProvider {
    pub fn new(params: ProtocolParameters) -> Self {
        Self {
            params,
            utxos: RefCell::new(vec![]),
            evaluation: BTreeMap::new(),
            submitted: RefCell::new(vec![]),
        }
    }

    pub fn with_utxos(self, utxos: impl IntoIterator<Item = Utxo>) -> Self {
        self.utxos.borrow_mut().extend(utxos);
        self
    }

    pub fn with_evaluation(mut self, key: &str, ex_units: ExUnits) -> Self {
        self.evaluation.insert(key.to_owned(), ex_units);
        self
    }

    pub fn utxos(&self) -> Vec<Utxo> {
        self.utxos.borrow().clone()
    }

    /// CBOR of every accepted transaction, in submission order
    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.submitted.borrow().clone()
    }
}

impl LedgerProvider for MemoryProvider {
    fn utxos_at(&self, address: &Address) -> Result<Vec<Utxo>, ProviderError> {
        let found = self
            .utxos
            .borrow()
            .iter()
            .filter(|x| &x.output.address == address)
            .cloned()
            .collect();

        Ok(found)
    }

    fn protocol_parameters(&self) -> Result<ProtocolParameters, ProviderError> {
        Ok(self.params.clone())
    }

    fn evaluate_scripts(&self, _tx_cbor: &[u8]) -> Result<BTreeMap<String, ExUnits>, ProviderError> {
        if self.evaluation.is_empty() {
            return Err(ProviderError::Evaluation(
                "no evaluation results configured".into(),
            ));
        }

        Ok(self.evaluation.clone())
    }

    fn submit_transaction(&self, tx: &BuiltTransaction) -> Result<TransactionId, ProviderError> {
        let mut utxos = self.utxos.borrow_mut();

        for input in tx.body.inputs.iter() {
            if !utxos.iter().any(|x| &x.input == input) {
                return Err(ProviderError::Submission(format!("unknown input {input}")));
            }
        }

        let tx_hash = tx.tx_hash();

        utxos.retain(|x| !tx.body.inputs.contains(&x.input));

        for (index, output) in tx.body.outputs.iter().enumerate() {
            utxos.push(Utxo::new(Input::new(tx_hash, index as u64), output.clone()));
        }

        debug!(%tx_hash, "transaction applied to memory ledger");

        self.submitted.borrow_mut().push(tx.to_cbor());

        Ok(tx_hash)
    }
}
