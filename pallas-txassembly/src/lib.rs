//! Transaction assembly for Cardano: multi-asset value arithmetic, coin
//! selection and the fee / change balancing loop that turns a partial
//! transaction description into a balanced body.

use thiserror::Error;

pub mod asset;
pub mod builder;
pub mod cbor;
pub mod change;
pub mod fee;
pub mod multiasset;
pub mod params;
pub mod provider;
pub mod select;
pub mod transaction;
pub mod utxo;
pub mod value;

pub mod prelude;

use provider::ProviderError;
use select::SelectionError;
use transaction::RedeemerTag;
use utxo::Input;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxBuilderError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An input was both declared for spending and explicitly excluded
    #[error("input {0} is both spent and excluded")]
    InputExclusionConflict(Input),

    #[error("transaction size {size} exceeds maximum of {max}")]
    TransactionTooBig { size: usize, max: usize },

    #[error("collateral of {provided} lovelace doesn't cover required {required}")]
    InsufficientCollateral { provided: u64, required: u64 },

    #[error("collateral return of {available} lovelace is below the minimum of {minimum}")]
    CollateralReturnBelowMinimum { available: i64, minimum: u64 },

    /// Scripts are being executed but no collateral could be found
    #[error("transaction runs scripts but has no collateral inputs")]
    MissingCollateral,

    #[error("change must be returned but no change address was given")]
    MissingChangeAddress,

    #[error("value of {size} bytes exceeds maximum value size of {max}")]
    ValueTooBig { size: usize, max: usize },

    #[error("redeemer points at an input or policy that is not part of the transaction")]
    RedeemerTargetMissing,

    #[error("no execution units for {0:?} redeemer at index {1}")]
    MissingExUnits(RedeemerTag, u32),

    #[error("malformed script evaluation key: {0}")]
    MalformedEvaluationKey(String),

    #[error("native script bytes don't decode")]
    MalformedScript,

    #[error("datum or redeemer bytes aren't valid plutus data")]
    MalformedDatum,

    #[error("network id {0} is neither testnet nor mainnet")]
    InvalidNetworkId(u8),

    /// Summing input values went past the representable quantity range
    #[error("value arithmetic overflowed")]
    ValueOverflow,
}
