pub use crate::{
    asset::{AssetName, Assets, PolicyId},
    builder::{RedeemerPurpose, SelectionStrategy, TransactionBuilder},
    multiasset::MultiAsset,
    params::{Language, ProtocolParameters},
    provider::{LedgerProvider, MemoryProvider, ProviderError},
    select::{
        LargestFirst, RandomImprove, Selection, SelectionConstraints, SelectionError,
        UtxoSelector,
    },
    transaction::{BuiltTransaction, Certificate, ExUnits, RedeemerTag},
    utxo::{Datum, Input, Output, Script, ScriptKind, Utxo},
    value::Value,
    TxBuilderError,
};
