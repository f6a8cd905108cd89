use std::fmt;

use pallas_addresses::{
    Address, Network, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart,
};
use pallas_codec::utils::{Bytes, CborWrap};
use pallas_crypto::hash::{Hash, Hasher};
use pallas_primitives::{
    conway::{
        self, DatumOption, Language, NativeScript, PlutusData, PlutusScript,
        PostAlonzoTransactionOutput, PseudoScript, ScriptRef, TransactionInput, TransactionOutput,
    },
    Fragment,
};

use crate::{value::Value, TxBuilderError};

pub type TransactionId = Hash<32>;
pub type DatumHash = Hash<32>;
pub type ScriptHash = Hash<28>;

/// Reference to an output of a previous transaction.
///
/// Ordering is by transaction id and then index, which is the canonical order
/// inputs take inside a transaction body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Input {
    pub tx_hash: TransactionId,
    pub index: u64,
}

impl Input {
    pub fn new(tx_hash: TransactionId, index: u64) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

impl From<&Input> for TransactionInput {
    fn from(input: &Input) -> Self {
        TransactionInput {
            transaction_id: input.tx_hash,
            index: input.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Hash(DatumHash),
    Inline(PlutusData),
}

impl From<&Datum> for DatumOption {
    fn from(datum: &Datum) -> Self {
        match datum {
            Datum::Hash(hash) => DatumOption::Hash(*hash),
            Datum::Inline(data) => DatumOption::Data(CborWrap(data.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScriptKind {
    Native,
    PlutusV1,
    PlutusV2,
    PlutusV3,
}

impl ScriptKind {
    fn hash_tag(&self) -> u8 {
        match self {
            ScriptKind::Native => 0,
            ScriptKind::PlutusV1 => 1,
            ScriptKind::PlutusV2 => 2,
            ScriptKind::PlutusV3 => 3,
        }
    }
}

/// Native script CBOR or flat-encoded plutus script bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub kind: ScriptKind,
    pub bytes: Vec<u8>,
}

impl Script {
    pub fn new(kind: ScriptKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    pub fn hash(&self) -> ScriptHash {
        Hasher::<224>::hash_tagged(&self.bytes, self.kind.hash_tag())
    }
}

/// Decodes native scripts; plutus bytes are carried as they are
impl TryFrom<&Script> for ScriptRef {
    type Error = TxBuilderError;

    fn try_from(script: &Script) -> Result<Self, Self::Error> {
        let bytes = Bytes::from(script.bytes.clone());

        let script = match script.kind {
            ScriptKind::Native => PseudoScript::NativeScript(
                NativeScript::decode_fragment(&script.bytes)
                    .map_err(|_| TxBuilderError::MalformedScript)?,
            ),
            ScriptKind::PlutusV1 => PseudoScript::PlutusV1Script(PlutusScript::<1>(bytes)),
            ScriptKind::PlutusV2 => PseudoScript::PlutusV2Script(PlutusScript::<2>(bytes)),
            ScriptKind::PlutusV3 => PseudoScript::PlutusV3Script(PlutusScript::<3>(bytes)),
        };

        Ok(script)
    }
}

/// Plutus language of a decoded script, `None` for native scripts
pub fn script_language(script: &ScriptRef) -> Option<Language> {
    match script {
        PseudoScript::NativeScript(_) => None,
        PseudoScript::PlutusV1Script(_) => Some(Language::PlutusV1),
        PseudoScript::PlutusV2Script(_) => Some(Language::PlutusV2),
        PseudoScript::PlutusV3Script(_) => Some(Language::PlutusV3),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub address: Address,
    pub value: Value,
    pub datum: Option<Datum>,
    pub script_ref: Option<ScriptRef>,
}

impl Output {
    pub fn new(address: Address, value: Value) -> Self {
        Self {
            address,
            value,
            datum: None,
            script_ref: None,
        }
    }

    pub fn lovelace(address: Address, coin: i64) -> Self {
        Self::new(address, Value::Coin(coin))
    }

    pub fn with_datum(mut self, datum: Datum) -> Self {
        self.datum = Some(datum);
        self
    }

    /// Attaches a reference script, decoding it first
    pub fn with_script_ref(mut self, script: &Script) -> Result<Self, TxBuilderError> {
        self.script_ref = Some(ScriptRef::try_from(script)?);
        Ok(self)
    }
}

impl From<&Output> for TransactionOutput {
    fn from(output: &Output) -> Self {
        TransactionOutput::PostAlonzo(PostAlonzoTransactionOutput {
            address: Bytes::from(output.address.to_vec()),
            value: conway::Value::from(&output.value),
            datum_option: output.datum.as_ref().map(DatumOption::from),
            script_ref: output.script_ref.clone().map(CborWrap),
        })
    }
}

/// An unspent output together with the reference that spends it
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub input: Input,
    pub output: Output,
}

impl Utxo {
    pub fn new(input: Input, output: Output) -> Self {
        Self { input, output }
    }

    pub fn value(&self) -> &Value {
        &self.output.value
    }

    pub fn has_datum(&self) -> bool {
        self.output.datum.is_some()
    }

    /// Payment key that has to sign for spending this output, if any
    pub fn payment_key(&self) -> Option<Hash<28>> {
        match &self.output.address {
            Address::Shelley(address) => match address.payment() {
                ShelleyPaymentPart::Key(hash) => Some(*hash),
                ShelleyPaymentPart::Script(_) => None,
            },
            _ => None,
        }
    }
}

/// Base address with zeroed credentials, used to size outputs whose real
/// destination doesn't matter yet
pub fn placeholder_address() -> Address {
    Address::Shelley(ShelleyAddress::new(
        Network::Mainnet,
        ShelleyPaymentPart::Key(Hash::new([0; 28])),
        ShelleyDelegationPart::Key(Hash::new([0; 28])),
    ))
}
