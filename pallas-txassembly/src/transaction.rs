use std::{collections::BTreeMap, fmt, str::FromStr};

use pallas_codec::{
    minicbor::{self, encode::Write, Encode, Encoder},
    utils::{NonEmptyKeyValuePairs, NonEmptySet, Nullable, Set},
};
use pallas_crypto::hash::{Hash, Hasher};
use pallas_primitives::conway::{
    self, NetworkId, PlutusData, PseudoScript, RedeemersKey, RedeemersValue, ScriptRef,
    StakeCredential, TransactionInput, TransactionOutput,
};
use pallas_traverse::ComputeHash;
use serde::{Deserialize, Serialize};

use crate::{
    cbor,
    multiasset::MultiAsset,
    params::{CostModel, Language},
    utxo::{script_language, DatumHash, Input, Output, TransactionId},
    TxBuilderError,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExUnits {
    pub mem: u64,
    pub steps: u64,
}

impl std::ops::Add for ExUnits {
    type Output = ExUnits;

    fn add(self, rhs: ExUnits) -> ExUnits {
        ExUnits {
            mem: self.mem + rhs.mem,
            steps: self.steps + rhs.steps,
        }
    }
}

impl std::iter::Sum for ExUnits {
    fn sum<I: Iterator<Item = ExUnits>>(iter: I) -> Self {
        iter.fold(ExUnits::default(), |acc, x| acc + x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RedeemerTag {
    Spend,
    Mint,
    Cert,
    Reward,
}

impl From<ExUnits> for conway::ExUnits {
    fn from(units: ExUnits) -> Self {
        conway::ExUnits {
            mem: units.mem,
            steps: units.steps,
        }
    }
}

impl From<RedeemerTag> for conway::RedeemerTag {
    fn from(tag: RedeemerTag) -> Self {
        match tag {
            RedeemerTag::Spend => conway::RedeemerTag::Spend,
            RedeemerTag::Mint => conway::RedeemerTag::Mint,
            RedeemerTag::Cert => conway::RedeemerTag::Cert,
            RedeemerTag::Reward => conway::RedeemerTag::Reward,
        }
    }
}

impl fmt::Display for RedeemerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RedeemerTag::Spend => "spend",
            RedeemerTag::Mint => "mint",
            RedeemerTag::Cert => "certificate",
            RedeemerTag::Reward => "withdrawal",
        };

        f.write_str(text)
    }
}

impl FromStr for RedeemerTag {
    type Err = TxBuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spend" => Ok(RedeemerTag::Spend),
            "mint" => Ok(RedeemerTag::Mint),
            "certificate" | "cert" | "publish" => Ok(RedeemerTag::Cert),
            "withdrawal" | "reward" | "withdraw" => Ok(RedeemerTag::Reward),
            _ => Err(TxBuilderError::MalformedEvaluationKey(s.into())),
        }
    }
}

/// Parses an evaluator key of the form `tag:index`
pub fn parse_evaluation_key(key: &str) -> Result<(RedeemerTag, u32), TxBuilderError> {
    let malformed = || TxBuilderError::MalformedEvaluationKey(key.into());

    let (tag, index) = key.split_once(':').ok_or_else(malformed)?;
    let tag = tag.parse().map_err(|_| malformed())?;
    let index = index.parse().map_err(|_| malformed())?;

    Ok((tag, index))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redeemer {
    pub tag: RedeemerTag,
    pub index: u32,
    pub data: PlutusData,
    pub ex_units: ExUnits,
}

/// Redeemers in the map form the ledger accepts since Conway
fn ledger_redeemers(redeemers: &[Redeemer]) -> Option<conway::Redeemers> {
    let entries = redeemers
        .iter()
        .map(|x| {
            let key = RedeemersKey {
                tag: x.tag.into(),
                index: x.index,
            };

            let value = RedeemersValue {
                data: x.data.clone(),
                ex_units: x.ex_units.into(),
            };

            (key, value)
        })
        .collect();

    NonEmptyKeyValuePairs::from_vec(entries).map(conway::Redeemers::from)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Certificate {
    StakeRegistration(Hash<28>),
    StakeDeregistration(Hash<28>),
}

impl From<&Certificate> for conway::Certificate {
    fn from(cert: &Certificate) -> Self {
        match cert {
            Certificate::StakeRegistration(x) => {
                conway::Certificate::StakeRegistration(StakeCredential::AddrKeyhash(*x))
            }
            Certificate::StakeDeregistration(x) => {
                conway::Certificate::StakeDeregistration(StakeCredential::AddrKeyhash(*x))
            }
        }
    }
}

fn language_id(language: &Language) -> u8 {
    match language {
        Language::PlutusV1 => 0,
        Language::PlutusV2 => 1,
        Language::PlutusV3 => 2,
    }
}

/// Cost models of the languages a transaction uses, in the shape hashed into
/// the script data hash.
///
/// This view only ever exists inside the hash preimage, so it has no ledger
/// type of its own and is written by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageViews(pub BTreeMap<Language, CostModel>);

impl<C> Encode<C> for LanguageViews {
    fn encode<W: Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.map(self.0.len() as u64)?;

        // canonical key order: the one-byte integer keys of later languages
        // sort before the two-byte bytestring key of PlutusV1
        let later = self
            .0
            .iter()
            .filter(|(l, _)| !matches!(l, Language::PlutusV1));

        for (language, costs) in later {
            e.u8(language_id(language))?;
            e.array(costs.len() as u64)?;

            for cost in costs {
                e.i64(*cost)?;
            }
        }

        if let Some(costs) = self.0.get(&Language::PlutusV1) {
            // PlutusV1 keeps the historical double-bagged form
            e.bytes(&cbor::to_vec(&language_id(&Language::PlutusV1)))?;
            e.bytes(&cbor::to_vec(&IndefiniteCosts(costs)))?;
        }

        Ok(())
    }
}

struct IndefiniteCosts<'a>(&'a [i64]);

impl<C> Encode<C> for IndefiniteCosts<'_> {
    fn encode<W: Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.begin_array()?;
        for cost in self.0 {
            e.i64(*cost)?;
        }
        e.end()?;

        Ok(())
    }
}

/// Hash committing to the redeemers, datums and cost models of a
/// transaction, taken over the witness set exactly as it is emitted.
///
/// `None` when the witness set carries neither redeemers nor datums.
pub fn script_data_hash(
    witness_set: &conway::WitnessSet,
    views: &LanguageViews,
) -> Option<Hash<32>> {
    let redeemers = witness_set.redeemer.as_ref();
    let datums = witness_set.plutus_data.as_ref();

    if redeemers.is_none() && datums.is_none() {
        return None;
    }

    let mut buf = vec![];

    // without redeemers both the redeemers and the views are empty maps
    match redeemers {
        Some(redeemers) => buf.extend(cbor::to_vec(redeemers)),
        None => buf.push(0xa0),
    }

    if let Some(datums) = datums {
        buf.extend(cbor::to_vec(datums));
    }

    match redeemers {
        Some(_) => buf.extend(cbor::to_vec(views)),
        None => buf.push(0xa0),
    }

    Some(Hasher::<256>::hash(&buf))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionBody {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub fee: u64,
    pub ttl: Option<u64>,
    pub certificates: Vec<Certificate>,
    pub validity_interval_start: Option<u64>,
    pub mint: Option<MultiAsset>,
    pub script_data_hash: Option<Hash<32>>,
    pub collateral: Vec<Input>,
    pub required_signers: Vec<Hash<28>>,
    pub network_id: Option<NetworkId>,
    pub collateral_return: Option<Output>,
    pub total_collateral: Option<u64>,
    pub reference_inputs: Vec<Input>,
}

fn ledger_inputs(inputs: &[Input]) -> Vec<TransactionInput> {
    inputs.iter().map(TransactionInput::from).collect()
}

impl From<&TransactionBody> for conway::TransactionBody {
    fn from(body: &TransactionBody) -> Self {
        conway::TransactionBody {
            inputs: Set::from(ledger_inputs(&body.inputs)),
            outputs: body.outputs.iter().map(TransactionOutput::from).collect(),
            fee: body.fee,
            ttl: body.ttl,
            certificates: NonEmptySet::from_vec(
                body.certificates.iter().map(conway::Certificate::from).collect(),
            ),
            withdrawals: None,
            auxiliary_data_hash: None,
            validity_interval_start: body.validity_interval_start,
            mint: body.mint.as_ref().and_then(MultiAsset::to_mint),
            script_data_hash: body.script_data_hash,
            collateral: NonEmptySet::from_vec(ledger_inputs(&body.collateral)),
            required_signers: NonEmptySet::from_vec(body.required_signers.clone()),
            network_id: body.network_id.clone(),
            collateral_return: body.collateral_return.as_ref().map(TransactionOutput::from),
            total_collateral: body.total_collateral,
            reference_inputs: NonEmptySet::from_vec(ledger_inputs(&body.reference_inputs)),
            voting_procedures: None,
            proposal_procedures: None,
            treasury_value: None,
            donation: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VKeyWitness {
    pub vkey: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WitnessSet {
    pub vkey_witnesses: Vec<VKeyWitness>,
    pub scripts: Vec<ScriptRef>,
    /// Datums in datum hash order
    pub plutus_data: Vec<PlutusData>,
    pub redeemers: Vec<Redeemer>,
}

impl WitnessSet {
    /// Plutus languages of the attached scripts
    pub fn languages(&self) -> Vec<Language> {
        let mut out: Vec<_> = self.scripts.iter().filter_map(script_language).collect();
        out.sort();
        out.dedup();
        out
    }
}

impl From<&WitnessSet> for conway::WitnessSet {
    fn from(witness_set: &WitnessSet) -> Self {
        let mut native = vec![];
        let mut v1 = vec![];
        let mut v2 = vec![];
        let mut v3 = vec![];

        for script in witness_set.scripts.iter().cloned() {
            match script {
                PseudoScript::NativeScript(x) => native.push(x),
                PseudoScript::PlutusV1Script(x) => v1.push(x),
                PseudoScript::PlutusV2Script(x) => v2.push(x),
                PseudoScript::PlutusV3Script(x) => v3.push(x),
            }
        }

        let vkeys = witness_set
            .vkey_witnesses
            .iter()
            .map(|x| conway::VKeyWitness {
                vkey: x.vkey.clone().into(),
                signature: x.signature.clone().into(),
            })
            .collect();

        conway::WitnessSet {
            vkeywitness: NonEmptySet::from_vec(vkeys),
            native_script: NonEmptySet::from_vec(native),
            bootstrap_witness: None,
            plutus_v1_script: NonEmptySet::from_vec(v1),
            plutus_data: NonEmptySet::from_vec(witness_set.plutus_data.clone()),
            redeemer: ledger_redeemers(&witness_set.redeemers),
            plutus_v2_script: NonEmptySet::from_vec(v2),
            plutus_v3_script: NonEmptySet::from_vec(v3),
        }
    }
}

/// Full transaction as submitted: body, witnesses, validity flag and no
/// auxiliary data
pub fn ledger_transaction(body: &TransactionBody, witness_set: &WitnessSet) -> conway::Tx {
    conway::Tx {
        transaction_body: body.into(),
        transaction_witness_set: witness_set.into(),
        success: true,
        auxiliary_data: Nullable::Null,
    }
}

/// Balanced transaction ready to be signed
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTransaction {
    pub body: TransactionBody,
    pub witness_set: WitnessSet,
}

impl BuiltTransaction {
    pub fn tx_hash(&self) -> TransactionId {
        Hasher::<256>::hash_cbor(&conway::TransactionBody::from(&self.body))
    }

    pub fn fee(&self) -> u64 {
        self.body.fee
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        cbor::to_vec(&ledger_transaction(&self.body, &self.witness_set))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_cbor())
    }

    /// Attaches a signature made over [`BuiltTransaction::tx_hash`]
    pub fn add_signature(mut self, vkey: Vec<u8>, signature: Vec<u8>) -> Self {
        self.witness_set
            .vkey_witnesses
            .push(VKeyWitness { vkey, signature });
        self
    }

    pub fn datum_hashes(&self) -> Vec<DatumHash> {
        self.witness_set
            .plutus_data
            .iter()
            .map(|x| x.compute_hash())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pallas_codec::utils::Bytes;
    use pallas_primitives::{
        conway::{NativeScript, PlutusScript},
        Fragment,
    };

    use super::*;
    use crate::utxo::placeholder_address;

    fn data(bytes: &[u8]) -> PlutusData {
        PlutusData::decode_fragment(bytes).unwrap()
    }

    #[test]
    fn evaluation_keys() {
        assert_eq!(parse_evaluation_key("spend:0"), Ok((RedeemerTag::Spend, 0)));
        assert_eq!(parse_evaluation_key("mint:12"), Ok((RedeemerTag::Mint, 12)));
        assert!(parse_evaluation_key("spend").is_err());
        assert!(parse_evaluation_key("vote:1").is_err());
        assert!(parse_evaluation_key("spend:x").is_err());
    }

    #[test]
    fn plutus_v1_view_is_double_bagged() {
        let views = LanguageViews([(Language::PlutusV1, vec![1, 2])].into_iter().collect());

        assert_eq!(
            cbor::to_vec(&views),
            vec![0xa1, 0x41, 0x00, 0x44, 0x9f, 0x01, 0x02, 0xff]
        );
    }

    // language view of a mainnet Alonzo transaction, as accepted by the ledger
    #[test]
    fn plutus_v1_view_matches_mainnet() {
        let expected = hex::decode(
            include_str!("../test_data/alonzo_v1_language_view.hex").trim(),
        )
        .unwrap();

        let mut decoder = minicbor::Decoder::new(&expected);
        assert_eq!(decoder.map().unwrap(), Some(1));
        assert_eq!(decoder.bytes().unwrap(), &[0x00]);
        let costs: Vec<i64> = minicbor::decode(decoder.bytes().unwrap()).unwrap();

        assert_eq!(costs.len(), 166);
        assert_eq!(&costs[..3], &[197209, 0, 1]);

        let views = LanguageViews([(Language::PlutusV1, costs)].into_iter().collect());

        assert_eq!(cbor::to_vec(&views), expected);
    }

    #[test]
    fn later_views_sort_before_v1() {
        let views = LanguageViews(
            [
                (Language::PlutusV1, vec![1]),
                (Language::PlutusV2, vec![2]),
                (Language::PlutusV3, vec![3]),
            ]
            .into_iter()
            .collect(),
        );

        let bytes = cbor::to_vec(&views);
        assert_eq!(&bytes[..7], &[0xa3, 0x01, 0x81, 0x02, 0x02, 0x81, 0x03]);
        assert_eq!(&bytes[7..9], &[0x41, 0x00]);
    }

    #[test]
    fn script_data_hash_with_datums_only() {
        let witness_set = WitnessSet {
            plutus_data: vec![data(&[0x01])],
            ..Default::default()
        };

        // empty redeemers, the datums as a tagged set, empty views
        let expected = Hasher::<256>::hash(&[0xa0, 0xd9, 0x01, 0x02, 0x81, 0x01, 0xa0]);

        assert_eq!(
            script_data_hash(&(&witness_set).into(), &LanguageViews::default()),
            Some(expected)
        );
    }

    #[test]
    fn script_data_hash_covers_redeemers_and_views() {
        let witness_set = WitnessSet {
            redeemers: vec![Redeemer {
                tag: RedeemerTag::Spend,
                index: 0,
                data: data(&[0x00]),
                ex_units: ExUnits { mem: 1, steps: 2 },
            }],
            ..Default::default()
        };

        let views = LanguageViews([(Language::PlutusV2, vec![7])].into_iter().collect());

        let mut preimage = vec![0xa1, 0x82, 0x00, 0x00, 0x82, 0x00, 0x82, 0x01, 0x02];
        preimage.extend([0xa1, 0x01, 0x81, 0x07]);

        assert_eq!(
            script_data_hash(&(&witness_set).into(), &views),
            Some(Hasher::<256>::hash(&preimage))
        );

        assert_eq!(
            script_data_hash(&(&WitnessSet::default()).into(), &views),
            None
        );
    }

    #[test]
    fn body_hash_ignores_witnesses() {
        let body = TransactionBody {
            inputs: vec![Input::new(Hash::new([1; 32]), 0)],
            outputs: vec![Output::lovelace(placeholder_address(), 1_000_000)],
            fee: 170_000,
            ..Default::default()
        };

        let unsigned = BuiltTransaction {
            body,
            witness_set: WitnessSet::default(),
        };

        let signed = unsigned.clone().add_signature(vec![0; 32], vec![0; 64]);

        assert_eq!(unsigned.tx_hash(), signed.tx_hash());
        assert!(signed.to_cbor().len() > unsigned.to_cbor().len());
    }

    #[test]
    fn emitted_transaction_decodes_as_conway() {
        let body = TransactionBody {
            inputs: vec![Input::new(Hash::new([1; 32]), 3)],
            outputs: vec![Output::lovelace(placeholder_address(), 2_000_000)],
            fee: 180_000,
            ttl: Some(1_000),
            certificates: vec![Certificate::StakeRegistration(Hash::new([4; 28]))],
            ..Default::default()
        };

        let tx = BuiltTransaction {
            body,
            witness_set: WitnessSet::default(),
        };

        let decoded: conway::Tx = minicbor::decode(&tx.to_cbor()).unwrap();

        assert_eq!(decoded.transaction_body.fee, 180_000);
        assert_eq!(decoded.transaction_body.ttl, Some(1_000));
        assert_eq!(decoded.transaction_body.outputs.len(), 1);
        assert_eq!(
            Hasher::<256>::hash_cbor(&decoded.transaction_body),
            tx.tx_hash()
        );
    }

    #[test]
    fn witness_set_keys_are_ascending() {
        let witness_set = WitnessSet {
            scripts: vec![
                PseudoScript::PlutusV2Script(PlutusScript::<2>(Bytes::from(vec![0xaa]))),
                PseudoScript::NativeScript(NativeScript::InvalidBefore(0)),
            ],
            redeemers: vec![Redeemer {
                tag: RedeemerTag::Spend,
                index: 0,
                data: data(&[0x00]),
                ex_units: ExUnits { mem: 1, steps: 2 },
            }],
            ..Default::default()
        };

        let bytes = cbor::to_vec(&conway::WitnessSet::from(&witness_set));

        assert_eq!(bytes[0], 0xa3);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(witness_set.languages(), vec![Language::PlutusV2]);
        assert_eq!(
            bytes[bytes.len() - 7..],
            [0x06, 0xd9, 0x01, 0x02, 0x81, 0x41, 0xaa]
        );
    }

    #[test]
    fn datum_hashes_cover_the_encoded_data() {
        let tx = BuiltTransaction {
            body: TransactionBody::default(),
            witness_set: WitnessSet {
                plutus_data: vec![data(&[0x18, 0x2a])],
                ..Default::default()
            },
        };

        assert_eq!(
            tx.datum_hashes(),
            vec![Hasher::<256>::hash(&[0x18, 0x2a])]
        );
    }
}
