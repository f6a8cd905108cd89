use std::collections::{BTreeMap, BTreeSet};

use pallas_addresses::Address;
use pallas_crypto::hash::{Hash, Hasher};
use pallas_primitives::{
    conway::{self, NetworkId, PlutusData, ScriptRef},
    Fragment,
};
use tracing::{debug, instrument, warn};

use crate::{
    asset::{AssetName, PolicyId},
    cbor,
    change::pack_change,
    fee::{LinearFee, FEE_PLACEHOLDER},
    multiasset::MultiAsset,
    params::ProtocolParameters,
    provider::LedgerProvider,
    select::{
        total_requested, LargestFirst, RandomImprove, Selection, SelectionConstraints,
        SelectionError, UtxoSelector,
    },
    transaction::{
        ledger_transaction, parse_evaluation_key, script_data_hash, BuiltTransaction,
        Certificate, ExUnits, LanguageViews, Redeemer, RedeemerTag, TransactionBody, WitnessSet,
    },
    utxo::{
        placeholder_address, script_language, DatumHash, Input, Output, Script, ScriptHash,
        ScriptKind, Utxo,
    },
    value::Value,
    TxBuilderError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    LargestFirst,
    /// Unseeded strategies draw from OS entropy
    RandomImprove { seed: Option<u64> },
}

impl SelectionStrategy {
    fn selector(&self) -> Box<dyn UtxoSelector> {
        match self {
            SelectionStrategy::LargestFirst => Box::new(LargestFirst),
            SelectionStrategy::RandomImprove { seed: Some(seed) } => {
                Box::new(RandomImprove::seeded(*seed))
            }
            SelectionStrategy::RandomImprove { seed: None } => Box::new(RandomImprove::from_entropy()),
        }
    }
}

/// What a redeemer unlocks, before it gets its positional index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedeemerPurpose {
    Spend(Input),
    Mint(PolicyId),
}

fn plutus_data(bytes: &[u8]) -> Result<PlutusData, TxBuilderError> {
    PlutusData::decode_fragment(bytes).map_err(|_| TxBuilderError::MalformedDatum)
}

/// Lists the negative entries of a change value
fn describe_deficit(change: &Value) -> String {
    let mut parts = vec![];

    if change.coin() < 0 {
        parts.push(format!("{} lovelace", -change.coin()));
    }

    if let Some(assets) = change.assets() {
        parts.extend(
            assets
                .flatten()
                .filter(|(_, _, quantity)| *quantity < 0)
                .map(|(policy, name, quantity)| format!("{} of {policy}.{name}", -quantity)),
        );
    }

    parts.join(", ")
}

/// Names the fee growth in balance errors raised after the second estimate
fn after_fee_growth(err: TxBuilderError, grown: u64) -> TxBuilderError {
    match err {
        TxBuilderError::Selection(SelectionError::InsufficientUtxoBalance(msg)) if grown > 0 => {
            SelectionError::InsufficientUtxoBalance(format!(
                "{msg} after the fee grew by {grown} lovelace"
            ))
            .into()
        }
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RedeemerEntry {
    data: Vec<u8>,
    ex_units: Option<ExUnits>,
}

/// Accumulates the parts of a transaction and balances them on
/// [`TransactionBuilder::build`].
///
/// Setters take and return the builder by value so they can be chained.
/// Building works on a copy of the state, so a failed build leaves the
/// builder as it was.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    inputs: Vec<Utxo>,
    excluded_inputs: Vec<Input>,
    loaded_utxos: Option<Vec<Utxo>>,
    reference_inputs: Vec<Utxo>,
    outputs: Vec<Output>,
    mint: Option<MultiAsset>,
    certificates: Vec<Certificate>,
    required_signers: Vec<Hash<28>>,
    collateral_inputs: Vec<Utxo>,
    collateral_change_address: Option<Address>,
    collateral_return: Option<Output>,
    total_collateral: Option<u64>,
    redeemers: BTreeMap<RedeemerPurpose, RedeemerEntry>,
    datums: BTreeMap<DatumHash, Vec<u8>>,
    scripts: BTreeMap<ScriptHash, Script>,
    fee: Option<u64>,
    estimate_ex_units: bool,
    change_address: Option<Address>,
    merge_change: bool,
    valid_from_slot: Option<u64>,
    invalid_from_slot: Option<u64>,
    network_id: Option<u8>,
    strategies: Vec<SelectionStrategy>,
    max_inputs: Option<usize>,
    fee_buffer: bool,
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self {
            inputs: vec![],
            excluded_inputs: vec![],
            loaded_utxos: None,
            reference_inputs: vec![],
            outputs: vec![],
            mint: None,
            certificates: vec![],
            required_signers: vec![],
            collateral_inputs: vec![],
            collateral_change_address: None,
            collateral_return: None,
            total_collateral: None,
            redeemers: BTreeMap::new(),
            datums: BTreeMap::new(),
            scripts: BTreeMap::new(),
            fee: None,
            estimate_ex_units: false,
            change_address: None,
            merge_change: false,
            valid_from_slot: None,
            invalid_from_slot: None,
            network_id: None,
            strategies: vec![
                SelectionStrategy::LargestFirst,
                SelectionStrategy::RandomImprove { seed: None },
            ],
            max_inputs: None,
            fee_buffer: false,
        }
    }
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spends `utxo`; adding the same input twice has no effect
    pub fn input(mut self, utxo: Utxo) -> Self {
        if !self.inputs.iter().any(|x| x.input == utxo.input) {
            self.inputs.push(utxo);
        }

        self
    }

    pub fn remove_input(mut self, input: Input) -> Self {
        self.inputs.retain(|x| x.input != input);
        self.redeemers.remove(&RedeemerPurpose::Spend(input));
        self
    }

    /// Keeps `input` out of automatic selection
    pub fn exclude_input(mut self, input: Input) -> Self {
        self.excluded_inputs.push(input);
        self
    }

    /// UTxOs to select from instead of querying the provider
    pub fn load_utxos(mut self, utxos: impl IntoIterator<Item = Utxo>) -> Self {
        self.loaded_utxos
            .get_or_insert_with(Vec::new)
            .extend(utxos);
        self
    }

    pub fn reference_input(mut self, utxo: Utxo) -> Self {
        self.reference_inputs.push(utxo);
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn remove_output(mut self, index: usize) -> Self {
        if index < self.outputs.len() {
            self.outputs.remove(index);
        }

        self
    }

    /// Mints (or burns, with a negative amount) an asset
    pub fn mint_asset(mut self, policy: PolicyId, name: AssetName, amount: i64) -> Self {
        self.mint
            .get_or_insert_with(MultiAsset::new)
            .add_quantity(policy, name, amount);
        self
    }

    pub fn certificate(mut self, certificate: Certificate) -> Self {
        self.certificates.push(certificate);
        self
    }

    pub fn disclosed_signer(mut self, pub_key_hash: Hash<28>) -> Self {
        self.required_signers.push(pub_key_hash);
        self
    }

    pub fn collateral_input(mut self, utxo: Utxo) -> Self {
        self.collateral_inputs.push(utxo);
        self
    }

    /// Where collateral left over after the penalty goes
    pub fn collateral_change_address(mut self, address: Address) -> Self {
        self.collateral_change_address = Some(address);
        self
    }

    /// Overrides the collateral amount, which otherwise covers the largest
    /// fee the ledger accepts
    pub fn total_collateral(mut self, amount: u64) -> Self {
        self.total_collateral = Some(amount);
        self
    }

    pub fn script(mut self, kind: ScriptKind, bytes: Vec<u8>) -> Self {
        let script = Script::new(kind, bytes);
        self.scripts.insert(script.hash(), script);
        self
    }

    /// Adds the CBOR of a datum to the witness set
    pub fn datum(mut self, datum: Vec<u8>) -> Self {
        let hash = Hasher::<256>::hash(&datum);
        self.datums.insert(hash, datum);
        self
    }

    /// Spends a script-locked `utxo` with the given redeemer data.
    ///
    /// Without `ex_units`, the budget has to come from script evaluation.
    pub fn add_spend_redeemer(
        mut self,
        utxo: Utxo,
        plutus_data: Vec<u8>,
        ex_units: Option<ExUnits>,
    ) -> Self {
        let purpose = RedeemerPurpose::Spend(utxo.input);

        self.redeemers.insert(
            purpose,
            RedeemerEntry {
                data: plutus_data,
                ex_units,
            },
        );

        self.input(utxo)
    }

    pub fn add_mint_redeemer(
        mut self,
        policy: PolicyId,
        plutus_data: Vec<u8>,
        ex_units: Option<ExUnits>,
    ) -> Self {
        self.redeemers.insert(
            RedeemerPurpose::Mint(policy),
            RedeemerEntry {
                data: plutus_data,
                ex_units,
            },
        );
        self
    }

    /// Fixes the fee instead of estimating it
    pub fn fee(mut self, fee: u64) -> Self {
        self.fee = Some(fee);
        self
    }

    /// Asks the provider for the execution budget of every redeemer
    pub fn estimate_ex_units(mut self, enabled: bool) -> Self {
        self.estimate_ex_units = enabled;
        self
    }

    pub fn change_address(mut self, address: Address) -> Self {
        self.change_address = Some(address);
        self
    }

    /// Adds change to an existing output at the change address instead of
    /// creating new outputs
    pub fn merge_change(mut self, enabled: bool) -> Self {
        self.merge_change = enabled;
        self
    }

    pub fn valid_from_slot(mut self, slot: u64) -> Self {
        self.valid_from_slot = Some(slot);
        self
    }

    pub fn invalid_from_slot(mut self, slot: u64) -> Self {
        self.invalid_from_slot = Some(slot);
        self
    }

    pub fn network_id(mut self, id: u8) -> Self {
        self.network_id = Some(id);
        self
    }

    /// Selection strategies in priority order.
    ///
    /// The first strategy decides the supplementary selection; if it fails,
    /// the build fails instead of falling back to the next one.
    pub fn selection_strategies(mut self, strategies: Vec<SelectionStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Caps how many inputs automatic selection may add
    pub fn max_inputs(mut self, max: usize) -> Self {
        self.max_inputs = Some(max);
        self
    }

    /// Selects enough to also cover the largest possible fee
    pub fn fee_buffer(mut self, enabled: bool) -> Self {
        self.fee_buffer = enabled;
        self
    }

    /// Balances the transaction against the ledger state behind `provider`
    #[instrument(skip_all)]
    pub fn build<P: LedgerProvider>(&self, provider: &P) -> Result<BuiltTransaction, TxBuilderError> {
        let params = provider.protocol_parameters()?;
        let mut tx = self.clone();

        tx.check_exclusions()?;

        let mut available = tx.declared_balance(&params)?;
        let merge_target = tx.merge_target();

        let unfulfilled = tx.shortfall(&available, merge_target, &params)?;

        if !unfulfilled.is_zero() {
            debug!(lovelace = unfulfilled.coin(), "declared inputs fall short");

            let selection = tx.select(provider, &unfulfilled, merge_target, &params)?;

            for utxo in selection.selected {
                available = available
                    .checked_add(utxo.value())
                    .ok_or(TxBuilderError::ValueOverflow)?;
                tx.inputs.push(utxo);
            }
        }

        // fails early on redeemers pointing nowhere
        tx.indexed_redeemers(Some(params.max_tx_ex_units))?;

        let runs_scripts = !tx.redeemers.is_empty();

        if runs_scripts {
            tx.settle_collateral(provider, &params)?;
        }

        if tx.estimate_ex_units && runs_scripts {
            tx.evaluate(provider, &params)?;
        }

        let redeemers = tx
            .indexed_redeemers(None)?
            .into_iter()
            .map(|(_, x)| x)
            .collect();

        let witness_set = tx.witness_set(redeemers)?;
        let script_data_hash = tx.script_data_hash(&witness_set, &params);
        let signers = tx.signer_count();
        let estimator = LinearFee::new(&params);

        let surplus = &available - &total_requested(&tx.outputs);

        // change moves the size, which moves the fee: one refinement round
        let first = match tx.fee {
            Some(fee) => fee,
            None => {
                let body = tx.body(tx.outputs.clone(), FEE_PLACEHOLDER, script_data_hash)?;
                estimator.estimate(&body, &witness_set, signers)?.fee
            }
        };

        let outputs = tx.with_change(&surplus, first, merge_target, &params)?;

        let second = match tx.fee {
            Some(fee) => fee,
            None => {
                let body = tx.body(outputs, FEE_PLACEHOLDER, script_data_hash)?;
                estimator.estimate(&body, &witness_set, signers)?.fee
            }
        };

        let grown = second.saturating_sub(first);

        let outputs = tx
            .with_change(&surplus, second, merge_target, &params)
            .map_err(|err| after_fee_growth(err, grown))?;

        debug!(first, second, outputs = outputs.len(), "fee settled");

        for output in outputs.iter() {
            if !params.satisfies_min_lovelace(output) {
                let err = SelectionError::InsufficientUtxoBalance(format!(
                    "output of {} lovelace is below the minimum of {}",
                    output.value.coin(),
                    params.min_lovelace(output)
                ));

                return Err(after_fee_growth(err.into(), grown));
            }
        }

        let body = tx.body(outputs, second, script_data_hash)?;

        // size guard on the final shape
        estimator.estimate(&body, &witness_set, signers)?;

        if runs_scripts {
            tx.check_collateral(second, &params)?;
        }

        Ok(BuiltTransaction { body, witness_set })
    }

    fn check_exclusions(&self) -> Result<(), TxBuilderError> {
        let conflict = self
            .inputs
            .iter()
            .find(|x| self.excluded_inputs.contains(&x.input));

        match conflict {
            Some(utxo) => Err(TxBuilderError::InputExclusionConflict(utxo.input)),
            None => Ok(()),
        }
    }

    /// Declared inputs plus mint, net of deposits and refunds
    fn declared_balance(&self, params: &ProtocolParameters) -> Result<Value, TxBuilderError> {
        let mut total = self
            .inputs
            .iter()
            .try_fold(Value::default(), |acc, x| acc.checked_add(x.value()))
            .ok_or(TxBuilderError::ValueOverflow)?;

        if let Some(mint) = &self.mint {
            total.add_assets(mint);
        }

        for certificate in self.certificates.iter() {
            match certificate {
                Certificate::StakeRegistration(_) => total.sub_lovelace(params.key_deposit as i64),
                Certificate::StakeDeregistration(_) => total.add_lovelace(params.key_deposit as i64),
            }
        }

        Ok(total)
    }

    /// Output that change gets merged into, preferring zero-coin placeholders
    fn merge_target(&self) -> Option<usize> {
        if !self.merge_change {
            return None;
        }

        let address = self.change_address.as_ref()?;

        let candidates: Vec<usize> = self
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, x)| &x.address == address)
            .map(|(i, _)| i)
            .collect();

        candidates
            .iter()
            .find(|i| self.outputs[**i].value.coin() == 0)
            .or(candidates.first())
            .copied()
    }

    fn needs_change_output(&self, merge_target: Option<usize>) -> bool {
        merge_target.is_none() && self.change_address.is_some()
    }

    /// Value still missing to pay the outputs and a first fee estimate
    fn shortfall(
        &self,
        available: &Value,
        merge_target: Option<usize>,
        params: &ProtocolParameters,
    ) -> Result<Value, TxBuilderError> {
        let fee = match self.fee {
            Some(fee) => fee,
            None => {
                // budgets not known yet are priced at the maximum
                let redeemers = self
                    .indexed_redeemers(Some(params.max_tx_ex_units))?
                    .into_iter()
                    .map(|(_, x)| x)
                    .collect();

                let witness_set = self.witness_set(redeemers)?;
                let hash = self.script_data_hash(&witness_set, params);
                let body = self.body(self.outputs.clone(), FEE_PLACEHOLDER, hash)?;

                LinearFee::new(params)
                    .estimate(&body, &witness_set, self.signer_count())?
                    .fee
            }
        };

        let mut requested = total_requested(&self.outputs);
        requested.add_lovelace(fee as i64);

        let trimmed = available.filter_by(|policy, name, _| requested.get(policy, name) != 0);
        let mut unfulfilled = (&requested - &trimmed).positive_part();

        // burns of assets the declared inputs don't hold
        let mut burned =
            -available.filter_by(|policy, name, q| q < 0 && requested.get(policy, name) == 0);
        burned.set_lovelace(0);
        unfulfilled += &burned;

        if let Some(address) = self.change_address.as_ref() {
            if self.needs_change_output(merge_target) {
                let mut leftover = (available - &requested).positive_part();
                leftover.set_lovelace(0);

                let owed = params.required_lovelace(&Output::new(address.clone(), leftover));
                let missing = requested.coin() - available.coin() + owed as i64;

                unfulfilled.set_lovelace(missing.max(0));
            }
        }

        Ok(unfulfilled.normalized())
    }

    /// UTxOs available to automatic selection, `None` when there is no source
    fn candidate_pool<P: LedgerProvider>(
        &self,
        provider: &P,
    ) -> Result<Option<Vec<Utxo>>, TxBuilderError> {
        let source = match (&self.loaded_utxos, &self.change_address) {
            (Some(loaded), _) => loaded.clone(),
            (None, Some(address)) => provider.utxos_at(address)?,
            (None, None) => return Ok(None),
        };

        let pool = source
            .into_iter()
            .filter(|x| !x.has_datum())
            .filter(|x| !self.excluded_inputs.contains(&x.input))
            .filter(|x| !self.inputs.iter().any(|i| i.input == x.input))
            .collect();

        Ok(Some(pool))
    }

    fn select<P: LedgerProvider>(
        &self,
        provider: &P,
        unfulfilled: &Value,
        merge_target: Option<usize>,
        params: &ProtocolParameters,
    ) -> Result<Selection, TxBuilderError> {
        let pool = self.candidate_pool(provider)?.ok_or_else(|| {
            SelectionError::InsufficientUtxoBalance(
                "no utxos loaded and no change address to query".into(),
            )
        })?;

        let Some(strategy) = self.strategies.first() else {
            return Err(SelectionError::InsufficientUtxoBalance(
                "no selection strategy configured".into(),
            )
            .into());
        };

        let request = [Output::new(placeholder_address(), unfulfilled.clone())];

        let constraints = SelectionConstraints {
            max_inputs: self.max_inputs,
            include_fee_buffer: self.fee_buffer,
            respect_min_output: self.needs_change_output(merge_target),
        };

        let selection = strategy
            .selector()
            .select(&pool, &request, params, &constraints)
            .inspect_err(|err| warn!(?strategy, %err, "selection failed"))?;

        debug!(
            ?strategy,
            inputs = selection.selected.len(),
            change = selection.change.coin(),
            "selection done"
        );

        Ok(selection)
    }

    fn sorted_inputs(&self) -> Vec<Input> {
        let mut inputs: Vec<_> = self.inputs.iter().map(|x| x.input).collect();
        inputs.sort();
        inputs.dedup();
        inputs
    }

    fn minted_policies(&self) -> Vec<PolicyId> {
        self.mint
            .as_ref()
            .map(|x| x.remove_zero_assets().policies().copied().collect())
            .unwrap_or_default()
    }

    /// Redeemers with their positional index: spends point into the sorted
    /// inputs, mints into the sorted minted policies.
    ///
    /// `fallback` stands in for budgets that aren't known yet.
    fn indexed_redeemers(
        &self,
        fallback: Option<ExUnits>,
    ) -> Result<Vec<(RedeemerPurpose, Redeemer)>, TxBuilderError> {
        let inputs = self.sorted_inputs();
        let policies = self.minted_policies();

        let mut out = vec![];

        for (purpose, entry) in self.redeemers.iter() {
            let (tag, index) = match purpose {
                RedeemerPurpose::Spend(input) => (RedeemerTag::Spend, inputs.binary_search(input)),
                RedeemerPurpose::Mint(policy) => (RedeemerTag::Mint, policies.binary_search(policy)),
            };

            let index = index.map_err(|_| TxBuilderError::RedeemerTargetMissing)? as u32;

            let ex_units = entry
                .ex_units
                .or(fallback)
                .ok_or(TxBuilderError::MissingExUnits(tag, index))?;

            let redeemer = Redeemer {
                tag,
                index,
                data: plutus_data(&entry.data)?,
                ex_units,
            };

            out.push((purpose.clone(), redeemer));
        }

        out.sort_by_key(|(_, x)| (x.tag, x.index));

        Ok(out)
    }

    /// Decodes the attached scripts and datums into their witness form
    fn witness_set(&self, redeemers: Vec<Redeemer>) -> Result<WitnessSet, TxBuilderError> {
        let scripts = self
            .scripts
            .values()
            .map(ScriptRef::try_from)
            .collect::<Result<_, _>>()?;

        let datums = self
            .datums
            .values()
            .map(|x| plutus_data(x))
            .collect::<Result<_, _>>()?;

        Ok(WitnessSet {
            vkey_witnesses: vec![],
            scripts,
            plutus_data: datums,
            redeemers,
        })
    }

    fn script_data_hash(
        &self,
        witness_set: &WitnessSet,
        params: &ProtocolParameters,
    ) -> Option<Hash<32>> {
        let mut languages = witness_set.languages();

        languages.extend(
            self.reference_inputs
                .iter()
                .filter_map(|x| x.output.script_ref.as_ref())
                .filter_map(script_language),
        );

        let views = languages
            .into_iter()
            .filter_map(|x| params.cost_models.get(&x).map(|costs| (x, costs.clone())))
            .collect();

        script_data_hash(&conway::WitnessSet::from(witness_set), &LanguageViews(views))
    }

    /// Keys expected to sign: owners of spent and collateral inputs, disclosed
    /// signers and deregistered stake keys. Never less than one.
    fn signer_count(&self) -> usize {
        let spent = self.inputs.iter().chain(self.collateral_inputs.iter());

        let mut keys: BTreeSet<Hash<28>> = spent.clone().filter_map(Utxo::payment_key).collect();

        keys.extend(self.required_signers.iter().copied());

        keys.extend(self.certificates.iter().filter_map(|x| match x {
            Certificate::StakeDeregistration(key) => Some(*key),
            Certificate::StakeRegistration(_) => None,
        }));

        let bootstrap: BTreeSet<Vec<u8>> = spent
            .filter(|x| matches!(x.output.address, Address::Byron(_)))
            .map(|x| x.output.address.to_vec())
            .collect();

        (keys.len() + bootstrap.len()).max(1)
    }

    fn body(
        &self,
        outputs: Vec<Output>,
        fee: u64,
        script_data_hash: Option<Hash<32>>,
    ) -> Result<TransactionBody, TxBuilderError> {
        let mut collateral: Vec<_> = self.collateral_inputs.iter().map(|x| x.input).collect();
        collateral.sort();
        collateral.dedup();

        let mut reference_inputs: Vec<_> = self.reference_inputs.iter().map(|x| x.input).collect();
        reference_inputs.sort();
        reference_inputs.dedup();

        let outputs = outputs
            .into_iter()
            .map(|mut x| {
                x.value = x.value.normalized();
                x
            })
            .collect();

        let mint = self
            .mint
            .as_ref()
            .map(MultiAsset::remove_zero_assets)
            .filter(|x| !x.is_empty());

        let network_id = self
            .network_id
            .map(|id| NetworkId::try_from(id).map_err(|_| TxBuilderError::InvalidNetworkId(id)))
            .transpose()?;

        Ok(TransactionBody {
            inputs: self.sorted_inputs(),
            outputs,
            fee,
            ttl: self.invalid_from_slot,
            certificates: self.certificates.clone(),
            validity_interval_start: self.valid_from_slot,
            mint,
            script_data_hash,
            collateral,
            required_signers: self.required_signers.clone(),
            network_id,
            collateral_return: self.collateral_return.clone(),
            // only declared next to a collateral return
            total_collateral: self.total_collateral.filter(|_| self.collateral_return.is_some()),
            reference_inputs,
        })
    }

    /// Outputs after returning `surplus - fee` as change
    fn with_change(
        &self,
        surplus: &Value,
        fee: u64,
        merge_target: Option<usize>,
        params: &ProtocolParameters,
    ) -> Result<Vec<Output>, TxBuilderError> {
        let mut change = surplus.clone();
        change.sub_lovelace(fee as i64);
        let change = change.normalized();

        if !change.is_non_negative() {
            return Err(SelectionError::InsufficientUtxoBalance(format!(
                "inputs don't cover outputs and a fee of {fee}, short of {}",
                describe_deficit(&change)
            ))
            .into());
        }

        let mut outputs = self.outputs.clone();

        if change.is_zero() {
            return Ok(outputs);
        }

        let address = self
            .change_address
            .as_ref()
            .ok_or(TxBuilderError::MissingChangeAddress)?;

        match merge_target {
            Some(i) => {
                let target = &mut outputs[i];
                target.value += &change;
                target.value = target.value.normalized();

                let size = target.value.encoded_size();
                let max = params.max_value_size as usize;

                if size > max {
                    return Err(TxBuilderError::ValueTooBig { size, max });
                }
            }
            None => outputs.extend(pack_change(&change, address, params)?),
        }

        Ok(outputs)
    }

    /// Pure lovelace, key-locked UTxOs to pledge as collateral, largest first
    fn pick_collateral(&self, pool: &[Utxo], params: &ProtocolParameters) -> Vec<Utxo> {
        let mut target = self.total_collateral.unwrap_or(params.max_collateral());

        if let Some(address) = &self.collateral_change_address {
            target += params.required_lovelace(&Output::lovelace(address.clone(), 0));
        }

        let mut candidates: Vec<&Utxo> = pool
            .iter()
            .filter(|x| !x.value().has_assets() && x.payment_key().is_some())
            .collect();

        candidates.sort_by_key(|x| std::cmp::Reverse(x.value().coin()));

        let mut picked = vec![];
        let mut total = 0;

        for utxo in candidates {
            if total >= target || picked.len() as u64 >= params.max_collateral_inputs {
                break;
            }

            total += utxo.value().coin().max(0) as u64;
            picked.push(utxo.clone());
        }

        picked
    }

    fn settle_collateral<P: LedgerProvider>(
        &mut self,
        provider: &P,
        params: &ProtocolParameters,
    ) -> Result<(), TxBuilderError> {
        if self.collateral_inputs.is_empty() {
            if let Some(pool) = self.candidate_pool(provider)? {
                self.collateral_inputs = self.pick_collateral(&pool, params);
                debug!(inputs = self.collateral_inputs.len(), "collateral picked");
            }
        }

        if self.collateral_inputs.is_empty() {
            return Err(TxBuilderError::MissingCollateral);
        }

        let Some(address) = self.collateral_change_address.clone() else {
            return Ok(());
        };

        let required = self.total_collateral.unwrap_or(params.max_collateral());
        let provided: Value = self.collateral_inputs.iter().map(Utxo::value).sum();

        if provided.coin() < required as i64 {
            return Err(TxBuilderError::InsufficientCollateral {
                provided: provided.coin().max(0) as u64,
                required,
            });
        }

        let mut remainder = provided;
        remainder.sub_lovelace(required as i64);

        let output = Output::new(address, remainder.normalized());

        if !params.satisfies_min_lovelace(&output) {
            return Err(TxBuilderError::CollateralReturnBelowMinimum {
                available: output.value.coin(),
                minimum: params.min_lovelace(&output),
            });
        }

        self.collateral_return = Some(output);
        self.total_collateral = Some(required);

        Ok(())
    }

    fn check_collateral(&self, fee: u64, params: &ProtocolParameters) -> Result<(), TxBuilderError> {
        let provided = match self.total_collateral.filter(|_| self.collateral_return.is_some()) {
            Some(total) => total,
            None => self
                .collateral_inputs
                .iter()
                .map(|x| x.value().coin().max(0) as u64)
                .sum(),
        };

        let required = params.collateral_for(fee);

        if provided < required {
            return Err(TxBuilderError::InsufficientCollateral { provided, required });
        }

        Ok(())
    }

    /// Runs the scripts on a trial copy and keeps the budgets they report
    fn evaluate<P: LedgerProvider>(
        &mut self,
        provider: &P,
        params: &ProtocolParameters,
    ) -> Result<(), TxBuilderError> {
        let trial = self.clone();

        let indexed = trial.indexed_redeemers(Some(params.max_tx_ex_units))?;
        let witness_set = trial.witness_set(indexed.iter().map(|(_, x)| x.clone()).collect())?;
        let hash = trial.script_data_hash(&witness_set, params);
        let body = trial.body(trial.outputs.clone(), FEE_PLACEHOLDER, hash)?;

        let tx_cbor = cbor::to_vec(&ledger_transaction(&body, &witness_set));

        let budgets = provider.evaluate_scripts(&tx_cbor)?;

        for (key, ex_units) in budgets {
            let (tag, index) = parse_evaluation_key(&key)?;

            let purpose = indexed
                .iter()
                .find(|(_, x)| x.tag == tag && x.index == index)
                .map(|(purpose, _)| purpose);

            match purpose.and_then(|x| self.redeemers.get_mut(x)) {
                Some(entry) => entry.ex_units = Some(ex_units),
                None => warn!(%key, "evaluator returned a budget for an unknown redeemer"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pallas_addresses::{Network, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart};

    use super::*;
    use crate::provider::MemoryProvider;

    fn address(byte: u8) -> Address {
        Address::Shelley(ShelleyAddress::new(
            Network::Testnet,
            ShelleyPaymentPart::Key(Hash::new([byte; 28])),
            ShelleyDelegationPart::Null,
        ))
    }

    fn utxo(id: u8, owner: u8, coin: i64) -> Utxo {
        Utxo::new(
            Input::new(Hash::new([id; 32]), 0),
            Output::lovelace(address(owner), coin),
        )
    }

    fn provider() -> MemoryProvider {
        MemoryProvider::new(ProtocolParameters::mainnet())
    }

    #[test]
    fn excluded_declared_input_conflicts() {
        let result = TransactionBuilder::new()
            .input(utxo(1, 1, 5_000_000))
            .exclude_input(Input::new(Hash::new([1; 32]), 0))
            .output(Output::lovelace(address(2), 1_000_000))
            .build(&provider());

        assert_eq!(
            result,
            Err(TxBuilderError::InputExclusionConflict(Input::new(
                Hash::new([1; 32]),
                0
            )))
        );
    }

    #[test]
    fn merge_target_prefers_zero_coin_placeholder() {
        let builder = TransactionBuilder::new()
            .change_address(address(1))
            .merge_change(true)
            .output(Output::lovelace(address(2), 1_000_000))
            .output(Output::lovelace(address(1), 2_000_000))
            .output(Output::lovelace(address(1), 0));

        assert_eq!(builder.merge_target(), Some(2));

        let builder = builder.remove_output(2);
        assert_eq!(builder.merge_target(), Some(1));
    }

    #[test]
    fn deposits_and_refunds_fold_into_balance() {
        let params = ProtocolParameters::mainnet();

        let builder = TransactionBuilder::new()
            .input(utxo(1, 1, 10_000_000))
            .certificate(Certificate::StakeRegistration(Hash::new([1; 28])))
            .certificate(Certificate::StakeRegistration(Hash::new([2; 28])))
            .certificate(Certificate::StakeDeregistration(Hash::new([3; 28])));

        assert_eq!(builder.declared_balance(&params), Ok(Value::Coin(8_000_000)));
    }

    #[test]
    fn redeemer_indices_follow_sorted_inputs() {
        let builder = TransactionBuilder::new()
            .add_spend_redeemer(utxo(9, 1, 5_000_000), vec![0x00], Some(ExUnits::default()))
            .input(utxo(3, 1, 5_000_000))
            .add_spend_redeemer(utxo(5, 1, 5_000_000), vec![0x01], Some(ExUnits::default()));

        let indexed = builder.indexed_redeemers(None).unwrap();
        let indices: Vec<_> = indexed
            .iter()
            .map(|(purpose, x)| (purpose.clone(), x.index))
            .collect();

        assert_eq!(
            indices,
            vec![
                (RedeemerPurpose::Spend(Input::new(Hash::new([5; 32]), 0)), 1),
                (RedeemerPurpose::Spend(Input::new(Hash::new([9; 32]), 0)), 2),
            ]
        );
    }

    #[test]
    fn mint_redeemer_needs_minted_policy() {
        let builder = TransactionBuilder::new()
            .add_mint_redeemer(Hash::new([4; 28]), vec![0x00], Some(ExUnits::default()));

        assert_eq!(
            builder.indexed_redeemers(None),
            Err(TxBuilderError::RedeemerTargetMissing)
        );
    }

    #[test]
    fn missing_budget_without_estimation() {
        let builder =
            TransactionBuilder::new().add_spend_redeemer(utxo(1, 1, 5_000_000), vec![0x00], None);

        assert_eq!(
            builder.indexed_redeemers(None),
            Err(TxBuilderError::MissingExUnits(RedeemerTag::Spend, 0))
        );
    }

    #[test]
    fn signers_are_distinct_keys() {
        let builder = TransactionBuilder::new()
            .input(utxo(1, 1, 5_000_000))
            .input(utxo(2, 1, 5_000_000))
            .input(utxo(3, 2, 5_000_000))
            .disclosed_signer(Hash::new([1; 28]))
            .disclosed_signer(Hash::new([7; 28]));

        assert_eq!(builder.signer_count(), 3);
    }

    #[test]
    fn total_collateral_needs_a_return() {
        let builder = TransactionBuilder::new()
            .input(utxo(1, 1, 5_000_000))
            .collateral_input(utxo(2, 1, 5_000_000))
            .total_collateral(2_000_000);

        let body = builder.body(vec![], 0, None).unwrap();

        assert_eq!(body.collateral.len(), 1);
        assert_eq!(body.total_collateral, None);
    }

    #[test]
    fn unknown_network_id_is_rejected() {
        let builder = TransactionBuilder::new().network_id(7);

        assert_eq!(
            builder.body(vec![], 0, None),
            Err(TxBuilderError::InvalidNetworkId(7))
        );
    }

    #[test]
    fn malformed_redeemer_data() {
        let builder = TransactionBuilder::new().add_spend_redeemer(
            utxo(1, 1, 5_000_000),
            vec![0x9f],
            Some(ExUnits::default()),
        );

        assert_eq!(
            builder.indexed_redeemers(None),
            Err(TxBuilderError::MalformedDatum)
        );
    }

    #[test]
    fn change_below_minimum_names_the_fee_growth() {
        let params = ProtocolParameters::mainnet();

        // change merges into a zero-coin output, so it grows the body
        let base = TransactionBuilder::new()
            .change_address(address(1))
            .merge_change(true)
            .output(Output::lovelace(address(1), 0));

        let trial = base.clone().input(utxo(1, 1, 0));
        let body = trial.body(trial.outputs.clone(), FEE_PLACEHOLDER, None).unwrap();
        let first = LinearFee::new(&params)
            .estimate(&body, &WitnessSet::default(), trial.signer_count())
            .unwrap()
            .fee;

        let result = base.input(utxo(1, 1, first as i64 + 50)).build(&provider());

        match result {
            Err(TxBuilderError::Selection(SelectionError::InsufficientUtxoBalance(msg))) => {
                assert!(msg.contains("below the minimum"), "{msg}");
                assert!(msg.contains("after the fee grew by 44 lovelace"), "{msg}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn build_does_not_touch_the_builder() {
        let builder = TransactionBuilder::new()
            .change_address(address(1))
            .load_utxos([utxo(1, 1, 10_000_000)])
            .output(Output::lovelace(address(2), 2_000_000));

        let before = format!("{builder:?}");
        let built = builder.build(&provider()).unwrap();

        assert_eq!(built.body.inputs.len(), 1);
        assert_eq!(format!("{builder:?}"), before);
    }
}
