use crate::{
    cbor,
    params::ProtocolParameters,
    transaction::{ledger_transaction, ExUnits, TransactionBody, VKeyWitness, WitnessSet},
    TxBuilderError,
};

/// Stand-in verification key used to size witnesses before signing
pub const FAKE_VKEY: [u8; 32] = [
    0x7e, 0xa0, 0x9a, 0x34, 0xae, 0xbb, 0x13, 0xc9, 0x84, 0x1c, 0x71, 0x39, 0x7b, 0x1c, 0xab,
    0xfe, 0xc5, 0xdd, 0xf9, 0x50, 0x40, 0x52, 0x93, 0xde, 0xe4, 0x96, 0xca, 0xc2, 0xf4, 0x37,
    0x48, 0x0a,
];

/// Stand-in signature, same length as an ed25519 signature
pub const FAKE_SIGNATURE: [u8; 64] = [0x01; 64];

/// Fee written into trial transactions: wide enough that no real fee encodes
/// to more bytes
pub const FEE_PLACEHOLDER: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub size: u64,
    pub fee: u64,
}

/// Prices transactions with the linear fee policy plus script execution
pub struct LinearFee<'a> {
    params: &'a ProtocolParameters,
}

impl<'a> LinearFee<'a> {
    pub fn new(params: &'a ProtocolParameters) -> Self {
        Self { params }
    }

    /// Witness set with `signers` fake vkey witnesses added
    pub fn fake_witnesses(witness_set: &WitnessSet, signers: usize) -> WitnessSet {
        let mut fake = witness_set.clone();

        fake.vkey_witnesses.extend((0..signers).map(|_| VKeyWitness {
            vkey: FAKE_VKEY.to_vec(),
            signature: FAKE_SIGNATURE.to_vec(),
        }));

        fake
    }

    /// Size of the signed transaction, with the fee field at its widest
    pub fn signed_size(&self, body: &TransactionBody, witness_set: &WitnessSet, signers: usize) -> u64 {
        let mut body = body.clone();
        body.fee = FEE_PLACEHOLDER;

        let witness_set = Self::fake_witnesses(witness_set, signers);

        cbor::encoded_len(&ledger_transaction(&body, &witness_set)) as u64
    }

    pub fn estimate(
        &self,
        body: &TransactionBody,
        witness_set: &WitnessSet,
        signers: usize,
    ) -> Result<FeeEstimate, TxBuilderError> {
        let size = self.signed_size(body, witness_set, signers);

        if size > self.params.max_tx_size {
            return Err(TxBuilderError::TransactionTooBig {
                size: size as usize,
                max: self.params.max_tx_size as usize,
            });
        }

        let ex_units: ExUnits = witness_set.redeemers.iter().map(|x| x.ex_units).sum();
        let fee = self.params.min_fee(size, &ex_units);

        Ok(FeeEstimate { size, fee })
    }
}
