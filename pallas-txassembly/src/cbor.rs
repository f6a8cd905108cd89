//! Small helpers around `minicbor` for sizing and emitting ledger types.

use pallas_codec::minicbor::{self, Encode};

/// Encodes `value` into a fresh buffer.
///
/// Writing into a `Vec` can't fail and the ledger encoders raise no custom
/// errors, so a failure is only logged.
pub fn to_vec<T: Encode<()>>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();

    if let Err(err) = minicbor::encode(value, &mut buf) {
        tracing::error!(%err, "cbor encoding into memory failed");
    }

    buf
}

/// Serialized size of `value` in bytes
pub fn encoded_len<T: Encode<()>>(value: &T) -> usize {
    to_vec(value).len()
}
