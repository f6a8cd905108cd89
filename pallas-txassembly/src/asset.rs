use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    ops::{AddAssign, Deref, Neg, SubAssign},
    str::FromStr,
};

use pallas_crypto::hash::Hash;
use thiserror::Error;

/// Hash of the minting policy script
pub type PolicyId = Hash<28>;

pub const MAX_ASSET_NAME_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum AssetError {
    #[error("asset name is {0} bytes long, at most 32 are allowed")]
    NameTooLong(usize),

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Parses a policy id from its 56 character hex form
pub fn policy_id(hex: &str) -> Result<PolicyId, AssetError> {
    Ok(PolicyId::from_str(hex)?)
}

/// Opaque asset identifier under a policy, up to 32 bytes long
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetName(Vec<u8>);

impl AssetName {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, AssetError> {
        let bytes = bytes.into();

        if bytes.len() > MAX_ASSET_NAME_LEN {
            return Err(AssetError::NameTooLong(bytes.len()));
        }

        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl FromStr for AssetName {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(hex::decode(s)?)
    }
}

impl TryFrom<&[u8]> for AssetName {
    type Error = AssetError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<Vec<u8>> for AssetName {
    type Error = AssetError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Deref for AssetName {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for AssetName {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AssetName").field(&self.to_hex()).finish()
    }
}

/// Signed quantities of the assets minted under a single policy.
///
/// A name that is not present in the map holds an implicit quantity of zero,
/// which is why equality and the dominance comparisons look at the union of
/// both key sets instead of comparing the maps entry by entry. Negative
/// quantities are legal and show up as intermediate balances.
///
/// Arithmetic saturates at the `i64` bounds; use [`Assets::checked_add`] where
/// an overflow has to be detected.
#[derive(Debug, Clone, Default)]
pub struct Assets(BTreeMap<AssetName, i64>);

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity held for `name`, zero when absent
    pub fn get(&self, name: &AssetName) -> i64 {
        self.0.get(name).copied().unwrap_or_default()
    }

    /// Overwrites the quantity held for `name`
    pub fn set(&mut self, name: AssetName, quantity: i64) {
        self.0.insert(name, quantity);
    }

    /// Adds `quantity` to whatever is held for `name`
    pub fn add_quantity(&mut self, name: AssetName, quantity: i64) {
        let held = self.0.entry(name).or_default();
        *held = held.saturating_add(quantity);
    }

    /// Sum of both maps, `None` if any quantity overflows
    pub fn checked_add(&self, rhs: &Assets) -> Option<Assets> {
        let mut out = self.clone();

        for (name, quantity) in rhs {
            let held = out.0.entry(name.clone()).or_default();
            *held = held.checked_add(*quantity)?;
        }

        Some(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetName, &i64)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every quantity is zero, including the empty map
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|x| *x == 0)
    }

    /// Negates every quantity in place
    pub fn invert(&mut self) {
        self.0.values_mut().for_each(|x| *x = x.saturating_neg());
    }

    pub fn filter_by<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&AssetName, i64) -> bool,
    {
        Self(
            self.0
                .iter()
                .filter(|(name, quantity)| predicate(name, **quantity))
                .map(|(name, quantity)| (name.clone(), *quantity))
                .collect(),
        )
    }

    pub fn remove_zero_assets(&self) -> Self {
        self.filter_by(|_, quantity| quantity != 0)
    }

    fn names<'a>(&'a self, other: &'a Self) -> BTreeSet<&'a AssetName> {
        self.0.keys().chain(other.0.keys()).collect()
    }

    pub fn less_or_equal(&self, other: &Self) -> bool {
        self.names(other)
            .into_iter()
            .all(|name| self.get(name) <= other.get(name))
    }

    pub fn greater_or_equal(&self, other: &Self) -> bool {
        other.less_or_equal(self)
    }

    /// Strict dominance: no quantity above `other` and at least one below
    pub fn less(&self, other: &Self) -> bool {
        self.less_or_equal(other) && self != other
    }

    pub fn greater(&self, other: &Self) -> bool {
        other.less(self)
    }
}

impl PartialEq for Assets {
    fn eq(&self, other: &Self) -> bool {
        self.names(other)
            .into_iter()
            .all(|name| self.get(name) == other.get(name))
    }
}

impl Eq for Assets {}

impl FromIterator<(AssetName, i64)> for Assets {
    fn from_iter<T: IntoIterator<Item = (AssetName, i64)>>(iter: T) -> Self {
        let mut assets = Assets::new();

        for (name, quantity) in iter {
            assets.add_quantity(name, quantity);
        }

        assets
    }
}

impl<'a> IntoIterator for &'a Assets {
    type Item = (&'a AssetName, &'a i64);
    type IntoIter = std::collections::btree_map::Iter<'a, AssetName, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl AddAssign<&Assets> for Assets {
    fn add_assign(&mut self, rhs: &Assets) {
        for (name, quantity) in rhs {
            self.add_quantity(name.clone(), *quantity);
        }
    }
}

impl SubAssign<&Assets> for Assets {
    fn sub_assign(&mut self, rhs: &Assets) {
        for (name, quantity) in rhs {
            let held = self.0.entry(name.clone()).or_default();
            *held = held.saturating_sub(*quantity);
        }
    }
}

impl std::ops::Add<&Assets> for &Assets {
    type Output = Assets;

    fn add(self, rhs: &Assets) -> Assets {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl std::ops::Sub<&Assets> for &Assets {
    type Output = Assets;

    fn sub(self, rhs: &Assets) -> Assets {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl Neg for Assets {
    type Output = Assets;

    fn neg(mut self) -> Assets {
        self.invert();
        self
    }
}
