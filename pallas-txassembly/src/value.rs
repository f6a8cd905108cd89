use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use pallas_primitives::conway;

use crate::{
    asset::{AssetName, PolicyId},
    cbor,
    multiasset::MultiAsset,
};

/// An amount of lovelace, optionally carrying native assets.
///
/// The two variants mirror the two on-wire shapes a ledger value can take.
/// Mutating the assets of a `Coin` value upgrades it to `CoinWithAssets`,
/// but nothing flattens a value back to `Coin` implicitly: use
/// [`Value::normalized`] for that.
///
/// Quantities are signed so intermediate balances can go negative, and the
/// arithmetic saturates at the `i64` bounds instead of wrapping.
#[derive(Debug, Clone)]
pub enum Value {
    Coin(i64),
    CoinWithAssets(i64, MultiAsset),
}

impl Default for Value {
    fn default() -> Self {
        Value::Coin(0)
    }
}

impl Value {
    pub fn lovelace(coin: i64) -> Self {
        Value::Coin(coin)
    }

    /// Pure coin form when `assets` is empty, dual form otherwise
    pub fn simple(coin: i64, assets: MultiAsset) -> Self {
        if assets.is_empty() {
            Value::Coin(coin)
        } else {
            Value::CoinWithAssets(coin, assets)
        }
    }

    pub fn coin(&self) -> i64 {
        match self {
            Value::Coin(x) => *x,
            Value::CoinWithAssets(x, _) => *x,
        }
    }

    pub fn assets(&self) -> Option<&MultiAsset> {
        match self {
            Value::Coin(_) => None,
            Value::CoinWithAssets(_, x) => Some(x),
        }
    }

    /// True when at least one asset quantity is non-zero
    pub fn has_assets(&self) -> bool {
        self.assets().is_some_and(|x| !x.is_zero())
    }

    pub fn get(&self, policy: &PolicyId, name: &AssetName) -> i64 {
        self.assets()
            .map(|x| x.get_by_policy_and_id(policy, name))
            .unwrap_or_default()
    }

    fn coin_mut(&mut self) -> &mut i64 {
        match self {
            Value::Coin(x) => x,
            Value::CoinWithAssets(x, _) => x,
        }
    }

    /// Runs `f` on the asset bag, upgrading a `Coin` value first
    fn update_assets(&mut self, f: impl FnOnce(&mut MultiAsset)) {
        match self {
            Value::CoinWithAssets(_, assets) => f(assets),
            Value::Coin(coin) => {
                let coin = *coin;
                let mut assets = MultiAsset::new();
                f(&mut assets);
                *self = Value::CoinWithAssets(coin, assets);
            }
        }
    }

    pub fn add_assets(&mut self, assets: &MultiAsset) {
        self.update_assets(|x| *x += assets);
    }

    pub fn add_asset(&mut self, policy: PolicyId, name: AssetName, quantity: i64) {
        self.update_assets(|x| x.add_quantity(policy, name, quantity));
    }

    pub fn set_multi_asset(&mut self, assets: MultiAsset) {
        self.update_assets(|x| *x = assets);
    }

    pub fn add_lovelace(&mut self, amount: i64) {
        let coin = self.coin_mut();
        *coin = coin.saturating_add(amount);
    }

    pub fn sub_lovelace(&mut self, amount: i64) {
        let coin = self.coin_mut();
        *coin = coin.saturating_sub(amount);
    }

    /// Sum of both values, `None` if the coin or any asset overflows
    pub fn checked_add(&self, rhs: &Value) -> Option<Value> {
        let coin = self.coin().checked_add(rhs.coin())?;

        match (self.assets(), rhs.assets()) {
            (None, None) => Some(Value::Coin(coin)),
            (Some(a), None) | (None, Some(a)) => Some(Value::CoinWithAssets(coin, a.clone())),
            (Some(a), Some(b)) => Some(Value::CoinWithAssets(coin, a.checked_add(b)?)),
        }
    }

    /// Serialized size of the value as an output would carry it
    pub fn encoded_size(&self) -> usize {
        cbor::encoded_len(&conway::Value::from(self))
    }

    pub fn set_lovelace(&mut self, amount: i64) {
        *self.coin_mut() = amount;
    }

    /// Copy with zero quantities pruned; keeps the variant
    pub fn remove_zero_assets(&self) -> Value {
        match self {
            Value::Coin(x) => Value::Coin(*x),
            Value::CoinWithAssets(x, assets) => {
                Value::CoinWithAssets(*x, assets.remove_zero_assets())
            }
        }
    }

    /// Canonical form: zero quantities pruned and an empty bag flattened
    pub fn normalized(&self) -> Value {
        match self {
            Value::Coin(x) => Value::Coin(*x),
            Value::CoinWithAssets(x, assets) => Value::simple(*x, assets.remove_zero_assets()),
        }
    }

    /// Keeps the coin and only the asset entries accepted by `predicate`
    pub fn filter_by<F>(&self, predicate: F) -> Value
    where
        F: FnMut(&PolicyId, &AssetName, i64) -> bool,
    {
        match self {
            Value::Coin(x) => Value::Coin(*x),
            Value::CoinWithAssets(x, assets) => {
                Value::CoinWithAssets(*x, assets.filter_by(predicate))
            }
        }
    }

    /// Coin clamped at zero and only the positive asset quantities
    pub fn positive_part(&self) -> Value {
        let mut out = self.filter_by(|_, _, quantity| quantity > 0);
        out.set_lovelace(self.coin().max(0));
        out
    }

    pub fn is_zero(&self) -> bool {
        self.coin() == 0 && !self.has_assets()
    }

    pub fn is_non_negative(&self) -> bool {
        self.coin() >= 0
            && self
                .assets()
                .map_or(true, |x| x.flatten().all(|(_, _, quantity)| quantity >= 0))
    }

    fn assets_or_empty(&self) -> MultiAsset {
        self.assets().cloned().unwrap_or_default()
    }

    pub fn less_or_equal(&self, other: &Value) -> bool {
        self.coin() <= other.coin() && self.assets_or_empty().less_or_equal(&other.assets_or_empty())
    }

    pub fn greater_or_equal(&self, other: &Value) -> bool {
        other.less_or_equal(self)
    }

    pub fn less(&self, other: &Value) -> bool {
        self.less_or_equal(other) && self != other
    }

    pub fn greater(&self, other: &Value) -> bool {
        other.less(self)
    }

    pub fn invert(&mut self) {
        let coin = self.coin();
        self.set_lovelace(coin.saturating_neg());

        if let Value::CoinWithAssets(_, assets) = self {
            assets.invert();
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.coin() == other.coin() && self.assets_or_empty() == other.assets_or_empty()
    }
}

impl Eq for Value {}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Coin(value)
    }
}

impl AddAssign<&Value> for Value {
    fn add_assign(&mut self, rhs: &Value) {
        self.add_lovelace(rhs.coin());

        if let Some(assets) = rhs.assets() {
            self.add_assets(assets);
        }
    }
}

impl SubAssign<&Value> for Value {
    fn sub_assign(&mut self, rhs: &Value) {
        self.sub_lovelace(rhs.coin());

        if let Some(assets) = rhs.assets() {
            self.update_assets(|x| *x -= assets);
        }
    }
}

impl Add<&Value> for &Value {
    type Output = Value;

    fn add(self, rhs: &Value) -> Value {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&Value> for &Value {
    type Output = Value;

    fn sub(self, rhs: &Value) -> Value {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl Neg for Value {
    type Output = Value;

    fn neg(mut self) -> Value {
        self.invert();
        self
    }
}

impl<'a> std::iter::Sum<&'a Value> for Value {
    fn sum<I: Iterator<Item = &'a Value>>(iter: I) -> Self {
        iter.fold(Value::default(), |mut acc, x| {
            acc += x;
            acc
        })
    }
}

/// Output form of the value. Negative quantities have no ledger
/// representation and are dropped, as is an asset bag left empty.
impl From<&Value> for conway::Value {
    fn from(value: &Value) -> Self {
        let coin = value.coin().max(0) as u64;

        match value.assets().and_then(MultiAsset::to_output_assets) {
            Some(assets) => conway::Value::Multiasset(coin, assets),
            None => conway::Value::Coin(coin),
        }
    }
}
