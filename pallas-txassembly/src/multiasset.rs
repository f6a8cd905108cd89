use std::{
    collections::{BTreeMap, BTreeSet},
    ops::{AddAssign, Neg, SubAssign},
};

use pallas_codec::utils::{Bytes, NonEmptyKeyValuePairs, NonZeroInt, PositiveCoin};
use pallas_primitives::conway::Multiasset;

use crate::asset::{AssetName, Assets, PolicyId};

/// Asset quantities grouped by minting policy
#[derive(Debug, Clone, Default)]
pub struct MultiAsset(BTreeMap<PolicyId, Assets>);

impl MultiAsset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity of a single asset, zero when the pair is absent
    pub fn get_by_policy_and_id(&self, policy: &PolicyId, name: &AssetName) -> i64 {
        self.0.get(policy).map(|x| x.get(name)).unwrap_or_default()
    }

    pub fn assets_of(&self, policy: &PolicyId) -> Option<&Assets> {
        self.0.get(policy)
    }

    pub fn set(&mut self, policy: PolicyId, name: AssetName, quantity: i64) {
        self.0.entry(policy).or_default().set(name, quantity);
    }

    pub fn add_quantity(&mut self, policy: PolicyId, name: AssetName, quantity: i64) {
        self.0.entry(policy).or_default().add_quantity(name, quantity);
    }

    pub fn insert_assets(&mut self, policy: PolicyId, assets: Assets) {
        self.0.insert(policy, assets);
    }

    pub fn policies(&self) -> impl Iterator<Item = &PolicyId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PolicyId, &Assets)> {
        self.0.iter()
    }

    /// Every (policy, name, quantity) triple in canonical order
    pub fn flatten(&self) -> impl Iterator<Item = (&PolicyId, &AssetName, i64)> {
        self.0
            .iter()
            .flat_map(|(policy, assets)| assets.iter().map(move |(name, q)| (policy, name, *q)))
    }

    /// Number of policies, including those with only zero entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(Assets::is_zero)
    }

    pub fn invert(&mut self) {
        self.0.values_mut().for_each(Assets::invert);
    }

    pub fn filter_by<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&PolicyId, &AssetName, i64) -> bool,
    {
        let inner = self
            .0
            .iter()
            .map(|(policy, assets)| {
                let kept = assets.filter_by(|name, quantity| predicate(policy, name, quantity));
                (*policy, kept)
            })
            .filter(|(_, assets)| !assets.is_empty())
            .collect();

        Self(inner)
    }

    /// Copy without zero quantities and without policies left empty
    pub fn remove_zero_assets(&self) -> Self {
        self.filter_by(|_, _, quantity| quantity != 0)
    }

    /// Sum of both bags, `None` if any quantity overflows
    pub fn checked_add(&self, rhs: &MultiAsset) -> Option<MultiAsset> {
        let mut out = self.clone();

        for (policy, assets) in rhs.iter() {
            let sum = out.0.get(policy).cloned().unwrap_or_default().checked_add(assets)?;
            out.0.insert(*policy, sum);
        }

        Some(out)
    }

    /// Ledger shape of the bag, keeping only the quantities `quantity`
    /// accepts. `None` when nothing is left.
    fn to_ledger<Q: Clone>(&self, quantity: impl Fn(i64) -> Option<Q>) -> Option<Multiasset<Q>> {
        let policies = self
            .0
            .iter()
            .filter_map(|(policy, assets)| {
                let entries = assets
                    .iter()
                    .filter_map(|(name, q)| quantity(*q).map(|q| (Bytes::from(name.to_vec()), q)))
                    .collect();

                NonEmptyKeyValuePairs::from_vec(entries).map(|x| (*policy, x))
            })
            .collect();

        NonEmptyKeyValuePairs::from_vec(policies)
    }

    /// Positive quantities, as held by an output
    pub fn to_output_assets(&self) -> Option<Multiasset<PositiveCoin>> {
        self.to_ledger(|q| {
            u64::try_from(q)
                .ok()
                .and_then(|q| PositiveCoin::try_from(q).ok())
        })
    }

    /// Non-zero quantities, as carried by the mint field
    pub fn to_mint(&self) -> Option<Multiasset<NonZeroInt>> {
        self.to_ledger(|q| NonZeroInt::try_from(q).ok())
    }

    fn policies_with<'a>(&'a self, other: &'a Self) -> BTreeSet<&'a PolicyId> {
        self.0.keys().chain(other.0.keys()).collect()
    }

    pub fn less_or_equal(&self, other: &Self) -> bool {
        let empty = Assets::default();

        self.policies_with(other).into_iter().all(|policy| {
            let mine = self.0.get(policy).unwrap_or(&empty);
            let theirs = other.0.get(policy).unwrap_or(&empty);
            mine.less_or_equal(theirs)
        })
    }

    pub fn greater_or_equal(&self, other: &Self) -> bool {
        other.less_or_equal(self)
    }

    pub fn less(&self, other: &Self) -> bool {
        self.less_or_equal(other) && self != other
    }

    pub fn greater(&self, other: &Self) -> bool {
        other.less(self)
    }
}

impl PartialEq for MultiAsset {
    fn eq(&self, other: &Self) -> bool {
        let empty = Assets::default();

        self.policies_with(other).into_iter().all(|policy| {
            self.0.get(policy).unwrap_or(&empty) == other.0.get(policy).unwrap_or(&empty)
        })
    }
}

impl Eq for MultiAsset {}

impl FromIterator<(PolicyId, AssetName, i64)> for MultiAsset {
    fn from_iter<T: IntoIterator<Item = (PolicyId, AssetName, i64)>>(iter: T) -> Self {
        let mut out = MultiAsset::new();

        for (policy, name, quantity) in iter {
            out.add_quantity(policy, name, quantity);
        }

        out
    }
}

impl AddAssign<&MultiAsset> for MultiAsset {
    fn add_assign(&mut self, rhs: &MultiAsset) {
        for (policy, assets) in rhs.iter() {
            *self.0.entry(*policy).or_default() += assets;
        }
    }
}

impl SubAssign<&MultiAsset> for MultiAsset {
    fn sub_assign(&mut self, rhs: &MultiAsset) {
        for (policy, assets) in rhs.iter() {
            *self.0.entry(*policy).or_default() -= assets;
        }
    }
}

impl std::ops::Add<&MultiAsset> for &MultiAsset {
    type Output = MultiAsset;

    fn add(self, rhs: &MultiAsset) -> MultiAsset {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl std::ops::Sub<&MultiAsset> for &MultiAsset {
    type Output = MultiAsset;

    fn sub(self, rhs: &MultiAsset) -> MultiAsset {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl Neg for MultiAsset {
    type Output = MultiAsset;

    fn neg(mut self) -> MultiAsset {
        self.invert();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(byte: u8) -> PolicyId {
        PolicyId::new([byte; 28])
    }

    fn name(s: &str) -> AssetName {
        AssetName::new(s.as_bytes()).unwrap()
    }

    fn bag(entries: &[(u8, &str, i64)]) -> MultiAsset {
        entries
            .iter()
            .map(|(p, n, q)| (policy(*p), name(n), *q))
            .collect()
    }

    #[test]
    fn absent_pair_reads_as_zero() {
        let m = bag(&[(1, "x", 10)]);

        assert_eq!(m.get_by_policy_and_id(&policy(1), &name("x")), 10);
        assert_eq!(m.get_by_policy_and_id(&policy(1), &name("y")), 0);
        assert_eq!(m.get_by_policy_and_id(&policy(2), &name("x")), 0);
    }

    #[test]
    fn add_and_sub_across_policies() {
        let a = bag(&[(1, "x", 10), (2, "y", 1)]);
        let b = bag(&[(1, "x", 4), (3, "z", 2)]);

        let sum = &a + &b;
        assert_eq!(sum, bag(&[(1, "x", 14), (2, "y", 1), (3, "z", 2)]));

        let diff = &a - &b;
        assert_eq!(diff.get_by_policy_and_id(&policy(3), &name("z")), -2);
        assert_eq!(&diff + &b, a);
    }

    #[test]
    fn dominance_is_lifted_per_policy() {
        let small = bag(&[(1, "x", 1)]);
        let big = bag(&[(1, "x", 2), (2, "y", 1)]);
        let other = bag(&[(2, "y", 5)]);

        assert!(small.less(&big));
        assert!(big.greater(&small));
        assert!(!small.less(&other));
        assert!(!other.less(&small));
        assert!(!small.greater_or_equal(&other));
    }

    #[test]
    fn remove_zero_assets_prunes_empty_policies() {
        let m = bag(&[(1, "x", 0), (2, "y", 3), (2, "z", 0)]);
        let clean = m.remove_zero_assets();

        assert_eq!(clean.len(), 1);
        assert_eq!(clean.assets_of(&policy(2)).map(Assets::len), Some(1));
        assert_eq!(clean, m);
    }

    #[test]
    fn filter_by_restricts_to_requested_assets() {
        let selected = bag(&[(1, "x", 10), (1, "y", 3), (2, "z", 7)]);
        let requested = bag(&[(1, "x", 4)]);

        let trimmed = selected
            .filter_by(|p, n, _| requested.get_by_policy_and_id(p, n) != 0);

        assert_eq!(trimmed, bag(&[(1, "x", 10)]));
        assert_eq!(trimmed.len(), 1);
    }

    #[test]
    fn mint_keeps_burns_and_drops_zeros() {
        let m = bag(&[(1, "x", 5), (1, "y", 0), (2, "z", -3), (3, "w", 0)]);
        let mint = m.to_mint().unwrap();

        let entries: Vec<_> = mint
            .iter()
            .flat_map(|(p, assets)| assets.iter().map(move |(n, q)| (p[0], n.to_vec(), i64::from(q))))
            .collect();

        assert_eq!(entries, vec![(1, b"x".to_vec(), 5), (2, b"z".to_vec(), -3)]);
        assert!(bag(&[(1, "x", 0)]).to_mint().is_none());
    }

    #[test]
    fn output_assets_drop_non_positive() {
        let m = bag(&[(1, "x", 5), (2, "z", -3)]);
        let assets = m.to_output_assets().unwrap();

        assert_eq!(assets.iter().count(), 1);
        assert!(bag(&[(2, "z", -3)]).to_output_assets().is_none());
    }

    #[test]
    fn flatten_is_canonical() {
        let m = bag(&[(2, "b", 1), (1, "z", 2), (1, "a", 3)]);
        let flat: Vec<_> = m.flatten().map(|(p, n, q)| (p[0], n.to_vec(), q)).collect();

        assert_eq!(
            flat,
            vec![(1, b"a".to_vec(), 3), (1, b"z".to_vec(), 2), (2, b"b".to_vec(), 1)]
        );
    }
}
