use std::cmp::Ordering;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// One step of a merge-walk over two key-sorted maps.
pub enum AlignedPair<'a, K, V> {
    HasBoth((&'a K, &'a V), (&'a K, &'a V)),
    HasLeft((&'a K, &'a V)),
    HasRight((&'a K, &'a V)),
}

/// Walks `m1` and `m2` in ascending key order, pairing entries with equal keys.
/// Both maps must already be sorted by key.
pub fn align_iter<'a, K, V, M>(m1: &'a FxIndexMap<K, V>, m2: &'a FxIndexMap<K, V>, mut map: M)
where
    K: Ord,
    M: FnMut(AlignedPair<'a, K, V>),
{
    debug_assert!(m1.keys().zip(m1.keys().skip(1)).all(|(a, b)| a < b), "left map is not sorted");
    debug_assert!(m2.keys().zip(m2.keys().skip(1)).all(|(a, b)| a < b), "right map is not sorted");

    let mut it1 = m1.iter().peekable();
    let mut it2 = m2.iter().peekable();

    loop {
        let order = match (it1.peek(), it2.peek()) {
            (Some((k1, _)), Some((k2, _))) => Some(k1.cmp(k2)),
            (Some(_), None) => Some(Ordering::Less),
            (None, Some(_)) => Some(Ordering::Greater),
            (None, None) => None,
        };

        let pair = match order {
            None => break,
            Some(Ordering::Equal) => match (it1.next(), it2.next()) {
                (Some(left), Some(right)) => AlignedPair::HasBoth(left, right),
                _ => break,
            },
            Some(Ordering::Less) => match it1.next() {
                Some(left) => AlignedPair::HasLeft(left),
                None => break,
            },
            Some(Ordering::Greater) => match it2.next() {
                Some(right) => AlignedPair::HasRight(right),
                None => break,
            },
        };
        map(pair);
    }
}

/// Like [`align_iter`] but collects whatever `map` keeps into a new sorted map.
pub fn align_map<'a, K, V, M>(m1: &'a FxIndexMap<K, V>, m2: &'a FxIndexMap<K, V>, mut map: M) -> FxIndexMap<K, V>
where
    K: Ord + std::hash::Hash,
    M: FnMut(AlignedPair<'a, K, V>) -> Option<(K, V)>,
{
    let mut res: FxIndexMap<K, V> = IndexMap::with_capacity_and_hasher(std::cmp::max(m1.len(), m2.len()), FxBuildHasher);
    align_iter(m1, m2, |pair| {
        if let Some((k, v)) = map(pair) {
            res.insert(k, v);
        }
    });
    res
}
