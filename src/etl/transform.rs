/// Transform Module
///
/// Folds raw subgraph events into one balance per (user, token).
/// Two policies exist: summing add/remove deltas, and keeping only the most
/// recent record per key when several event streams compete.
use num_traits::Signed;
use std::collections::btree_map::{self, BTreeMap};

use crate::models::{PositionKey, TokenAmount};

/// Aggregated per-block account state: one amount per (user, token)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balances {
    positions: BTreeMap<PositionKey, TokenAmount>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the amount held at `key`
    pub fn set(&mut self, key: PositionKey, amount: TokenAmount) {
        self.positions.insert(key, amount);
    }

    pub fn add(&mut self, key: PositionKey, amount: &TokenAmount) {
        *self.positions.entry(key).or_default() += amount;
    }

    pub fn subtract(&mut self, key: PositionKey, amount: &TokenAmount) {
        *self.positions.entry(key).or_default() -= amount;
    }

    #[allow(dead_code)]
    pub fn get(&self, key: &PositionKey) -> Option<&TokenAmount> {
        self.positions.get(key)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drop every position whose amount is zero or negative
    pub fn retain_positive(&mut self) {
        self.positions.retain(|_, amount| amount.is_positive());
    }

    /// Rewrite every position, e.g. to re-key into another token or rescale units
    pub fn remap<F>(self, mut f: F) -> Self
    where
        F: FnMut(PositionKey, TokenAmount) -> (PositionKey, TokenAmount),
    {
        let mut remapped = Self::new();
        for (key, amount) in self.positions {
            let (key, amount) = f(key, amount);
            remapped.add(key, &amount);
        }
        remapped
    }
}

impl IntoIterator for Balances {
    type Item = (PositionKey, TokenAmount);
    type IntoIter = btree_map::IntoIter<PositionKey, TokenAmount>;

    fn into_iter(self) -> Self::IntoIter {
        self.positions.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Add,
    Remove,
}

/// One signed movement of a user's balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEvent {
    pub key: PositionKey,
    pub amount: TokenAmount,
    pub delta: Delta,
}

impl BalanceEvent {
    pub fn add(user: &str, token: &str, amount: TokenAmount) -> Self {
        Self { key: PositionKey::new(user, token), amount, delta: Delta::Add }
    }

    pub fn remove(user: &str, token: &str, amount: TokenAmount) -> Self {
        Self { key: PositionKey::new(user, token), amount, delta: Delta::Remove }
    }

    /// A transfer debits the sender and credits the receiver
    #[allow(dead_code)]
    pub fn transfer(from: &str, to: &str, token: &str, amount: TokenAmount) -> [Self; 2] {
        [Self::remove(from, token, amount.clone()), Self::add(to, token, amount)]
    }
}

/// Delta-sum policy: Σ adds − Σ removes per position, keeping only positive results
pub fn sum_deltas<I>(events: I) -> Balances
where
    I: IntoIterator<Item = BalanceEvent>,
{
    let mut balances = Balances::new();
    for event in events {
        match event.delta {
            Delta::Add => balances.add(event.key, &event.amount),
            Delta::Remove => balances.subtract(event.key, &event.amount),
        }
    }
    balances.retain_positive();
    balances
}

/// Records that can be ordered by recency
pub trait Versioned {
    type Version: Ord;

    fn version(&self) -> Self::Version;

    /// Tiebreak between equal versions: the greater id wins
    fn id(&self) -> &str;
}

fn is_newer<T: Versioned>(candidate: &T, current: &T) -> bool {
    (candidate.version(), candidate.id()) > (current.version(), current.id())
}

/// Latest-state-wins policy: keeps the most recent record seen for each key
#[derive(Debug, Clone)]
pub struct LatestState<K, T> {
    latest: BTreeMap<K, T>,
}

impl<K, T> Default for LatestState<K, T> {
    fn default() -> Self {
        Self { latest: BTreeMap::new() }
    }
}

impl<K: Ord, T: Versioned> LatestState<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate; it replaces the current record only if it is newer
    pub fn offer(&mut self, key: K, record: T) {
        match self.latest.entry(key) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(record);
            }
            btree_map::Entry::Occupied(mut entry) => {
                if is_newer(&record, entry.get()) {
                    entry.insert(record);
                }
            }
        }
    }

    #[allow(dead_code)]
    pub fn get(&self, key: &K) -> Option<&T> {
        self.latest.get(key)
    }

    /// Winners ordered oldest first, so replaying them lets newer state overwrite older
    pub fn into_winners(self) -> Vec<T> {
        let mut winners: Vec<T> = self.latest.into_values().collect();
        winners.sort_by(|a, b| (a.version(), a.id()).cmp(&(b.version(), b.id())));
        winners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(value: i64) -> TokenAmount {
        TokenAmount::from(value)
    }

    #[test]
    fn test_delta_sum() {
        let balances = sum_deltas(vec![
            BalanceEvent::add("A", "T", amount(100)),
            BalanceEvent::add("B", "T", amount(50)),
            BalanceEvent::remove("A", "T", amount(30)),
        ]);

        assert_eq!(balances.len(), 2);
        assert_eq!(balances.get(&PositionKey::new("a", "t")), Some(&amount(70)));
        assert_eq!(balances.get(&PositionKey::new("b", "t")), Some(&amount(50)));
    }

    #[test]
    fn test_delta_sum_drops_non_positive() {
        let balances = sum_deltas(vec![
            BalanceEvent::add("A", "T", amount(10)),
            BalanceEvent::remove("A", "T", amount(10)),
            BalanceEvent::remove("B", "T", amount(5)),
        ]);

        assert!(balances.is_empty());
    }

    #[test]
    fn test_delta_sum_exceeds_native_range() {
        let huge: TokenAmount = "340282366920938463463374607431768211456000".parse().unwrap();
        let balances = sum_deltas(vec![
            BalanceEvent::add("A", "T", huge.clone()),
            BalanceEvent::add("A", "T", huge.clone()),
        ]);

        assert_eq!(balances.get(&PositionKey::new("a", "t")), Some(&(huge * 2)));
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut events = vec![BalanceEvent::add("A", "T", amount(100))];
        events.extend(BalanceEvent::transfer("A", "B", "T", amount(40)));
        let balances = sum_deltas(events);

        assert_eq!(balances.get(&PositionKey::new("a", "t")), Some(&amount(60)));
        assert_eq!(balances.get(&PositionKey::new("b", "t")), Some(&amount(40)));
    }

    #[test]
    fn test_remap_merges_collisions() {
        let mut balances = Balances::new();
        balances.set(PositionKey::new("a", "x"), amount(1));
        balances.set(PositionKey::new("a", "y"), amount(2));

        let merged = balances.remap(|key, value| (PositionKey::new(&key.user, "z"), value * 10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get(&PositionKey::new("a", "z")), Some(&amount(30)));
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Record {
        id: &'static str,
        block: u64,
    }

    impl Versioned for Record {
        type Version = u64;

        fn version(&self) -> u64 {
            self.block
        }

        fn id(&self) -> &str {
            self.id
        }
    }

    #[test]
    fn test_latest_block_wins() {
        let mut state = LatestState::new();
        state.offer("x", Record { id: "b", block: 9 });
        state.offer("x", Record { id: "a", block: 5 });

        assert_eq!(state.get(&"x"), Some(&Record { id: "b", block: 9 }));
    }

    #[test]
    fn test_tie_broken_by_id() {
        let mut first = LatestState::new();
        first.offer("x", Record { id: "0x02", block: 7 });
        first.offer("x", Record { id: "0x01", block: 7 });

        let mut second = LatestState::new();
        second.offer("x", Record { id: "0x01", block: 7 });
        second.offer("x", Record { id: "0x02", block: 7 });

        assert_eq!(first.get(&"x"), second.get(&"x"));
        assert_eq!(first.get(&"x").map(|r| r.id), Some("0x02"));
    }

    #[test]
    fn test_winners_sorted_oldest_first() {
        let mut state = LatestState::new();
        state.offer("x", Record { id: "1", block: 20 });
        state.offer("y", Record { id: "2", block: 10 });

        let winners = state.into_winners();
        assert_eq!(winners.iter().map(|r| r.block).collect::<Vec<_>>(), vec![10, 20]);
    }
}
