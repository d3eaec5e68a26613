//! Top-K rankings of the heaviest operations over a retention window.
//!
//! A ranking keeps the `K` positions with the largest weight (typically a
//! latency) together with a caller-supplied identity.  Equal weights are
//! ordered by insertion: the earlier position ranks higher.
//!
//! Writers pay for the identity string only when their weight can still make
//! it into the ranking: negative weights, weights below the threshold and
//! weights that cannot unseat the current weakest member are rejected before
//! the identity supplier is called.  The last check reads a per-collector
//! atomic floor, so hopeless candidates never touch a lock.

mod collector;
mod recorder;
mod variants;

use std::cmp::Ordering;
use std::fmt;

pub(crate) use variants::{
    ChunkedRanking, ResetOnSnapshotRanking, ResetPeriodicallyRanking, UniformRanking,
};

/// Smallest accepted identity length limit, in characters.
pub const MIN_IDENTITY_LENGTH: usize = 10;

/// A concurrent top-K ranking.
///
/// Call `update` on a `Box<dyn Ranking>`; [`offer`](Ranking::offer) is its
/// object-safe form.
pub trait Ranking: Send + Sync {
    /// Offers a candidate.  `identity` is called at most once, and only when
    /// the candidate passed every lock-free check.
    fn offer(&self, weight: i64, identity: &mut dyn FnMut() -> String) -> bool;

    /// The positions visible under the retention policy, heaviest first.
    fn positions_descending(&self) -> Vec<Position>;

    /// The configured number of positions.
    fn size(&self) -> usize;

    /// Weights below this are rejected.
    fn threshold(&self) -> i64;
}

impl dyn Ranking + '_ {
    /// Offers `weight`, computing the identity only if it may be kept.
    ///
    /// Returns `false` without calling `identity` when the weight is
    /// negative, below the threshold, or cannot unseat the weakest position.
    #[inline]
    pub fn update<F>(&self, weight: i64, identity: F) -> bool
    where
        F: FnOnce() -> String,
    {
        let mut identity = Some(identity);
        self.offer(weight, &mut || identity.take().map_or_else(String::new, |f| f()))
    }
}

/// One entry of a ranking.
#[derive(Clone)]
pub struct Position {
    weight: i64,
    identity: String,
    sequence: u64,
}

impl Position {
    pub(crate) fn new(weight: i64, identity: String, sequence: u64) -> Self {
        Position {
            weight,
            identity,
            sequence,
        }
    }

    #[inline]
    pub fn weight(&self) -> i64 {
        self.weight
    }

    #[inline]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Insertion order within the ranking; lower is earlier.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Heaviest first; equal weights keep insertion order.
impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("weight", &self.weight)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Validated ranking options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RankingConfig {
    pub(crate) size: usize,
    pub(crate) threshold: i64,
    pub(crate) max_identity_length: usize,
}

impl RankingConfig {
    #[inline]
    pub(crate) fn admits(&self, weight: i64) -> bool {
        weight >= 0 && weight >= self.threshold
    }
}

/// Cuts `identity` to at most `limit` characters.
pub(crate) fn truncate(mut identity: String, limit: usize) -> String {
    if let Some((idx, _)) = identity.char_indices().nth(limit) {
        identity.truncate(idx);
    }
    identity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heavier_positions_sort_first_and_ties_keep_insertion_order() {
        let mut positions = vec![
            Position::new(2, "b".into(), 1),
            Position::new(3, "c".into(), 2),
            Position::new(2, "a".into(), 0),
        ];
        positions.sort();
        let order: Vec<_> = positions.iter().map(|p| p.identity()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn distinct_insertions_never_compare_equal() {
        let a = Position::new(5, "x".into(), 0);
        let b = Position::new(5, "x".into(), 1);
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn identities_are_truncated_on_char_boundaries() {
        assert_eq!(truncate("0123456789abc".into(), 10), "0123456789");
        assert_eq!(truncate("short".into(), 10), "short");
        assert_eq!(truncate("ééééééééééé".into(), 10).chars().count(), 10);
    }

    #[test]
    fn threshold_and_sign_gate_admission() {
        let config = RankingConfig {
            size: 3,
            threshold: 10,
            max_identity_length: 100,
        };
        assert!(!config.admits(-1));
        assert!(!config.admits(9));
        assert!(config.admits(10));
    }
}
