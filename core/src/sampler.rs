//! Uniform sampling without replacement.
//!
//! [`LotterySampler::sample`] runs a partial Fisher–Yates shuffle over the
//! pool; [`LotterySampler::sample_stream`] runs reservoir sampling (Algorithm R)
//! for pools that arrive as an iterator. Both draw every index from the
//! injected [`RandomSource`], so a seeded source reproduces the same draw.
//!
//! Candidates from a set are sorted before shuffling. Hash iteration order is
//! not stable across processes, so sorting is what makes a seeded draw
//! reproducible.

use crate::environment::RandomSource;
use crate::ids::EntrantId;
use std::collections::HashSet;

/// Draws uniform random subsets of an entrant pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct LotterySampler;

impl LotterySampler {
    /// Draw `min(k, |pool|)` distinct entrants from `pool`.
    ///
    /// Every subset of that size is equally likely. `k = 0` or an empty pool
    /// yields an empty draw. The result is in draw order.
    ///
    /// ```
    /// use enrollment_core::environment::SeededRandom;
    /// use enrollment_core::ids::EntrantId;
    /// use enrollment_core::sampler::LotterySampler;
    /// use std::collections::HashSet;
    ///
    /// let pool: HashSet<EntrantId> = ["a", "b", "c", "d"].into_iter().map(EntrantId::new).collect();
    /// let first = LotterySampler::sample(&pool, 2, &SeededRandom::new(11));
    /// let again = LotterySampler::sample(&pool, 2, &SeededRandom::new(11));
    /// assert_eq!(first, again);
    /// assert_eq!(first.len(), 2);
    /// assert!(first.iter().all(|entrant| pool.contains(entrant)));
    /// ```
    #[must_use]
    pub fn sample<R>(pool: &HashSet<EntrantId>, k: usize, rng: &R) -> Vec<EntrantId>
    where
        R: RandomSource + ?Sized,
    {
        if k == 0 || pool.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<&EntrantId> = pool.iter().collect();
        candidates.sort_unstable();

        let take = k.min(candidates.len());
        for i in 0..take {
            let j = i + rng.index_below(candidates.len() - i);
            candidates.swap(i, j);
        }

        candidates.into_iter().take(take).cloned().collect()
    }

    /// Reservoir-sample `k` items from an iterator of unknown length.
    ///
    /// Consumes the iterator once. The reservoir holds at most `k` items, so
    /// memory stays bounded regardless of pool size.
    #[must_use]
    pub fn sample_stream<I, R>(pool: I, k: usize, rng: &R) -> Vec<EntrantId>
    where
        I: IntoIterator<Item = EntrantId>,
        R: RandomSource + ?Sized,
    {
        if k == 0 {
            return Vec::new();
        }

        let mut reservoir = Vec::with_capacity(k);
        for (seen, entrant) in pool.into_iter().enumerate() {
            if seen < k {
                reservoir.push(entrant);
            } else {
                let j = rng.index_below(seen + 1);
                if j < k {
                    reservoir[j] = entrant;
                }
            }
        }
        reservoir
    }
}
