// ============================================================
// Layer 4 — Per-Epoch Shuffler
// ============================================================
// Every training epoch visits the samples of each category in a
// fresh random order. Each category is shuffled on its own, so
// the ternary, relational and non-relational orders are not
// synchronised with each other.
//
// The shuffle is in place: the order produced in epoch N is the
// starting order of epoch N+1.
//
// Uses Fisher-Yates via rand::seq::SliceRandom with a seeded
// StdRng owned by the epoch driver, so a run is reproducible
// for a given --seed.

use rand::{seq::SliceRandom, Rng};

use crate::data::dataset::CategorySplit;
use crate::domain::sample::Category;

/// Shuffle each category list of `split` independently.
pub fn shuffle_categories<R: Rng + ?Sized>(split: &mut CategorySplit, rng: &mut R) {
    for category in Category::ALL {
        split.get_mut(category).shuffle(rng);
    }

    tracing::debug!(
        "Shuffled {} ternary, {} relational, {} non-relational samples",
        split.ternary.len(),
        split.binary.len(),
        split.unary.len(),
    );
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::domain::sample::{InputDatum, Sample};

    fn split(n: usize) -> CategorySplit {
        let img = Arc::new(InputDatum::new(vec![1], vec![0.0]).unwrap());
        let list = |offset: u32| -> Vec<Sample> {
            (0..n as u32).map(|i| Sample::new(img.clone(), vec![], offset + i)).collect()
        };
        CategorySplit { ternary: list(0), binary: list(1000), unary: list(2000) }
    }

    fn answers(samples: &[Sample]) -> Vec<u32> {
        samples.iter().map(|s| s.answer).collect()
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let original   = split(64);
        let mut shuffled = original.clone();
        shuffle_categories(&mut shuffled, &mut StdRng::seed_from_u64(7));

        for category in Category::ALL {
            let mut before = answers(original.get(category));
            let mut after  = answers(shuffled.get(category));
            assert_ne!(before, after, "{category} list was not reordered");
            before.sort_unstable();
            after.sort_unstable();
            assert_eq!(before, after);
        }
    }

    #[test]
    fn test_different_seeds_give_different_orders() {
        let mut a = split(64);
        let mut b = split(64);
        shuffle_categories(&mut a, &mut StdRng::seed_from_u64(1));
        shuffle_categories(&mut b, &mut StdRng::seed_from_u64(2));
        assert_ne!(answers(&a.binary), answers(&b.binary));
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let mut a = split(32);
        let mut b = split(32);
        shuffle_categories(&mut a, &mut StdRng::seed_from_u64(42));
        shuffle_categories(&mut b, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_categories_are_not_synchronised() {
        let mut s = split(64);
        shuffle_categories(&mut s, &mut StdRng::seed_from_u64(3));
        let rel: Vec<u32>   = s.binary.iter().map(|x| x.answer - 1000).collect();
        let norel: Vec<u32> = s.unary.iter().map(|x| x.answer - 2000).collect();
        assert_ne!(rel, norel);
    }

    #[test]
    fn test_empty_split() {
        let mut s = CategorySplit::default();
        shuffle_categories(&mut s, &mut StdRng::seed_from_u64(0));
        assert_eq!(s.sample_count(), 0);
    }
}
