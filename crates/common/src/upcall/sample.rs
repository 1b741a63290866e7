//! Single-element reservoir sampling.

use rand::Rng;

/// Pick one item uniformly at random in a single pass.
///
/// The `n`-th item seen replaces the current pick with probability `1/n`,
/// so the length of `items` need not be known up front.
pub fn sample_one<I, R>(items: I, rng: &mut R) -> Option<I::Item>
where
    I: IntoIterator,
    R: Rng + ?Sized,
{
    let mut chosen = None;
    for (seen, item) in items.into_iter().enumerate() {
        if rng.random_range(0..=seen) == 0 {
            chosen = Some(item);
        }
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_yields_none() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_one(Vec::<u32>::new(), &mut rng), None);
    }

    #[test]
    fn test_single_item_always_chosen() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(sample_one([42], &mut rng), Some(42));
        }
    }

    #[test]
    fn test_selection_is_uniform() {
        const K: usize = 6;
        const DRAWS: usize = 60_000;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts = [0usize; K];

        for _ in 0..DRAWS {
            let pick = sample_one(0..K, &mut rng).unwrap();
            counts[pick] += 1;
        }

        let expected = 1.0 / K as f64;
        for (item, count) in counts.iter().enumerate() {
            let freq = *count as f64 / DRAWS as f64;
            assert!(
                (freq - expected).abs() < 0.01,
                "item {} drawn with frequency {:.4}, expected {:.4}",
                item,
                freq,
                expected
            );
        }
    }

    #[test]
    fn test_last_item_reachable() {
        let mut rng = StdRng::seed_from_u64(3);
        let hit = (0..1_000).any(|_| sample_one(0..10, &mut rng) == Some(9));
        assert!(hit);
    }
}
