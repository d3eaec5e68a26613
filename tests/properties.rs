use proptest::prelude::*;
use rolling_metrics::{
    CounterBuilder, InlineExecutor, ManualTicker, RankingBuilder, Retention,
};
use std::sync::Arc;
use std::time::Duration;

proptest! {
    /// Without new writes a smoothly decaying sum never grows and reaches
    /// zero once the window has fully passed.
    #[test]
    fn chunked_counter_decays_monotonically(
        chunks in 2usize..8,
        value in 1i64..1_000_000,
        steps in prop::collection::vec(1u64..400, 1..40),
    ) {
        let ticker = ManualTicker::new();
        let window = Duration::from_millis(chunks as u64 * 1_000);
        let counter = CounterBuilder::new()
            .retention(Retention::ResetByChunks { window, chunks })
            .ticker(ticker.clone())
            .executor(Arc::new(InlineExecutor))
            .build()
            .unwrap();
        counter.add(value);

        let mut previous = counter.sum();
        prop_assert_eq!(previous, value);
        for step in steps {
            ticker.advance(Duration::from_millis(step));
            let sum = counter.sum();
            prop_assert!(sum <= previous, "sum grew from {} to {}", previous, sum);
            prop_assert!(sum >= 0);
            previous = sum;
        }

        ticker.set_millis((chunks as i64 + 1) * 1_000);
        prop_assert_eq!(counter.sum(), 0);
    }

    /// A ranking never holds more than `size` positions, returns them
    /// heaviest first, and keeps exactly the heaviest admitted weights.
    #[test]
    fn ranking_keeps_the_top_k(
        size in 1usize..8,
        threshold in 0i64..50,
        weights in prop::collection::vec(-20i64..200, 0..200),
    ) {
        let ranking = RankingBuilder::new()
            .size(size)
            .threshold(threshold)
            .snapshot_caching_duration(Duration::ZERO)
            .build()
            .unwrap();
        for (i, &w) in weights.iter().enumerate() {
            ranking.update(w, || format!("op-{i}"));
        }

        let top = ranking.positions_descending();
        prop_assert!(top.len() <= size);
        prop_assert!(top.windows(2).all(|pair| pair[0].weight() >= pair[1].weight()));

        let mut expected: Vec<i64> = weights.into_iter().filter(|&w| w >= threshold).collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        expected.truncate(size);
        let actual: Vec<i64> = top.iter().map(|p| p.weight()).collect();
        prop_assert_eq!(actual, expected);
    }
}
