use rolling_metrics::{
    CounterBuilder, Error, HistogramBuilder, HitRatioBuilder, InlineExecutor, ManualTicker,
    RankingBuilder, Retention, RotationActor,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn chunked(window_ms: u64, chunks: usize) -> Retention {
    Retention::ResetByChunks {
        window: Duration::from_millis(window_ms),
        chunks,
    }
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[test]
fn chunked_counter_decays_smoothly() {
    let ticker = ManualTicker::new();
    let counter = CounterBuilder::new()
        .retention(chunked(2_000, 2))
        .ticker(ticker.clone())
        .executor(Arc::new(InlineExecutor))
        .build()
        .unwrap();

    counter.add(100);
    ticker.set_millis(2_600);
    assert_eq!(counter.sum(), 40);
    ticker.set_millis(2_980);
    assert_eq!(counter.sum(), 2);
    ticker.set_millis(3_000);
    assert_eq!(counter.sum(), 0);
}

#[test]
fn reset_on_snapshot_counter_sequence() {
    let counter = CounterBuilder::new()
        .retention(Retention::ResetOnSnapshot)
        .build()
        .unwrap();
    counter.add(2);
    assert_eq!(counter.sum(), 2);
    assert_eq!(counter.sum(), 0);
    counter.add(7);
    counter.add(3);
    assert_eq!(counter.sum(), 10);
    assert_eq!(counter.sum(), 0);
}

#[test]
fn counter_rejects_invalid_windows() {
    for retention in [
        chunked(60_000, 1),
        chunked(60_000, 65),
        chunked(150, 2),
        chunked(0, 2),
        Retention::ResetPeriodically(Duration::ZERO),
    ] {
        assert!(CounterBuilder::new().retention(retention).build().is_err(), "{retention:?}");
    }
}

#[test]
fn chunked_counter_reads_are_idempotent_at_a_fixed_instant() {
    let ticker = ManualTicker::new();
    let counter = CounterBuilder::new()
        .retention(chunked(10_000, 10))
        .ticker(ticker.clone())
        .executor(Arc::new(InlineExecutor))
        .build()
        .unwrap();
    for t in 0..30 {
        ticker.set_millis(t * 500);
        counter.add(t);
    }
    let first = counter.sum();
    assert_eq!(counter.sum(), first);
    assert_eq!(counter.sum(), first);
}

#[test]
fn chunked_counter_with_the_background_actor() {
    let ticker = ManualTicker::new();
    let actor = Arc::new(RotationActor::new());
    let counter = CounterBuilder::new()
        .retention(chunked(4_000, 4))
        .ticker(ticker.clone())
        .executor(actor.clone())
        .build()
        .unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..1_000 {
                    counter.increment();
                }
            });
        }
    });
    assert_eq!(counter.sum(), 4_000);

    for step in 1..=8 {
        ticker.set_millis(step * 1_000);
        counter.add(1);
    }
    // t = 8000: epochs 4..=8 hold one each, epoch 4 starts on the edge.
    assert_eq!(counter.sum(), 5);
    actor.stop();
    assert_eq!(actor.overflow_count(), 0);
}

// ---------------------------------------------------------------------------
// Hit ratios
// ---------------------------------------------------------------------------

#[test]
fn hit_ratio_edge_cases() {
    let ratio = HitRatioBuilder::new().build().unwrap();
    assert!(ratio.ratio().is_nan());

    assert_eq!(
        ratio.update(2, 1),
        Err(Error::HitsExceedTotal { hits: 2, total: 1 })
    );
    assert!(ratio.ratio().is_nan(), "invalid update must not change state");

    ratio.update(i32::MAX, i32::MAX).unwrap();
    ratio.update(0, i32::MAX).unwrap();
    assert!((ratio.ratio() - 0.5).abs() < 1e-9);
}

#[test]
fn chunked_hit_ratio_rolls() {
    let ticker = ManualTicker::new();
    let ratio = HitRatioBuilder::new()
        .retention(chunked(2_000, 2))
        .ticker(ticker.clone())
        .executor(Arc::new(InlineExecutor))
        .build()
        .unwrap();
    ratio.increment_hit();
    ticker.set_millis(1_000);
    ratio.increment_miss();
    assert_eq!(ratio.ratio(), 0.5);
    ticker.set_millis(3_000);
    assert_eq!(ratio.ratio(), 0.0);
}

// ---------------------------------------------------------------------------
// Rankings
// ---------------------------------------------------------------------------

#[test]
fn top_two_with_a_tie() {
    let ranking = RankingBuilder::new()
        .size(2)
        .snapshot_caching_duration(Duration::ZERO)
        .build()
        .unwrap();
    for (i, w) in [1, 2, 2, 3].into_iter().enumerate() {
        ranking.update(w, || format!("q{i}"));
    }
    let top = ranking.positions_descending();
    let summary: Vec<_> = top.iter().map(|p| (p.weight(), p.identity())).collect();
    assert_eq!(summary, vec![(3, "q3"), (2, "q1")]);
}

#[test]
fn threshold_rejects_without_building_the_identity() {
    let ranking = RankingBuilder::new().threshold(100).build().unwrap();
    assert!(!ranking.update(99, || unreachable!("identity built for a rejected weight")));
    assert!(!ranking.update(-1, || unreachable!("identity built for a negative weight")));
    assert!(ranking.update(100, || "slow".to_string()));
}

#[test]
fn chunked_ranking_forgets_expired_chunks() {
    let ticker = ManualTicker::new();
    let ranking = RankingBuilder::new()
        .size(3)
        .retention(chunked(2_000, 2))
        .ticker(ticker.clone())
        .executor(Arc::new(InlineExecutor))
        .snapshot_caching_duration(Duration::ZERO)
        .build()
        .unwrap();

    ranking.update(500, || "old".to_string());
    ticker.set_millis(1_500);
    ranking.update(20, || "new".to_string());
    assert_eq!(ranking.positions_descending().len(), 2);

    ticker.set_millis(3_000);
    let top = ranking.positions_descending();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].identity(), "new");
}

// ---------------------------------------------------------------------------
// Histograms
// ---------------------------------------------------------------------------

#[test]
fn chunked_histogram_is_empty_after_a_full_rotation() {
    let ticker = ManualTicker::new();
    let reservoir = HistogramBuilder::new()
        .retention(chunked(3_000, 3))
        .ticker(ticker.clone())
        .executor(Arc::new(InlineExecutor))
        .snapshot_caching_duration(Duration::ZERO)
        .build()
        .unwrap();

    for v in [5, 50, 500] {
        reservoir.record(v);
    }
    assert_eq!(reservoir.snapshot().count(), 3);

    ticker.set_millis(4_000);
    let snapshot = reservoir.snapshot();
    assert_eq!(snapshot.count(), 0);
    assert_eq!(snapshot.min(), 0);
    assert_eq!(snapshot.max(), 0);
    assert_eq!(snapshot.mean(), 0.0);
    assert_eq!(snapshot.stddev(), 0.0);
}

#[test]
fn histogram_reads_are_idempotent_unless_they_drain() {
    let uniform = HistogramBuilder::new().build().unwrap();
    let draining = HistogramBuilder::new()
        .retention(Retention::ResetOnSnapshot)
        .build()
        .unwrap();
    for v in 1..=10 {
        uniform.record(v);
        draining.record(v);
    }
    assert_eq!(uniform.snapshot().count(), 10);
    assert_eq!(uniform.snapshot().count(), 10);
    assert_eq!(draining.snapshot().count(), 10);
    assert_eq!(draining.snapshot().count(), 0);
}

#[test]
fn negative_values_are_ignored() {
    let reservoir = HistogramBuilder::new().build().unwrap();
    reservoir.record(-10);
    reservoir.record(3);
    let snapshot = reservoir.snapshot();
    assert_eq!(snapshot.count(), 1);
    assert_eq!(snapshot.min(), 3);
}
