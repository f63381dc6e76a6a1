//! Benchmarks for metric aggregation

#![allow(clippy::cast_precision_loss)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use proof_eval::axioms::AxiomSet;
use proof_eval::config::{QesWeights, StatSettings};
use proof_eval::grader::ItemResult;
use proof_eval::metrics::{normalize, ScoreAggregator};
use proof_eval::problem::{Problem, Split};
use proof_eval::state::UnitState;

fn create_items(n: usize) -> Vec<(Problem, ItemResult)> {
    (0..n)
        .map(|i| {
            let pass = i % 3 != 0;
            let problem = Problem {
                split: if i % 2 == 0 { Split::Id } else { Split::OodStyle },
                domain: format!("d{}", i % 4),
                style: format!("s{}", i % 3),
                ..Problem::new(&format!("p{i}"), "True")
            };
            let result = ItemResult {
                pass,
                winning_index: pass.then_some(i % 5),
                winner: None,
                t_success: pass.then_some((i % 7) as f64 * 0.5),
                kernel_time_median: Some((i % 11) as f64 * 0.3),
                proof_len_median_tokens: Some((i % 13) as f64 + 1.0),
                axioms: AxiomSet::new(),
                axiom_penalty: if i % 4 == 0 { 1.5 } else { 0.0 },
                attempts: i % 5 + 1,
                state: if pass { UnitState::Success } else { UnitState::Failed },
            };
            (problem, result)
        })
        .collect()
}

fn benchmark_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for size in &[100, 1_000, 10_000] {
        let values: Vec<f64> = (0..*size).map(|i| f64::from(i % 97) * 1.7).collect();
        group.bench_function(format!("normalize_{size}"), |b| {
            b.iter(|| normalize(black_box(&values)));
        });
    }

    group.finish();
}

fn benchmark_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let stats = StatSettings {
        bootstrap_n: 1_000,
        ..StatSettings::default()
    };

    for size in &[100, 1_000] {
        let items = create_items(*size);
        group.bench_function(format!("record_and_compute_{size}"), |b| {
            b.iter(|| {
                let mut agg = ScoreAggregator::new(QesWeights::default(), 5.0, stats.clone());
                for (problem, result) in &items {
                    agg.record(problem, result);
                }
                black_box(agg.compute())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_normalize, benchmark_aggregate);
criterion_main!(benches);
