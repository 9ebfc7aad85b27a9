//! Sampling hot-path benchmarks
//!
//! The logit pipeline runs once per generated token, so its cost lands
//! directly on the real-time factor.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use voxclone_engine::sampling;

const VOCAB: usize = 6563;

fn synthetic_logits(rng: &mut StdRng) -> Vec<f32> {
    (0..VOCAB).map(|_| rng.gen_range(-8.0..8.0)).collect()
}

fn bench_logit_pipeline(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1234);
    let base = synthetic_logits(&mut rng);
    let history: Vec<i64> = (0..64).map(|_| rng.gen_range(0..VOCAB as i64)).collect();

    c.bench_function("top_k_1000", |b| {
        b.iter(|| {
            let mut logits = base.clone();
            sampling::apply_top_k(black_box(&mut logits), 1000);
        })
    });

    c.bench_function("top_p_095", |b| {
        b.iter(|| {
            let mut logits = base.clone();
            sampling::apply_top_p(black_box(&mut logits), 0.95);
        })
    });

    c.bench_function("full_pipeline", |b| {
        b.iter(|| {
            let mut logits = base.clone();
            sampling::apply_repetition_penalty(&mut logits, &history, 1.2);
            sampling::apply_temperature(&mut logits, 0.8);
            sampling::apply_top_k(&mut logits, 1000);
            sampling::apply_top_p(&mut logits, 0.95);
            sampling::softmax(&mut logits);
            black_box(sampling::sample_index(&logits, &mut rng));
        })
    });
}

criterion_group!(benches, bench_logit_pipeline);
criterion_main!(benches);
