//! Logit post-processing for the autoregressive decode loop
//!
//! The transforms run in a fixed order: repetition penalty, temperature,
//! top-k, top-p (over the unnormalized logits), softmax, sample. The order
//! is part of the numerical contract with the trained model; reordering
//! changes outputs.

use std::cmp::Ordering;

use rand::Rng;

/// Penalize every token that already appears in the history: negative
/// logits are multiplied by the penalty, non-negative ones divided.
/// `penalty == 1.0` is a no-op.
pub fn apply_repetition_penalty(logits: &mut [f32], history: &[i64], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    for &token in history {
        if token >= 0 && (token as usize) < logits.len() {
            let logit = &mut logits[token as usize];
            if *logit < 0.0 {
                *logit *= penalty;
            } else {
                *logit /= penalty;
            }
        }
    }
}

/// Divide every logit by the temperature. `temperature == 1.0` is a no-op.
pub fn apply_temperature(logits: &mut [f32], temperature: f32) {
    if temperature != 1.0 {
        for logit in logits.iter_mut() {
            *logit /= temperature;
        }
    }
}

/// Keep only the k largest logits; everything strictly below the k-th
/// largest value becomes -inf, so ties at the threshold all survive.
pub fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }

    let mut indices: Vec<usize> = (0..logits.len()).collect();
    let desc = |&a: &usize, &b: &usize| {
        logits[b]
            .partial_cmp(&logits[a])
            .unwrap_or(Ordering::Equal)
    };
    indices.select_nth_unstable_by(k - 1, desc);
    let threshold = logits[indices[k - 1]];

    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

/// Nucleus filter: sort by logit descending, softmax over the sorted order,
/// and keep the smallest prefix whose cumulative probability first exceeds
/// `p` (the crossing element included). `p >= 1.0` is a no-op.
pub fn apply_top_p(logits: &mut [f32], p: f32) {
    if p >= 1.0 {
        return;
    }

    let vocab = logits.len();
    let mut indices: Vec<usize> = (0..vocab).collect();
    indices.sort_unstable_by(|&a, &b| {
        logits[b]
            .partial_cmp(&logits[a])
            .unwrap_or(Ordering::Equal)
    });

    let max_logit = logits[indices[0]];
    let mut sum = 0.0f32;
    for &i in &indices {
        sum += (logits[i] - max_logit).exp();
    }

    let inv_sum = 1.0 / sum;
    let mut cumulative = 0.0f32;
    let mut cutoff = vocab;
    for (rank, &i) in indices.iter().enumerate() {
        cumulative += (logits[i] - max_logit).exp() * inv_sum;
        if cumulative > p {
            cutoff = rank + 1;
            break;
        }
    }

    for &i in &indices[cutoff..] {
        logits[i] = f32::NEG_INFINITY;
    }
}

/// Numerically-stable in-place softmax.
///
/// When every logit is non-finite (possible after aggressive filtering),
/// falls back to a degenerate distribution on index 0.
pub fn softmax(logits: &mut [f32]) {
    if logits.is_empty() {
        return;
    }

    let mut max_logit = logits[0];
    for &l in logits.iter().skip(1) {
        if l > max_logit {
            max_logit = l;
        }
    }

    if !max_logit.is_finite() {
        tracing::warn!("softmax saw no finite logits, using degenerate fallback");
        logits[0] = 1.0;
        for l in logits.iter_mut().skip(1) {
            *l = 0.0;
        }
        return;
    }

    let mut sum = 0.0f32;
    for l in logits.iter_mut() {
        let v = (*l - max_logit).exp();
        *l = v;
        sum += v;
    }
    if sum > 0.0 {
        let inv = 1.0 / sum;
        for l in logits.iter_mut() {
            *l *= inv;
        }
    }
}

/// Inverse-CDF sampling: the smallest index whose cumulative probability
/// reaches the uniform draw. Floating-point drift falls back to the last
/// index.
pub fn sample_index<R: Rng>(probs: &[f32], rng: &mut R) -> usize {
    let r: f32 = rng.gen();
    let mut cumulative = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if r <= cumulative {
            return i;
        }
    }
    probs.len().saturating_sub(1)
}
