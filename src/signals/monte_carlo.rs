//! Monte Carlo significance test
//!
//! Asks whether a trader's results over their material positions could be
//! explained by chance, given the win probability implied at entry of each
//! position. Returns an empirical one-sided p-value.
//!
//! Pure and I/O-free. Trials are independent, so they are spread across the
//! current rayon pool in fixed-size chunks. Chunk `i` draws from
//! `ChaCha8Rng` seeded with the run seed on stream `i`, which makes the
//! result a function of (positions, runs, seed) only, not of thread count.

use crate::models::Position;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Fraction of the fair payout a realized value must reach to count.
pub const MATERIALITY_TOLERANCE: f64 = 0.9;

/// Trials per RNG stream.
const TRIALS_PER_CHUNK: usize = 1024;

/// A position is material iff its realized value is at least `tolerance` of
/// the way to the theoretical fair payout in its direction.
#[inline]
pub fn is_material(position: &Position, tolerance: f64) -> bool {
    if position.is_win() {
        position.realized >= tolerance * position.win_payout()
    } else {
        position.realized <= tolerance * position.loss_payout()
    }
}

/// Positions that survive the materiality filter, in input order.
pub fn material_positions(positions: &[Position], tolerance: f64) -> Vec<Position> {
    positions
        .iter()
        .filter(|p| is_material(p, tolerance))
        .copied()
        .collect()
}

/// Theoretical fair PnL over the given positions.
///
/// Uses the fair payout of the realized direction, not the realized value.
pub fn baseline(material: &[Position]) -> f64 {
    material.iter().map(Position::fair_payout).sum()
}

/// One simulated aggregate: each position wins with its own probability.
#[inline]
fn simulate_trial<R: Rng + ?Sized>(material: &[Position], rng: &mut R) -> f64 {
    let mut total = 0.0;
    for position in material {
        if rng.gen::<f64>() < position.probability {
            total += position.win_payout();
        } else {
            total += position.loss_payout();
        }
    }
    total
}

/// Count trials in one chunk whose aggregate reaches the baseline.
fn count_chunk(material: &[Position], baseline: f64, trials: usize, seed: u64, stream: u64) -> usize {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);

    (0..trials)
        .filter(|_| simulate_trial(material, &mut rng) >= baseline)
        .count()
}

/// Estimated probability that chance alone yields a PnL at least as good as
/// the trader's baseline.
///
/// With no material positions every trial sums to zero and so does the
/// baseline, giving `1.0`. `runs == 0` also returns `1.0`.
pub fn monte_carlo(positions: &[Position], runs: usize, seed: u64) -> f64 {
    if runs == 0 {
        return 1.0;
    }

    let material = material_positions(positions, MATERIALITY_TOLERANCE);
    let baseline = baseline(&material);

    let chunks = runs.div_ceil(TRIALS_PER_CHUNK);
    let hits: usize = (0..chunks)
        .into_par_iter()
        .map(|chunk| {
            let start = chunk * TRIALS_PER_CHUNK;
            let trials = TRIALS_PER_CHUNK.min(runs - start);
            count_chunk(&material, baseline, trials, seed, chunk as u64)
        })
        .sum();

    hits as f64 / runs as f64
}

/// Standard error of an estimate `p` drawn from `runs` trials.
#[inline]
pub fn standard_error(p: f64, runs: usize) -> f64 {
    if runs == 0 {
        return 0.0;
    }
    (p * (1.0 - p) / runs as f64).sqrt()
}
