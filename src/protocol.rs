//! Ramp protocol inference
//!
//! Recovers the start power and per-stage increment of a ramp protocol from
//! noisy measured power. Powers are snapped to a quantum (5 W by default),
//! de-duplicated in order of first appearance, and the step is the most
//! frequent ascending difference between successive distinct powers.
//! Descending segments (recovery, brief dips) contribute no candidate step.

use crate::types::{NormalizedSample, ProtocolParameters};

/// Default rounding quantum for measured power (W)
pub const DEFAULT_POWER_QUANTUM_W: u32 = 5;

/// Infer protocol parameters with the default 5 W quantum
pub fn infer_protocol(samples: &[NormalizedSample]) -> ProtocolParameters {
    infer_protocol_with_quantum(samples, DEFAULT_POWER_QUANTUM_W)
}

/// Infer protocol parameters from a session's samples
pub fn infer_protocol_with_quantum(
    samples: &[NormalizedSample],
    quantum_w: u32,
) -> ProtocolParameters {
    infer_from_powers(samples.iter().filter_map(|s| s.power_w), quantum_w)
}

/// Infer protocol parameters from a raw power sequence.
///
/// Never fails: an empty or flat sequence yields a zero step.
pub fn infer_from_powers<I>(powers: I, quantum_w: u32) -> ProtocolParameters
where
    I: IntoIterator<Item = f64>,
{
    let distinct = distinct_levels(powers, quantum_w);

    let Some(&start_power) = distinct.first() else {
        return ProtocolParameters::default();
    };

    let step_power = modal_step(&distinct).unwrap_or(0);
    ProtocolParameters {
        start_power,
        step_power,
    }
}

/// Positive powers snapped to the quantum, in order of first appearance
fn distinct_levels<I>(powers: I, quantum_w: u32) -> Vec<i32>
where
    I: IntoIterator<Item = f64>,
{
    let quantum = f64::from(quantum_w.max(1));
    let mut levels: Vec<i32> = Vec::new();

    for power in powers.into_iter().filter(|p| *p > 0.0) {
        // Ties go to the even multiple, so 102.5 W snaps to 100 W
        let level = ((power / quantum).round_ties_even() * quantum) as i32;
        if !levels.contains(&level) {
            levels.push(level);
        }
    }

    levels
}

/// Most frequent positive difference between successive levels.
///
/// Ties are won by the difference seen first.
fn modal_step(levels: &[i32]) -> Option<i32> {
    let mut counts: Vec<(i32, usize)> = Vec::new();

    for delta in levels.windows(2).map(|w| w[1] - w[0]).filter(|d| *d > 0) {
        match counts.iter_mut().find(|(step, _)| *step == delta) {
            Some((_, count)) => *count += 1,
            None => counts.push((delta, 1)),
        }
    }

    let mut best: Option<(i32, usize)> = None;
    for (step, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((step, count));
        }
    }
    best.map(|(step, _)| step)
}
