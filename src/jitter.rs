//! Randomized spread around a nominal pacing value.
//!
//! Every window (or interval) draws a fresh target so that many generator
//! instances started together drift apart instead of hitting the broker in
//! lockstep.

use rand::Rng;

/// Draws a value uniformly from `[nominal - ratio*nominal, nominal + ratio*nominal]`.
///
/// A ratio of zero returns `nominal` untouched. A draw of zero is coerced to
/// one so callers never get a zero-length sleep, rate or byte budget.
pub fn jitter(nominal: u64, ratio: f64) -> u64 {
    jitter_with(&mut rand::rng(), nominal, ratio)
}

/// Same as [`jitter`] with an explicit random source.
pub fn jitter_with<R: Rng + ?Sized>(rng: &mut R, nominal: u64, ratio: f64) -> u64 {
    if ratio == 0.0 {
        return nominal;
    }
    let spread = (ratio * nominal as f64) as u64;
    let lo = nominal.saturating_sub(spread);
    let hi = nominal.saturating_add(spread);
    let drawn = rng.random_range(lo..=hi);
    if drawn == 0 { 1 } else { drawn }
}
