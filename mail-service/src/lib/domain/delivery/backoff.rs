//! Exponential backoff with full jitter.
//!
//! After the `n`th failed attempt (1-based) the worker sleeps a uniformly
//! random duration in `[0, min(base * 2^(n-1), max)]`.

use std::time::Duration;

use rand::Rng;

use crate::domain::delivery::models::DeliveryPolicy;

/// Upper bound of the delay following failed attempt `attempt` (1-based).
pub fn delay_bound(policy: &DeliveryPolicy, attempt: u32) -> Duration {
    let base_ms = policy.base_delay.as_millis().min(u64::MAX as u128) as u64;
    let factor = 1u64
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);

    Duration::from_millis(base_ms.saturating_mul(factor)).min(policy.max_delay)
}

/// Random delay in `[0, bound]`, millisecond resolution.
pub fn full_jitter<R: Rng + ?Sized>(bound: Duration, rng: &mut R) -> Duration {
    let bound_ms = bound.as_millis().min(u64::MAX as u128) as u64;
    if bound_ms == 0 {
        return Duration::ZERO;
    }

    Duration::from_millis(rng.gen_range(0..=bound_ms))
}
