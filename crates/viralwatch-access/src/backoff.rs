use std::time::Duration;

/// Exponential back-off for network failures.
///
/// `base × 2^(attempt-1)`, capped at `cap`, then scaled by a uniform factor
/// in `[0.75, 1.25)`.
///
/// | Attempt | Delay (base 500 ms)     |
/// |---------|-------------------------|
/// | 1       | 500 ms ± 25 %           |
/// | 2       | 1 000 ms ± 25 %         |
/// | 3       | 2 000 ms ± 25 %         |
#[must_use]
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let capped = nominal_delay(attempt, base, cap);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered_ms = (capped.as_millis() as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(jittered_ms)
}

/// Delay before jitter.
#[must_use]
pub fn nominal_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exponent).min(cap)
}
