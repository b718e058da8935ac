use rand::Rng;

/// `initial * multiplier^attempt`, clamped to `cap`, with symmetric
/// uniform jitter of `+/- jitter_fraction` applied on top.
pub fn compute_delay_ms(initial_ms: u64, multiplier: f64, cap_ms: u64, jitter_fraction: f64, attempt: u32) -> u64 {
    let base = (initial_ms as f64) * multiplier.powi(attempt as i32);
    let clamped = base.min(cap_ms as f64);

    let jitter = if jitter_fraction > 0.0 {
        rand::rng().random_range(-jitter_fraction..=jitter_fraction)
    } else {
        0.0
    };

    let jittered = clamped * (1.0 + jitter);
    jittered.max(0.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_jitter_is_deterministic() {
        assert_eq!(compute_delay_ms(1_000, 2.0, 30_000, 0.0, 0), 1_000);
        assert_eq!(compute_delay_ms(1_000, 2.0, 30_000, 0.0, 1), 2_000);
        assert_eq!(compute_delay_ms(1_000, 2.0, 30_000, 0.0, 2), 4_000);
    }

    #[test]
    fn test_clamped_to_cap() {
        assert_eq!(compute_delay_ms(1_000, 2.0, 5_000, 0.0, 10), 5_000);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for attempt in 0..5 {
            let delay = compute_delay_ms(1_000, 2.0, 30_000, 0.10, attempt);
            let base = (1_000f64 * 2f64.powi(attempt as i32)).min(30_000.0);
            let lower = (base * 0.9).floor() as u64;
            let upper = (base * 1.1).ceil() as u64;
            assert!(delay >= lower && delay <= upper, "delay {delay} out of [{lower},{upper}]");
        }
    }
}
