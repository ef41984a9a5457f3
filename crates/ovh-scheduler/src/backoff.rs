//! Rate-limit backoff for the `RateLimited` tick outcome.
//!
//! Exponential-with-cap, deterministic jitter keyed off the task id rather
//! than a random source (so backoff is reproducible in tests):
//! `base * 2^(n-1)`, clamped
//! to a hard cap, then nudged by a small jitter term.

use uuid::Uuid;

pub const BACKOFF_CAP_SECS: u64 = 600;
const JITTER_BOUND_SECS: u64 = 10;

/// `base_secs` is the task's configured retry interval; `consecutive_rate_limits`
/// counts how many 429s this task has hit in a row (reset to 0 on any
/// non-429 outcome); `jitter_seed` is typically the task id's low bits, so
/// two tasks with the same base/count still spread out in time.
pub fn rate_limit_backoff_secs(base_secs: u64, consecutive_rate_limits: u32, jitter_seed: u64) -> u64 {
    let base = base_secs.max(1).min(BACKOFF_CAP_SECS);
    let exp = consecutive_rate_limits.saturating_sub(1).min(63);
    let backoff = base.saturating_mul(1u64 << exp).min(BACKOFF_CAP_SECS);
    backoff.saturating_add(jitter_seed % JITTER_BOUND_SECS).min(BACKOFF_CAP_SECS)
}

/// Derives a deterministic jitter seed from a task id (low 64 bits of the
/// uuid), so repeated calls for the same task produce the same jitter term.
pub fn jitter_seed_for(task_id: Uuid) -> u64 {
    let bytes = task_id.as_u128() as u64;
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_rate_limit_stays_near_base() {
        let backoff = rate_limit_backoff_secs(30, 1, 0);
        assert!((30..30 + JITTER_BOUND_SECS).contains(&backoff));
    }

    #[test]
    fn repeated_rate_limits_double_until_capped() {
        assert!(rate_limit_backoff_secs(30, 2, 0) >= 60);
        assert_eq!(rate_limit_backoff_secs(30, 40, 0), BACKOFF_CAP_SECS);
    }

    #[test]
    fn jitter_is_deterministic_for_same_task() {
        let id = Uuid::new_v4();
        assert_eq!(jitter_seed_for(id), jitter_seed_for(id));
    }
}
