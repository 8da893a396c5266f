//! Retry ceilings per acquisition type.

use std::time::Duration;

/// How many automatic attempts an acquisition gets and how long to wait
/// between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Whether an attempt made while offline uses up the budget.
    pub count_offline_attempts: bool,
    pub base_backoff: Duration,
    pub backoff_factor: u32,
    pub max_backoff: Duration,
}

/// Outcome of asking for one more attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Attempt count to persist.
    pub attempts: u32,
    pub allowed: bool,
}

impl RetryPolicy {
    /// Whole sticker packs: three manifest fetches, offline tries are free.
    pub const STICKER_PACK: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        count_offline_attempts: false,
        base_backoff: Duration::ZERO,
        backoff_factor: 1,
        max_backoff: Duration::ZERO,
    };

    /// Message attachments: five tries, 30 s growing tenfold up to 6 h.
    pub const ATTACHMENT: RetryPolicy = RetryPolicy {
        max_attempts: 5,
        count_offline_attempts: true,
        base_backoff: Duration::from_secs(30),
        backoff_factor: 10,
        max_backoff: Duration::from_secs(6 * 60 * 60),
    };

    /// Count one more attempt on top of `previous`.
    pub fn next_attempt(&self, previous: u32, online: bool) -> Attempt {
        let attempts = if online || self.count_offline_attempts {
            previous.saturating_add(1)
        } else {
            previous
        };
        Attempt {
            attempts,
            allowed: attempts <= self.max_attempts,
        }
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Wait before attempt number `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = (self.backoff_factor.max(1) as u64)
            .checked_pow(attempt - 1)
            .unwrap_or(u64::MAX);
        let secs = self.base_backoff.as_secs().saturating_mul(factor);
        Duration::from_secs(secs).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ATTACHMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sticker_pack_ceiling() {
        let policy = RetryPolicy::STICKER_PACK;
        let mut attempts = 0;
        for _ in 0..3 {
            let next = policy.next_attempt(attempts, true);
            assert!(next.allowed);
            attempts = next.attempts;
        }
        let fourth = policy.next_attempt(attempts, true);
        assert_eq!(fourth, Attempt { attempts: 4, allowed: false });
    }

    #[test]
    fn test_offline_attempts_are_free_for_packs() {
        let next = RetryPolicy::STICKER_PACK.next_attempt(2, false);
        assert_eq!(next, Attempt { attempts: 2, allowed: true });

        let next = RetryPolicy::ATTACHMENT.next_attempt(2, false);
        assert_eq!(next.attempts, 3);
    }

    #[test]
    fn test_attachment_backoff_grows_and_caps() {
        let policy = RetryPolicy::ATTACHMENT;
        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(300));
        assert_eq!(policy.backoff(3), Duration::from_secs(3000));
        assert_eq!(policy.backoff(4), Duration::from_secs(6 * 60 * 60));
        assert_eq!(policy.backoff(40), Duration::from_secs(6 * 60 * 60));
    }
}
