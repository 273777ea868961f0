//! Attempt count → chunk size and retry ceiling.

use treesync_protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_RETRIES};

/// Fixed retry schedule: each failed dispatch halves the chunk size, down
/// to an eighth of the base, until the ceiling is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_chunk_size: usize,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Chunk size for a job whose attempt count is `attempt` before dispatch.
    ///
    /// `C`, `C/2`, `C/4`, then `C/8` for every later attempt, rounded to the
    /// nearest integer and never below 1.
    pub fn chunk_size_for(&self, attempt: u32) -> usize {
        let divisor = 1usize << attempt.min(3);
        ((self.base_chunk_size + divisor / 2) / divisor).max(1)
    }

    /// `true` once a job may no longer be dispatched.
    pub fn ceiling_reached(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.chunk_size_for(0), 100);
        assert_eq!(policy.chunk_size_for(1), 50);
        assert_eq!(policy.chunk_size_for(2), 25);
        assert_eq!(policy.chunk_size_for(3), 13);
        assert_eq!(policy.chunk_size_for(9), 13);
    }

    #[test]
    fn chunk_size_never_grows_with_attempts() {
        let policy = RetryPolicy {
            base_chunk_size: 37,
            max_retries: 10,
        };
        let sizes: Vec<usize> = (0..=policy.max_retries)
            .map(|a| policy.chunk_size_for(a))
            .collect();
        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
        assert!(sizes[..4].windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn floor_is_one() {
        let policy = RetryPolicy {
            base_chunk_size: 1,
            max_retries: 10,
        };
        assert_eq!(policy.chunk_size_for(0), 1);
        assert_eq!(policy.chunk_size_for(5), 1);
    }

    #[test]
    fn ceiling() {
        let policy = RetryPolicy::default();
        assert!(!policy.ceiling_reached(9));
        assert!(policy.ceiling_reached(10));
        assert!(policy.ceiling_reached(11));
    }
}
