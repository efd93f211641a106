//! Bounded retry bookkeeping for peripheral bring-up.

/// Bring-up attempts before a peripheral is given up on.
pub const BRING_UP_ATTEMPTS: u8 = 10;

/// Back-off between bring-up attempts.
pub const BRING_UP_BACKOFF_MS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Try again after the back-off.
    Retry { remaining: u8 },
    /// Terminal: the component disables itself.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedRetry {
    remaining: u8,
}

impl BoundedRetry {
    pub const fn new(attempts: u8) -> Self {
        Self { remaining: attempts }
    }

    pub const fn bring_up() -> Self {
        Self::new(BRING_UP_ATTEMPTS)
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Record a failed attempt.
    pub fn failed(&mut self) -> Attempt {
        self.remaining = self.remaining.saturating_sub(1);
        match self.remaining {
            0 => Attempt::Exhausted,
            remaining => Attempt::Retry { remaining },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausts_after_configured_attempts() {
        let mut retry = BoundedRetry::new(3);
        assert_eq!(retry.failed(), Attempt::Retry { remaining: 2 });
        assert_eq!(retry.failed(), Attempt::Retry { remaining: 1 });
        assert_eq!(retry.failed(), Attempt::Exhausted);
        assert!(retry.is_exhausted());
        assert_eq!(retry.failed(), Attempt::Exhausted);
    }

    #[test]
    fn test_bring_up_budget() {
        let mut retry = BoundedRetry::bring_up();
        let mut failures = 0;
        while retry.failed() != Attempt::Exhausted {
            failures += 1;
        }
        assert_eq!(failures + 1, BRING_UP_ATTEMPTS);
    }
}
