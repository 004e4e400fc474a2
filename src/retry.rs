//! Retry policy for translation requests
//!
//! The policy is a pure function from (attempt, outcome) to the next
//! [`RetryState`]; the caller owns the loop and sleeps through a [`Sleeper`]
//! so tests never wait on a real clock.

use std::future::Future;
use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_DELAY: Duration = Duration::from_millis(500);

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// No response at all (network unreachable, rejected cross-origin, timeout)
    TransportFailure,
    /// 5xx
    ServerError,
    /// Status 0 or a status outside the success/4xx/5xx classes
    AmbiguousStatus,
    /// 4xx
    ClientError,
    /// A 2xx whose body lacked the fields we need
    Malformed,
}

impl Outcome {
    /// Classify a non-transport result by its HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Outcome::Success,
            400..=499 => Outcome::ClientError,
            500..=599 => Outcome::ServerError,
            _ => Outcome::AmbiguousStatus,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::TransportFailure | Outcome::ServerError | Outcome::AmbiguousStatus
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    /// Retryable failures used up every attempt
    Exhausted { attempts: u32 },
    /// A failure that must not be retried
    Rejected { attempts: u32 },
}

impl RetryState {
    pub fn start() -> Self {
        RetryState::Attempting { attempt: 1 }
    }

    /// Leave a backoff once its delay has elapsed
    pub fn resume(self) -> Self {
        match self {
            RetryState::Backoff { attempt, .. } => RetryState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based): base * 2^(attempt-1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay * 2u32.pow(exponent)
    }

    pub fn next(&self, attempt: u32, outcome: Outcome) -> RetryState {
        if outcome == Outcome::Success {
            return RetryState::Succeeded { attempts: attempt };
        }
        if !outcome.is_retryable() {
            return RetryState::Rejected { attempts: attempt };
        }
        if attempt >= self.max_attempts {
            return RetryState::Exhausted { attempts: attempt };
        }
        RetryState::Backoff {
            attempt,
            delay: self.delay_after(attempt),
        }
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Records requested delays and returns immediately
    #[derive(Default)]
    pub struct RecordingSleeper {
        slept: RefCell<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn slept(&self) -> Vec<Duration> {
            self.slept.borrow().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(Outcome::from_status(200), Outcome::Success);
        assert_eq!(Outcome::from_status(404), Outcome::ClientError);
        assert_eq!(Outcome::from_status(429), Outcome::ClientError);
        assert_eq!(Outcome::from_status(502), Outcome::ServerError);
        assert_eq!(Outcome::from_status(0), Outcome::AmbiguousStatus);
        assert_eq!(Outcome::from_status(302), Outcome::AmbiguousStatus);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_server_errors_back_off_until_exhausted() {
        let policy = RetryPolicy::default();

        let state = policy.next(1, Outcome::ServerError);
        assert_eq!(
            state,
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(state.resume(), RetryState::Attempting { attempt: 2 });

        let state = policy.next(2, Outcome::TransportFailure);
        assert_eq!(
            state,
            RetryState::Backoff {
                attempt: 2,
                delay: Duration::from_millis(1000)
            }
        );

        let state = policy.next(3, Outcome::AmbiguousStatus);
        assert_eq!(state, RetryState::Exhausted { attempts: 3 });
        assert_eq!(state.resume(), state);
    }

    #[test]
    fn test_client_errors_are_rejected_immediately() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next(1, Outcome::ClientError),
            RetryState::Rejected { attempts: 1 }
        );
        assert_eq!(
            policy.next(1, Outcome::Malformed),
            RetryState::Rejected { attempts: 1 }
        );
    }

    #[test]
    fn test_success_on_last_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next(3, Outcome::Success),
            RetryState::Succeeded { attempts: 3 }
        );
        assert_eq!(RetryState::start(), RetryState::Attempting { attempt: 1 });
    }
}
