//! Retry policy and per-fetch-type state machine.
//!
//! Each fetch type moves through four phases:
//!
//! ```text
//! idle --tick--> in-flight --ok--> idle
//!                    |
//!                    +--err, retries left--> backoff-wait --timer--> in-flight
//!                    |
//!                    +--err, exhausted--> cooldown --300 s--> idle
//! ```
//!
//! The state is plain data; the monitor loop owns the timers.

use std::time::Duration;

use tokio::time::Instant;

/// Backoff parameters for failed fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failure before entering cooldown.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Time after exhaustion before the retry counter resets.
    pub cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (1-based):
    /// `min(max_delay, base_delay * 2^(retry_count - 1))`.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }
}

/// Scheduling phase of one fetch type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchPhase {
    #[default]
    Idle,
    InFlight,
    BackoffWait,
    Cooldown,
}

/// What the monitor should do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Schedule one retry after `delay`.
    Retry { retry_count: u32, delay: Duration },
    /// Retries exhausted; reset the counter after `after`.
    Cooldown { after: Duration },
    /// Error is not worth retrying.
    GiveUp,
}

/// Bookkeeping for one fetch type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchState {
    pub phase: FetchPhase,
    pub retry_count: u32,
    pub last_attempt_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    /// Set when retries run out; cleared only by a success.
    pub exhausted: bool,
}

impl FetchState {
    pub fn in_progress(&self) -> bool {
        self.phase == FetchPhase::InFlight
    }

    /// Marks a dispatch. Returns `false`, leaving the state untouched, when a
    /// fetch of this type is already in flight.
    pub fn begin(&mut self, now: Instant) -> bool {
        if self.in_progress() {
            return false;
        }
        self.phase = FetchPhase::InFlight;
        self.last_attempt_at = Some(now);
        true
    }

    pub fn succeed(&mut self, now: Instant) {
        self.phase = FetchPhase::Idle;
        self.retry_count = 0;
        self.last_success_at = Some(now);
        self.exhausted = false;
    }

    pub fn fail(&mut self, retryable: bool, policy: &RetryPolicy) -> FailureAction {
        if !retryable {
            self.phase = FetchPhase::Idle;
            return FailureAction::GiveUp;
        }
        if self.retry_count < policy.max_retries {
            self.retry_count += 1;
            self.phase = FetchPhase::BackoffWait;
            return FailureAction::Retry {
                retry_count: self.retry_count,
                delay: policy.delay(self.retry_count),
            };
        }
        self.phase = FetchPhase::Cooldown;
        self.exhausted = true;
        FailureAction::Cooldown {
            after: policy.cooldown,
        }
    }

    /// Cooldown expiry: the counter starts over.
    pub fn end_cooldown(&mut self) {
        self.retry_count = 0;
        if self.phase == FetchPhase::Cooldown {
            self.phase = FetchPhase::Idle;
        }
    }

    /// Forgets retries and timing, e.g. after a provider switch.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether at least `min_interval` passed since the last dispatch.
    pub fn due(&self, now: Instant, min_interval: Duration) -> bool {
        self.last_attempt_at
            .map_or(true, |at| now.saturating_duration_since(at) >= min_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap_at_thirty_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
        assert_eq!(policy.delay(3), Duration::from_secs(20));
        assert_eq!(policy.delay(4), Duration::from_secs(30));
        assert_eq!(policy.delay(40), Duration::from_secs(30));
    }

    #[test]
    fn three_retries_then_cooldown() {
        let policy = RetryPolicy::default();
        let mut state = FetchState::default();
        let now = Instant::now();

        let mut actions = Vec::new();
        for _ in 0..4 {
            assert!(state.begin(now));
            actions.push(state.fail(true, &policy));
        }

        assert_eq!(
            actions,
            vec![
                FailureAction::Retry { retry_count: 1, delay: Duration::from_secs(5) },
                FailureAction::Retry { retry_count: 2, delay: Duration::from_secs(10) },
                FailureAction::Retry { retry_count: 3, delay: Duration::from_secs(20) },
                FailureAction::Cooldown { after: Duration::from_secs(300) },
            ]
        );
        assert_eq!(state.phase, FetchPhase::Cooldown);
        assert!(state.exhausted);
        assert_eq!(state.retry_count, 3);

        state.end_cooldown();
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.phase, FetchPhase::Idle);
        assert!(state.exhausted);

        state.begin(now);
        state.succeed(now);
        assert!(!state.exhausted);
    }

    #[test]
    fn in_flight_blocks_second_dispatch() {
        let mut state = FetchState::default();
        let now = Instant::now();

        assert!(state.begin(now));
        assert!(!state.begin(now));

        state.succeed(now);
        assert!(state.begin(now));
    }

    #[test]
    fn success_resets_retry_count() {
        let policy = RetryPolicy::default();
        let mut state = FetchState::default();
        let now = Instant::now();

        state.begin(now);
        state.fail(true, &policy);
        state.begin(now);
        state.succeed(now);

        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_success_at, Some(now));
    }

    #[test]
    fn non_retryable_failure_gives_up_without_counting() {
        let mut state = FetchState::default();
        state.begin(Instant::now());

        assert_eq!(state.fail(false, &RetryPolicy::default()), FailureAction::GiveUp);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.phase, FetchPhase::Idle);
    }

    #[test]
    fn min_interval_guard() {
        let mut state = FetchState::default();
        let start = Instant::now();
        let guard = Duration::from_secs(30);

        assert!(state.due(start, guard));
        state.begin(start);
        state.succeed(start);

        assert!(!state.due(start + Duration::from_secs(29), guard));
        assert!(state.due(start + Duration::from_secs(30), guard));
    }
}
