//! Circuit breaker state machine.
//!
//! The breaker never reads the clock itself; every transition takes `now` so callers and tests
//! control time.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
	Closed,
	Open,
	HalfOpen,
}
impl CircuitState {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Closed => "closed",
			Self::Open => "open",
			Self::HalfOpen => "half_open",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
	pub failure_threshold: u32,
	pub cooldown: Duration,
}

/// Result of feeding an outcome into the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	Unchanged,
	Opened,
	Closed,
	Reopened,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
	policy: BreakerPolicy,
	state: CircuitState,
	consecutive_failures: u32,
	opened_at: Option<Instant>,
	probe_in_flight: bool,
}
impl CircuitBreaker {
	pub fn new(policy: BreakerPolicy) -> Self {
		Self {
			policy,
			state: CircuitState::Closed,
			consecutive_failures: 0,
			opened_at: None,
			probe_in_flight: false,
		}
	}

	pub fn policy(&self) -> BreakerPolicy {
		self.policy
	}

	pub fn state(&self) -> CircuitState {
		self.state
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.consecutive_failures
	}

	/// Whether a call would be admitted at `now`, without claiming the half-open probe.
	pub fn is_available(&self, now: Instant) -> bool {
		match self.state {
			CircuitState::Closed => true,
			CircuitState::HalfOpen => !self.probe_in_flight,
			CircuitState::Open => self.cooldown_elapsed(now),
		}
	}

	/// Admits a call. An open breaker whose cooldown has elapsed moves to half-open and admits
	/// exactly one probe; further calls are refused until the probe reports back.
	pub fn try_acquire(&mut self, now: Instant) -> bool {
		match self.state {
			CircuitState::Closed => true,
			CircuitState::Open =>
				if self.cooldown_elapsed(now) {
					self.state = CircuitState::HalfOpen;
					self.probe_in_flight = true;

					true
				} else {
					false
				},
			CircuitState::HalfOpen =>
				if self.probe_in_flight {
					false
				} else {
					self.probe_in_flight = true;

					true
				},
		}
	}

	pub fn record_success(&mut self) -> Transition {
		match self.state {
			CircuitState::Closed => {
				self.consecutive_failures = 0;

				Transition::Unchanged
			},
			CircuitState::HalfOpen => {
				self.state = CircuitState::Closed;
				self.consecutive_failures = 0;
				self.opened_at = None;
				self.probe_in_flight = false;

				Transition::Closed
			},
			// A straggler admitted before the breaker opened does not close it.
			CircuitState::Open => Transition::Unchanged,
		}
	}

	pub fn record_failure(&mut self, now: Instant) -> Transition {
		self.consecutive_failures = self.consecutive_failures.saturating_add(1);

		match self.state {
			CircuitState::Closed =>
				if self.consecutive_failures >= self.policy.failure_threshold {
					self.state = CircuitState::Open;
					self.opened_at = Some(now);

					Transition::Opened
				} else {
					Transition::Unchanged
				},
			CircuitState::HalfOpen => {
				self.state = CircuitState::Open;
				self.opened_at = Some(now);
				self.probe_in_flight = false;

				Transition::Reopened
			},
			CircuitState::Open => Transition::Unchanged,
		}
	}

	/// Frees the half-open probe slot when the probe was cancelled before reporting an outcome.
	pub fn release_probe(&mut self) {
		if self.state == CircuitState::HalfOpen {
			self.probe_in_flight = false;
		}
	}

	pub fn remaining_cooldown(&self, now: Instant) -> Option<Duration> {
		if self.state != CircuitState::Open {
			return None;
		}

		let opened_at = self.opened_at?;

		Some(self.policy.cooldown.saturating_sub(now.saturating_duration_since(opened_at)))
	}

	fn cooldown_elapsed(&self, now: Instant) -> bool {
		self.opened_at
			.map(|opened_at| now.saturating_duration_since(opened_at) >= self.policy.cooldown)
			.unwrap_or(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn breaker(threshold: u32) -> CircuitBreaker {
		CircuitBreaker::new(BreakerPolicy {
			failure_threshold: threshold,
			cooldown: Duration::from_secs(300),
		})
	}

	#[test]
	fn opens_after_exactly_threshold_failures() {
		let mut cb = breaker(5);
		let now = Instant::now();

		for _ in 0..4 {
			assert_eq!(cb.record_failure(now), Transition::Unchanged);
			assert_eq!(cb.state(), CircuitState::Closed);
		}

		assert_eq!(cb.record_failure(now), Transition::Opened);
		assert_eq!(cb.state(), CircuitState::Open);
		assert!(!cb.try_acquire(now));
	}

	#[test]
	fn success_resets_consecutive_count() {
		let mut cb = breaker(3);
		let now = Instant::now();

		cb.record_failure(now);
		cb.record_failure(now);
		cb.record_success();
		cb.record_failure(now);
		cb.record_failure(now);

		assert_eq!(cb.state(), CircuitState::Closed);
		assert_eq!(cb.consecutive_failures(), 2);
	}

	#[test]
	fn half_open_admits_a_single_probe() {
		let mut cb = breaker(1);
		let start = Instant::now();

		cb.record_failure(start);

		let later = start + Duration::from_secs(300);

		assert!(cb.is_available(later));
		assert!(cb.try_acquire(later));
		assert_eq!(cb.state(), CircuitState::HalfOpen);
		assert!(!cb.try_acquire(later));
		assert!(!cb.is_available(later));
	}

	#[test]
	fn half_open_success_closes() {
		let mut cb = breaker(1);
		let start = Instant::now();

		cb.record_failure(start);

		assert!(cb.try_acquire(start + Duration::from_secs(301)));
		assert_eq!(cb.record_success(), Transition::Closed);
		assert_eq!(cb.state(), CircuitState::Closed);
		assert_eq!(cb.consecutive_failures(), 0);
	}

	#[test]
	fn half_open_failure_reopens_with_fresh_cooldown() {
		let mut cb = breaker(1);
		let start = Instant::now();

		cb.record_failure(start);

		let probe_at = start + Duration::from_secs(400);

		assert!(cb.try_acquire(probe_at));
		assert_eq!(cb.record_failure(probe_at), Transition::Reopened);
		assert_eq!(cb.state(), CircuitState::Open);
		assert_eq!(cb.remaining_cooldown(probe_at), Some(Duration::from_secs(300)));
		assert!(!cb.try_acquire(probe_at + Duration::from_secs(299)));
		assert!(cb.try_acquire(probe_at + Duration::from_secs(300)));
	}

	#[test]
	fn released_probe_can_be_retried() {
		let mut cb = breaker(1);
		let start = Instant::now();

		cb.record_failure(start);

		let later = start + Duration::from_secs(300);

		assert!(cb.try_acquire(later));

		cb.release_probe();

		assert!(cb.try_acquire(later));
	}
}
