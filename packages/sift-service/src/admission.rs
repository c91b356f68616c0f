//! Admission control in front of the orchestrator: a per-user request rate limit and a bounded,
//! priority-ordered wait queue for concurrency slots.

use std::{
	cmp::Ordering,
	collections::{BinaryHeap, HashMap, VecDeque},
	sync::Arc,
	time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::{Error, Result};

const RATE_WINDOW: Duration = Duration::from_secs(60);
const RATE_SWEEP_THRESHOLD: usize = 10_000;

#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CallerPriority {
	Low,
	#[default]
	Normal,
	High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
	pub in_flight: usize,
	pub queued: usize,
	pub max_concurrent: usize,
	pub max_queue_depth: usize,
}

struct Waiter {
	priority: CallerPriority,
	seq: u64,
	tx: oneshot::Sender<()>,
}
impl PartialEq for Waiter {
	fn eq(&self, other: &Self) -> bool {
		self.priority == other.priority && self.seq == other.seq
	}
}
impl Eq for Waiter {}
impl PartialOrd for Waiter {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Waiter {
	// Max-heap: higher priority first, then earlier arrival.
	fn cmp(&self, other: &Self) -> Ordering {
		self.priority.cmp(&other.priority).then_with(|| other.seq.cmp(&self.seq))
	}
}

#[derive(Default)]
struct AdmissionState {
	in_flight: usize,
	queue: BinaryHeap<Waiter>,
	next_seq: u64,
}
impl AdmissionState {
	// Waiters whose request was dropped still occupy queue depth until pruned.
	fn prune_abandoned(&mut self) {
		if self.queue.iter().any(|waiter| waiter.tx.is_closed()) {
			self.queue.retain(|waiter| !waiter.tx.is_closed());
		}
	}

	fn release(&mut self) {
		while let Some(waiter) = self.queue.pop() {
			// The slot moves to the waiter; in_flight is unchanged.
			if waiter.tx.send(()).is_ok() {
				return;
			}
		}

		self.in_flight = self.in_flight.saturating_sub(1);
	}
}

#[derive(Clone)]
pub struct Admission {
	state: Arc<Mutex<AdmissionState>>,
	max_concurrent: usize,
	max_queue_depth: usize,
	retry_after_ms: u64,
}
impl Admission {
	pub fn new(cfg: &sift_config::Admission) -> Self {
		Self {
			state: Arc::new(Mutex::new(AdmissionState::default())),
			max_concurrent: cfg.max_concurrent.max(1) as usize,
			max_queue_depth: cfg.max_queue_depth as usize,
			retry_after_ms: cfg.queue_retry_after_ms,
		}
	}

	/// Waits for a concurrency slot. Fails fast with `QueueOverflow` when the queue is full.
	pub async fn acquire(&self, priority: CallerPriority) -> Result<AdmissionPermit> {
		let rx = {
			let mut state = self.state.lock();

			state.prune_abandoned();

			if state.in_flight < self.max_concurrent && state.queue.is_empty() {
				state.in_flight += 1;

				return Ok(self.permit());
			}
			if state.queue.len() >= self.max_queue_depth {
				tracing::warn!(
					in_flight = state.in_flight,
					queued = state.queue.len(),
					"Search queue is full. Rejecting request."
				);

				return Err(Error::QueueOverflow { retry_after_ms: self.retry_after_ms });
			}

			let (tx, rx) = oneshot::channel();
			let seq = state.next_seq;

			state.next_seq += 1;
			state.queue.push(Waiter { priority, seq, tx });

			tracing::debug!(?priority, queued = state.queue.len(), "Search request queued.");

			rx
		};
		let mut waiting = Waiting { rx: Some(rx), state: &self.state };
		let granted = match waiting.rx.as_mut() {
			Some(rx) => rx.await.is_ok(),
			None => false,
		};

		waiting.rx = None;

		if granted {
			Ok(self.permit())
		} else {
			Err(Error::QueueOverflow { retry_after_ms: self.retry_after_ms })
		}
	}

	pub fn snapshot(&self) -> AdmissionSnapshot {
		let state = self.state.lock();

		AdmissionSnapshot {
			in_flight: state.in_flight,
			queued: state.queue.len(),
			max_concurrent: self.max_concurrent,
			max_queue_depth: self.max_queue_depth,
		}
	}

	fn permit(&self) -> AdmissionPermit {
		AdmissionPermit { state: self.state.clone() }
	}
}

/// A held concurrency slot. Dropping it hands the slot to the next queued request.
pub struct AdmissionPermit {
	state: Arc<Mutex<AdmissionState>>,
}
impl Drop for AdmissionPermit {
	fn drop(&mut self) {
		self.state.lock().release();
	}
}

// A queued request cancelled right after being granted must pass the slot on.
struct Waiting<'a> {
	rx: Option<oneshot::Receiver<()>>,
	state: &'a Mutex<AdmissionState>,
}
impl Drop for Waiting<'_> {
	fn drop(&mut self) {
		if let Some(mut rx) = self.rx.take() {
			rx.close();

			if rx.try_recv().is_ok() {
				self.state.lock().release();
			}
		}
	}
}

/// Sliding one-minute request window per user.
pub struct RateLimiter {
	limit: usize,
	window: Duration,
	users: Mutex<HashMap<String, VecDeque<Instant>>>,
}
impl RateLimiter {
	pub fn per_minute(limit: u32) -> Self {
		Self {
			limit: limit.max(1) as usize,
			window: RATE_WINDOW,
			users: Mutex::new(HashMap::new()),
		}
	}

	pub fn check(&self, user_id: &str, now: Instant) -> Result<()> {
		let mut users = self.users.lock();

		if users.len() > RATE_SWEEP_THRESHOLD {
			let window = self.window;

			users.retain(|_, hits| {
				hits.back().is_some_and(|last| now.saturating_duration_since(*last) < window)
			});
		}

		let hits = users.entry(user_id.to_string()).or_default();

		while hits
			.front()
			.is_some_and(|first| now.saturating_duration_since(*first) >= self.window)
		{
			hits.pop_front();
		}

		if hits.len() >= self.limit {
			let oldest = hits.front().copied().unwrap_or(now);
			let retry_after = self.window.saturating_sub(now.saturating_duration_since(oldest));

			return Err(Error::RateLimitExceeded {
				retry_after_ms: (retry_after.as_millis() as u64).max(1),
			});
		}

		hits.push_back(now);

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn waiters_order_by_priority_then_arrival() {
		let mut heap = BinaryHeap::new();
		let mut receivers = Vec::new();
		let priorities = [
			CallerPriority::Normal,
			CallerPriority::High,
			CallerPriority::Low,
			CallerPriority::High,
		];

		for (seq, priority) in priorities.into_iter().enumerate() {
			let (tx, rx) = oneshot::channel();

			receivers.push(rx);
			heap.push(Waiter { priority, seq: seq as u64, tx });
		}

		let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|waiter| waiter.seq)).collect();

		assert_eq!(order, vec![1, 3, 0, 2]);
	}

	#[test]
	fn rate_limiter_slides_per_user() {
		let limiter = RateLimiter::per_minute(2);
		let start = Instant::now();

		assert!(limiter.check("alice", start).is_ok());
		assert!(limiter.check("alice", start + Duration::from_secs(10)).is_ok());

		let err = limiter.check("alice", start + Duration::from_secs(20)).expect_err("third call");

		assert!(matches!(err, Error::RateLimitExceeded { retry_after_ms: 40_000 }));
		assert!(limiter.check("bob", start + Duration::from_secs(20)).is_ok());
		assert!(limiter.check("alice", start + Duration::from_secs(61)).is_ok());
	}
}
