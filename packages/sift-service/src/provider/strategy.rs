use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
	#[default]
	Priority,
	RoundRobin,
	LeastLoaded,
	Fastest,
	Random,
}
impl SelectionStrategy {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim() {
			"priority" => Some(Self::Priority),
			"round_robin" => Some(Self::RoundRobin),
			"least_loaded" => Some(Self::LeastLoaded),
			"fastest" => Some(Self::Fastest),
			"random" => Some(Self::Random),
			_ => None,
		}
	}

	/// Orders candidates best first. `rotation` advances the round-robin start.
	pub fn rank(self, mut candidates: Vec<RankInput>, rotation: usize) -> Vec<usize> {
		candidates.sort_by_key(|c| (c.priority, c.index));

		match self {
			Self::Priority => {},
			Self::RoundRobin =>
				if !candidates.is_empty() {
					let len = candidates.len();

					candidates.rotate_left(rotation % len);
				},
			Self::LeastLoaded => candidates.sort_by_key(|c| c.in_flight),
			// Unmeasured providers go last.
			Self::Fastest => candidates.sort_by_key(|c| c.mean_latency.unwrap_or(Duration::MAX)),
			Self::Random => candidates.shuffle(&mut rand::rng()),
		}

		candidates.into_iter().map(|c| c.index).collect()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankInput {
	pub index: usize,
	pub priority: u32,
	pub in_flight: usize,
	pub mean_latency: Option<Duration>,
}
