//! Leader-election-by-broadcast, the write coordinator's fallback when the
//! environment provides no native named lock.
//!
//! Each instance proposes itself with a `(timestamp, instance id)` token,
//! collects competing proposals for a settle window, and the lowest token
//! wins and announces a time-bounded lease. The machine is pure: the caller
//! injects the clock and owns the transport, so every transition is testable
//! without a browser. Best-effort only: callers bound their overall wait
//! and proceed uncoordinated on timeout.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Messages exchanged over the shared broadcast transport.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
	Propose {
		key: String,
		timestamp: f64,
		instance: String,
	},
	Lease {
		key: String,
		instance: String,
		until: f64,
	},
	Release {
		key: String,
		instance: String,
	},
}

impl PeerMessage {
	fn key(&self) -> &str {
		match self {
			PeerMessage::Propose { key, .. }
			| PeerMessage::Lease { key, .. }
			| PeerMessage::Release { key, .. } => key,
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
enum State {
	Idle,
	Collecting {
		deadline: f64,
		best_timestamp: f64,
		best_instance: String,
	},
	/// We hold the lease; self-released by [`Election::release`] or expiring
	/// at `lease_until`.
	Holding { lease_until: f64 },
	/// Someone else holds (or won) a lease; an expired lease is treated as
	/// free without waiting for a release message.
	Waiting { until: f64 },
}

/// Outcome of an election deadline.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
	/// This instance won; broadcast the contained lease announcement.
	Won(PeerMessage),
	Lost,
}

/// One election participant for one lock key.
#[derive(Debug)]
pub struct Election {
	key: String,
	instance: String,
	state: State,
}

/// Total order over proposal tokens: timestamp first, instance id as the
/// tie-breaker. NaN timestamps lose against everything.
fn token_less(a_timestamp: f64, a_instance: &str, b_timestamp: f64, b_instance: &str) -> bool {
	match a_timestamp.partial_cmp(&b_timestamp) {
		Some(core::cmp::Ordering::Less) => true,
		Some(core::cmp::Ordering::Greater) | None => false,
		Some(core::cmp::Ordering::Equal) => a_instance < b_instance,
	}
}

impl Election {
	#[must_use]
	pub fn new(key: &str, instance: &str) -> Self {
		Self {
			key: key.to_owned(),
			instance: instance.to_owned(),
			state: State::Idle,
		}
	}

	#[must_use]
	pub fn is_holding(&self) -> bool {
		matches!(self.state, State::Holding { .. })
	}

	#[must_use]
	pub fn is_idle(&self) -> bool {
		self.state == State::Idle
	}

	/// Starts a collection round, proposing this instance. Returns the
	/// proposal to broadcast. No-op (returns `None`) unless idle.
	pub fn propose(&mut self, now: f64, collect_ms: f64) -> Option<PeerMessage> {
		if self.state != State::Idle {
			return None;
		}
		self.state = State::Collecting {
			deadline: now + collect_ms,
			best_timestamp: now,
			best_instance: self.instance.clone(),
		};
		Some(PeerMessage::Propose {
			key: self.key.clone(),
			timestamp: now,
			instance: self.instance.clone(),
		})
	}

	/// Feeds a message received from the transport. May return a message to
	/// broadcast in response (a lease re-announcement for late proposers).
	pub fn on_message(&mut self, message: &PeerMessage, now: f64) -> Option<PeerMessage> {
		if message.key() != self.key {
			return None;
		}
		match message {
			PeerMessage::Propose {
				timestamp,
				instance,
				..
			} => {
				if *instance == self.instance {
					return None;
				}
				match &mut self.state {
					State::Collecting {
						best_timestamp,
						best_instance,
						..
					} => {
						if token_less(*timestamp, instance, *best_timestamp, best_instance) {
							trace!(instance, "competing proposal wins so far");
							*best_timestamp = *timestamp;
							*best_instance = instance.clone();
						}
						None
					}
					// Late proposers learn of the standing lease.
					State::Holding { lease_until } => Some(PeerMessage::Lease {
						key: self.key.clone(),
						instance: self.instance.clone(),
						until: *lease_until,
					}),
					State::Idle | State::Waiting { .. } => None,
				}
			}
			PeerMessage::Lease {
				instance, until, ..
			} => {
				if *instance != self.instance && *until > now && !self.is_holding() {
					self.state = State::Waiting { until: *until };
				}
				None
			}
			PeerMessage::Release { instance, .. } => {
				if *instance != self.instance {
					if let State::Waiting { .. } = self.state {
						self.state = State::Idle;
					}
				}
				None
			}
		}
	}

	/// Advances time-driven transitions: election deadlines, lease expiry
	/// (both own and observed). Returns the outcome when a collection round
	/// completes.
	pub fn tick(&mut self, now: f64, lease_ms: f64) -> Option<Outcome> {
		match &self.state {
			State::Collecting {
				deadline,
				best_instance,
				..
			} => {
				if now < *deadline {
					return None;
				}
				if *best_instance == self.instance {
					let lease_until = now + lease_ms;
					self.state = State::Holding { lease_until };
					Some(Outcome::Won(PeerMessage::Lease {
						key: self.key.clone(),
						instance: self.instance.clone(),
						until: lease_until,
					}))
				} else {
					// The winner's lease announcement moves us to `Waiting`;
					// until it arrives, assume a full lease from now.
					self.state = State::Waiting {
						until: now + lease_ms,
					};
					Some(Outcome::Lost)
				}
			}
			State::Holding { lease_until } => {
				if now >= *lease_until {
					self.state = State::Idle;
				}
				None
			}
			State::Waiting { until } => {
				if now >= *until {
					self.state = State::Idle;
				}
				None
			}
			State::Idle => None,
		}
	}

	/// Releases a held lease. Idempotent; returns the release broadcast on
	/// the first call only.
	pub fn release(&mut self) -> Option<PeerMessage> {
		if self.is_holding() {
			self.state = State::Idle;
			Some(PeerMessage::Release {
				key: self.key.clone(),
				instance: self.instance.clone(),
			})
		} else {
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const KEY: &str = "conn\u{1f}/content/site/block\u{1f}image";

	fn deliver(from: Option<PeerMessage>, to: &mut Election, now: f64) -> Option<PeerMessage> {
		from.and_then(|message| to.on_message(&message, now))
	}

	#[test]
	fn lower_timestamp_wins_the_election() {
		let mut early = Election::new(KEY, "instance-b");
		let mut late = Election::new(KEY, "instance-a");

		let early_proposal = early.propose(100.0, 150.0);
		let late_proposal = late.propose(130.0, 150.0);
		deliver(early_proposal, &mut late, 130.0);
		deliver(late_proposal, &mut early, 130.0);

		let early_outcome = early.tick(250.0, 5000.0).unwrap();
		let late_outcome = late.tick(280.0, 5000.0).unwrap();

		assert!(matches!(early_outcome, Outcome::Won(PeerMessage::Lease { .. })));
		assert_eq!(late_outcome, Outcome::Lost);
		assert!(early.is_holding());
		assert!(!late.is_holding());
	}

	#[test]
	fn timestamp_tie_breaks_on_instance_id() {
		let mut a = Election::new(KEY, "instance-a");
		let mut b = Election::new(KEY, "instance-b");

		let a_proposal = a.propose(100.0, 150.0);
		let b_proposal = b.propose(100.0, 150.0);
		deliver(a_proposal, &mut b, 100.0);
		deliver(b_proposal, &mut a, 100.0);

		assert!(matches!(a.tick(250.0, 5000.0), Some(Outcome::Won(_))));
		assert_eq!(b.tick(250.0, 5000.0), Some(Outcome::Lost));
	}

	#[test]
	fn exactly_one_holder_among_concurrent_proposers() {
		let mut a = Election::new(KEY, "instance-a");
		let mut b = Election::new(KEY, "instance-b");

		// Within 50ms of each other, per the coordination property.
		let a_proposal = a.propose(100.0, 150.0);
		let b_proposal = b.propose(140.0, 150.0);
		deliver(b_proposal, &mut a, 145.0);
		deliver(a_proposal, &mut b, 150.0);
		let lease = match a.tick(250.0, 5000.0) {
			Some(Outcome::Won(lease)) => lease,
			other => panic!("expected a to win, got {:?}", other),
		};
		assert_eq!(b.tick(290.0, 5000.0), Some(Outcome::Lost));
		b.on_message(&lease, 295.0);

		assert!(a.is_holding());
		assert!(!b.is_holding());

		// The loser only proceeds after the winner's release.
		let release = a.release().unwrap();
		assert!(!b.is_idle());
		b.on_message(&release, 300.0);
		assert!(b.is_idle());
		assert!(b.propose(300.0, 150.0).is_some());
		assert!(matches!(b.tick(450.0, 5000.0), Some(Outcome::Won(_))));
	}

	#[test]
	fn expired_lease_is_treated_as_free_by_observers() {
		let mut observer = Election::new(KEY, "instance-b");
		observer.on_message(
			&PeerMessage::Lease {
				key: KEY.to_owned(),
				instance: "instance-a".to_owned(),
				until: 600.0,
			},
			100.0,
		);
		assert!(observer.propose(200.0, 150.0).is_none());
		observer.tick(600.0, 5000.0);
		assert!(observer.is_idle());
	}

	#[test]
	fn holder_lease_expires_without_release() {
		let mut holder = Election::new(KEY, "instance-a");
		holder.propose(100.0, 150.0);
		assert!(matches!(holder.tick(250.0, 500.0), Some(Outcome::Won(_))));
		holder.tick(700.0, 500.0);
		assert!(!holder.is_holding());
		// Release after expiry is a quiet no-op.
		assert!(holder.release().is_none());
	}

	#[test]
	fn holder_reannounces_lease_to_late_proposers() {
		let mut holder = Election::new(KEY, "instance-a");
		holder.propose(100.0, 150.0);
		holder.tick(250.0, 5000.0);

		let response = holder.on_message(
			&PeerMessage::Propose {
				key: KEY.to_owned(),
				timestamp: 300.0,
				instance: "instance-b".to_owned(),
			},
			300.0,
		);
		assert!(matches!(response, Some(PeerMessage::Lease { .. })));
	}

	#[test]
	fn messages_for_other_keys_are_ignored() {
		let mut election = Election::new(KEY, "instance-a");
		election.on_message(
			&PeerMessage::Lease {
				key: "other".to_owned(),
				instance: "instance-b".to_owned(),
				until: 9000.0,
			},
			100.0,
		);
		assert!(election.is_idle());
	}
}
