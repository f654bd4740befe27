//! The apply decision engine: a per-instance reconciliation state machine
//! deciding, each evaluation cycle, whether to fetch-and-write.
//!
//! The transition logic is a pure function over (tracked record, resolution,
//! trigger reason, retry stage), with no host or network dependency. The
//! surrounding [`DecisionEngine`] owns the process-lifetime record map, the
//! error cooldown and the staleness tokens; all timestamps are passed in by
//! the caller, so the engine itself is clock-free.

use crate::reference::{Resolution, ResolvedReference};
use hashbrown::HashMap;
use tracing::debug;

/// Scheduling constants. Empirically tuned against one backing store's
/// observed eventual-consistency window; configuration, not invariants.
#[derive(Clone, Debug)]
pub struct Timings {
	/// Coalesces bursts of near-simultaneous events into one evaluation.
	pub debounce_ms: u32,
	/// Delayed re-evaluations after a commit-class event (stage 1..=4);
	/// stage 0 runs immediately.
	pub retry_delays_ms: [u32; 4],
	/// Evaluation suppression window after a cycle throws.
	pub cooldown_ms: f64,
	/// Post-write settle delay while the write lock is still held.
	pub settle_ms: u32,
	/// Bound on write-lock acquisition; on expiry the write proceeds
	/// uncoordinated.
	pub lock_timeout_ms: u32,
	/// Election proposal collection window (coordinator fallback).
	pub collect_ms: f64,
	/// Lease duration announced by an election winner.
	pub lease_ms: f64,
}

impl Default for Timings {
	fn default() -> Self {
		Self {
			debounce_ms: 32,
			retry_delays_ms: [250, 1000, 2000, 5000],
			cooldown_ms: 5000.0,
			settle_ms: 300,
			lock_timeout_ms: 3000,
			collect_ms: 150.0,
			lease_ms: 5000.0,
		}
	}
}

/// Position in the fixed retry schedule: 0 is the immediate evaluation,
/// 1..=4 the delayed re-checks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stage(pub u8);

impl Stage {
	pub const FINAL: Stage = Stage(4);

	/// The designated late stage at which a confirmed removal may clear the
	/// field. Late enough to outlast transient gaps, but not the final stage,
	/// so a terminal status can still be surfaced afterwards if needed.
	#[must_use]
	pub fn is_clear_stage(self) -> bool {
		self.0 == 3
	}

	#[must_use]
	pub fn is_final(self) -> bool {
		self == Self::FINAL
	}
}

/// Tag identifying the originating event of an evaluation cycle, with an
/// elapsed-time suffix for delayed re-checks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reason {
	pub event: String,
	pub delay_ms: Option<u32>,
}

/// Host events that signal an actual content commit, as opposed to generic
/// selection polling.
const COMMIT_EVENTS: [&str; 3] = ["content-patch", "content-update", "content-remove"];

impl Reason {
	#[must_use]
	pub fn new(event: &str) -> Self {
		Self {
			event: event.to_owned(),
			delay_ms: None,
		}
	}

	#[must_use]
	pub fn delayed(event: &str, delay_ms: u32) -> Self {
		Self {
			event: event.to_owned(),
			delay_ms: Some(delay_ms),
		}
	}

	/// Whether this reason marks a genuine content-commit event. Only these
	/// qualify as "first selection" apply triggers.
	#[must_use]
	pub fn is_commit(&self) -> bool {
		COMMIT_EVENTS.contains(&self.event.as_str())
	}
}

impl core::fmt::Display for Reason {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		match self.delay_ms {
			Some(delay) => write!(f, "{}+{}ms", self.event, delay),
			None => f.write_str(&self.event),
		}
	}
}

/// Last-seen / last-applied references for one (resource, field) pair.
/// `None` in `last_applied` on an existing record means "empty was applied"
/// (the field was cleared), which is distinct from the record not existing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackRecord {
	pub last_seen: Option<ResolvedReference>,
	pub last_applied: Option<ResolvedReference>,
}

impl TrackRecord {
	fn has_prior_reference(&self) -> bool {
		self.last_seen.is_some() || self.last_applied.is_some()
	}
}

/// Named reconciliation state for one (resource, field) pair, reconstructed
/// from the tracked record and the current resolution.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplyState {
	NoReference,
	Unchanged,
	Changed,
	Applied,
}

/// What one evaluation cycle should do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
	Skip(SkipCause),
	Apply(ResolvedReference),
	/// Write empty through the coordinator and record empty as applied.
	Clear,
	/// Surface a transient waiting status.
	Wait,
	/// Surface a terminal failure status (final retry, still no reference).
	Fail,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipCause {
	/// Stale read suspected; a scheduled retry will look again.
	NotConverged,
	/// Absence observed while nothing was ever applied, or after a clear.
	QuietAbsence,
	/// The resolved reference was already applied.
	AlreadyApplied,
	Unchanged,
	/// First-ever sighting, but the trigger was not a commit-class event.
	FirstSightingUncommitted,
}

/// Classifies the pair's current state. Pure; used by [`decide`] and
/// independently testable.
#[must_use]
pub fn classify(record: Option<&TrackRecord>, resolution: &Resolution) -> ApplyState {
	match resolution {
		Resolution::Absent | Resolution::NotConverged => ApplyState::NoReference,
		Resolution::Resolved(reference) => match record {
			Some(record) if record.last_applied.as_ref() == Some(reference) => ApplyState::Applied,
			Some(record) if record.last_seen.as_ref() == Some(reference) => ApplyState::Unchanged,
			_ => ApplyState::Changed,
		},
	}
}

/// The pure transition function: (previous record, resolution, reason,
/// stage) → decision.
#[must_use]
pub fn decide(
	record: Option<&TrackRecord>,
	resolution: &Resolution,
	reason: &Reason,
	stage: Stage,
) -> Decision {
	match resolution {
		Resolution::NotConverged => Decision::Skip(SkipCause::NotConverged),
		Resolution::Absent => {
			let prior = record.map_or(false, TrackRecord::has_prior_reference);
			if !prior {
				// Never auto-filled, nothing to clear; stay quiet rather than
				// flapping a "no asset" status every cycle.
				Decision::Skip(SkipCause::QuietAbsence)
			} else if stage.is_clear_stage() {
				Decision::Clear
			} else if stage.is_final() {
				Decision::Fail
			} else {
				Decision::Wait
			}
		}
		Resolution::Resolved(reference) => match classify(record, resolution) {
			ApplyState::Applied => Decision::Skip(SkipCause::AlreadyApplied),
			ApplyState::Unchanged => Decision::Skip(SkipCause::Unchanged),
			ApplyState::Changed | ApplyState::NoReference => {
				if record.is_none() && !reason.is_commit() {
					// A generic poll must not count as the first selection;
					// the record stays absent so a later commit still
					// qualifies.
					Decision::Skip(SkipCause::FirstSightingUncommitted)
				} else {
					Decision::Apply(reference.clone())
				}
			}
		},
	}
}

pub type TrackKey = (String, String);

/// Token identifying one evaluation cycle, for staleness detection across
/// the metadata-fetch suspension point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CycleToken(u64);

/// Process-lifetime engine state for one renderer instance. Survives UI
/// remounts, not an iframe reload; never shared across instances.
#[derive(Debug, Default)]
pub struct DecisionEngine {
	records: HashMap<TrackKey, TrackRecord>,
	seen: HashMap<TrackKey, (u64, Option<ResolvedReference>)>,
	cooldown_until: Option<f64>,
	cycle: u64,
}

impl DecisionEngine {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether automatic evaluation is currently suppressed after an error.
	#[must_use]
	pub fn in_cooldown(&self, now_ms: f64) -> bool {
		self.cooldown_until.map_or(false, |until| now_ms < until)
	}

	pub fn enter_cooldown(&mut self, now_ms: f64, cooldown_ms: f64) {
		debug!(cooldown_ms, "entering evaluation cooldown");
		self.cooldown_until = Some(now_ms + cooldown_ms);
	}

	/// Marks the start of an evaluation cycle for `key`, recording what it
	/// currently sees. Returns the cycle's staleness token.
	pub fn begin_cycle(&mut self, key: &TrackKey, resolution: &Resolution) -> CycleToken {
		self.cycle += 1;
		let reference = match resolution {
			Resolution::Resolved(reference) => Some(reference.clone()),
			Resolution::Absent | Resolution::NotConverged => None,
		};
		self.seen.insert(key.clone(), (self.cycle, reference));
		CycleToken(self.cycle)
	}

	/// Whether a fetch result obtained under `token` is still current: false
	/// when a newer cycle has begun tracking a *different* reference for the
	/// same key.
	#[must_use]
	pub fn is_current(&self, key: &TrackKey, token: CycleToken, reference: &ResolvedReference) -> bool {
		match self.seen.get(key) {
			Some((cycle, seen)) if *cycle > token.0 => seen.as_ref() == Some(reference),
			_ => true,
		}
	}

	#[must_use]
	pub fn record(&self, key: &TrackKey) -> Option<&TrackRecord> {
		self.records.get(key)
	}

	#[must_use]
	pub fn decide(
		&self,
		key: &TrackKey,
		resolution: &Resolution,
		reason: &Reason,
		stage: Stage,
	) -> Decision {
		decide(self.records.get(key), resolution, reason, stage)
	}

	/// Records a reference as both last-seen and last-applied. Called whether
	/// or not the write was skipped by value equality, so an unchanged asset
	/// is not re-fetched every cycle.
	pub fn record_applied(&mut self, key: &TrackKey, reference: &ResolvedReference) {
		self.records.insert(
			key.clone(),
			TrackRecord {
				last_seen: Some(reference.clone()),
				last_applied: Some(reference.clone()),
			},
		);
	}

	/// Records a confirmed removal: empty becomes both last-seen and
	/// last-applied.
	pub fn record_cleared(&mut self, key: &TrackKey) {
		self.records.insert(key.clone(), TrackRecord::default());
	}
}
