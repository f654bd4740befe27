//! Best-effort write serialization across renderer instances.
//!
//! Multiple renderer iframes can sit on sibling fields of the same authored
//! component (say, an alt-text and a mime-type field on one image); letting
//! them write back-to-back can visually glitch the host canvas. Writes are
//! therefore funneled through an exclusive lock keyed by (connection,
//! persisted path, field name): the environment's named lock when available,
//! otherwise peer election over a broadcast channel. Acquisition is bounded:
//! on timeout the write proceeds uncoordinated, because a wrong field value
//! is worse than a rare glitch.

use crate::election::{Election, Outcome, PeerMessage};
use crate::engine::Timings;
use crate::timers::{now_ms, sleep};
use core::convert::TryFrom;
use js_sys::{Array, Function, Promise, Reflect};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{AbortController, BroadcastChannel, LockManager, LockOptions, MessageEvent};

/// Broadcast channel carrying election messages when named locks are
/// unavailable.
pub const LOCK_CHANNEL: &str = "asset-metadata-field:locks";

/// Scope of one write lock.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct LockKey {
	pub connection: String,
	pub path: String,
	pub field: String,
}

impl LockKey {
	/// Lock name shared by all instances coordinating on this scope.
	#[must_use]
	pub fn name(&self) -> String {
		format!(
			"asset-metadata-field\u{1f}{}\u{1f}{}\u{1f}{}",
			self.connection, self.path, self.field
		)
	}
}

/// Poll interval of the election acquisition loop.
const ELECTION_POLL_MS: u32 = 25;

pub struct WriteCoordinator {
	instance: String,
}

/// Held coordination, released after the post-write settle delay.
pub enum WriteGuard {
	Native(NativeLockGuard),
	Peer(PeerLockGuard),
	/// Acquisition timed out or no coordination mechanism exists; the write
	/// went through anyway.
	Uncoordinated,
}

impl WriteCoordinator {
	#[must_use]
	pub fn new() -> Self {
		// (timestamp, random tail) is unique enough for an election token
		// tie-breaker within one browsing session.
		Self {
			instance: format!("{}-{:08x}", now_ms() as u64, (js_sys::Math::random() * f64::from(u32::MAX)) as u32),
		}
	}

	/// Runs `write` under the best coordination available, then holds the
	/// lock through the settle delay so peers space their writes out.
	pub async fn locked_write(&self, key: &LockKey, timings: &Timings, write: impl FnOnce()) {
		let guard = self.acquire(key, timings).await;
		write();
		sleep(timings.settle_ms).await;
		guard.release();
	}

	/// Acquires coordination for `key`, degrading to [`WriteGuard::Uncoordinated`]
	/// after the bounded timeout.
	pub async fn acquire(&self, key: &LockKey, timings: &Timings) -> WriteGuard {
		if let Some(manager) = native_lock_manager() {
			match acquire_native(&manager, &key.name(), timings.lock_timeout_ms).await {
				Some(guard) => return WriteGuard::Native(guard),
				None => {
					warn!(key = %key.name(), "native lock not acquired in time; writing uncoordinated");
					return WriteGuard::Uncoordinated;
				}
			}
		}
		match acquire_by_election(&self.instance, key, timings).await {
			Some(guard) => WriteGuard::Peer(guard),
			None => {
				warn!(key = %key.name(), "election not won in time; writing uncoordinated");
				WriteGuard::Uncoordinated
			}
		}
	}
}

impl Default for WriteCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

impl WriteGuard {
	pub fn release(self) {
		match self {
			WriteGuard::Native(guard) => guard.release(),
			WriteGuard::Peer(guard) => guard.release(),
			WriteGuard::Uncoordinated => {}
		}
	}
}

fn native_lock_manager() -> Option<LockManager> {
	let navigator = web_sys::window()?.navigator();
	if Reflect::has(navigator.as_ref(), &JsValue::from_str("locks")).unwrap_or(false) {
		Some(navigator.locks())
	} else {
		None
	}
}

/// A granted environment lock. The lock stays held until [`release`] resolves
/// the promise our request callback returned.
///
/// [`release`]: NativeLockGuard::release
pub struct NativeLockGuard {
	held_resolve: Function,
}

impl NativeLockGuard {
	fn release(self) {
		let _ = self.held_resolve.call0(&JsValue::UNDEFINED);
	}
}

async fn acquire_native(manager: &LockManager, name: &str, timeout_ms: u32) -> Option<NativeLockGuard> {
	let mut grant_resolve = None;
	let granted = Promise::new(&mut |resolve, _reject| grant_resolve = Some(resolve));
	let grant_resolve = grant_resolve?;

	let mut held_resolve = None;
	let held = Promise::new(&mut |resolve, _reject| held_resolve = Some(resolve));
	let held_resolve = held_resolve?;

	let controller = AbortController::new().ok()?;
	let options = LockOptions::new();
	options.set_signal(&controller.signal());

	let grant = grant_resolve.clone();
	let callback = Closure::once_into_js(move |lock: JsValue| -> Promise {
		let _ = grant.call1(&JsValue::UNDEFINED, &lock);
		held
	});
	let request = manager.request_with_options(name, &options, callback.unchecked_ref());

	let timeout_marker = JsValue::from_str("timeout");
	let marker = timeout_marker.clone();
	let timeout = Promise::new(&mut |resolve, _reject| {
		if let Some(window) = web_sys::window() {
			let resolve = resolve.clone();
			let marker = marker.clone();
			let fire = Closure::once_into_js(move || {
				let _ = resolve.call1(&JsValue::UNDEFINED, &marker);
			});
			let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
				fire.unchecked_ref(),
				i32::try_from(timeout_ms).unwrap_or(i32::MAX),
			);
		}
	});

	let winner = wasm_bindgen_futures::JsFuture::from(Promise::race(&Array::of2(&granted, &timeout)))
		.await
		.ok()?;
	if winner == timeout_marker {
		// Swallow the abort rejection of the request promise, then cancel
		// the pending request. Releasing `held` too covers the race where
		// the grant landed while we were timing out.
		let swallow = Closure::once(|_error: JsValue| {});
		let _ = request.catch(&swallow);
		swallow.forget();
		controller.abort();
		let _ = held_resolve.call0(&JsValue::UNDEFINED);
		return None;
	}
	trace!(name, "environment lock granted");
	Some(NativeLockGuard { held_resolve })
}

/// A won election lease. Holds the channel open so late proposers keep
/// getting lease re-announcements.
pub struct PeerLockGuard {
	channel: BroadcastChannel,
	election: Rc<RefCell<Election>>,
	_on_message: Closure<dyn FnMut(MessageEvent)>,
}

impl PeerLockGuard {
	fn release(self) {
		if let Some(message) = self.election.borrow_mut().release() {
			post(&self.channel, &message);
		}
		self.channel.set_onmessage(None);
		self.channel.close();
	}
}

fn post(channel: &BroadcastChannel, message: &PeerMessage) {
	match serde_json::to_string(message) {
		Ok(text) => {
			if let Err(error) = channel.post_message(&JsValue::from_str(&text)) {
				warn!(?error, "lock broadcast failed");
			}
		}
		Err(error) => warn!(%error, "lock message serialization failed"),
	}
}

async fn acquire_by_election(
	instance: &str,
	key: &LockKey,
	timings: &Timings,
) -> Option<PeerLockGuard> {
	let channel = BroadcastChannel::new(LOCK_CHANNEL).ok()?;
	let election = Rc::new(RefCell::new(Election::new(&key.name(), instance)));

	let peer = Rc::clone(&election);
	let responder = channel.clone();
	let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
		let text = match event.data().as_string() {
			Some(text) => text,
			None => return,
		};
		let message: PeerMessage = match serde_json::from_str(&text) {
			Ok(message) => message,
			Err(error) => return warn!(%error, "unparseable lock message ignored"),
		};
		if let Some(response) = peer.borrow_mut().on_message(&message, now_ms()) {
			post(&responder, &response);
		}
	}) as Box<dyn FnMut(MessageEvent)>);
	channel.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

	let deadline = now_ms() + f64::from(timings.lock_timeout_ms);
	loop {
		let now = now_ms();
		if now >= deadline {
			channel.set_onmessage(None);
			channel.close();
			return None;
		}
		let proposal = election.borrow_mut().propose(now, timings.collect_ms);
		if let Some(message) = proposal {
			post(&channel, &message);
		}
		let outcome = election.borrow_mut().tick(now, timings.lease_ms);
		match outcome {
			Some(Outcome::Won(lease)) => {
				debug!(key = %key.name(), "election won");
				post(&channel, &lease);
				return Some(PeerLockGuard {
					channel,
					election,
					_on_message: on_message,
				});
			}
			Some(Outcome::Lost) | None => {}
		}
		sleep(ELECTION_POLL_MS).await;
	}
}
