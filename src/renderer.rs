//! Renderer orchestration: one evaluation cycle end to end, plus the browser
//! glue that schedules cycles from host events.
//!
//! [`Renderer`] is generic over the host field, the HTTP client and the write
//! serializer, so full cycles run natively in tests against fixtures. The
//! wasm-side [`RendererHandle`] wires it to the event bridge, the debounce
//! timer and the staged retry schedule.

use crate::coordinator::LockKey;
use crate::engine::{Decision, DecisionEngine, Reason, Stage, Timings, TrackKey};
use crate::error::FetchError;
use crate::http::ContentClient;
use crate::metadata::fetch_metadata_value;
use crate::model::{EditorSnapshot, FieldModel, Status};
use crate::neighbor::{element_value, find_neighbor, normalize_field_name};
use crate::reader::{element_resource, host_base_url, parse_resource_urn, selected_element};
use crate::reference::{AssetSignature, ReferenceResolver};
use async_trait::async_trait;
use tracing::{debug, error, instrument, trace};

/// The renderer's view of its host field. `set_value` is the one external
/// side effect the renderer has.
pub trait HostField {
	fn model(&self) -> FieldModel;
	fn value(&self) -> String;
	fn set_value(&self, value: &str);
	fn set_status(&self, status: Status);
}

impl<H: HostField + ?Sized> HostField for Box<H> {
	fn model(&self) -> FieldModel {
		(**self).model()
	}

	fn value(&self) -> String {
		(**self).value()
	}

	fn set_value(&self, value: &str) {
		(**self).set_value(value);
	}

	fn set_status(&self, status: Status) {
		(**self).set_status(status);
	}
}

/// Seam in front of the write coordinator, so cycle logic is testable
/// without a browser lock or broadcast channel.
#[async_trait(?Send)]
pub trait WriteSerializer {
	async fn serialized(&self, key: &LockKey, timings: &Timings, write: &mut dyn FnMut());
}

#[async_trait(?Send)]
impl WriteSerializer for crate::coordinator::WriteCoordinator {
	async fn serialized(&self, key: &LockKey, timings: &Timings, write: &mut dyn FnMut()) {
		self.locked_write(key, timings, || write()).await;
	}
}

/// One renderer instance: process-lifetime engine state, resolution cache and
/// the evaluation pipeline. Never shared across instances; only the *write*
/// action is coordinated externally.
pub struct Renderer<H, C, W> {
	host: H,
	client: C,
	writer: W,
	timings: Timings,
	engine: DecisionEngine,
	resolver: ReferenceResolver,
}

impl<H: HostField, C: ContentClient, W: WriteSerializer> Renderer<H, C, W> {
	pub fn new(host: H, client: C, writer: W, timings: Timings) -> Self {
		Self {
			host,
			client,
			writer,
			timings,
			engine: DecisionEngine::new(),
			resolver: ReferenceResolver::new(),
		}
	}

	#[must_use]
	pub fn timings(&self) -> &Timings {
		&self.timings
	}

	#[must_use]
	pub fn host(&self) -> &H {
		&self.host
	}

	/// Runs one evaluation cycle, catching backend errors: those surface an
	/// error status and open the cooldown window. Convergence failures and
	/// resolution misses are quiet skips, not errors.
	pub async fn run_cycle(
		&mut self,
		snapshot: &EditorSnapshot,
		reason: &Reason,
		stage: Stage,
		now_ms: f64,
	) {
		if let Err(fetch_error) = self.evaluate(snapshot, reason, stage, now_ms).await {
			error!(%fetch_error, %reason, "evaluation cycle failed");
			self.host.set_status(Status::Error);
			self.engine.enter_cooldown(now_ms, self.timings.cooldown_ms);
		}
	}

	#[instrument(skip(self, snapshot, reason), fields(reason = %reason))]
	async fn evaluate(
		&mut self,
		snapshot: &EditorSnapshot,
		reason: &Reason,
		stage: Stage,
		now_ms: f64,
	) -> Result<(), FetchError> {
		if self.engine.in_cooldown(now_ms) {
			trace!("cooldown active; skipping evaluation");
			return Ok(());
		}
		let model = self.host.model();
		if model.read_only {
			return Ok(());
		}
		let field = normalize_field_name(&model.asset_field).to_owned();

		let selected = match selected_element(snapshot) {
			Some(selected) => selected,
			None => return Ok(trace!("no selection")),
		};
		let resource = match element_resource(selected, snapshot)
			.as_deref()
			.and_then(parse_resource_urn)
		{
			Some(resource) => resource,
			None => return Ok(trace!("selection has no parseable resource")),
		};
		let host_base = match host_base_url(snapshot, &resource.connection) {
			Some(host_base) => host_base,
			None => {
				return Ok(debug!(
					connection = %resource.connection,
					"no host base URL; network calls cannot proceed this cycle"
				))
			}
		};
		let raw_value = find_neighbor(snapshot, selected, &field)
			.map(element_value)
			.unwrap_or("")
			.to_owned();

		let key: TrackKey = (resource.path.clone(), field.clone());
		let resolution = self
			.resolver
			.resolve(&self.client, &host_base, &resource.path, &field, &raw_value)
			.await?;
		let token = self.engine.begin_cycle(&key, &resolution);

		match self.engine.decide(&key, &resolution, reason, stage) {
			Decision::Skip(cause) => trace!(?cause, "skipping"),
			Decision::Wait => self.host.set_status(Status::Waiting),
			Decision::Fail => self.host.set_status(Status::Failed),
			Decision::Clear => {
				let lock = LockKey {
					connection: resource.connection.clone(),
					path: resource.path.clone(),
					field: field.clone(),
				};
				if !self.host.value().is_empty() {
					let host = &self.host;
					self.writer
						.serialized(&lock, &self.timings, &mut || host.set_value(""))
						.await;
				}
				self.engine.record_cleared(&key);
				self.resolver.forget(&host_base, &resource.path, &field);
				self.host.set_status(Status::Idle);
			}
			Decision::Apply(reference) => {
				self.host.set_status(Status::Loading);
				let signature = AssetSignature::from_raw(&raw_value);
				let delivery_origin = if signature.is_delivery_url() {
					signature.origin()
				} else {
					None
				};
				let value = fetch_metadata_value(
					&self.client,
					&reference,
					&host_base,
					delivery_origin.as_deref(),
					&model.metadata_key,
				)
				.await?;
				if !self.engine.is_current(&key, token, &reference) {
					return Ok(debug!(
						?reference,
						"newer cycle tracks a different reference; dropping in-flight result"
					));
				}
				if self.host.value() != value {
					let lock = LockKey {
						connection: resource.connection.clone(),
						path: resource.path.clone(),
						field: field.clone(),
					};
					let host = &self.host;
					self.writer
						.serialized(&lock, &self.timings, &mut || host.set_value(&value))
						.await;
				} else {
					trace!("value unchanged; write skipped");
				}
				// Recorded even when the write was skipped by value equality,
				// so an unchanged asset is not re-fetched every cycle.
				self.engine.record_applied(&key, &reference);
				self.host.set_status(Status::Done);
			}
		}
		Ok(())
	}
}

#[cfg(target_arch = "wasm32")]
mod glue {
	use super::{HostField, Renderer};
	use crate::bridge::{EventBridge, EventRecord};
	use crate::coordinator::WriteCoordinator;
	use crate::engine::{Reason, Stage, Timings};
	use crate::http::FetchClient;
	use crate::model::EditorSnapshot;
	use crate::timers::{now_ms, Timeout};
	use std::cell::RefCell;
	use std::rc::Rc;
	use tracing::trace;
	use wasm_bindgen_futures::spawn_local;

	type BoxedRenderer = Renderer<Box<dyn HostField>, FetchClient, WriteCoordinator>;
	type SnapshotFn = dyn Fn() -> Option<EditorSnapshot>;

	/// Re-check delay when a cycle fires while another is still awaiting
	/// network I/O.
	const BUSY_RETRY_MS: u32 = 20;

	struct Shared {
		renderer: RefCell<BoxedRenderer>,
		snapshots: Box<SnapshotFn>,
		schedule: RefCell<ScheduleState>,
	}

	#[derive(Default)]
	struct ScheduleState {
		debounce: Option<Timeout>,
		stages: Vec<Timeout>,
	}

	/// Browser-side lifetime handle: subscribes to the event bridge and keeps
	/// the debounce/stage timers alive. Dropping it stops all scheduling.
	pub struct RendererHandle {
		_subscription: EventBridge,
		_shared: Rc<Shared>,
	}

	impl RendererHandle {
		/// Mounts a renderer on the host field. `snapshots` is called at the
		/// start of every evaluation cycle.
		pub fn mount(
			host: impl HostField + 'static,
			snapshots: impl Fn() -> Option<EditorSnapshot> + 'static,
			timings: Timings,
		) -> Result<Self, wasm_bindgen::JsValue> {
			let shared = Rc::new(Shared {
				renderer: RefCell::new(Renderer::new(
					Box::new(host) as Box<dyn HostField>,
					FetchClient,
					WriteCoordinator::new(),
					timings,
				)),
				snapshots: Box::new(snapshots),
				schedule: RefCell::new(ScheduleState::default()),
			});

			let on_event = {
				let shared = Rc::clone(&shared);
				move |record: EventRecord| debounced(&shared, &record.event)
			};
			Ok(Self {
				_subscription: EventBridge::subscriber(on_event)?,
				_shared: shared,
			})
		}
	}

	/// Coalesces event bursts, then kicks off the staged evaluation schedule.
	fn debounced(shared: &Rc<Shared>, event: &str) {
		let debounce_ms = shared.renderer.borrow().timings().debounce_ms;
		let fire = {
			let shared = Rc::clone(shared);
			let event = event.to_owned();
			move || run_stages(&shared, &event)
		};
		shared.schedule.borrow_mut().debounce = Timeout::schedule(debounce_ms, fire);
	}

	fn run_stages(shared: &Rc<Shared>, event: &str) {
		let delays = shared.renderer.borrow().timings().retry_delays_ms;
		let reason = Reason::new(event);
		let is_commit = reason.is_commit();
		run_cycle(shared, reason, Stage(0));
		if !is_commit {
			return;
		}
		let mut stages = Vec::with_capacity(delays.len());
		for (index, delay) in delays.iter().copied().enumerate() {
			let fire = {
				let shared = Rc::clone(shared);
				let event = event.to_owned();
				#[allow(clippy::cast_possible_truncation)]
				let stage = Stage(index as u8 + 1);
				move || run_cycle(&shared, Reason::delayed(&event, delay), stage)
			};
			stages.extend(Timeout::schedule(delay, fire));
		}
		shared.schedule.borrow_mut().stages = stages;
	}

	fn run_cycle(shared: &Rc<Shared>, reason: Reason, stage: Stage) {
		let task_shared = Rc::clone(shared);
		spawn_local(async move {
			match task_shared.renderer.try_borrow_mut() {
				Ok(mut renderer) => {
					let snapshot = match (task_shared.snapshots)() {
						Some(snapshot) => snapshot,
						None => return trace!("no editor snapshot available"),
					};
					renderer.run_cycle(&snapshot, &reason, stage, now_ms()).await;
				}
				// A previous cycle is still awaiting I/O; try again shortly.
				Err(_busy) => {
					let again = Rc::clone(&task_shared);
					let retry = Timeout::schedule(BUSY_RETRY_MS, move || {
						run_cycle(&again, reason, stage);
					});
					task_shared.schedule.borrow_mut().stages.extend(retry);
				}
			}
		});
	}
}

#[cfg(target_arch = "wasm32")]
pub use glue::RendererHandle;
