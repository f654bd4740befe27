//! Relays host-originated events into the renderer context.
//!
//! The registration context and the renderer normally live in different
//! iframe contexts, so the renderer cannot poll the host's event channel
//! directly. The bridge broadcasts a single most-recent-event record; the
//! subscriber reacts only when the record's timestamp differs from the last
//! one it processed, which makes duplicate delivery harmless. Fire-and-forget
//! by design: a lost event is compensated by the decision engine's own retry
//! schedule, not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{trace, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{BroadcastChannel, MessageEvent};

/// Broadcast channel name shared by all bridge endpoints of one field scope.
pub const EVENT_CHANNEL: &str = "asset-metadata-field:events";

/// The single most-recent-event record.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EventRecord {
	pub event: String,
	#[serde(default)]
	pub payload: Value,
	pub timestamp: f64,
}

/// Duplicate-delivery guard: a record is processed only when its timestamp
/// differs from the last processed one.
#[must_use]
pub fn should_process(last_processed: Option<f64>, record: &EventRecord) -> bool {
	last_processed != Some(record.timestamp)
}

/// One endpoint on the event channel. Publishers and subscribers are both
/// `EventBridge`s; a publisher simply never installs a handler.
pub struct EventBridge {
	channel: BroadcastChannel,
	_on_message: Option<Closure<dyn FnMut(MessageEvent)>>,
}

impl EventBridge {
	/// Opens a publishing endpoint.
	pub fn publisher() -> Result<Self, JsValue> {
		Ok(Self {
			channel: BroadcastChannel::new(EVENT_CHANNEL)?,
			_on_message: None,
		})
	}

	/// Opens a subscribing endpoint. `on_record` fires once per distinct
	/// record timestamp.
	pub fn subscriber(
		mut on_record: impl FnMut(EventRecord) + 'static,
	) -> Result<Self, JsValue> {
		let channel = BroadcastChannel::new(EVENT_CHANNEL)?;
		let last_processed = Rc::new(Cell::new(None));
		let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
			let text = match event.data().as_string() {
				Some(text) => text,
				None => return warn!("non-string event record ignored"),
			};
			let record: EventRecord = match serde_json::from_str(&text) {
				Ok(record) => record,
				Err(error) => return warn!(%error, "unparseable event record ignored"),
			};
			if should_process(last_processed.get(), &record) {
				last_processed.set(Some(record.timestamp));
				trace!(event = %record.event, "relaying host event");
				on_record(record);
			}
		}) as Box<dyn FnMut(MessageEvent)>);
		channel.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
		Ok(Self {
			channel,
			_on_message: Some(on_message),
		})
	}

	/// Broadcasts an event record. Fire-and-forget; serialization problems
	/// are logged, never raised.
	pub fn publish(&self, event: &str, payload: Value, timestamp: f64) {
		let record = EventRecord {
			event: event.to_owned(),
			payload,
			timestamp,
		};
		match serde_json::to_string(&record) {
			Ok(text) => {
				if let Err(error) = self.channel.post_message(&JsValue::from_str(&text)) {
					warn!(?error, "event broadcast failed");
				}
			}
			Err(error) => warn!(%error, "event record serialization failed"),
		}
	}
}

impl Drop for EventBridge {
	fn drop(&mut self) {
		self.channel.set_onmessage(None);
		self.channel.close();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn record(timestamp: f64) -> EventRecord {
		EventRecord {
			event: "content-update".to_owned(),
			payload: json!({}),
			timestamp,
		}
	}

	#[test]
	fn first_record_is_processed() {
		assert!(should_process(None, &record(1.0)));
	}

	#[test]
	fn duplicate_timestamp_is_dropped() {
		assert!(!should_process(Some(1.0), &record(1.0)));
	}

	#[test]
	fn new_timestamp_is_processed_even_if_older() {
		// Only difference matters; ordering is the host's concern.
		assert!(should_process(Some(2.0), &record(1.0)));
	}

	#[test]
	fn records_round_trip_through_json() {
		let record = EventRecord {
			event: "content-patch".to_owned(),
			payload: json!({ "resource": "urn:conn:/content/x" }),
			timestamp: 1234.5,
		};
		let text = serde_json::to_string(&record).unwrap();
		assert_eq!(serde_json::from_str::<EventRecord>(&text).unwrap(), record);
	}
}
