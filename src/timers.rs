//! Browser timer glue: RAII timeouts and a promise-backed sleep.

use core::convert::TryFrom;
use js_sys::Promise;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_ms() -> f64 {
	js_sys::Date::now()
}

/// A scheduled one-shot callback, cleared when the handle is dropped.
/// Clearing an already-fired timeout is harmless.
pub struct Timeout {
	id: i32,
	_callback: Closure<dyn FnMut()>,
}

impl Timeout {
	/// Schedules `callback` after `delay_ms`. `None` when no window is
	/// available in this context.
	pub fn schedule(delay_ms: u32, callback: impl FnOnce() + 'static) -> Option<Self> {
		let mut callback = Some(callback);
		let closure = Closure::wrap(Box::new(move || {
			if let Some(callback) = callback.take() {
				callback();
			}
		}) as Box<dyn FnMut()>);
		let id = web_sys::window()?
			.set_timeout_with_callback_and_timeout_and_arguments_0(
				closure.as_ref().unchecked_ref(),
				i32::try_from(delay_ms).unwrap_or(i32::MAX),
			)
			.ok()?;
		Some(Self {
			id,
			_callback: closure,
		})
	}
}

impl Drop for Timeout {
	fn drop(&mut self) {
		if let Some(window) = web_sys::window() {
			window.clear_timeout_with_handle(self.id);
		}
	}
}

/// Suspends the current task for `delay_ms`.
pub async fn sleep(delay_ms: u32) {
	let promise = Promise::new(&mut |resolve, _reject| {
		match web_sys::window() {
			Some(window) => {
				let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
					&resolve,
					i32::try_from(delay_ms).unwrap_or(i32::MAX),
				);
			}
			// Resolve immediately rather than hang a detached task.
			None => {
				let _ = resolve.call0(&wasm_bindgen::JsValue::UNDEFINED);
			}
		}
	});
	let _ = JsFuture::from(promise).await;
}
