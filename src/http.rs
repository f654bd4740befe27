//! HTTP seam between the resolution pipeline and the browser.
//!
//! The pipeline only ever sees [`ContentClient`]; the `web_sys` fetch glue
//! lives in [`FetchClient`] and converts every JS-side failure into the typed
//! error at this boundary.

use crate::error::FetchError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestCredentials, RequestInit, Response};

/// A GET-only JSON client. `credentialed` selects whether browser credentials
/// accompany the request; delivery endpoints with wildcard CORS must be
/// called uncredentialed or the browser rejects the response.
#[async_trait(?Send)]
pub trait ContentClient {
	async fn get_json(&self, url: &str, credentialed: bool) -> Result<Value, FetchError>;
}

/// [`ContentClient`] over the browser's `fetch`.
#[derive(Debug, Default)]
pub struct FetchClient;

#[async_trait(?Send)]
impl ContentClient for FetchClient {
	async fn get_json(&self, url: &str, credentialed: bool) -> Result<Value, FetchError> {
		trace!(url, credentialed, "fetching JSON");
		let init = RequestInit::new();
		init.set_method("GET");
		init.set_credentials(if credentialed {
			RequestCredentials::Include
		} else {
			RequestCredentials::Omit
		});
		let request = Request::new_with_str_and_init(url, &init)
			.map_err(|error| transport(url, &error))?;
		let window = web_sys::window().ok_or_else(|| FetchError::Transport {
			url: url.to_owned(),
			message: "no window in this context".to_owned(),
		})?;
		let response = JsFuture::from(window.fetch_with_request(&request))
			.await
			.map_err(|error| transport(url, &error))?;
		let response: Response = response
			.dyn_into()
			.map_err(|error| transport(url, &error))?;
		if !response.ok() {
			return Err(FetchError::Http {
				url: url.to_owned(),
				status: response.status(),
			});
		}
		let text = JsFuture::from(response.text().map_err(|error| transport(url, &error))?)
			.await
			.map_err(|error| transport(url, &error))?;
		serde_json::from_str(&text.as_string().unwrap_or_default()).map_err(|error| {
			FetchError::Payload {
				url: url.to_owned(),
				message: error.to_string(),
			}
		})
	}
}

fn transport(url: &str, error: &JsValue) -> FetchError {
	FetchError::Transport {
		url: url.to_owned(),
		message: error
			.as_string()
			.unwrap_or_else(|| format!("{:?}", error)),
	}
}
