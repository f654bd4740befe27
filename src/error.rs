//! Error taxonomy for network-facing operations.
//!
//! Resolution helpers stay total ([`Option`]-shaped) and never surface here;
//! convergence failures are a [`crate::reference::Resolution`] variant rather
//! than an error. What remains is the backend/transport class that one
//! evaluation cycle catches as a whole.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
	/// The backend answered with a non-success status.
	#[error("request to {url} failed with status {status}")]
	Http { url: String, status: u16 },
	/// Transport-level failure (network down, CORS rejection, …).
	#[error("transport failure for {url}: {message}")]
	Transport { url: String, message: String },
	/// The response body was not the JSON document we expected.
	#[error("unparseable response from {url}: {message}")]
	Payload { url: String, message: String },
	/// A URN-style reference with no delivery origin to fetch it from.
	#[error("no delivery origin available for {urn}")]
	NoDeliveryOrigin { urn: String },
}
