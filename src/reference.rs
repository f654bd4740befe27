//! Reconciling the visible neighbor-field value against the persisted source
//! of truth, yielding the authoritative asset reference.
//!
//! Two failure modes are defended against here: the editor-state value may be
//! a transformed delivery URL rather than a stable repository path, and the
//! backing store may not yet reflect a just-made selection. The latter is
//! reported as [`Resolution::NotConverged`], which is not an error; callers
//! defer to their scheduled retries.

use crate::error::FetchError;
use crate::http::ContentClient;
use hashbrown::HashMap;
use tracing::{debug, trace};

/// Repository paths are recognized by this fixed prefix.
pub const REPOSITORY_PATH_PREFIX: &str = "/content/dam/";
/// Opaque asset URNs are recognized by this fixed prefix.
pub const ASSET_URN_PREFIX: &str = "urn:aaid:";

/// Authoritative identity of a selected asset, established only after
/// consulting the persisted value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ResolvedReference {
	/// A stable repository path.
	Path(String),
	/// An opaque asset URN served by the delivery endpoint.
	Urn(String),
}

/// Outcome of one resolution attempt. `Absent` (no asset referenced at all)
/// and `NotConverged` (stale read suspected) must be treated differently by
/// callers: only the former may ever lead to clearing the field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Resolution {
	Resolved(ResolvedReference),
	Absent,
	NotConverged,
}

/// Normalized, query-stripped form of whatever raw value the neighbor field
/// currently holds. A cache/comparison key only, never trusted as the
/// asset's identity.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct AssetSignature(String);

impl AssetSignature {
	#[must_use]
	pub fn from_raw(raw: &str) -> Self {
		let trimmed = raw.trim();
		let without_fragment = trimmed.split('#').next().unwrap_or("");
		let without_query = without_fragment.split('?').next().unwrap_or("");
		Self(without_query.to_owned())
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Whether the raw value looks like a transformed delivery URL rather
	/// than a stable repository path.
	#[must_use]
	pub fn is_delivery_url(&self) -> bool {
		(self.0.starts_with("https://") || self.0.starts_with("http://"))
			&& !self.0.contains(REPOSITORY_PATH_PREFIX)
	}

	/// The URL origin, for delivery-style values. Doubles as the delivery
	/// metadata endpoint origin.
	#[must_use]
	pub fn origin(&self) -> Option<String> {
		let scheme_end = self.0.find("://")?;
		let rest = &self.0[scheme_end + 3..];
		let host_end = rest.find('/').unwrap_or(rest.len());
		if rest[..host_end].is_empty() {
			return None;
		}
		Some(self.0[..scheme_end + 3 + host_end].to_owned())
	}

	#[must_use]
	pub fn file_name(&self) -> Option<&str> {
		file_name(&self.0)
	}
}

/// Last path segment of a query-stripped value, used for convergence
/// comparison. `None` when there is no comparable segment.
#[must_use]
pub fn file_name(value: &str) -> Option<&str> {
	let value = value.split('?').next().unwrap_or("");
	let segment = value.trim_end_matches('/').rsplit('/').next()?;
	if segment.is_empty() || segment.contains("://") {
		None
	} else {
		Some(segment)
	}
}

/// Extracts a reference from an arbitrary value: a repository path when the
/// fixed path prefix occurs (wins when both patterns match), else an embedded
/// asset URN.
#[must_use]
pub fn extract_reference(value: &str) -> Option<ResolvedReference> {
	if let Some(start) = value.find(REPOSITORY_PATH_PREFIX) {
		let path = value[start..]
			.split(['?', '#'])
			.next()
			.and_then(|path| path.split_whitespace().next())
			.unwrap_or("");
		if !path.is_empty() {
			return Some(ResolvedReference::Path(path.to_owned()));
		}
	}
	if let Some(start) = value.find(ASSET_URN_PREFIX) {
		let candidate = &value[start..];
		let end = candidate
			.find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, ':' | '-')))
			.unwrap_or(candidate.len());
		let urn = &candidate[..end];
		if urn.len() > ASSET_URN_PREFIX.len() {
			return Some(ResolvedReference::Urn(urn.to_owned()));
		}
	}
	None
}

type CacheKey = (String, String, String, AssetSignature);

/// Per-instance resolver with a signature-keyed cache of successful
/// resolutions. The signature component bounds each entry's lifetime to the
/// asset it was computed for; nothing is cached for non-converged reads.
#[derive(Debug, Default)]
pub struct ReferenceResolver {
	cache: HashMap<CacheKey, ResolvedReference>,
}

impl ReferenceResolver {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Resolves the authoritative reference for the current neighbor value.
	///
	/// Fetch errors propagate; they are handled by the caller's per-cycle
	/// cooldown, not retried here.
	pub async fn resolve(
		&mut self,
		client: &dyn ContentClient,
		host_base: &str,
		resource_path: &str,
		field: &str,
		raw_value: &str,
	) -> Result<Resolution, FetchError> {
		let signature = AssetSignature::from_raw(raw_value);
		let key = (
			host_base.to_owned(),
			resource_path.to_owned(),
			field.to_owned(),
			signature.clone(),
		);
		if let Some(reference) = self.cache.get(&key) {
			trace!(?reference, "resolution cache hit");
			return Ok(Resolution::Resolved(reference.clone()));
		}

		// The in-memory editor value is explicitly distrusted; the persisted
		// JSON representation of the owning resource is the source of truth.
		let url = format!("{}{}.json", host_base, resource_path);
		let document = client.get_json(&url, true).await?;
		let persisted = document
			.get(field)
			.and_then(serde_json::Value::as_str)
			.map(str::trim)
			.unwrap_or("");

		if signature.is_delivery_url() {
			if let (Some(seen), Some(stored)) = (signature.file_name(), file_name(persisted)) {
				if seen != stored {
					debug!(
						seen,
						stored, "persisted value has not converged on the visible asset"
					);
					return Ok(Resolution::NotConverged);
				}
			}
		}

		let source = if persisted.is_empty() {
			signature.as_str()
		} else {
			persisted
		};
		match extract_reference(source) {
			Some(reference) => {
				self.cache.insert(key, reference.clone());
				Ok(Resolution::Resolved(reference))
			}
			None => Ok(Resolution::Absent),
		}
	}

	/// Drops every cached resolution for the given selection scope, used when
	/// a reference removal has been confirmed.
	pub fn forget(&mut self, host_base: &str, resource_path: &str, field: &str) {
		self.cache.retain(|(host, path, name, _), _| {
			!(host == host_base && path == resource_path && name == field)
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::FetchError;
	use async_trait::async_trait;
	use core::cell::RefCell;
	use pollster::block_on;
	use serde_json::{json, Value};

	struct FakeClient {
		responses: RefCell<std::collections::HashMap<String, Value>>,
		requests: RefCell<Vec<String>>,
	}

	impl FakeClient {
		fn with(url: &str, value: Value) -> Self {
			let mut responses = std::collections::HashMap::new();
			responses.insert(url.to_owned(), value);
			Self {
				responses: RefCell::new(responses),
				requests: RefCell::new(Vec::new()),
			}
		}
	}

	#[async_trait(?Send)]
	impl ContentClient for FakeClient {
		async fn get_json(&self, url: &str, _credentialed: bool) -> Result<Value, FetchError> {
			self.requests.borrow_mut().push(url.to_owned());
			self.responses
				.borrow()
				.get(url)
				.cloned()
				.ok_or_else(|| FetchError::Http {
					url: url.to_owned(),
					status: 404,
				})
		}
	}

	#[test]
	fn signature_strips_query_and_fragment() {
		let signature = AssetSignature::from_raw(" https://x.example/as/a.jpg?w=100#top ");
		assert_eq!(signature.as_str(), "https://x.example/as/a.jpg");
		assert_eq!(signature.file_name(), Some("a.jpg"));
		assert_eq!(signature.origin().as_deref(), Some("https://x.example"));
		assert!(signature.is_delivery_url());
	}

	#[test]
	fn repository_values_are_not_delivery_urls() {
		let signature =
			AssetSignature::from_raw("https://author.example/content/dam/a.jpg");
		assert!(!signature.is_delivery_url());
		assert!(!AssetSignature::from_raw("/content/dam/a.jpg").is_delivery_url());
	}

	#[test]
	fn reference_extraction_prefers_path_over_urn() {
		assert_eq!(
			extract_reference("/content/dam/nature/lake.jpg?x=1"),
			Some(ResolvedReference::Path("/content/dam/nature/lake.jpg".to_owned()))
		);
		assert_eq!(
			extract_reference("/content/dam/urn:aaid:aem:123/file.jpg"),
			Some(ResolvedReference::Path("/content/dam/urn:aaid:aem:123/file.jpg".to_owned()))
		);
		assert_eq!(
			extract_reference("https://d.example/adobe/assets/urn:aaid:aem:123-abc/as/a.jpg"),
			Some(ResolvedReference::Urn("urn:aaid:aem:123-abc".to_owned()))
		);
		assert_eq!(extract_reference("plain text"), None);
		assert_eq!(extract_reference(""), None);
	}

	#[test]
	fn resolves_persisted_path_and_caches_it() {
		block_on(async {
			let client = FakeClient::with(
				"https://author.example/content/site/block.json",
				json!({ "image": "/content/dam/nature/lake.jpg" }),
			);
			let mut resolver = ReferenceResolver::new();
			let raw = "https://delivery.example/adobe/assets/urn:aaid:aem:1/as/lake.jpg";
			for _ in 0..2 {
				let resolution = resolver
					.resolve(
						&client,
						"https://author.example",
						"/content/site/block",
						"image",
						raw,
					)
					.await
					.unwrap();
				assert_eq!(
					resolution,
					Resolution::Resolved(ResolvedReference::Path(
						"/content/dam/nature/lake.jpg".to_owned()
					))
				);
			}
			// Second call answered from cache.
			assert_eq!(client.requests.borrow().len(), 1);
		});
	}

	#[test]
	fn filename_disagreement_is_not_converged_and_not_cached() {
		block_on(async {
			let client = FakeClient::with(
				"https://author.example/content/site/block.json",
				json!({ "image": "/content/dam/nature/old-mountain.jpg" }),
			);
			let mut resolver = ReferenceResolver::new();
			let raw = "https://delivery.example/adobe/assets/urn:aaid:aem:1/as/lake.jpg";
			for _ in 0..2 {
				let resolution = resolver
					.resolve(
						&client,
						"https://author.example",
						"/content/site/block",
						"image",
						raw,
					)
					.await
					.unwrap();
				assert_eq!(resolution, Resolution::NotConverged);
			}
			// No caching for non-converged reads: both cycles re-fetched.
			assert_eq!(client.requests.borrow().len(), 2);
		});
	}

	#[test]
	fn guard_skipped_without_comparable_file_name() {
		block_on(async {
			// Persisted value empty: the guard cannot compare, and the raw
			// delivery URL itself carries the asset URN.
			let client = FakeClient::with(
				"https://author.example/content/site/block.json",
				json!({}),
			);
			let mut resolver = ReferenceResolver::new();
			let resolution = resolver
				.resolve(
					&client,
					"https://author.example",
					"/content/site/block",
					"image",
					"https://delivery.example/adobe/assets/urn:aaid:aem:1/as/lake.jpg",
				)
				.await
				.unwrap();
			assert_eq!(
				resolution,
				Resolution::Resolved(ResolvedReference::Urn("urn:aaid:aem:1".to_owned()))
			);
		});
	}

	#[test]
	fn no_extractable_reference_is_absent() {
		block_on(async {
			let client = FakeClient::with(
				"https://author.example/content/site/block.json",
				json!({ "image": "" }),
			);
			let mut resolver = ReferenceResolver::new();
			let resolution = resolver
				.resolve(
					&client,
					"https://author.example",
					"/content/site/block",
					"image",
					"",
				)
				.await
				.unwrap();
			assert_eq!(resolution, Resolution::Absent);
		});
	}

	#[test]
	fn fetch_errors_propagate() {
		block_on(async {
			let client = FakeClient::with("https://elsewhere.example/x.json", json!({}));
			let mut resolver = ReferenceResolver::new();
			let error = resolver
				.resolve(
					&client,
					"https://author.example",
					"/content/site/block",
					"image",
					"/content/dam/a.jpg",
				)
				.await
				.unwrap_err();
			assert!(matches!(error, FetchError::Http { status: 404, .. }));
		});
	}
}
