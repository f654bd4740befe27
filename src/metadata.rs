//! Metadata retrieval and key extraction.
//!
//! Two mutually exclusive fetch strategies exist per call: repository-native
//! (credentialed, under the asset path) and delivery-API (uncredentialed;
//! the delivery endpoint serves a wildcard CORS policy, and the browser
//! rejects credentialed reads against those; this is an external constraint,
//! not a choice).

use crate::error::FetchError;
use crate::http::ContentClient;
use crate::reference::ResolvedReference;
use serde_json::Value;
use tracing::{instrument, trace};

/// Fixed metadata sub-resource under a repository asset path.
pub const REPOSITORY_METADATA_SUFFIX: &str = "/jcr:content/metadata.json";
/// Fixed delivery metadata route, keyed by asset URN.
pub const DELIVERY_METADATA_PATH: &str = "/adobe/assets";
/// Fixed suffix of the delivery metadata route.
pub const DELIVERY_METADATA_SUFFIX: &str = "/metadata";

/// Conventionally-named nested groups searched after the document root.
const NESTED_GROUPS: [&str; 2] = ["assetMetadata", "repositoryMetadata"];

/// Fetches the metadata document for `reference` and extracts `key`.
///
/// An unresolved key is an empty value, not an error; non-success HTTP and
/// transport failures propagate to the caller's per-cycle error handling.
#[instrument(skip(client))]
pub async fn fetch_metadata_value(
	client: &dyn ContentClient,
	reference: &ResolvedReference,
	host_base: &str,
	delivery_origin: Option<&str>,
	key: &str,
) -> Result<String, FetchError> {
	let (url, credentialed) = match reference {
		ResolvedReference::Path(path) => (
			format!("{}{}{}", host_base, path, REPOSITORY_METADATA_SUFFIX),
			true,
		),
		ResolvedReference::Urn(urn) => {
			let origin = delivery_origin.ok_or_else(|| FetchError::NoDeliveryOrigin {
				urn: urn.clone(),
			})?;
			(
				format!(
					"{}{}/{}{}",
					origin, DELIVERY_METADATA_PATH, urn, DELIVERY_METADATA_SUFFIX
				),
				false,
			)
		}
	};
	let document = client.get_json(&url, credentialed).await?;
	let value = stringify(extract_key(&document, key));
	trace!(key, %value, "extracted metadata value");
	Ok(value)
}

/// Looks `key` up in the document root, then in each nested candidate group
/// the document exposes. Within one candidate mapping: exact match, then
/// case-insensitive, then colon-to-underscore normalized. The first mapping
/// that yields any match wins.
#[must_use]
pub fn extract_key<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
	let candidates = core::iter::once(document).chain(
		NESTED_GROUPS
			.iter()
			.filter_map(|group| document.get(group)),
	);
	for candidate in candidates {
		let mapping = match candidate.as_object() {
			Some(mapping) => mapping,
			None => continue,
		};
		if let Some(value) = mapping.get(key) {
			return Some(value);
		}
		if let Some(value) = mapping
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(key))
			.map(|(_, value)| value)
		{
			return Some(value);
		}
		let normalized = key.replace(':', "_");
		if let Some(value) = mapping
			.iter()
			.find(|(name, _)| name.replace(':', "_").eq_ignore_ascii_case(&normalized))
			.map(|(_, value)| value)
		{
			return Some(value);
		}
	}
	None
}

/// Stringifies an extracted value: strings are trimmed as-is, lists are
/// joined with `", "` after dropping falsy entries, absent values stringify
/// to empty, everything else uses the generic JSON rendering.
#[must_use]
pub fn stringify(value: Option<&Value>) -> String {
	match value {
		None | Some(Value::Null) => String::new(),
		Some(Value::String(text)) => text.trim().to_owned(),
		Some(Value::Array(entries)) => entries
			.iter()
			.filter(|entry| !is_falsy(entry))
			.map(|entry| match entry {
				Value::String(text) => text.trim().to_owned(),
				other => other.to_string(),
			})
			.collect::<Vec<_>>()
			.join(", "),
		Some(other) => other.to_string(),
	}
}

fn is_falsy(value: &Value) -> bool {
	match value {
		Value::Null | Value::Bool(false) => true,
		Value::String(text) => text.trim().is_empty(),
		Value::Number(number) => number.as_f64() == Some(0.0),
		_ => false,
	}
}
