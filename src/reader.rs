//! Resolution of the selected element and its backing resource from a host
//! editor-state snapshot.
//!
//! Every function in this module is total: malformed input resolves to
//! `None`/empty, never to an error. Ambiguity is resolved by "first match
//! wins", not validated for uniqueness.

use crate::model::{EditableElement, EditorSnapshot, ResourceReference};
use tracing::trace;

/// Returns the selected element, taking the first selected identifier in
/// snapshot iteration order. `None` during selection transitions.
#[must_use]
pub fn selected_element(snapshot: &EditorSnapshot) -> Option<&EditableElement> {
	snapshot
		.selected
		.iter()
		.find_map(|id| snapshot.element(id))
}

/// Resolves the resource URN owning `element`: its own resource, else its
/// parent's, else a `urn:` token scanned out of the raw selector string.
#[must_use]
pub fn element_resource(element: &EditableElement, snapshot: &EditorSnapshot) -> Option<String> {
	if let Some(resource) = non_empty(element.resource.as_deref()) {
		return Some(resource.to_owned());
	}
	if let Some(parent) = element
		.parent_id
		.as_deref()
		.and_then(|parent_id| snapshot.element(parent_id))
	{
		if let Some(resource) = non_empty(parent.resource.as_deref()) {
			return Some(resource.to_owned());
		}
	}
	element
		.selector
		.as_deref()
		.and_then(scan_urn)
		.map(str::to_owned)
}

/// Parses `urn:<connection>:<path>` into its parts.
///
/// Requires the `urn` scheme plus at least two further colon-delimited
/// segments; anything else resolves to `None`.
#[must_use]
pub fn parse_resource_urn(urn: &str) -> Option<ResourceReference> {
	let rest = urn.strip_prefix("urn:")?;
	let (connection, path) = rest.split_once(':')?;
	if connection.is_empty() || path.is_empty() {
		return None;
	}
	Some(ResourceReference {
		connection: connection.to_owned(),
		path: path.to_owned(),
	})
}

/// Resolves the HTTP base URL for `connection`.
///
/// Searches `connections`, then `custom_tokens`; the first *usable* value
/// wins, so an unusable `connections` entry falls through to the token
/// mapping. Accepts `<scheme>:https://…` (suffix after the first colon) or a
/// bare `https://…` value; trailing slashes are trimmed. `None` means
/// network calls cannot proceed this cycle.
#[must_use]
pub fn host_base_url(snapshot: &EditorSnapshot, connection: &str) -> Option<String> {
	[&snapshot.connections, &snapshot.custom_tokens]
		.iter()
		.filter_map(|mapping| mapping.get(connection))
		.find_map(|value| parse_base_url(value))
}

fn parse_base_url(value: &str) -> Option<String> {
	let url = if value.starts_with("https://") || value.starts_with("http://") {
		value
	} else {
		let (_, suffix) = value.split_once(':')?;
		if suffix.starts_with("https://") || suffix.starts_with("http://") {
			suffix
		} else {
			trace!(value, "connection value carries no usable URL");
			return None;
		}
	};
	Some(url.trim_end_matches('/').to_owned())
}

/// Scans a raw selector string for an embedded `urn:` token, terminated by
/// whitespace, a quote or a closing bracket.
fn scan_urn(selector: &str) -> Option<&str> {
	let start = selector.find("urn:")?;
	let candidate = &selector[start..];
	let end = candidate
		.find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ')' | ']' | '}'))
		.unwrap_or(candidate.len());
	non_empty(Some(&candidate[..end]))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn snapshot_with(elements: Vec<EditableElement>, selected: Vec<&str>) -> EditorSnapshot {
		EditorSnapshot {
			selected: selected.into_iter().map(str::to_owned).collect(),
			elements,
			..EditorSnapshot::default()
		}
	}

	fn element(id: &str) -> EditableElement {
		EditableElement {
			id: id.to_owned(),
			..EditableElement::default()
		}
	}

	#[test]
	fn first_selected_element_wins() {
		let snapshot = snapshot_with(vec![element("a"), element("b")], vec!["b", "a"]);
		assert_eq!(selected_element(&snapshot).unwrap().id, "b");
	}

	#[test]
	fn empty_selection_resolves_to_none() {
		let snapshot = snapshot_with(vec![element("a")], vec![]);
		assert!(selected_element(&snapshot).is_none());
	}

	#[test]
	fn selection_of_unknown_id_falls_through() {
		let snapshot = snapshot_with(vec![element("a")], vec!["ghost", "a"]);
		assert_eq!(selected_element(&snapshot).unwrap().id, "a");
	}

	#[test]
	fn own_resource_preferred_over_parent() {
		let mut parent = element("p");
		parent.resource = Some("urn:conn:/content/parent".to_owned());
		let mut child = element("c");
		child.parent_id = Some("p".to_owned());
		child.resource = Some("urn:conn:/content/child".to_owned());
		let snapshot = snapshot_with(vec![parent, child], vec![]);
		assert_eq!(
			element_resource(snapshot.element("c").unwrap(), &snapshot).unwrap(),
			"urn:conn:/content/child"
		);
	}

	#[test]
	fn parent_resource_inherited() {
		let mut parent = element("p");
		parent.resource = Some("urn:conn:/content/parent".to_owned());
		let mut child = element("c");
		child.parent_id = Some("p".to_owned());
		let snapshot = snapshot_with(vec![parent, child], vec![]);
		assert_eq!(
			element_resource(snapshot.element("c").unwrap(), &snapshot).unwrap(),
			"urn:conn:/content/parent"
		);
	}

	#[test]
	fn selector_urn_is_last_resort() {
		let mut orphan = element("o");
		orphan.selector = Some("[data-resource=\"urn:conn:/content/x\"]".to_owned());
		let snapshot = snapshot_with(vec![orphan], vec![]);
		assert_eq!(
			element_resource(snapshot.element("o").unwrap(), &snapshot).unwrap(),
			"urn:conn:/content/x"
		);
	}

	#[test]
	fn resourceless_element_resolves_to_none() {
		let snapshot = snapshot_with(vec![element("bare")], vec![]);
		assert!(element_resource(snapshot.element("bare").unwrap(), &snapshot).is_none());
	}

	#[test]
	fn urn_parsing_requires_two_segments() {
		assert_eq!(
			parse_resource_urn("urn:conn:/content/site/page"),
			Some(ResourceReference {
				connection: "conn".to_owned(),
				path: "/content/site/page".to_owned(),
			})
		);
		assert!(parse_resource_urn("urn:justconnection").is_none());
		assert!(parse_resource_urn("urn::path-without-connection").is_none());
		assert!(parse_resource_urn("not-a-urn").is_none());
		assert!(parse_resource_urn("").is_none());
	}

	#[test]
	fn urn_path_may_contain_further_colons() {
		let parsed = parse_resource_urn("urn:conn:/content/x/jcr:content/y").unwrap();
		assert_eq!(parsed.path, "/content/x/jcr:content/y");
	}

	#[test]
	fn base_url_from_prefixed_connection_value() {
		let mut snapshot = EditorSnapshot::default();
		snapshot
			.connections
			.insert("conn".to_owned(), "aem:https://author.example/".to_owned());
		assert_eq!(
			host_base_url(&snapshot, "conn").unwrap(),
			"https://author.example"
		);
	}

	#[test]
	fn base_url_from_bare_url_in_custom_tokens() {
		let mut snapshot = EditorSnapshot::default();
		snapshot
			.custom_tokens
			.insert("conn".to_owned(), "https://tokens.example".to_owned());
		assert_eq!(
			host_base_url(&snapshot, "conn").unwrap(),
			"https://tokens.example"
		);
	}

	#[test]
	fn connections_searched_before_custom_tokens() {
		let mut snapshot = EditorSnapshot::default();
		snapshot
			.connections
			.insert("conn".to_owned(), "aem:https://primary.example".to_owned());
		snapshot
			.custom_tokens
			.insert("conn".to_owned(), "https://secondary.example".to_owned());
		assert_eq!(
			host_base_url(&snapshot, "conn").unwrap(),
			"https://primary.example"
		);
	}

	#[test]
	fn unusable_connection_value_resolves_to_none() {
		let mut snapshot = EditorSnapshot::default();
		snapshot
			.connections
			.insert("conn".to_owned(), "aem:author.example".to_owned());
		assert!(host_base_url(&snapshot, "conn").is_none());
		assert!(host_base_url(&snapshot, "other").is_none());
	}

	#[test]
	fn unusable_connection_value_falls_through_to_custom_tokens() {
		let mut snapshot = EditorSnapshot::default();
		snapshot
			.connections
			.insert("conn".to_owned(), "aem:author.example".to_owned());
		snapshot
			.custom_tokens
			.insert("conn".to_owned(), "https://tokens.example".to_owned());
		assert_eq!(
			host_base_url(&snapshot, "conn").unwrap(),
			"https://tokens.example"
		);
	}
}
