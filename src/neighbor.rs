//! Locating a sibling field within the same authored component instance.
//!
//! The two-tier search exists because some element shapes do not reliably
//! populate parent linkage; those fall back to matching on the resolved
//! backing resource instead.

use crate::model::{EditableElement, EditorSnapshot};
use crate::reader::element_resource;
use tracing::trace;

/// Normalizes a field name as it may appear across element representations:
/// `name`, `/name` and `./name` all normalize to `name`.
#[must_use]
pub fn normalize_field_name(name: &str) -> &str {
	if let Some(stripped) = name.strip_prefix("./") {
		stripped
	} else if let Some(stripped) = name.strip_prefix('/') {
		stripped
	} else {
		name
	}
}

/// Finds the sibling element representing the field named `wanted` within the
/// same component instance as `selected`.
///
/// Pass 1 searches the selected element's parent group by normalized name
/// (exact, then `…/<wanted>` suffix for nested-path field names). Pass 2
/// repeats the name tests over all elements sharing the selected element's
/// resolved resource.
#[must_use]
pub fn find_neighbor<'a>(
	snapshot: &'a EditorSnapshot,
	selected: &EditableElement,
	wanted: &str,
) -> Option<&'a EditableElement> {
	let wanted = normalize_field_name(wanted);
	if wanted.is_empty() {
		return None;
	}

	if let Some(parent_id) = selected.parent_id.as_deref() {
		let siblings = || {
			snapshot
				.elements
				.iter()
				.filter(move |element| element.parent_id.as_deref() == Some(parent_id))
		};
		if let Some(found) = name_match(siblings(), siblings(), wanted) {
			return Some(found);
		}
	}

	let resource = element_resource(selected, snapshot)?;
	let peers = || {
		snapshot
			.elements
			.iter()
			.filter(|element| element_resource(element, snapshot).as_deref() == Some(&resource))
	};
	let found = name_match(peers(), peers(), wanted);
	if found.is_none() {
		trace!(wanted, %resource, "no neighbor field found");
	}
	found
}

/// Extracts the meaningful value of an element.
///
/// Exactly one capability value is expected to be populated per real element;
/// a fixed precedence resolves ambiguity: structured content, generic value,
/// link target, media source, else empty.
#[must_use]
pub fn element_value(element: &EditableElement) -> &str {
	element
		.content
		.as_deref()
		.or_else(|| element.value.as_deref())
		.or_else(|| element.link.as_deref())
		.or_else(|| element.source.as_deref())
		.unwrap_or("")
}

fn name_match<'a>(
	mut exact: impl Iterator<Item = &'a EditableElement>,
	mut suffix: impl Iterator<Item = &'a EditableElement>,
	wanted: &str,
) -> Option<&'a EditableElement> {
	let normalized =
		|element: &&'a EditableElement| element.field_name.as_deref().map(normalize_field_name);
	exact
		.find(|element| normalized(element) == Some(wanted))
		.or_else(|| {
			let tail = format!("/{}", wanted);
			suffix.find(|element| normalized(element).map_or(false, |name| name.ends_with(&tail)))
		})
}
