//! Owned mirrors of host editor state and field configuration.
//!
//! Everything here is read-only from the renderer's perspective: the host
//! recreates the snapshot wholesale on every state change, and the renderer
//! only ever derives values from it.

use serde::{Deserialize, Serialize};

/// One node of the host editor's authored-content tree, corresponding to a
/// single field or container.
///
/// Exactly one of the four capability values (`content`, `value`, `link`,
/// `source`) is expected to be populated per element type; [`crate::neighbor::element_value`]
/// resolves ambiguity by fixed precedence.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EditableElement {
	pub id: String,
	/// Ownership edge to the containing element, when the host populates it.
	pub parent_id: Option<String>,
	/// The authored property this element edits, as the host reports it
	/// (may carry a leading `/` or `./`).
	pub field_name: Option<String>,
	pub content: Option<String>,
	pub value: Option<String>,
	pub link: Option<String>,
	pub source: Option<String>,
	/// Resource URN tying the element to a location in the backing repository.
	pub resource: Option<String>,
	/// Raw selector string; may embed a resource URN when `resource` is unset.
	pub selector: Option<String>,
}

/// A full host editor-state snapshot.
///
/// `selected` preserves the host's iteration order; the first entry is "the"
/// selection when more than one element is marked.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EditorSnapshot {
	pub selected: Vec<String>,
	pub elements: Vec<EditableElement>,
	/// Connection name → connection value (e.g. `aem:https://author.example`).
	pub connections: std::collections::BTreeMap<String, String>,
	/// Secondary token mapping searched after `connections`.
	pub custom_tokens: std::collections::BTreeMap<String, String>,
}

impl EditorSnapshot {
	#[must_use]
	pub fn element(&self, id: &str) -> Option<&EditableElement> {
		self.elements.iter().find(|element| element.id == id)
	}
}

/// Field configuration as returned by the host's `getModel()`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FieldModel {
	/// Name of the sibling field holding the asset reference.
	pub asset_field: String,
	/// Metadata key to extract and write into this field.
	pub metadata_key: String,
	#[serde(default)]
	pub read_only: bool,
}

/// Parsed form of a `urn:<connection>:<path>` resource identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceReference {
	pub connection: String,
	pub path: String,
}

/// User-facing renderer status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
	Idle,
	Loading,
	/// Transient: an expected reference has not shown up yet.
	Waiting,
	Done,
	Error,
	/// Terminal: the final scheduled retry still found no reference.
	Failed,
}

impl core::fmt::Display for Status {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str(match self {
			Status::Idle => "idle",
			Status::Loading => "loading",
			Status::Waiting => "waiting",
			Status::Done => "done",
			Status::Error => "error",
			Status::Failed => "failed",
		})
	}
}
