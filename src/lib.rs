#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]

//! A custom field renderer for a host-controlled visual-editor iframe that
//! auto-populates a text field from the metadata of a referenced digital
//! asset.
//!
//! The renderer has no lifecycle of its own: the host loads it, feeds it
//! editor-state snapshots and events, and owns all durable state together
//! with the backing content repository. What lives here is the convergence
//! logic: deciding which asset is actually selected, whether it changed
//! since the last applied value, and when it is safe to fetch metadata and
//! write a default without overwriting an intentional author edit or
//! flapping during eventual-consistency windows. On top of that sits
//! best-effort write serialization across sibling renderer instances.

pub mod bridge;
pub mod coordinator;
pub mod election;
pub mod engine;
pub mod error;
pub mod http;
pub mod metadata;
pub mod model;
pub mod neighbor;
pub mod reader;
pub mod reference;
pub mod renderer;
pub mod timers;
