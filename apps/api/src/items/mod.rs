//! Canonical items and the lexical helpers shared by every item type.

pub mod emphasis;
pub mod handlers;
pub mod model;
pub mod source_label;
pub mod text;
