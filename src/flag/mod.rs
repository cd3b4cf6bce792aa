//! The Flag object (C7): typed state, dependency semantics, variant
//! selection, and the high-level mutators that drive the Storage Registry.

pub mod status;
pub mod variant;

pub mod object;

pub use object::{attributes_from_state, state_from_attributes, Flag, FlagOptions, FlagState};
pub use status::FlagStatus;
pub use variant::Variant;
