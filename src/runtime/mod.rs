//! Dynamic object runtime hosting intercepted instances.
//!
//! Classes carry selector-keyed method tables with type-encoded signatures
//! and are immutable once registered with a [`Runtime`]. Objects hold
//! per-instance key/value storage backing declared properties.

pub mod class;
pub mod encoding;
pub mod inspector;
pub mod object;

pub use class::{Class, ClassBuilder, Implementation, Method, Property, Runtime};
pub use encoding::{is_void_return, Signature, TypeLayout};
pub use object::Object;
