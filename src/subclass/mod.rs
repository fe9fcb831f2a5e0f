//! Per-class synthetic subclasses hosting interception hooks.
//!
//! A synthetic subclass declares the original class as its superclass and
//! adds no methods or properties, so it can stand in for the original
//! without any change in layout. Hooks are installed on it, never on the
//! original class, which keeps interception on one class invisible to every
//! other class (including subclasses and superclasses of the original).

mod registry;

pub use registry::{SubclassRegistry, SyntheticSubclass, SYNTHETIC_PREFIX};
