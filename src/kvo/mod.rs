//! Property-change observation over dotted key paths.
//!
//! Changes are seen through the setter hooks of every object along the
//! path. The reported value is the setter's argument, since message
//! observers run before the original setter stores it.

mod observer;

pub use observer::{observe_key_path, KeyPathOptions, PropertyObservation};
