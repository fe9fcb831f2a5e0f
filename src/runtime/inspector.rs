//! Read-only queries over a class hierarchy.
//!
//! Nothing here mutates a class. `UnknownSelector` from these functions is an
//! expected outcome when probing optional members.

use crate::error::{InterceptError, Result};
use crate::runtime::class::{Class, Implementation, Method};
use crate::runtime::encoding::Signature;
use crate::types::Selector;

pub use crate::runtime::encoding::is_void_return;

fn method_of<'a>(class: &'a Class, selector: &Selector) -> Result<&'a Method> {
    class
        .method(selector)
        .ok_or_else(|| InterceptError::UnknownSelector {
            class: class.name().to_string(),
            selector: selector.clone(),
        })
}

/// Signature of `selector` as declared anywhere in `class`'s ancestry.
pub fn signature_of(class: &Class, selector: &Selector) -> Result<Signature> {
    method_of(class, selector).map(|m| m.signature().clone())
}

/// Implementation of `selector` resolved from `class` upward.
pub fn implementation_of(class: &Class, selector: &Selector) -> Result<Implementation> {
    method_of(class, selector).map(|m| m.implementation().clone())
}

pub fn responds_to(class: &Class, selector: &Selector) -> bool {
    class.method(selector).is_some()
}

/// Class names from `class` to the root.
pub fn class_hierarchy(class: &Class) -> Vec<String> {
    class.ancestry().map(|c| c.name().to_string()).collect()
}
