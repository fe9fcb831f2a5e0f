//! Object instances.

use crate::error::{InterceptError, Result};
use crate::runtime::class::Class;
use crate::types::{Selector, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An instance of a [`Class`] with key/value storage.
pub struct Object {
    class: Arc<Class>,
    fields: RwLock<HashMap<String, Value>>,
}

impl Object {
    pub fn new(class: &Arc<Class>) -> Self {
        Self {
            class: Arc::clone(class),
            fields: RwLock::new(HashMap::new()),
        }
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Stored value for `key`; weak references that no longer resolve read
    /// as `Nil`.
    pub fn value_for_key(&self, key: &str) -> Value {
        match self.fields.read().get(key) {
            Some(Value::Weak(weak)) => weak.upgrade().map(Value::Object).unwrap_or(Value::Nil),
            Some(value) => value.clone(),
            None => Value::Nil,
        }
    }

    pub fn set_value_for_key(&self, key: &str, value: Value) {
        self.fields.write().insert(key.to_string(), value);
    }

    /// Dispatch `selector` through this object's own class, bypassing any
    /// interception.
    pub fn send(&self, selector: &Selector, args: &[Value]) -> Result<Value> {
        let method = self
            .class
            .method(selector)
            .ok_or_else(|| InterceptError::UnknownSelector {
                class: self.class.name().to_string(),
                selector: selector.clone(),
            })?;
        check_arguments(selector, method.signature(), args)?;
        method.implementation().call(self, args)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class.name())
            .field("fields", &self.fields.read().len())
            .finish()
    }
}

/// Validate arity and argument layouts against a signature.
pub(crate) fn check_arguments(
    selector: &Selector,
    signature: &crate::runtime::Signature,
    args: &[Value],
) -> Result<()> {
    if args.len() != signature.arity() {
        return Err(InterceptError::ArgumentMismatch {
            selector: selector.clone(),
            detail: format!("expected {} argument(s), got {}", signature.arity(), args.len()),
        });
    }
    for (index, (layout, value)) in signature.arguments().iter().zip(args).enumerate() {
        if !layout.accepts(value) {
            return Err(InterceptError::ArgumentMismatch {
                selector: selector.clone(),
                detail: format!(
                    "argument {} is {} but {:?} is declared",
                    index,
                    value.kind(),
                    layout
                ),
            });
        }
    }
    Ok(())
}
