//! Captured invocation metadata handed to observers.

use crate::runtime::Object;
use crate::types::{InstanceId, Selector, Value};
use std::fmt;
use std::sync::Arc;

/// A message as it was sent: receiver, selector and boxed arguments.
#[derive(Clone)]
pub struct Invocation {
    instance: InstanceId,
    receiver: Arc<Object>,
    selector: Selector,
    arguments: Vec<Value>,
}

impl Invocation {
    pub(crate) fn new(
        instance: InstanceId,
        receiver: Arc<Object>,
        selector: Selector,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            instance,
            receiver,
            selector,
            arguments,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// The receiving object.
    ///
    /// Readable during teardown, after every `Target` handle is gone; it does
    /// not keep the target alive.
    pub fn receiver(&self) -> &Arc<Object> {
        &self.receiver
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("instance", &self.instance)
            .field("class", &self.receiver.class().name())
            .field("selector", &self.selector)
            .field("arguments", &self.arguments)
            .finish()
    }
}
