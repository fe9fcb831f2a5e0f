//! Observer registration types.

use crate::error::ObserverResult;
use crate::intercept::Invocation;
use crate::observers::registry::ObserverRegistry;
use crate::types::{InstanceId, ObserverId, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

/// Callback invoked with the captured invocation.
pub type Callback = Arc<dyn Fn(&Invocation) -> ObserverResult + Send + Sync>;

/// What an observer is notified about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A message with this selector was sent.
    MessageSent(Selector),
    /// The instance is being torn down.
    Deallocating,
    /// Teardown has finished, including the original `dealloc`.
    Deallocated,
}

impl EventKind {
    /// Whether this entry fires before the original `dealloc`.
    pub fn fires_on_teardown(&self) -> bool {
        match self {
            EventKind::Deallocating => true,
            EventKind::Deallocated => false,
            EventKind::MessageSent(selector) => selector.is_dealloc(),
        }
    }
}

/// What happens when an observer callback fails during fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutPolicy {
    /// Run every observer and report all failures.
    #[default]
    ContinueOnError,
    /// Stop at the first failing observer.
    AbortOnFirstError,
}

/// Disposable handle to one observer entry.
#[derive(Clone)]
pub struct Token {
    pub(crate) id: ObserverId,
    pub(crate) instance: InstanceId,
    pub(crate) registry: Weak<ObserverRegistry>,
}

impl Token {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Remove the entry. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.dispose(self);
        }
    }

    pub fn is_disposed(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => !registry.contains(self),
            None => true,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?}, {:?})", self.id, self.instance)
    }
}
