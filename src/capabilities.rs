//! Capability sets exposed to consumers built on the engine.

use crate::error::{ObserverResult, Result};
use crate::intercept::{Invocation, Target};
use crate::observers::{EventKind, Token};
use crate::runtime::{Class, Implementation};
use crate::types::Selector;
use std::sync::Arc;

/// Hook installation on a class.
pub trait Interceptable {
    /// Install the hook for `selector` on `class`'s synthetic subclass.
    fn install_hook(&self, class: &Arc<Class>, selector: &Selector) -> Result<()>;

    /// Implementation that runs underneath a hook, resolved from the
    /// original class.
    fn lookup_original_implementation(
        &self,
        class: &Arc<Class>,
        selector: &Selector,
    ) -> Result<Implementation>;
}

/// Observer registration on an instance.
pub trait Observable {
    fn register(
        &self,
        target: &Target,
        kind: EventKind,
        callback: Box<dyn Fn(&Invocation) -> ObserverResult + Send + Sync>,
    ) -> Result<Token>;

    fn dispose(&self, token: &Token);
}
