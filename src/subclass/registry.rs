//! Dynamic subclass registry.

use crate::error::{InterceptError, Result};
use crate::intercept::{self, InterceptionRecord, InterceptionStrategy};
use crate::interceptor::InterceptorConfig;
use crate::runtime::{Class, ClassBuilder, Runtime};
use crate::types::{ClassId, Selector};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Name prefix of generated classes.
pub const SYNTHETIC_PREFIX: &str = "_Interposed_";

/// A generated subclass and the hooks installed on it.
pub struct SyntheticSubclass {
    class: Arc<Class>,
    original: Arc<Class>,
    /// Installed interception records. Entries are only ever added.
    pub(crate) hooks: RwLock<HashMap<Selector, Arc<InterceptionRecord>>>,
}

impl SyntheticSubclass {
    /// The generated class.
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// The class being shadowed.
    pub fn original(&self) -> &Arc<Class> {
        &self.original
    }

    /// Interception record for `selector`, if one has been installed.
    pub fn hook(&self, selector: &Selector) -> Option<Arc<InterceptionRecord>> {
        self.hooks.read().get(selector).cloned()
    }

    /// Install the hook for `selector`, or return the existing one.
    pub fn install_hook(
        &self,
        selector: &Selector,
        config: &InterceptorConfig,
    ) -> Result<Arc<InterceptionRecord>> {
        intercept::install_hook(self, selector, config)
    }

    pub fn is_intercepting(&self, selector: &Selector) -> bool {
        self.hooks.read().contains_key(selector)
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Selectors with installed hooks, sorted.
    pub fn intercepted_selectors(&self) -> Vec<Selector> {
        let mut selectors: Vec<_> = self.hooks.read().keys().cloned().collect();
        selectors.sort();
        selectors
    }

    fn count_strategy(&self, f: impl Fn(&InterceptionStrategy) -> bool) -> usize {
        self.hooks
            .read()
            .values()
            .filter(|record| f(record.strategy()))
            .count()
    }
}

impl fmt::Debug for SyntheticSubclass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticSubclass")
            .field("class", &self.class.name())
            .field("original", &self.original.name())
            .field("hooks", &self.intercepted_selectors())
            .finish()
    }
}

/// Maps original classes to their synthetic subclasses.
///
/// At most one synthetic subclass exists per original class. Entries live as
/// long as the registry.
pub struct SubclassRegistry {
    runtime: Arc<Runtime>,
    subclasses: RwLock<HashMap<ClassId, Arc<SyntheticSubclass>>>,
    /// Limit on generated classes (None = unbounded).
    max_subclasses: Option<usize>,
}

impl SubclassRegistry {
    pub fn new(runtime: Arc<Runtime>, max_subclasses: Option<usize>) -> Self {
        Self {
            runtime,
            subclasses: RwLock::new(HashMap::new()),
            max_subclasses,
        }
    }

    /// Synthetic subclass for `original`, creating it on first use.
    ///
    /// Concurrent first callers race on the write lock; exactly one of them
    /// constructs the class and the rest observe it. Asking for the subclass
    /// of a synthetic class yields that class's own entry.
    pub fn subclass_for(&self, original: &Arc<Class>) -> Result<Arc<SyntheticSubclass>> {
        if original.is_synthetic() {
            if let Some(parent) = original.superclass() {
                return self.subclass_for(parent);
            }
        }

        if let Some(existing) = self.subclasses.read().get(&original.id()) {
            return Ok(Arc::clone(existing));
        }

        let mut subclasses = self.subclasses.write();
        if let Some(existing) = subclasses.get(&original.id()) {
            return Ok(Arc::clone(existing));
        }

        let name = synthetic_name(original);
        if let Some(max) = self.max_subclasses {
            if subclasses.len() >= max {
                return Err(InterceptError::RuntimeRegistration {
                    class: name,
                    reason: format!("synthetic class limit of {} reached", max),
                });
            }
        }

        let class = ClassBuilder::new(name.clone())
            .superclass(original)
            .synthetic()
            .register(&self.runtime)
            .map_err(|e| InterceptError::RuntimeRegistration {
                class: name.clone(),
                reason: e.to_string(),
            })?;

        debug!(original = original.name(), synthetic = %name, "created synthetic subclass");

        let subclass = Arc::new(SyntheticSubclass {
            class,
            original: Arc::clone(original),
            hooks: RwLock::new(HashMap::new()),
        });
        subclasses.insert(original.id(), Arc::clone(&subclass));
        Ok(subclass)
    }

    /// Existing subclass for `original`, without creating one.
    pub fn get(&self, original: &Class) -> Option<Arc<SyntheticSubclass>> {
        self.subclasses.read().get(&original.id()).cloned()
    }

    pub fn len(&self) -> usize {
        self.subclasses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subclasses.read().is_empty()
    }

    /// Number of subclasses with at least one hook installed.
    pub fn intercepting_count(&self) -> usize {
        self.subclasses
            .read()
            .values()
            .filter(|s| s.hook_count() > 0)
            .count()
    }

    pub fn hook_count(&self) -> usize {
        self.subclasses.read().values().map(|s| s.hook_count()).sum()
    }

    pub fn trampoline_count(&self) -> usize {
        self.subclasses
            .read()
            .values()
            .map(|s| s.count_strategy(|st| matches!(st, InterceptionStrategy::Trampoline(_))))
            .sum()
    }

    pub fn forwarding_count(&self) -> usize {
        self.subclasses
            .read()
            .values()
            .map(|s| s.count_strategy(|st| matches!(st, InterceptionStrategy::Forwarding)))
            .sum()
    }
}

/// Deterministic, collision-free name for `original`'s synthetic subclass.
fn synthetic_name(original: &Class) -> String {
    format!("{}{}_{}", SYNTHETIC_PREFIX, original.name(), original.id().0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn runtime_with(name: &str) -> (Arc<Runtime>, Arc<Class>) {
        let runtime = Arc::new(Runtime::new());
        let class = ClassBuilder::new(name)
            .void_method("ping", |_| {})
            .register(&runtime)
            .unwrap();
        (runtime, class)
    }

    #[test]
    fn test_subclass_shadows_original() {
        let (runtime, widget) = runtime_with("Widget");
        let registry = SubclassRegistry::new(Arc::clone(&runtime), None);

        let subclass = registry.subclass_for(&widget).unwrap();
        let class = subclass.class();
        assert!(class.is_synthetic());
        assert_eq!(class.superclass().unwrap().id(), widget.id());
        assert_eq!(class.own_method_count(), 0);
        assert_eq!(class.own_property_count(), 0);
        assert!(class.name().starts_with(SYNTHETIC_PREFIX));
        assert!(runtime.class_named(class.name()).is_some());
    }

    #[test]
    fn test_subclass_for_is_idempotent() {
        let (runtime, widget) = runtime_with("Widget");
        let registry = SubclassRegistry::new(runtime, None);

        let first = registry.subclass_for(&widget).unwrap();
        let second = registry.subclass_for(&widget).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // The synthetic class maps back to its own entry.
        let third = registry.subclass_for(first.class()).unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_first_use_creates_one() {
        let (runtime, widget) = runtime_with("Widget");
        let registry = Arc::new(SubclassRegistry::new(Arc::clone(&runtime), None));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                let widget = Arc::clone(&widget);
                thread::spawn(move || {
                    barrier.wait();
                    registry.subclass_for(&widget).unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|s| Arc::ptr_eq(s, &results[0])));
        assert_eq!(registry.len(), 1);
        // Widget plus exactly one generated class.
        assert_eq!(runtime.class_count(), 2);
    }

    #[test]
    fn test_registration_failure_leaves_registry_consistent() {
        let (runtime, widget) = runtime_with("Widget");
        // Occupy the name the registry would pick.
        ClassBuilder::new(synthetic_name(&widget))
            .register(&runtime)
            .unwrap();
        let registry = SubclassRegistry::new(runtime, None);

        for _ in 0..2 {
            let result = registry.subclass_for(&widget);
            assert!(matches!(
                result,
                Err(InterceptError::RuntimeRegistration { .. })
            ));
            assert!(registry.get(&widget).is_none());
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_class_limit() {
        let runtime = Arc::new(Runtime::new());
        let a = ClassBuilder::new("A").register(&runtime).unwrap();
        let b = ClassBuilder::new("B").register(&runtime).unwrap();
        let registry = SubclassRegistry::new(runtime, Some(1));

        registry.subclass_for(&a).unwrap();
        assert!(matches!(
            registry.subclass_for(&b),
            Err(InterceptError::RuntimeRegistration { .. })
        ));
        // Existing entries are still served.
        assert!(registry.subclass_for(&a).is_ok());
    }
}
