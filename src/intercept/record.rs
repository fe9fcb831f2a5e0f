//! Selector interception records.

use crate::error::{InterceptError, Result};
use crate::interceptor::InterceptorConfig;
use crate::intercept::target::TargetInner;
use crate::observers::settle;
use crate::runtime::inspector;
use crate::runtime::{Implementation, Signature, TypeLayout};
use crate::subclass::SyntheticSubclass;
use crate::types::{Selector, Value};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Signatures served by a dedicated forwarding stub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrampolineKind {
    /// `v@:`
    Void,
    /// `v@:@`
    VoidObject,
    /// Integer return, no arguments.
    Integer,
    /// `@@:`
    Object,
}

impl TrampolineKind {
    pub fn for_signature(signature: &Signature) -> Option<Self> {
        let ret = signature.return_type();
        match signature.arguments() {
            [] if *ret == TypeLayout::Void => Some(TrampolineKind::Void),
            [] if ret.is_integer() => Some(TrampolineKind::Integer),
            [] if *ret == TypeLayout::Object => Some(TrampolineKind::Object),
            [TypeLayout::Object] if *ret == TypeLayout::Void => Some(TrampolineKind::VoidObject),
            _ => None,
        }
    }
}

/// How an intercepted selector reaches its observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterceptionStrategy {
    Trampoline(TrampolineKind),
    /// Arguments are boxed into an [`Invocation`](super::Invocation).
    Forwarding,
}

/// Hook state for one (synthetic subclass, selector) pair.
pub struct InterceptionRecord {
    selector: Selector,
    signature: Signature,
    strategy: InterceptionStrategy,
    /// Resolved from the original class. Only `dealloc` may lack one.
    original: Option<Implementation>,
    registrations: AtomicUsize,
}

impl InterceptionRecord {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn strategy(&self) -> &InterceptionStrategy {
        &self.strategy
    }

    pub fn original(&self) -> Option<&Implementation> {
        self.original.as_ref()
    }

    /// Number of observer entries depending on this record.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Count one more registration until the returned lease is dropped.
    pub fn lease(self: &Arc<Self>) -> RecordLease {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        RecordLease(Arc::clone(self))
    }

    fn trampoline(&self, kind: TrampolineKind) -> bool {
        self.strategy == InterceptionStrategy::Trampoline(kind)
    }

    fn original_or_err(&self, target: &TargetInner) -> Result<&Implementation> {
        self.original
            .as_ref()
            .ok_or_else(|| InterceptError::UnknownSelector {
                class: target.object().class().name().to_string(),
                selector: self.selector.clone(),
            })
    }

    /// Generic forwarding path: observers see boxed arguments, then the
    /// original implementation runs and its result is returned unchanged.
    pub(crate) fn forward(&self, target: &TargetInner, args: &[Value]) -> Result<Value> {
        crate::runtime::object::check_arguments(&self.selector, &self.signature, args)?;
        let original = self.original_or_err(target)?;
        let failures = target.notify_sent(&self.selector, || args.to_vec());
        let result = original.call(target.object(), args);
        settle(&self.selector, failures, result)
    }

    pub(crate) fn invoke_void(&self, target: &TargetInner) -> Result<()> {
        if !self.trampoline(TrampolineKind::Void) {
            return self.forward(target, &[]).map(|_| ());
        }
        let original = self.original_or_err(target)?;
        let failures = target.notify_sent(&self.selector, Vec::new);
        let result = original.call_void(target.object());
        settle(&self.selector, failures, result)
    }

    pub(crate) fn invoke_with_object(&self, target: &TargetInner, arg: &Value) -> Result<()> {
        if !self.trampoline(TrampolineKind::VoidObject) {
            return self
                .forward(target, std::slice::from_ref(arg))
                .map(|_| ());
        }
        let original = self.original_or_err(target)?;
        let failures = target.notify_sent(&self.selector, || vec![arg.clone()]);
        let result = original.call_with_object(target.object(), arg);
        settle(&self.selector, failures, result)
    }

    pub(crate) fn invoke_integer(&self, target: &TargetInner) -> Result<i64> {
        if !self.trampoline(TrampolineKind::Integer) {
            let value = self.forward(target, &[])?;
            return Ok(value.as_int().unwrap_or_default());
        }
        let original = self.original_or_err(target)?;
        let failures = target.notify_sent(&self.selector, Vec::new);
        let result = original.call_integer(target.object());
        settle(&self.selector, failures, result)
    }

    pub(crate) fn invoke_for_object(&self, target: &TargetInner) -> Result<Value> {
        if !self.trampoline(TrampolineKind::Object) {
            return self.forward(target, &[]);
        }
        let original = self.original_or_err(target)?;
        let failures = target.notify_sent(&self.selector, Vec::new);
        let result = original.call_for_object(target.object());
        settle(&self.selector, failures, result)
    }
}

impl fmt::Debug for InterceptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionRecord")
            .field("selector", &self.selector)
            .field("signature", &self.signature.encoding())
            .field("strategy", &self.strategy)
            .field("registrations", &self.registrations())
            .finish()
    }
}

/// Keeps a record's registration count raised while alive.
pub struct RecordLease(Arc<InterceptionRecord>);

impl RecordLease {
    pub fn record(&self) -> &Arc<InterceptionRecord> {
        &self.0
    }
}

impl Drop for RecordLease {
    fn drop(&mut self) {
        self.0.registrations.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for RecordLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordLease({})", self.0.selector)
    }
}

/// Install (or reuse) the interception record for `selector` on `subclass`.
///
/// Idempotent. Once installed a record is never removed, since calls may
/// still be running through it.
pub fn install_hook(
    subclass: &SyntheticSubclass,
    selector: &Selector,
    config: &InterceptorConfig,
) -> Result<Arc<InterceptionRecord>> {
    if let Some(existing) = subclass.hook(selector) {
        return Ok(existing);
    }

    // Resolve outside the write lock; the original class is immutable.
    let (signature, original) = resolve_original(subclass, selector)?;
    if let Some(layout) = signature.unsupported_layout() {
        return Err(InterceptError::UnsupportedSignature {
            selector: selector.clone(),
            reason: format!("{:?} in {} cannot be marshaled", layout, signature),
        });
    }

    let strategy = match TrampolineKind::for_signature(&signature) {
        Some(kind) if config.trampolines => InterceptionStrategy::Trampoline(kind),
        _ => InterceptionStrategy::Forwarding,
    };

    let mut hooks = subclass.hooks.write();
    if let Some(existing) = hooks.get(selector) {
        return Ok(Arc::clone(existing));
    }

    debug!(
        class = subclass.original().name(),
        selector = %selector,
        ?strategy,
        "installed interception hook"
    );

    let record = Arc::new(InterceptionRecord {
        selector: selector.clone(),
        signature,
        strategy,
        original,
        registrations: AtomicUsize::new(0),
    });
    hooks.insert(selector.clone(), Arc::clone(&record));
    Ok(record)
}

fn resolve_original(
    subclass: &SyntheticSubclass,
    selector: &Selector,
) -> Result<(Signature, Option<Implementation>)> {
    let class = subclass.original();
    match inspector::signature_of(class, selector) {
        Ok(signature) => {
            let original = inspector::implementation_of(class, selector)?;
            Ok((signature, Some(original)))
        }
        // Teardown can be observed on classes that define no `dealloc`.
        Err(InterceptError::UnknownSelector { .. }) if selector.is_dealloc() => {
            Ok((Signature::void(), None))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ClassBuilder, Runtime};
    use crate::subclass::SubclassRegistry;

    fn subclass() -> Arc<SyntheticSubclass> {
        let runtime = Arc::new(Runtime::new());
        let class = ClassBuilder::new("Gadget")
            .void_method("tick", |_| {})
            .void_object_method("take:", |_, _| {})
            .integer_method("count", |_| 1)
            .object_method("name", |_| Value::Nil)
            .method("add:to:", "q@:qq", |_, args| {
                Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
            })
            .method("move:", "v@:{point=dd}", |_, _| Ok(Value::Nil))
            .register(&runtime)
            .unwrap();
        let registry = SubclassRegistry::new(runtime, None);
        registry.subclass_for(&class).unwrap()
    }

    #[test]
    fn test_strategy_selection() {
        let subclass = subclass();
        let config = InterceptorConfig::default();

        let cases = [
            ("tick", InterceptionStrategy::Trampoline(TrampolineKind::Void)),
            ("take:", InterceptionStrategy::Trampoline(TrampolineKind::VoidObject)),
            ("count", InterceptionStrategy::Trampoline(TrampolineKind::Integer)),
            ("name", InterceptionStrategy::Trampoline(TrampolineKind::Object)),
            ("add:to:", InterceptionStrategy::Forwarding),
        ];
        for (selector, expected) in cases {
            let record = install_hook(&subclass, &selector.into(), &config).unwrap();
            assert_eq!(record.strategy(), &expected, "{}", selector);
        }
    }

    #[test]
    fn test_trampolines_can_be_disabled() {
        let subclass = subclass();
        let config = InterceptorConfig {
            trampolines: false,
            ..Default::default()
        };
        let record = install_hook(&subclass, &"tick".into(), &config).unwrap();
        assert_eq!(record.strategy(), &InterceptionStrategy::Forwarding);
    }

    #[test]
    fn test_install_is_idempotent() {
        let subclass = subclass();
        let config = InterceptorConfig::default();
        let first = install_hook(&subclass, &"tick".into(), &config).unwrap();
        let second = install_hook(&subclass, &"tick".into(), &config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(subclass.hook_count(), 1);
    }

    #[test]
    fn test_unsupported_and_unknown() {
        let subclass = subclass();
        let config = InterceptorConfig::default();

        let err = install_hook(&subclass, &"move:".into(), &config).unwrap_err();
        assert!(matches!(err, InterceptError::UnsupportedSignature { .. }));
        let err = install_hook(&subclass, &"fly".into(), &config).unwrap_err();
        assert!(matches!(err, InterceptError::UnknownSelector { .. }));
        assert_eq!(subclass.hook_count(), 0);

        // A supported selector on the same class still installs.
        assert!(install_hook(&subclass, &"tick".into(), &config).is_ok());
    }

    #[test]
    fn test_dealloc_without_original() {
        let subclass = subclass();
        let record =
            install_hook(&subclass, &Selector::dealloc(), &InterceptorConfig::default()).unwrap();
        assert!(record.original().is_none());
        assert_eq!(record.signature(), &Signature::void());
    }

    #[test]
    fn test_lease_counts_registrations() {
        let subclass = subclass();
        let record =
            install_hook(&subclass, &"tick".into(), &InterceptorConfig::default()).unwrap();
        let a = record.lease();
        let b = record.lease();
        assert_eq!(record.registrations(), 2);
        drop(a);
        assert_eq!(record.registrations(), 1);
        drop(b);
        assert_eq!(record.registrations(), 0);
        // Still installed.
        assert!(subclass.is_intercepting(&"tick".into()));
    }
}
