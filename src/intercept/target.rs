//! Proxy handles for intercepted objects.

use crate::error::{InterceptError, ObserverError, ObserverResult, Result};
use crate::intercept::dealloc;
use crate::intercept::invocation::Invocation;
use crate::intercept::record::{self, InterceptionRecord, TrampolineKind};
use crate::interceptor::{Interceptor, Shared};
use crate::observers::{fan_out, settle, EventKind, MessageStream, Token};
use crate::runtime::object::check_arguments;
use crate::runtime::{Class, Method, Object};
use crate::subclass::SyntheticSubclass;
use crate::types::{InstanceId, Selector, Value};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

pub(crate) struct TargetInner {
    id: InstanceId,
    object: Arc<Object>,
    shared: Arc<Shared>,
    /// Set on first interception request; never cleared.
    shadow: RwLock<Option<Arc<SyntheticSubclass>>>,
    deallocated: AtomicBool,
    /// Held from the deallocated-observer snapshot until the original
    /// `dealloc` has returned; true afterwards.
    finished: Mutex<bool>,
}

impl TargetInner {
    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn object(&self) -> &Object {
        &self.object
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn is_deallocated(&self) -> bool {
        self.deallocated.load(Ordering::SeqCst)
    }

    pub(crate) fn finished(&self) -> &Mutex<bool> {
        &self.finished
    }

    /// Flip to deallocated. Returns false if teardown already started.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.deallocated.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn hook(&self, selector: &Selector) -> Option<Arc<InterceptionRecord>> {
        self.shadow.read().as_ref().and_then(|s| s.hook(selector))
    }

    /// Invocation record for this instance.
    pub(crate) fn invocation(&self, selector: &Selector, arguments: Vec<Value>) -> Invocation {
        Invocation::new(self.id, Arc::clone(&self.object), selector.clone(), arguments)
    }

    /// Run the message-sent observers for `selector`. Arguments are only
    /// materialized when someone is listening.
    pub(crate) fn notify_sent(
        &self,
        selector: &Selector,
        arguments: impl FnOnce() -> Vec<Value>,
    ) -> Vec<ObserverError> {
        let callbacks = self
            .shared
            .observers
            .lookup(self.id, &EventKind::MessageSent(selector.clone()));
        if callbacks.is_empty() {
            return Vec::new();
        }
        let invocation = self.invocation(selector, arguments());
        fan_out(&callbacks, &invocation, self.shared.config.fanout)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_deallocated() {
            return Err(InterceptError::Deallocated(self.id));
        }
        Ok(())
    }

    fn ensure_shadow(&self) -> Result<Arc<SyntheticSubclass>> {
        if let Some(existing) = self.shadow.read().as_ref() {
            return Ok(Arc::clone(existing));
        }
        let subclass = self.shared.subclasses.subclass_for(self.object.class())?;
        let mut slot = self.shadow.write();
        Ok(Arc::clone(slot.get_or_insert(subclass)))
    }

    /// Method for an un-hooked typed send, checked against the trampoline
    /// shape the caller expects.
    fn typed_method(&self, selector: &Selector, kind: TrampolineKind) -> Result<&Method> {
        let method =
            self.object
                .class()
                .method(selector)
                .ok_or_else(|| InterceptError::UnknownSelector {
                    class: self.object.class().name().to_string(),
                    selector: selector.clone(),
                })?;
        check_shape(selector, method.signature(), kind)?;
        Ok(method)
    }
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        if let Err(err) = dealloc::teardown(self) {
            warn!(instance = %self.id, error = %err, "observer failed during deallocation");
        }
    }
}

fn check_shape(
    selector: &Selector,
    signature: &crate::runtime::Signature,
    kind: TrampolineKind,
) -> Result<()> {
    if TrampolineKind::for_signature(signature) == Some(kind) {
        return Ok(());
    }
    Err(InterceptError::ArgumentMismatch {
        selector: selector.clone(),
        detail: format!("declared as {}, sent as {:?}", signature, kind),
    })
}

/// Owning handle to an intercepted object.
///
/// Every message goes through the handle. Dropping the last handle (or
/// calling [`Target::destroy`]) tears the object down, firing deallocation
/// observers first.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    pub(crate) fn new(id: InstanceId, object: Object, shared: Arc<Shared>) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id,
                object: Arc::new(object),
                shared,
                shadow: RwLock::new(None),
                deallocated: AtomicBool::new(false),
                finished: Mutex::new(false),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &TargetInner {
        &self.inner
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    pub fn object(&self) -> &Arc<Object> {
        &self.inner.object
    }

    /// The wrapped object's own class.
    pub fn class(&self) -> &Arc<Class> {
        self.inner.object.class()
    }

    /// The synthetic subclass when interception is active, else the
    /// original class.
    pub fn acting_class(&self) -> Arc<Class> {
        match self.inner.shadow.read().as_ref() {
            Some(subclass) => Arc::clone(subclass.class()),
            None => Arc::clone(self.class()),
        }
    }

    pub fn synthetic_subclass(&self) -> Option<Arc<SyntheticSubclass>> {
        self.inner.shadow.read().clone()
    }

    pub fn interceptor(&self) -> Interceptor {
        Interceptor::from_shared(Arc::clone(&self.inner.shared))
    }

    pub fn is_deallocated(&self) -> bool {
        self.inner.is_deallocated()
    }

    pub fn downgrade(&self) -> WeakTarget {
        WeakTarget {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn responds_to(&self, selector: &Selector) -> bool {
        self.class().method(selector).is_some()
    }

    // --- Messaging ---

    /// Send `selector` with boxed arguments.
    ///
    /// Sending `dealloc` tears the object down, as [`Target::destroy`].
    pub fn send(&self, selector: &Selector, args: &[Value]) -> Result<Value> {
        self.inner.ensure_alive()?;
        if selector.is_dealloc() {
            return self.destroy().map(|_| Value::Nil);
        }
        match self.inner.hook(selector) {
            Some(record) => record.forward(&self.inner, args),
            None => {
                let object = self.object();
                let method = object.class().method(selector).ok_or_else(|| {
                    InterceptError::UnknownSelector {
                        class: object.class().name().to_string(),
                        selector: selector.clone(),
                    }
                })?;
                check_arguments(selector, method.signature(), args)?;
                method.implementation().call(object, args)
            }
        }
    }

    /// Send a `v@:` message.
    pub fn send_void(&self, selector: &Selector) -> Result<()> {
        self.inner.ensure_alive()?;
        if selector.is_dealloc() {
            return self.destroy();
        }
        match self.inner.hook(selector) {
            Some(record) => {
                check_shape(selector, record.signature(), TrampolineKind::Void)?;
                record.invoke_void(&self.inner)
            }
            None => {
                let method = self.inner.typed_method(selector, TrampolineKind::Void)?;
                method.implementation().call_void(self.object())
            }
        }
    }

    /// Send a `v@:@` message.
    pub fn send_with_object(&self, selector: &Selector, arg: Value) -> Result<()> {
        self.inner.ensure_alive()?;
        match self.inner.hook(selector) {
            Some(record) => {
                check_shape(selector, record.signature(), TrampolineKind::VoidObject)?;
                check_arguments(selector, record.signature(), std::slice::from_ref(&arg))?;
                record.invoke_with_object(&self.inner, &arg)
            }
            None => {
                let method = self.inner.typed_method(selector, TrampolineKind::VoidObject)?;
                check_arguments(selector, method.signature(), std::slice::from_ref(&arg))?;
                method.implementation().call_with_object(self.object(), &arg)
            }
        }
    }

    /// Send an argument-less message returning an integer.
    pub fn send_integer(&self, selector: &Selector) -> Result<i64> {
        self.inner.ensure_alive()?;
        match self.inner.hook(selector) {
            Some(record) => {
                check_shape(selector, record.signature(), TrampolineKind::Integer)?;
                record.invoke_integer(&self.inner)
            }
            None => {
                let method = self.inner.typed_method(selector, TrampolineKind::Integer)?;
                method.implementation().call_integer(self.object())
            }
        }
    }

    /// Send a `@@:` message.
    pub fn send_for_object(&self, selector: &Selector) -> Result<Value> {
        self.inner.ensure_alive()?;
        match self.inner.hook(selector) {
            Some(record) => {
                check_shape(selector, record.signature(), TrampolineKind::Object)?;
                record.invoke_for_object(&self.inner)
            }
            None => {
                let method = self.inner.typed_method(selector, TrampolineKind::Object)?;
                method.implementation().call_for_object(self.object())
            }
        }
    }

    /// Read a declared property through its getter.
    pub fn value(&self, property: &str) -> Result<Value> {
        self.send_for_object(&Selector::getter_for(property))
    }

    /// Write a declared property through its setter.
    pub fn set_value(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        self.send_with_object(&Selector::setter_for(property), value.into())
    }

    // --- Observation ---

    /// Register an observer, installing the hook it needs.
    ///
    /// With `retains` the registration keeps this target alive until it is
    /// disposed or the target is destroyed explicitly. `retains` is ignored
    /// for [`EventKind::Deallocated`].
    pub fn observe(
        &self,
        kind: EventKind,
        callback: impl Fn(&Invocation) -> ObserverResult + Send + Sync + 'static,
        retains: bool,
    ) -> Result<Token> {
        if kind == EventKind::Deallocated {
            return self.observe_deallocated(callback);
        }
        self.inner.ensure_alive()?;
        let subclass = self.inner.ensure_shadow()?;
        let config = &self.inner.shared.config;
        let record = match &kind {
            EventKind::MessageSent(selector) if !selector.is_dealloc() => {
                record::install_hook(&subclass, selector, config)?
            }
            _ => dealloc::install_dealloc_hook(&subclass, config)?,
        };
        let retained = retains.then(|| self.clone());
        let token = self.inner.shared.observers.register(
            self.inner.id,
            kind,
            Arc::new(callback),
            retained,
            Some(record.lease()),
        );
        self.reject_if_deallocated(token)
    }

    /// Observe `selector` being sent. Fires before the original
    /// implementation, with the arguments as sent.
    pub fn observe_sent(
        &self,
        selector: impl Into<Selector>,
        callback: impl Fn(&Invocation) -> ObserverResult + Send + Sync + 'static,
    ) -> Result<Token> {
        self.observe(EventKind::MessageSent(selector.into()), callback, false)
    }

    /// Observe teardown. Fires once, before the original `dealloc`. See
    /// [`Target::observe_deallocated`] for the notification after it.
    pub fn observe_deallocating(
        &self,
        callback: impl Fn(&Invocation) -> ObserverResult + Send + Sync + 'static,
    ) -> Result<Token> {
        self.observe(EventKind::Deallocating, callback, false)
    }

    /// Observe the end of teardown. Fires once, after the original `dealloc`
    /// has returned.
    ///
    /// Registering on a target that has already finished teardown runs the
    /// callback immediately and returns a token that is already disposed.
    pub fn observe_deallocated(
        &self,
        callback: impl Fn(&Invocation) -> ObserverResult + Send + Sync + 'static,
    ) -> Result<Token> {
        let observers = &self.inner.shared.observers;
        {
            let finished = self.inner.finished.lock();
            if !*finished {
                return Ok(observers.register(
                    self.inner.id,
                    EventKind::Deallocated,
                    Arc::new(callback),
                    None,
                    None,
                ));
            }
        }

        let selector = Selector::dealloc();
        let invocation = self.inner.invocation(&selector, Vec::new());
        let failures: Vec<ObserverError> = callback(&invocation).err().into_iter().collect();
        settle(&selector, failures, Ok(observers.detached(self.inner.id)))
    }

    /// Register without installing a hook. Used where the caller dispatches
    /// notifications itself (delegate forwarding).
    pub(crate) fn observe_unhooked(
        &self,
        kind: EventKind,
        callback: impl Fn(&Invocation) -> ObserverResult + Send + Sync + 'static,
    ) -> Result<Token> {
        self.inner.ensure_alive()?;
        let token =
            self.inner
                .shared
                .observers
                .register(self.inner.id, kind, Arc::new(callback), None, None);
        self.reject_if_deallocated(token)
    }

    // A registration racing teardown must not leave a binding behind.
    fn reject_if_deallocated(&self, token: Token) -> Result<Token> {
        if self.is_deallocated() {
            token.dispose();
            return Err(InterceptError::Deallocated(self.inner.id));
        }
        Ok(token)
    }

    /// Channel of messages sent with `selector`, completing on teardown.
    pub fn sent_messages(&self, selector: impl Into<Selector>) -> Result<MessageStream> {
        let buffer = self.inner.shared.config.stream_buffer_size;
        MessageStream::open(self, selector.into(), buffer, true)
    }

    /// Tear the object down now. A second call is a no-op.
    ///
    /// Observer failures are returned after the original teardown has run.
    pub fn destroy(&self) -> Result<()> {
        dealloc::teardown(&self.inner)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("class", &self.class().name())
            .field("deallocated", &self.is_deallocated())
            .finish()
    }
}

/// Non-owning handle to a [`Target`].
#[derive(Clone)]
pub struct WeakTarget {
    inner: Weak<TargetInner>,
}

impl WeakTarget {
    pub fn upgrade(&self) -> Option<Target> {
        self.inner
            .upgrade()
            .filter(|inner| !inner.is_deallocated())
            .map(|inner| Target { inner })
    }

    pub fn ptr_eq(&self, other: &WeakTarget) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl fmt::Debug for WeakTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(target) => write!(f, "WeakTarget({})", target.id()),
            None => write!(f, "WeakTarget(<gone>)"),
        }
    }
}
