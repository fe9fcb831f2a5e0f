//! Delegate proxy implementation.

use crate::error::{InterceptError, ObserverResult, Result};
use crate::intercept::{Invocation, Target, WeakTarget};
use crate::interceptor::Interceptor;
use crate::observers::{fan_out, settle, EventKind, MessageStream, Token};
use crate::runtime::Object;
use crate::types::{Selector, Value};
use parking_lot::RwLock;
use std::fmt;
use tracing::{debug, warn};

/// Reference to the delegate messages are forwarded to.
#[derive(Clone)]
enum Forward {
    Strong(Target),
    Weak(WeakTarget),
}

impl Forward {
    fn target(&self) -> Option<Target> {
        match self {
            Forward::Strong(target) => Some(target.clone()),
            Forward::Weak(weak) => weak.upgrade(),
        }
    }
}

/// Forwards unrecognized selectors to a swappable delegate while exposing
/// every selector for observation.
///
/// Dropping the proxy tears its object down, which completes every
/// [`MessageStream`] opened on it and releases its observers.
pub struct DelegateProxy {
    target: Target,
    forward: RwLock<Option<Forward>>,
}

impl DelegateProxy {
    /// Wrap `proxy_object`. Methods on its class are the wired
    /// implementations.
    pub fn new(interceptor: &Interceptor, proxy_object: Object) -> Self {
        Self {
            target: interceptor.wrap(proxy_object),
            forward: RwLock::new(None),
        }
    }

    /// The proxy's own target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Set the delegate that receives forwarded messages.
    ///
    /// With `retain` the proxy holds a strong reference; otherwise a
    /// deallocated delegate simply stops receiving. Takes effect on the next
    /// call; observers and hooks are unaffected.
    pub fn set_forward_to_delegate(&self, delegate: Option<&Target>, retain: bool) {
        let forward = delegate.map(|target| {
            if retain {
                Forward::Strong(target.clone())
            } else {
                Forward::Weak(target.downgrade())
            }
        });
        *self.forward.write() = forward;
    }

    pub fn forward_to_delegate(&self) -> Option<Target> {
        self.forward.read().as_ref().and_then(Forward::target)
    }

    /// Whether the proxy's class implements `selector` itself.
    pub fn has_wired_implementation(&self, selector: &Selector) -> bool {
        self.target.responds_to(selector)
    }

    fn is_observed(&self, selector: &Selector) -> bool {
        !self
            .target
            .inner()
            .shared()
            .observers
            .lookup(self.target.id(), &EventKind::MessageSent(selector.clone()))
            .is_empty()
    }

    pub fn responds_to(&self, selector: &Selector) -> bool {
        self.has_wired_implementation(selector)
            || self.is_observed(selector)
            || self
                .forward_to_delegate()
                .map_or(false, |delegate| delegate.responds_to(selector))
    }

    /// Observe `selector` arriving at the proxy.
    pub fn observe(
        &self,
        selector: impl Into<Selector>,
        callback: impl Fn(&Invocation) -> ObserverResult + Send + Sync + 'static,
    ) -> Result<Token> {
        let selector = selector.into();
        if self.has_wired_implementation(&selector) {
            debug!(selector = %selector, "observing a selector the proxy implements itself");
            return self.target.observe_sent(selector, callback);
        }
        self.target
            .observe_unhooked(EventKind::MessageSent(selector), callback)
    }

    /// Channel of `selector` arriving at the proxy, wired or not. Completes
    /// when the proxy is torn down.
    pub fn sent_messages(&self, selector: impl Into<Selector>) -> Result<MessageStream> {
        let selector = selector.into();
        let hooked = self.has_wired_implementation(&selector);
        let buffer = self.target.inner().shared().config.stream_buffer_size;
        MessageStream::open(&self.target, selector, buffer, hooked)
    }

    /// Deliver `selector` to the proxy.
    pub fn send(&self, selector: &Selector, args: &[Value]) -> Result<Value> {
        if self.has_wired_implementation(selector) {
            return self.target.send(selector, args);
        }
        if self.target.is_deallocated() {
            return Err(InterceptError::Deallocated(self.target.id()));
        }

        let inner = self.target.inner();
        let callbacks = inner
            .shared()
            .observers
            .lookup(inner.id(), &EventKind::MessageSent(selector.clone()));
        let observed = !callbacks.is_empty();
        let failures = if observed {
            let invocation = inner.invocation(selector, args.to_vec());
            fan_out(&callbacks, &invocation, inner.shared().config.fanout)
        } else {
            Vec::new()
        };

        let result = match self.forward_to_delegate() {
            Some(delegate) if delegate.responds_to(selector) => delegate.send(selector, args),
            _ if observed => Ok(Value::Nil),
            _ => Err(InterceptError::UnknownSelector {
                class: self.target.class().name().to_string(),
                selector: selector.clone(),
            }),
        };
        settle(selector, failures, result)
    }
}

impl Drop for DelegateProxy {
    fn drop(&mut self) {
        if let Err(err) = self.target.destroy() {
            warn!(proxy = %self.target.id(), error = %err, "observer failed while completing delegate proxy");
        }
    }
}

impl fmt::Debug for DelegateProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateProxy")
            .field("target", &self.target)
            .field("delegate", &self.forward_to_delegate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::StreamEvent;
    use crate::runtime::{ClassBuilder, Runtime};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup() -> (Interceptor, DelegateProxy, Target) {
        let runtime = Arc::new(Runtime::new());
        let proxy_class = ClassBuilder::new("ScrollDelegateProxy")
            .void_method("didScroll", |obj| {
                let n = obj.value_for_key("scrolls").as_int().unwrap_or(0);
                obj.set_value_for_key("scrolls", Value::Int(n + 1));
            })
            .register(&runtime)
            .unwrap();
        let delegate_class = ClassBuilder::new("RealDelegate")
            .method("heightForRow:", "d@:q", |_, args| {
                Ok(Value::Float(args[0].as_int().unwrap_or(0) as f64 * 10.0))
            })
            .register(&runtime)
            .unwrap();

        let interceptor = Interceptor::new(runtime);
        let proxy = DelegateProxy::new(&interceptor, Object::new(&proxy_class));
        let delegate = interceptor.instantiate(&delegate_class);
        (interceptor, proxy, delegate)
    }

    #[test]
    fn test_forwards_unwired_selector() {
        let (_interceptor, proxy, delegate) = setup();
        proxy.set_forward_to_delegate(Some(&delegate), false);

        let height = proxy
            .send(&"heightForRow:".into(), &[Value::Int(3)])
            .unwrap();
        assert_eq!(height, Value::Float(30.0));
        assert!(proxy.responds_to(&"heightForRow:".into()));
    }

    #[test]
    fn test_unknown_without_delegate_or_observer() {
        let (_interceptor, proxy, _delegate) = setup();
        let result = proxy.send(&"heightForRow:".into(), &[Value::Int(3)]);
        assert!(matches!(result, Err(InterceptError::UnknownSelector { .. })));
        assert!(!proxy.responds_to(&"heightForRow:".into()));
    }

    #[test]
    fn test_observed_without_delegate_returns_nil() {
        let (_interceptor, proxy, _delegate) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        proxy
            .observe("willDisplay:", move |inv| {
                assert_eq!(inv.arguments(), &[Value::Int(1)]);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let result = proxy.send(&"willDisplay:".into(), &[Value::Int(1)]).unwrap();
        assert!(result.is_nil());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wired_selector_observed_through_hook() {
        let (interceptor, proxy, _delegate) = setup();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        proxy
            .observe("didScroll", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        proxy.send(&"didScroll".into(), &[]).unwrap();
        proxy.send(&"didScroll".into(), &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(
            proxy.target().object().value_for_key("scrolls"),
            Value::Int(2)
        );
        assert_eq!(interceptor.stats().installed_hooks, 1);
    }

    #[test]
    fn test_weak_delegate_stops_receiving() {
        let (_interceptor, proxy, delegate) = setup();
        proxy.set_forward_to_delegate(Some(&delegate), false);
        drop(delegate);
        assert!(proxy.forward_to_delegate().is_none());
    }

    #[test]
    fn test_drop_completes_streams() {
        let (interceptor, proxy, _delegate) = setup();
        let wired = proxy.sent_messages("didScroll").unwrap();
        let forwarded = proxy.sent_messages("willDisplay:").unwrap();

        proxy.send(&"willDisplay:".into(), &[Value::Int(4)]).unwrap();
        drop(proxy);

        assert!(matches!(forwarded.try_recv(), Ok(StreamEvent::Message(_))));
        assert!(matches!(forwarded.try_recv(), Ok(StreamEvent::Completed)));
        assert!(matches!(wired.try_recv(), Ok(StreamEvent::Completed)));
        assert_eq!(interceptor.stats().observers, 0);
    }

    #[test]
    fn test_retained_delegate_outlives_caller() {
        let (_interceptor, proxy, delegate) = setup();
        proxy.set_forward_to_delegate(Some(&delegate), true);
        drop(delegate);
        assert!(proxy.forward_to_delegate().is_some());
    }
}
