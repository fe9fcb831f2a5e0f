//! The interceptor tying runtime, subclasses and observers together.

use crate::capabilities::{Interceptable, Observable};
use crate::delegate::DelegateProxy;
use crate::error::{InterceptError, ObserverResult, Result};
use crate::intercept::{self, Invocation, Target};
use crate::observers::{EventKind, FanoutPolicy, ObserverRegistry, Token};
use crate::runtime::{inspector, Class, Implementation, Object, Runtime};
use crate::subclass::{SubclassRegistry, SyntheticSubclass};
use crate::types::{InstanceId, Selector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Interceptor configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Behaviour when an observer fails during fan-out.
    /// Default: continue and report every failure.
    pub fanout: FanoutPolicy,

    /// Use signature-specific trampolines for simple signatures.
    /// Default: true
    pub trampolines: bool,

    /// Buffered events per message stream before it is dropped.
    /// Default: 1000
    pub stream_buffer_size: usize,

    /// Maximum number of synthetic subclasses (None = unbounded).
    pub max_synthetic_subclasses: Option<usize>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            fanout: FanoutPolicy::ContinueOnError,
            trampolines: true,
            stream_buffer_size: 1000,
            max_synthetic_subclasses: None,
        }
    }
}

impl InterceptorConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Leak-detection counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Synthetic subclasses created.
    pub dynamic_subclasses: usize,
    /// Synthetic subclasses with at least one hook.
    pub intercepting_classes: usize,
    /// Interception records across all subclasses.
    pub installed_hooks: usize,
    /// Records served by trampolines.
    pub trampolines: usize,
    /// Records served by generic forwarding.
    pub forwarded_methods: usize,
    /// Instances with at least one observer.
    pub active_bindings: usize,
    /// Observer entries across all instances.
    pub observers: usize,
    /// Wrapped instances not yet torn down.
    pub live_targets: usize,
    /// Delegate proxies assigned to a parent instance.
    pub assigned_proxies: usize,
}

pub(crate) struct Shared {
    pub(crate) config: InterceptorConfig,
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) subclasses: SubclassRegistry,
    pub(crate) observers: Arc<ObserverRegistry>,
    next_instance: AtomicU64,
    pub(crate) live_targets: AtomicUsize,
    /// At most one delegate proxy per parent instance, released when the
    /// parent is torn down.
    pub(crate) delegate_proxies: Mutex<HashMap<InstanceId, Arc<DelegateProxy>>>,
}

/// Entry point: wraps objects into interceptable [`Target`]s.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Interceptor {
    shared: Arc<Shared>,
}

impl Interceptor {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self::with_config(runtime, InterceptorConfig::default())
    }

    pub fn with_config(runtime: Arc<Runtime>, config: InterceptorConfig) -> Self {
        let subclasses =
            SubclassRegistry::new(Arc::clone(&runtime), config.max_synthetic_subclasses);
        Self {
            shared: Arc::new(Shared {
                config,
                runtime,
                subclasses,
                observers: ObserverRegistry::new(),
                next_instance: AtomicU64::new(1),
                live_targets: AtomicUsize::new(0),
                delegate_proxies: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide interceptor over [`Runtime::global`].
    pub fn global() -> &'static Interceptor {
        static GLOBAL: OnceLock<Interceptor> = OnceLock::new();
        GLOBAL.get_or_init(|| Interceptor::new(Arc::clone(Runtime::global())))
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.shared.runtime
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.shared.config
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.shared.observers
    }

    /// Take ownership of `object` and hand back its proxy handle.
    pub fn wrap(&self, object: Object) -> Target {
        let id = InstanceId(self.shared.next_instance.fetch_add(1, Ordering::SeqCst));
        self.shared.live_targets.fetch_add(1, Ordering::SeqCst);
        Target::new(id, object, Arc::clone(&self.shared))
    }

    /// Create and wrap a fresh instance of `class`.
    pub fn instantiate(&self, class: &Arc<Class>) -> Target {
        self.wrap(Object::new(class))
    }

    /// Synthetic subclass for `class`, created on first use.
    pub fn subclass_for(&self, class: &Arc<Class>) -> Result<Arc<SyntheticSubclass>> {
        self.shared.subclasses.subclass_for(class)
    }

    pub fn stats(&self) -> RuntimeStats {
        let subclasses = &self.shared.subclasses;
        RuntimeStats {
            dynamic_subclasses: subclasses.len(),
            intercepting_classes: subclasses.intercepting_count(),
            installed_hooks: subclasses.hook_count(),
            trampolines: subclasses.trampoline_count(),
            forwarded_methods: subclasses.forwarding_count(),
            active_bindings: self.shared.observers.binding_count(),
            observers: self.shared.observers.observer_count(),
            live_targets: self.shared.live_targets.load(Ordering::SeqCst),
            assigned_proxies: self.shared.delegate_proxies.lock().len(),
        }
    }

    // --- Delegate proxies ---

    /// The proxy assigned to `parent`, if any.
    pub fn assigned_delegate_proxy(&self, parent: &Target) -> Option<Arc<DelegateProxy>> {
        self.shared.delegate_proxies.lock().get(&parent.id()).cloned()
    }

    /// Assign `proxy` to `parent`, replacing any earlier assignment. The
    /// parent keeps the proxy alive until it is torn down.
    pub fn assign_delegate_proxy(&self, parent: &Target, proxy: Arc<DelegateProxy>) -> Result<()> {
        let replaced = {
            let mut proxies = self.shared.delegate_proxies.lock();
            if parent.is_deallocated() {
                return Err(InterceptError::Deallocated(parent.id()));
            }
            proxies.insert(parent.id(), proxy)
        };
        if replaced.is_some() {
            debug!(parent = %parent.id(), "replaced assigned delegate proxy");
        }
        Ok(())
    }

    /// The proxy assigned to `parent`, creating and assigning one from
    /// `create` on first use. Concurrent callers get the same proxy.
    pub fn delegate_proxy_for(
        &self,
        parent: &Target,
        create: impl FnOnce(&Target) -> Object,
    ) -> Result<Arc<DelegateProxy>> {
        let mut proxies = self.shared.delegate_proxies.lock();
        if let Some(existing) = proxies.get(&parent.id()) {
            return Ok(Arc::clone(existing));
        }
        if parent.is_deallocated() {
            return Err(InterceptError::Deallocated(parent.id()));
        }
        let proxy = Arc::new(DelegateProxy::new(self, create(parent)));
        proxies.insert(parent.id(), Arc::clone(&proxy));
        trace!(parent = %parent.id(), proxy = %proxy.target().id(), "assigned delegate proxy");
        Ok(proxy)
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Interceptable for Interceptor {
    fn install_hook(&self, class: &Arc<Class>, selector: &Selector) -> Result<()> {
        let subclass = self.subclass_for(class)?;
        if selector.is_dealloc() {
            intercept::install_dealloc_hook(&subclass, &self.shared.config)?;
        } else {
            subclass.install_hook(selector, &self.shared.config)?;
        }
        Ok(())
    }

    fn lookup_original_implementation(
        &self,
        class: &Arc<Class>,
        selector: &Selector,
    ) -> Result<Implementation> {
        let original = match class.superclass() {
            Some(parent) if class.is_synthetic() => parent,
            _ => class,
        };
        inspector::implementation_of(original, selector)
    }
}

impl Observable for Interceptor {
    fn register(
        &self,
        target: &Target,
        kind: EventKind,
        callback: Box<dyn Fn(&Invocation) -> ObserverResult + Send + Sync>,
    ) -> Result<Token> {
        target.observe(kind, callback, false)
    }

    fn dispose(&self, token: &Token) {
        self.shared.observers.dispose(token);
    }
}
