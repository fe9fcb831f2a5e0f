//! Destruction interception.
//!
//! The `dealloc` hook is installed once per synthetic subclass; the fan-out
//! to observers happens per instance at teardown.

use crate::error::Result;
use crate::interceptor::InterceptorConfig;
use crate::intercept::record::{install_hook, InterceptionRecord};
use crate::intercept::target::TargetInner;
use crate::observers::{fan_out, settle, EventKind};
use crate::subclass::SyntheticSubclass;
use crate::types::Selector;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::trace;

/// Install the teardown hook on `subclass`. The original class need not
/// implement `dealloc`.
pub(crate) fn install_dealloc_hook(
    subclass: &SyntheticSubclass,
    config: &InterceptorConfig,
) -> Result<Arc<InterceptionRecord>> {
    install_hook(subclass, &Selector::dealloc(), config)
}

/// Tear `target` down exactly once.
///
/// Order: deallocating observers (registration order), then removal of the
/// instance's binding and delegate proxy, then the original `dealloc`, then
/// deallocated observers.
pub(crate) fn teardown(target: &TargetInner) -> Result<()> {
    if !target.begin_teardown() {
        return Ok(());
    }

    let selector = Selector::dealloc();
    let shared = target.shared();
    let invocation = target.invocation(&selector, Vec::new());

    let callbacks = shared.observers.lookup_teardown(target.id());
    let mut failures = if callbacks.is_empty() {
        Vec::new()
    } else {
        fan_out(&callbacks, &invocation, shared.config.fanout)
    };
    drop(callbacks);

    let (deallocated, proxy, result) = {
        let mut finished = target.finished().lock();
        let deallocated = shared.observers.lookup(target.id(), &EventKind::Deallocated);

        let released = shared.observers.remove_binding(target.id());
        trace!(instance = %target.id(), released, "released observer binding");
        let proxy = shared.delegate_proxies.lock().remove(&target.id());

        let object = target.object();
        let result = match object.class().method(&selector) {
            Some(method) => method.implementation().call(object, &[]).map(|_| ()),
            None => Ok(()),
        };
        *finished = true;
        (deallocated, proxy, result)
    };

    shared.live_targets.fetch_sub(1, Ordering::SeqCst);
    // The proxy's own teardown completes its observers.
    drop(proxy);
    if !deallocated.is_empty() {
        failures.extend(fan_out(&deallocated, &invocation, shared.config.fanout));
    }
    settle(&selector, failures, result)
}
