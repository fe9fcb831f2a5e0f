//! Per-instance observer registry.

use crate::error::{InterceptError, ObserverError, Result};
use crate::intercept::{Invocation, RecordLease, Target};
use crate::types::{InstanceId, ObserverId, Selector};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use super::types::{Callback, EventKind, FanoutPolicy, Token};

/// Internal observer state.
struct Entry {
    id: ObserverId,
    kind: EventKind,
    callback: Callback,
    /// Strong handle when the registration retains its target.
    _retained: Option<Target>,
    _lease: Option<RecordLease>,
}

/// Observers registered on one instance, in registration order.
struct Binding {
    entries: Mutex<Vec<Entry>>,
}

/// Observer side table keyed by instance handle.
///
/// Register and dispose take the table's write lock; the lookup path only
/// holds it long enough to find the instance's binding and then works under
/// that binding's own lock. No lock is held while callbacks run.
pub struct ObserverRegistry {
    bindings: RwLock<HashMap<InstanceId, Arc<Binding>>>,
    next_id: AtomicU64,
    this: Weak<ObserverRegistry>,
}

impl ObserverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            bindings: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Add an entry, creating the instance's binding if needed.
    pub fn register(
        &self,
        instance: InstanceId,
        kind: EventKind,
        callback: Callback,
        retained: Option<Target>,
        lease: Option<RecordLease>,
    ) -> Token {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        trace!(?instance, ?id, ?kind, "registering observer");

        let entry = Entry {
            id,
            kind,
            callback,
            _retained: retained,
            _lease: lease,
        };

        {
            let mut bindings = self.bindings.write();
            let binding = bindings.entry(instance).or_insert_with(|| {
                Arc::new(Binding {
                    entries: Mutex::new(Vec::new()),
                })
            });
            binding.entries.lock().push(entry);
        }

        Token {
            id,
            instance,
            registry: self.this.clone(),
        }
    }

    /// A token with no entry behind it, for registrations that completed
    /// immediately.
    pub fn detached(&self, instance: InstanceId) -> Token {
        Token {
            id: ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            instance,
            registry: self.this.clone(),
        }
    }

    /// Remove one entry. Returns false if it was already gone.
    pub fn dispose(&self, token: &Token) -> bool {
        let removed = {
            let mut bindings = self.bindings.write();
            let Some(binding) = bindings.get(&token.instance).cloned() else {
                return false;
            };
            let mut entries = binding.entries.lock();
            let removed = entries
                .iter()
                .position(|e| e.id == token.id)
                .map(|index| entries.remove(index));
            if entries.is_empty() {
                drop(entries);
                bindings.remove(&token.instance);
            }
            removed
        };

        // Dropped outside the locks: it may own the last handle to a target.
        let disposed = removed.is_some();
        drop(removed);
        if disposed {
            trace!(instance = ?token.instance, id = ?token.id, "disposed observer");
        }
        disposed
    }

    pub fn contains(&self, token: &Token) -> bool {
        let binding = self.bindings.read().get(&token.instance).cloned();
        binding.map_or(false, |b| b.entries.lock().iter().any(|e| e.id == token.id))
    }

    /// Snapshot of callbacks for `kind`, in registration order.
    pub fn lookup(&self, instance: InstanceId, kind: &EventKind) -> Vec<Callback> {
        self.collect(instance, |entry_kind| entry_kind == kind)
    }

    /// Snapshot of callbacks that fire at teardown.
    pub fn lookup_teardown(&self, instance: InstanceId) -> Vec<Callback> {
        self.collect(instance, EventKind::fires_on_teardown)
    }

    fn collect(&self, instance: InstanceId, matches: impl Fn(&EventKind) -> bool) -> Vec<Callback> {
        let Some(binding) = self.bindings.read().get(&instance).cloned() else {
            return Vec::new();
        };
        let entries = binding.entries.lock();
        entries
            .iter()
            .filter(|e| matches(&e.kind))
            .map(|e| Arc::clone(&e.callback))
            .collect()
    }

    /// Drop every entry for `instance`. Returns how many were released.
    pub fn remove_binding(&self, instance: InstanceId) -> usize {
        let Some(binding) = self.bindings.write().remove(&instance) else {
            return 0;
        };
        let entries = std::mem::take(&mut *binding.entries.lock());
        let released = entries.len();
        drop(entries);
        released
    }

    pub fn has_binding(&self, instance: InstanceId) -> bool {
        self.bindings.read().contains_key(&instance)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn entry_count(&self, instance: InstanceId) -> usize {
        let binding = self.bindings.read().get(&instance).cloned();
        binding.map_or(0, |b| b.entries.lock().len())
    }

    /// Entries across all instances.
    pub fn observer_count(&self) -> usize {
        let bindings: Vec<_> = self.bindings.read().values().cloned().collect();
        bindings.iter().map(|b| b.entries.lock().len()).sum()
    }
}

/// Invoke `callbacks` in order, collecting failures per `policy`.
pub fn fan_out(
    callbacks: &[Callback],
    invocation: &Invocation,
    policy: FanoutPolicy,
) -> Vec<ObserverError> {
    let mut failures = Vec::new();
    for callback in callbacks {
        if let Err(err) = callback(invocation) {
            failures.push(err);
            if policy == FanoutPolicy::AbortOnFirstError {
                break;
            }
        }
    }
    failures
}

/// Combine observer failures with the original implementation's result.
/// Observer failures win, since they happened first.
pub(crate) fn settle<T>(
    selector: &Selector,
    failures: Vec<ObserverError>,
    result: Result<T>,
) -> Result<T> {
    if failures.is_empty() {
        return result;
    }
    Err(InterceptError::ObserverFailed {
        selector: selector.clone(),
        failures,
    })
}
