//! Key-path observation state.

use crate::error::{InterceptError, Result};
use crate::intercept::{Target, WeakTarget};
use crate::observers::Token;
use crate::types::{Selector, Value};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Key-path observation options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyPathOptions {
    /// Emit the current value on registration.
    /// Default: true
    pub initial: bool,

    /// Keep the root target alive until the observation is disposed.
    /// Default: true
    pub retain_target: bool,
}

impl Default for KeyPathOptions {
    fn default() -> Self {
        Self {
            initial: true,
            retain_target: true,
        }
    }
}

impl KeyPathOptions {
    /// Observe without keeping the root alive. Tearing the root down emits a
    /// final `None` and ends the observation.
    pub fn weakly() -> Self {
        Self {
            retain_target: false,
            ..Self::default()
        }
    }
}

type ChangeCallback = Box<dyn Fn(Option<Value>) + Send + Sync>;

/// Tokens registered on the object at one depth of the path.
#[derive(Default)]
struct Level {
    tokens: Vec<Token>,
}

struct State {
    path: Vec<String>,
    callback: ChangeCallback,
    active: AtomicBool,
    /// Serializes re-attachment after a change.
    update: Mutex<()>,
    levels: Mutex<Vec<Level>>,
    /// Last emitted value; `None` until the first emission is recorded.
    last: Mutex<Option<Option<Value>>>,
    retained: Mutex<Option<Target>>,
}

/// Outcome of walking the path from some depth down to the leaf.
enum Walk {
    Value(Option<Value>),
    /// The path cannot continue; report `None` and stop observing.
    Broken(InterceptError),
}

impl State {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn emit(&self, value: Option<Value>) {
        {
            let mut last = self.last.lock();
            if last.as_ref() == Some(&value) {
                return;
            }
            *last = Some(value.clone());
        }
        (self.callback)(value);
    }

    fn record_without_emitting(&self, value: Option<Value>) {
        *self.last.lock() = Some(value);
    }

    /// Attach hooks on `object` at `depth` and everything below it.
    ///
    /// Returns the leaf value; each attached level is appended to `levels`.
    fn attach(
        self: &Arc<Self>,
        depth: usize,
        object: &Target,
        levels: &mut Vec<Level>,
    ) -> Result<Option<Value>> {
        let property = &self.path[depth];
        if object.class().property(property).is_none() {
            return Err(InterceptError::InvalidPropertyName {
                class: object.class().name().to_string(),
                property: property.clone(),
            });
        }

        let mut level = Level::default();
        let state = Arc::downgrade(self);
        let token = object.observe_sent(Selector::setter_for(property), move |invocation| {
            if let Some(state) = state.upgrade() {
                let value = invocation.argument(0).cloned().unwrap_or_default();
                state.changed(depth, value);
            }
            Ok(())
        })?;
        level.tokens.push(token);

        let state = Arc::downgrade(self);
        let token = object.observe_deallocating(move |_| {
            if let Some(state) = state.upgrade() {
                state.deallocated(depth);
            }
            Ok(())
        });
        match token {
            Ok(token) => level.tokens.push(token),
            Err(e) => {
                dispose_level(level);
                return Err(e);
            }
        }
        levels.push(level);

        // Raw read: going through the getter would notify its observers.
        let current = object.object().value_for_key(property);
        if depth + 1 == self.path.len() {
            return Ok(leaf(current));
        }
        match child(current, property)? {
            Some(next) => self.attach(depth + 1, &next, levels),
            None => Ok(None),
        }
    }

    /// Re-walk the path below `depth` after its setter received `value`.
    fn walk_from(self: &Arc<Self>, depth: usize, value: Value) -> Walk {
        let property = &self.path[depth];
        let _update = self.update.lock();

        let detached: Vec<Level> = {
            let mut levels = self.levels.lock();
            let keep = (depth + 1).min(levels.len());
            levels.drain(keep..).collect()
        };
        for level in detached {
            dispose_level(level);
        }

        if depth + 1 == self.path.len() {
            return Walk::Value(leaf(value));
        }
        let next = match child(value, property) {
            Ok(Some(next)) => next,
            Ok(None) => return Walk::Value(None),
            Err(e) => return Walk::Broken(e),
        };

        let mut attached = Vec::new();
        match self.attach(depth + 1, &next, &mut attached) {
            Ok(value) => {
                let mut levels = self.levels.lock();
                if self.is_active() {
                    levels.extend(attached);
                } else {
                    // Ended while attaching.
                    drop(levels);
                    for level in attached {
                        dispose_level(level);
                    }
                }
                Walk::Value(value)
            }
            Err(e) => {
                for level in attached {
                    dispose_level(level);
                }
                Walk::Broken(e)
            }
        }
    }

    fn changed(self: &Arc<Self>, depth: usize, value: Value) {
        if !self.is_active() {
            return;
        }
        match self.walk_from(depth, value) {
            Walk::Value(value) if self.is_active() => self.emit(value),
            Walk::Value(_) => {}
            Walk::Broken(err) => {
                warn!(path = %self.path.join("."), error = %err, "key path broken, stopping observation");
                self.finish();
            }
        }
    }

    fn deallocated(self: &Arc<Self>, depth: usize) {
        if !self.is_active() {
            return;
        }
        if depth == 0 {
            self.finish();
            return;
        }
        trace!(path = %self.path.join("."), depth, "object on key path deallocated");
        // No update lock here: the last handle to this object may be dropped
        // while a re-walk holds it.
        let detached: Vec<Level> = {
            let mut levels = self.levels.lock();
            let keep = depth.min(levels.len());
            levels.drain(keep..).collect()
        };
        for level in detached {
            dispose_level(level);
        }
        self.emit(None);
    }

    /// Emit the final `None` and release every registration. Runs once.
    fn finish(&self) {
        if self.release() {
            self.emit(None);
        }
    }

    fn dispose(&self) {
        self.release();
    }

    /// Returns false if the observation had already ended.
    fn release(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        let levels = std::mem::take(&mut *self.levels.lock());
        for level in levels {
            dispose_level(level);
        }
        // Dropped last and outside the locks: may tear the root down.
        let retained = self.retained.lock().take();
        drop(retained);
        true
    }
}

fn dispose_level(level: Level) {
    for token in level.tokens {
        token.dispose();
    }
}

fn leaf(value: Value) -> Option<Value> {
    match value {
        Value::Nil => None,
        Value::Weak(weak) => weak.upgrade().map(Value::Object),
        other => Some(other),
    }
}

/// The object an intermediate value continues the path with.
fn child(value: Value, property: &str) -> Result<Option<Target>> {
    match value {
        Value::Nil => Ok(None),
        Value::Object(target) => Ok(Some(target)),
        Value::Weak(weak) => Ok(weak.upgrade()),
        _ => Err(InterceptError::InvalidObjectOnKeyPath {
            property: property.to_string(),
        }),
    }
}

/// Live key-path observation. Dropping it disposes the observation.
pub struct PropertyObservation {
    state: Arc<State>,
    root: WeakTarget,
}

impl PropertyObservation {
    /// Stop observing. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.state.dispose();
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn key_path(&self) -> String {
        self.state.path.join(".")
    }

    /// The observed root, while it is alive.
    pub fn root(&self) -> Option<Target> {
        self.root.upgrade()
    }
}

impl Drop for PropertyObservation {
    fn drop(&mut self) {
        self.state.dispose();
    }
}

impl fmt::Debug for PropertyObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyObservation")
            .field("key_path", &self.key_path())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Observe the value at dotted `key_path` starting from `target`.
///
/// The callback receives `Some(value)` for each distinct value and `None`
/// when the path does not currently resolve. `self` components are skipped.
/// When the root is torn down, or an intermediate value turns out not to be
/// an object, a final `None` is delivered and the observation ends.
pub fn observe_key_path(
    target: &Target,
    key_path: &str,
    options: KeyPathOptions,
    callback: impl Fn(Option<Value>) + Send + Sync + 'static,
) -> Result<PropertyObservation> {
    let path: Vec<String> = key_path
        .split('.')
        .filter(|component| *component != "self")
        .map(str::to_string)
        .collect();
    if path.is_empty() || path.iter().any(String::is_empty) {
        return Err(InterceptError::InvalidPropertyName {
            class: target.class().name().to_string(),
            property: key_path.to_string(),
        });
    }

    let state = Arc::new(State {
        path,
        callback: Box::new(callback),
        active: AtomicBool::new(true),
        update: Mutex::new(()),
        levels: Mutex::new(Vec::new()),
        last: Mutex::new(None),
        retained: Mutex::new(options.retain_target.then(|| target.clone())),
    });

    let mut attached = Vec::new();
    let walked = {
        let _update = state.update.lock();
        state.attach(0, target, &mut attached)
    };
    match walked {
        Ok(value) => {
            state.levels.lock().extend(attached);
            if options.initial {
                state.emit(value);
            } else {
                state.record_without_emitting(value);
            }
        }
        Err(err @ InterceptError::InvalidObjectOnKeyPath { .. }) => {
            for level in attached {
                dispose_level(level);
            }
            warn!(path = key_path, error = %err, "key path broken, stopping observation");
            state.finish();
        }
        Err(err) => {
            for level in attached {
                dispose_level(level);
            }
            state.active.store(false, Ordering::SeqCst);
            return Err(err);
        }
    }

    Ok(PropertyObservation {
        state,
        root: target.downgrade(),
    })
}
