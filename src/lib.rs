//! # Interpose
//!
//! Method interception for dynamic objects: observe any message sent to an
//! object, and its destruction, without touching the object's class.
//!
//! ## Core Concepts
//!
//! - **Runtime**: Classes with type-encoded method tables and declared properties
//! - **Targets**: Proxy handles that own a wrapped object and route every message
//! - **Synthetic subclasses**: One per intercepted class, holding the hooks
//! - **Observers**: Per-instance callbacks, fired before the original method
//! - **Teardown**: Deallocating observers fire once before the object goes away,
//!   deallocated observers once after
//!
//! ## Example
//!
//! ```ignore
//! use interpose::{ClassBuilder, Interceptor, Runtime};
//! use std::sync::Arc;
//!
//! let runtime = Arc::new(Runtime::new());
//! let counter = ClassBuilder::new("Counter")
//!     .void_method("increment", |obj| {
//!         let n = obj.value_for_key("count").as_int().unwrap_or(0);
//!         obj.set_value_for_key("count", (n + 1).into());
//!     })
//!     .register(&runtime)?;
//!
//! let interceptor = Interceptor::new(runtime);
//! let target = interceptor.instantiate(&counter);
//!
//! // Observe a message
//! let token = target.observe_sent("increment", |invocation| {
//!     println!("{} sent", invocation.selector());
//!     Ok(())
//! })?;
//! target.send_void(&"increment".into())?;
//!
//! // Observe teardown
//! target.observe_deallocating(|_| Ok(()))?;
//! token.dispose();
//! target.destroy()?;
//! ```

pub mod capabilities;
pub mod delegate;
pub mod error;
pub mod intercept;
pub mod interceptor;
pub mod kvo;
pub mod observers;
pub mod runtime;
pub mod subclass;
pub mod types;

// Re-exports
pub use capabilities::{Interceptable, Observable};
pub use delegate::DelegateProxy;
pub use error::{InterceptError, ObserverError, ObserverResult, Result};
pub use intercept::{
    Invocation, InterceptionRecord, InterceptionStrategy, RecordLease, Target, TrampolineKind,
    WeakTarget,
};
pub use interceptor::{Interceptor, InterceptorConfig, RuntimeStats};
pub use kvo::{observe_key_path, KeyPathOptions, PropertyObservation};
pub use observers::{
    Callback, DropReason, EventKind, FanoutPolicy, MessageStream, ObserverRegistry, StreamEvent,
    Token,
};
pub use runtime::{Class, ClassBuilder, Implementation, Method, Object, Runtime, Signature, TypeLayout};
pub use subclass::{SubclassRegistry, SyntheticSubclass};
pub use types::*;
