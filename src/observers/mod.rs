//! Observer registration for intercepted instances.
//!
//! Observers are stored per instance, keyed by the
//! [`InstanceId`](crate::types::InstanceId) issued when the object was
//! wrapped:
//! - Message-sent observers for a selector
//! - Deallocating observers, fired once at teardown
//! - Deallocated observers, fired once after the original `dealloc`
//!
//! Registrations support:
//! - Disposal through a [`Token`] (idempotent)
//! - Optional retention of the target
//! - Channel delivery via [`MessageStream`]
//!
//! # Example
//!
//! ```ignore
//! let token = target.observe_sent("increment", |invocation| {
//!     println!("sent {:?}", invocation.arguments());
//!     Ok(())
//! })?;
//! target.send_void(&"increment".into())?;
//! token.dispose();
//! ```
//!
//! [`InstanceId`]: crate::types::InstanceId

mod registry;
mod stream;
mod types;

pub use registry::{fan_out, ObserverRegistry};
pub use stream::{DropReason, MessageStream, StreamEvent};
pub use types::{Callback, EventKind, FanoutPolicy, Token};

pub(crate) use registry::settle;
