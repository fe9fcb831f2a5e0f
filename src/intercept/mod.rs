//! Selector and destruction interception.
//!
//! A [`Target`] owns a wrapped object and routes every message through the
//! hook table of its class's synthetic subclass. Hooks come in two flavours:
//! trampolines for a handful of simple signatures, which call the original
//! implementation without boxing arguments, and generic forwarding, which
//! captures an [`Invocation`]. Either way observers run before the original
//! implementation.

mod dealloc;
mod invocation;
mod record;
mod target;

pub use invocation::Invocation;
pub use record::{
    install_hook, InterceptionRecord, InterceptionStrategy, RecordLease, TrampolineKind,
};
pub use target::{Target, WeakTarget};

pub(crate) use dealloc::install_dealloc_hook;
