//! Delegate proxies.
//!
//! A [`DelegateProxy`] sits between a caller and a "real" delegate. Selectors
//! the proxy's own class implements are wired; everything else is forwarded
//! to the delegate verbatim. Any selector can be observed either way.

mod proxy;

pub use proxy::DelegateProxy;
