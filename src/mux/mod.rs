//! Session multiplexer.
//!
//! The [`Multiplexer`] owns the session registry and is the single place
//! where client messages and adapter events turn into session state
//! transitions. Adapter events reach it through pump tasks that read the
//! adapters' event channels, so everything touching one session is
//! serialized by that session's lock.

mod multiplexer;

pub use multiplexer::{Multiplexer, MuxSettings, SessionSnapshot};
