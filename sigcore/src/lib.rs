//! Runtime-agnostic core of the supervision call-signaling client: wire
//! protocol, event dispatch, call state machine, reconnect policy and the
//! network traits implemented by the transport crates.

pub mod backoff;
pub mod calls;
pub mod net;
pub mod protocol;
pub mod schedule;
pub mod types;
