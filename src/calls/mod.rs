//! Call signaling on top of the connection.
//!
//! - [`CallManager`]: hosts the single [`CallSession`] and applies inbound
//!   `incoming_call`, `call_accepted`, `user_joined`, `call_ended` and
//!   `call_reject` frames to it
//! - [`CallOrchestrator`]: mints call ids, classifies emergency calls and turns
//!   UI intents (call, accept, decline, hang up, mute, camera) into frames
//! - [`CallSnapshot`]: what the UI layer renders, published on a watch channel
//!
//! At most one session is Ringing, Connecting or Connected at a time. The
//! elapsed-time timer runs only while Connected and is stopped on every
//! transition out of it.

mod error;
mod manager;
mod orchestrator;
mod timer;

pub use error::CallError;
pub use manager::{CallManager, CallManagerConfig, CallSnapshot};
pub use orchestrator::CallOrchestrator;
pub use sigcore::calls::{CallPhase, CallSession, CallTransition, InvalidTransition};
