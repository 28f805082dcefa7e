//! Call lifecycle state machine, independent of any runtime.

mod state;

pub use state::{CallPhase, CallSession, CallTransition, InvalidTransition};
