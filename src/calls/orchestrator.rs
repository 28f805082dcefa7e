//! Turns UI intents into call sessions and protocol frames.

use super::error::CallError;
use super::manager::{CallManager, CallManagerConfig, CallSnapshot};
use crate::connection::ConnectionManager;
use chrono::{DateTime, Utc};
use log::info;
use sigcore::calls::CallSession;
use sigcore::schedule::{self, SupervisionWindow};
use sigcore::types::call::{CallData, CallId, Participant};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

pub struct CallOrchestrator {
    connection: Arc<ConnectionManager>,
    calls: Arc<CallManager>,
    windows: RwLock<Vec<SupervisionWindow>>,
}

impl CallOrchestrator {
    /// Must be called from within a Tokio runtime.
    pub fn new(connection: Arc<ConnectionManager>, config: CallManagerConfig) -> Self {
        let calls = CallManager::new(connection.clone(), config);
        Self {
            connection,
            calls,
            windows: RwLock::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> &Arc<CallManager> {
        &self.calls
    }

    /// Replaces the declared supervision windows, usually fetched over REST.
    pub fn set_supervision_windows(&self, windows: Vec<SupervisionWindow>) {
        *self.windows.write().unwrap_or_else(PoisonError::into_inner) = windows;
    }

    pub fn supervision_windows(&self) -> Vec<SupervisionWindow> {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a call placed at `at` falls outside every declared window.
    pub fn is_emergency_at(&self, at: DateTime<Utc>) -> bool {
        schedule::is_emergency(
            at,
            &self.windows.read().unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn mint_call_id(&self) -> CallId {
        loop {
            let id = CallId::generate();
            if !self.calls.is_retired(&id) {
                return id;
            }
        }
    }

    /// Places a call to `counterpart` and returns its freshly minted id.
    ///
    /// `counterpart` is forwarded as `callData.student` exactly as given. The
    /// session is Connecting once `call_initiate` has been handed to the
    /// connection. Fails with `NotConnected` or `Busy` without sending
    /// anything.
    pub fn initiate_call(
        &self,
        counterpart: Participant,
        supervision_id: &str,
    ) -> Result<CallId, CallError> {
        if counterpart.id.trim().is_empty() {
            return Err(CallError::MissingValue("counterpartId"));
        }
        if supervision_id.trim().is_empty() {
            return Err(CallError::MissingValue("supervisionId"));
        }
        if !self.connection.is_connected() {
            return Err(CallError::NotConnected);
        }

        let call_id = self.mint_call_id();
        let counterpart_id = counterpart.id.clone();
        let mut session =
            CallSession::new_outgoing(call_id.clone(), counterpart.clone(), supervision_id);
        session.is_emergency = self.is_emergency_at(Utc::now());
        let emergency = session.is_emergency;

        let call_data = CallData {
            student: Some(counterpart),
            ..Default::default()
        };
        self.calls.start_outgoing(session, call_data)?;

        info!(
            target: "Signal/Call",
            "Calling {counterpart_id} as {call_id}{}",
            if emergency { " (emergency)" } else { "" }
        );
        Ok(call_id)
    }

    pub fn accept_incoming(&self, call_id: &CallId) -> Result<(), CallError> {
        self.calls.accept(call_id)
    }

    pub fn decline_incoming(&self, call_id: &CallId) -> Result<(), CallError> {
        self.calls.decline(call_id)
    }

    pub fn hang_up(&self, call_id: &CallId) -> Result<(), CallError> {
        self.calls.hang_up(call_id)
    }

    pub fn toggle_mute(&self, call_id: &CallId) -> Result<bool, CallError> {
        self.calls.toggle_mute(call_id)
    }

    pub fn toggle_camera(&self, call_id: &CallId) -> Result<bool, CallError> {
        self.calls.toggle_camera(call_id)
    }

    pub fn release(&self, call_id: &CallId) -> bool {
        self.calls.release(call_id)
    }

    pub fn current(&self) -> Option<CallSnapshot> {
        self.calls.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CallSnapshot>> {
        self.calls.subscribe()
    }
}
