//! Call manager: hosts the single call session and drives it from inbound
//! frames, local intents and timers.

use super::error::CallError;
use super::timer::TaskGuard;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use log::{debug, info, warn};
use serde::Serialize;
use sigcore::calls::{CallPhase, CallSession, CallTransition, InvalidTransition};
use sigcore::protocol::{Message, MessageType, Payload};
use sigcore::types::call::{CallData, CallDirection, CallId, EndCallReason, Participant};
use sigcore::types::events::{Event, EventHandler, StreamFilter, SubscriptionId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for the call manager.
#[derive(Debug, Clone)]
pub struct CallManagerConfig {
    /// How long a call may stay Connecting before it fails.
    pub connect_timeout: Duration,
    /// Released call ids remembered for ignoring late frames.
    pub retired_capacity: usize,
    /// Elapsed-time tick period.
    pub tick_period: Duration,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            retired_capacity: 64,
            tick_period: Duration::from_secs(1),
        }
    }
}

impl From<&ClientConfig> for CallManagerConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.call_connect_timeout(),
            retired_capacity: config.retired_call_capacity,
            ..Default::default()
        }
    }
}

/// The view of the current call published to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub counterpart: Participant,
    pub supervision_id: String,
    pub direction: CallDirection,
    pub phase: CallPhase,
    pub elapsed_secs: u64,
    pub is_emergency: bool,
    pub muted: bool,
    pub camera_off: bool,
}

impl CallSnapshot {
    /// Elapsed time as `mm:ss`.
    pub fn elapsed_display(&self) -> String {
        format!("{:02}:{:02}", self.elapsed_secs / 60, self.elapsed_secs % 60)
    }
}

impl From<&CallSession> for CallSnapshot {
    fn from(session: &CallSession) -> Self {
        Self {
            call_id: session.call_id.clone(),
            counterpart: session.counterpart.clone(),
            supervision_id: session.supervision_id.clone(),
            direction: session.direction,
            phase: session.phase.clone(),
            elapsed_secs: session.elapsed_secs,
            is_emergency: session.is_emergency,
            muted: session.muted,
            camera_off: session.camera_off,
        }
    }
}

struct ActiveCall {
    session: CallSession,
    timer: Option<TaskGuard>,
    connect_timeout: Option<TaskGuard>,
}

impl ActiveCall {
    fn stop_timers(&mut self) {
        self.timer = None;
        self.connect_timeout = None;
    }
}

#[derive(Default)]
struct CallSlot {
    current: Option<ActiveCall>,
    retired: VecDeque<CallId>,
}

impl CallSlot {
    fn live(&self) -> Option<&CallSession> {
        self.current
            .as_ref()
            .map(|a| &a.session)
            .filter(|s| s.phase.is_live())
    }

    fn current_mut(&mut self, call_id: &CallId) -> Option<&mut ActiveCall> {
        self.current
            .as_mut()
            .filter(|a| a.session.call_id == *call_id)
    }

    fn is_retired(&self, call_id: &CallId) -> bool {
        self.retired.contains(call_id)
    }

    /// Drops the current session, stopping its timers, and remembers its id.
    fn retire(&mut self, capacity: usize) {
        if let Some(active) = self.current.take() {
            self.retired.push_back(active.session.call_id);
            while self.retired.len() > capacity {
                self.retired.pop_front();
            }
        }
    }
}

/// Forwards dispatched call frames without keeping the manager alive.
struct CallEventForwarder(Weak<CallManager>);

impl EventHandler for CallEventForwarder {
    fn handle_event(&self, event: &Event) {
        if let Some(manager) = self.0.upgrade() {
            manager.handle_event(event);
        }
    }
}

/// Owns the one call session a client may have.
///
/// Inbound call frames arrive through a `calls` subscription on the
/// connection's dispatcher. Frames for another call id, or for a call that has
/// already finished, are logged and ignored. A second `incoming_call` while a
/// call is live is rejected as busy without creating a session.
pub struct CallManager {
    connection: Arc<ConnectionManager>,
    config: CallManagerConfig,
    slot: Mutex<CallSlot>,
    snapshot_tx: watch::Sender<Option<CallSnapshot>>,
    this: Weak<CallManager>,
    subscription: SubscriptionId,
    _connection_watch: TaskGuard,
}

impl CallManager {
    /// Must be called from within a Tokio runtime.
    pub fn new(connection: Arc<ConnectionManager>, config: CallManagerConfig) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<CallManager>| {
            let subscription = connection.subscribe(
                "calls",
                StreamFilter::Calls,
                Arc::new(CallEventForwarder(this.clone())),
            );

            let mut state_rx = connection.subscribe_state();
            let weak = this.clone();
            let connection_watch = TaskGuard::spawn(async move {
                while state_rx.changed().await.is_ok() {
                    let state = *state_rx.borrow_and_update();
                    if state == ConnectionState::Open {
                        continue;
                    }
                    match weak.upgrade() {
                        Some(manager) => manager.on_connection_lost(state),
                        None => break,
                    }
                }
            });

            let (snapshot_tx, _) = watch::channel(None);
            Self {
                connection,
                config,
                slot: Mutex::new(CallSlot::default()),
                snapshot_tx,
                this: this.clone(),
                subscription,
                _connection_watch: connection_watch,
            }
        })
    }

    fn lock_slot(&self) -> MutexGuard<'_, CallSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, slot: &CallSlot) {
        self.snapshot_tx
            .send_replace(slot.current.as_ref().map(|a| CallSnapshot::from(&a.session)));
    }

    /// Replaces any finished session with `session`.
    fn install<'a>(&self, slot: &'a mut CallSlot, session: CallSession) -> &'a mut ActiveCall {
        slot.retire(self.config.retired_capacity);
        slot.current.insert(ActiveCall {
            session,
            timer: None,
            connect_timeout: None,
        })
    }

    fn arm_connect_timeout(&self, active: &mut ActiveCall) {
        let call_id = active.session.call_id.clone();
        let weak = self.this.clone();
        active.connect_timeout = Some(TaskGuard::after(self.config.connect_timeout, move || {
            if let Some(manager) = weak.upgrade() {
                manager.on_connect_timeout(&call_id);
            }
        }));
    }

    /// Connecting -> Connected. The elapsed timer starts here and only here.
    fn enter_connected(&self, active: &mut ActiveCall) -> Result<(), InvalidTransition> {
        active.session.apply_transition(CallTransition::Joined)?;
        active.connect_timeout = None;

        let call_id = active.session.call_id.clone();
        info!(target: "Signal/Call", "Call {call_id} connected");
        let weak = self.this.clone();
        active.timer = Some(TaskGuard::every(self.config.tick_period, move || {
            weak.upgrade().is_some_and(|manager| manager.tick(&call_id))
        }));
        Ok(())
    }

    fn tick(&self, call_id: &CallId) -> bool {
        let mut slot = self.lock_slot();
        let Some(active) = slot.current_mut(call_id) else {
            return false;
        };
        if !active.session.tick() {
            return false;
        }
        self.publish(&slot);
        true
    }

    fn reject_busy(&self, call_id: &CallId) {
        let reject = Message::new(Payload::CallReject {
            call_id: call_id.clone(),
            reason: Some(EndCallReason::Busy.wire_reason().to_string()),
        });
        if let Err(e) = self.connection.send(reject) {
            warn!(target: "Signal/Call", "Could not auto-reject {call_id}: {e}");
        }
    }

    fn on_incoming_call(&self, call_id: &CallId, supervision_id: &str, call_data: &CallData) {
        let mut slot = self.lock_slot();
        if slot.is_retired(call_id)
            || slot
                .current
                .as_ref()
                .is_some_and(|a| a.session.call_id == *call_id)
        {
            debug!(target: "Signal/Call", "Ignoring repeated incoming_call for {call_id}");
            return;
        }
        if let Some(active) = slot.live() {
            info!(
                target: "Signal/Call",
                "Rejecting incoming call {call_id}: busy with {} ({})",
                active.call_id,
                active.phase.name()
            );
            self.reject_busy(call_id);
            return;
        }
        let Some(caller) = call_data.caller.clone() else {
            warn!(target: "Signal/Call", "incoming_call {call_id} has no caller, ignoring");
            return;
        };

        let mut session = CallSession::new_incoming(call_id.clone(), caller, supervision_id);
        if let Err(e) = session.apply_transition(CallTransition::IncomingReceived) {
            warn!(target: "Signal/Call", "Cannot ring for {call_id}: {e}");
            return;
        }
        info!(
            target: "Signal/Call",
            "Incoming call {call_id} from {}",
            session.counterpart.id
        );
        self.install(&mut slot, session);
        self.publish(&slot);
    }

    fn on_remote_joined(&self, call_id: &CallId, message_type: MessageType) {
        let mut slot = self.lock_slot();
        let Some(active) = slot.current_mut(call_id) else {
            debug!(target: "Signal/Call", "Ignoring {message_type} for {call_id}: not the active call");
            return;
        };
        if !active.session.phase.is_connecting() {
            debug!(
                target: "Signal/Call",
                "Ignoring {message_type} for {call_id} while {}",
                active.session.phase.name()
            );
            return;
        }
        if let Err(e) = self.enter_connected(active) {
            debug!(target: "Signal/Call", "Ignoring {message_type}: {e}");
            return;
        }
        self.publish(&slot);
    }

    fn on_remote_finished(&self, call_id: &CallId, transition: CallTransition, message_type: MessageType) {
        let mut slot = self.lock_slot();
        let Some(active) = slot.current_mut(call_id) else {
            debug!(target: "Signal/Call", "Ignoring stale {message_type} for {call_id}");
            return;
        };
        if let Err(e) = active.session.apply_transition(transition) {
            debug!(target: "Signal/Call", "Ignoring {message_type} for {call_id}: {e}");
            return;
        }
        active.stop_timers();
        info!(
            target: "Signal/Call",
            "Call {call_id} {} by remote {message_type}",
            active.session.phase.name()
        );
        self.publish(&slot);
    }

    fn on_connect_timeout(&self, call_id: &CallId) {
        let mut slot = self.lock_slot();
        let Some(active) = slot.current_mut(call_id) else {
            return;
        };
        if active.session.apply_transition(CallTransition::TimedOut).is_err() {
            return;
        }
        active.stop_timers();
        warn!(target: "Signal/Call", "Call {call_id} timed out while connecting");

        let cancel = Message::new(Payload::CallReject {
            call_id: call_id.clone(),
            reason: Some(EndCallReason::Timeout.wire_reason().to_string()),
        });
        if let Err(e) = self.connection.send(cancel) {
            debug!(target: "Signal/Call", "Timeout notice for {call_id} not sent: {e}");
        }
        self.publish(&slot);
    }

    fn on_connection_lost(&self, state: ConnectionState) {
        let mut slot = self.lock_slot();
        let Some(active) = slot
            .current
            .as_mut()
            .filter(|a| a.session.phase.is_connecting())
        else {
            return;
        };
        if active
            .session
            .apply_transition(CallTransition::TransportLost)
            .is_ok()
        {
            active.stop_timers();
            warn!(
                target: "Signal/Call",
                "Call {} failed: connection {:?}",
                active.session.call_id,
                state
            );
            self.publish(&slot);
        }
    }

    /// Registers `session` as Connecting and sends its `call_initiate`.
    ///
    /// Nothing is recorded if the frame cannot be sent.
    pub(crate) fn start_outgoing(
        &self,
        mut session: CallSession,
        call_data: CallData,
    ) -> Result<(), CallError> {
        let mut slot = self.lock_slot();
        if let Some(active) = slot.live() {
            return Err(CallError::Busy(active.call_id.clone()));
        }
        session.apply_transition(CallTransition::LocalInitiated)?;
        self.connection.send(Message::new(Payload::CallInitiate {
            call_id: session.call_id.clone(),
            student_id: session.counterpart.id.clone(),
            supervision_id: session.supervision_id.clone(),
            call_data,
        }))?;

        let active = self.install(&mut slot, session);
        self.arm_connect_timeout(active);
        self.publish(&slot);
        Ok(())
    }

    /// Accepts a ringing call: sends `call_accepted` then `call_join`.
    ///
    /// Once both are handed to the connection the call is Connected. If either
    /// cannot be sent the call fails and `NotConnected` is returned.
    pub fn accept(&self, call_id: &CallId) -> Result<(), CallError> {
        let mut slot = self.lock_slot();
        let active = slot
            .current_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.clone()))?;
        if !active.session.phase.can_accept() {
            return Err(InvalidTransition {
                current_state: active.session.phase.name().to_string(),
                attempted: format!("{:?}", CallTransition::LocalAccepted),
            }
            .into());
        }
        if !self.connection.is_connected() {
            return Err(CallError::NotConnected);
        }
        active.session.apply_transition(CallTransition::LocalAccepted)?;

        let accepted = Message::new(Payload::CallAccepted {
            call_id: call_id.clone(),
            supervision_id: Some(active.session.supervision_id.clone()),
            call_data: None,
        });
        let sent = self.connection.send(accepted).and_then(|()| {
            self.connection.send(Message::new(Payload::CallJoin {
                call_id: call_id.clone(),
            }))
        });

        let result = match sent {
            Ok(()) => self.enter_connected(active).map_err(CallError::from),
            Err(e) => {
                if active
                    .session
                    .apply_transition(CallTransition::TransportLost)
                    .is_ok()
                {
                    active.stop_timers();
                }
                warn!(target: "Signal/Call", "Accept of {call_id} failed: {e}");
                Err(e.into())
            }
        };
        self.publish(&slot);
        result
    }

    /// Declines a ringing or connecting call with `call_reject` and discards
    /// the session.
    pub fn decline(&self, call_id: &CallId) -> Result<(), CallError> {
        let mut slot = self.lock_slot();
        let active = slot
            .current_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.clone()))?;
        if !active.session.phase.can_decline() {
            return Err(InvalidTransition {
                current_state: active.session.phase.name().to_string(),
                attempted: format!("{:?}", CallTransition::LocalDeclined),
            }
            .into());
        }
        active.session.apply_transition(CallTransition::LocalDeclined)?;
        active.stop_timers();

        let sent = self.connection.send(Message::new(Payload::CallReject {
            call_id: call_id.clone(),
            reason: Some(EndCallReason::Declined.wire_reason().to_string()),
        }));
        info!(target: "Signal/Call", "Declined call {call_id}");
        slot.retire(self.config.retired_capacity);
        self.publish(&slot);
        sent.map_err(CallError::from)
    }

    /// Ends the call locally without waiting for the peer.
    ///
    /// A connected call sends `call_end`; a call that never connected sends
    /// `call_reject` instead. The local session is finished even when the
    /// frame could not be sent, in which case `NotConnected` is returned.
    pub fn hang_up(&self, call_id: &CallId) -> Result<(), CallError> {
        let mut slot = self.lock_slot();
        let active = slot
            .current_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.clone()))?;

        let payload = if active.session.phase.is_connected() {
            active.session.apply_transition(CallTransition::LocalHangUp)?;
            Payload::CallEnd {
                call_id: call_id.clone(),
            }
        } else {
            active.session.apply_transition(CallTransition::LocalDeclined)?;
            Payload::CallReject {
                call_id: call_id.clone(),
                reason: Some(EndCallReason::Declined.wire_reason().to_string()),
            }
        };
        active.stop_timers();
        info!(
            target: "Signal/Call",
            "Hung up call {call_id} after {}s",
            active.session.elapsed_secs
        );

        let sent = self.connection.send(Message::new(payload));
        self.publish(&slot);
        sent.map_err(CallError::from)
    }

    /// Flips the local mute flag of a connected call. Returns the new value.
    pub fn toggle_mute(&self, call_id: &CallId) -> Result<bool, CallError> {
        self.update_connected(call_id, |session| {
            let muted = !session.muted;
            session.apply_transition(CallTransition::AudioMuteChanged { muted })?;
            Ok(muted)
        })
    }

    /// Flips the local camera flag of a connected call. Returns whether the
    /// camera is now off.
    pub fn toggle_camera(&self, call_id: &CallId) -> Result<bool, CallError> {
        self.update_connected(call_id, |session| {
            let off = !session.camera_off;
            session.apply_transition(CallTransition::VideoStateChanged { off })?;
            Ok(off)
        })
    }

    fn update_connected<T>(
        &self,
        call_id: &CallId,
        f: impl FnOnce(&mut CallSession) -> Result<T, InvalidTransition>,
    ) -> Result<T, CallError> {
        let mut slot = self.lock_slot();
        let active = slot
            .current_mut(call_id)
            .ok_or_else(|| CallError::NotFound(call_id.clone()))?;
        let value = f(&mut active.session)?;
        self.publish(&slot);
        Ok(value)
    }

    /// Drops a finished session once the UI is done with it. Its id is
    /// remembered so late frames for it stay ignored. Returns false if
    /// `call_id` is not the current session or it is still live.
    pub fn release(&self, call_id: &CallId) -> bool {
        let mut slot = self.lock_slot();
        let releasable = slot
            .current
            .as_ref()
            .is_some_and(|a| a.session.call_id == *call_id && a.session.phase.is_terminal());
        if !releasable {
            return false;
        }
        slot.retire(self.config.retired_capacity);
        debug!(target: "Signal/Call", "Released call {call_id}");
        self.publish(&slot);
        true
    }

    pub fn current(&self) -> Option<CallSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CallSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Whether a call is Ringing, Connecting or Connected.
    pub fn is_in_call(&self) -> bool {
        self.lock_slot().live().is_some()
    }

    pub fn is_retired(&self, call_id: &CallId) -> bool {
        self.lock_slot().is_retired(call_id)
    }
}

impl EventHandler for CallManager {
    fn handle_event(&self, event: &Event) {
        let Some(message) = event.message() else {
            return;
        };
        match &message.payload {
            Payload::IncomingCall {
                call_id,
                supervision_id,
                call_data,
            } => self.on_incoming_call(call_id, supervision_id, call_data),
            Payload::CallAccepted { call_id, .. } | Payload::UserJoined { call_id, .. } => {
                self.on_remote_joined(call_id, message.message_type())
            }
            Payload::CallEnded { call_id } => {
                self.on_remote_finished(call_id, CallTransition::RemoteEnded, MessageType::CallEnded)
            }
            Payload::CallReject { call_id, .. } => self.on_remote_finished(
                call_id,
                CallTransition::RemoteRejected,
                MessageType::CallReject,
            ),
            other => {
                debug!(target: "Signal/Call", "Ignoring inbound {}", other.message_type());
            }
        }
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        self.connection.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::transport::mock::MockTransportFactory;
    use sigcore::protocol::decode_frame;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn setup() -> (Arc<CallManager>, Arc<ConnectionManager>, Arc<MockTransportFactory>) {
        let factory = Arc::new(MockTransportFactory::new());
        let connection = ConnectionManager::new(
            ClientConfig::default(),
            Arc::new(StaticCredentials::new("tok", "sup-user")),
            factory.clone(),
        );
        let manager = CallManager::new(connection.clone(), CallManagerConfig::default());
        connection.connect();
        connection
            .subscribe_state()
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        settle().await;
        (manager, connection, factory)
    }

    fn inbound(manager: &CallManager, json: &str) {
        manager.handle_event(&Event::from(decode_frame(json).unwrap()));
    }

    fn incoming(manager: &CallManager, call_id: &str) {
        inbound(
            manager,
            &format!(
                r#"{{"type":"incoming_call","callId":"{call_id}","supervisionId":"sup-1","callData":{{"caller":{{"_id":"u7","name":"Bob"}}}}}}"#
            ),
        );
    }

    fn sent_frames(factory: &MockTransportFactory) -> Vec<serde_json::Value> {
        factory
            .sent()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    fn phase(manager: &CallManager) -> CallPhase {
        manager.current().unwrap().phase
    }

    #[tokio::test]
    async fn test_incoming_call_rings() {
        let (manager, _conn, _factory) = setup().await;
        incoming(&manager, "c1");

        let snapshot = manager.current().unwrap();
        assert!(snapshot.phase.is_ringing());
        assert_eq!(snapshot.direction, CallDirection::Incoming);
        assert_eq!(snapshot.counterpart, Participant::new("u7", "Bob"));
        assert!(manager.is_in_call());
    }

    #[tokio::test]
    async fn test_accept_sends_accepted_then_join_and_connects() {
        let (manager, _conn, factory) = setup().await;
        incoming(&manager, "c1");

        manager.accept(&CallId::new("c1")).unwrap();
        settle().await;

        assert!(phase(&manager).is_connected());
        let frames = sent_frames(&factory);
        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["presence_update", "call_accepted", "call_join"]);
        assert_eq!(frames[1]["callId"], "c1");
        assert_eq!(frames[2]["callId"], "c1");

        // The caller's join beacon arrives after we are already connected.
        inbound(&manager, r#"{"type":"user_joined","recipientId":"u7","callId":"c1"}"#);
        assert!(phase(&manager).is_connected());
    }

    #[tokio::test]
    async fn test_decline_sends_reject_and_discards_session() {
        let (manager, _conn, factory) = setup().await;
        incoming(&manager, "c1");

        manager.decline(&CallId::new("c1")).unwrap();
        settle().await;

        assert!(manager.current().is_none());
        assert!(manager.is_retired(&CallId::new("c1")));
        let frames = sent_frames(&factory);
        let last = frames.last().unwrap();
        assert_eq!(last["type"], "call_reject");
        assert_eq!(last["callId"], "c1");
        assert!(frames.iter().all(|f| f["type"] != "call_end"));

        // A replay of the same incoming_call does not ring again.
        incoming(&manager, "c1");
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_decline_of_connected_call_is_refused() {
        let (manager, _conn, factory) = setup().await;
        incoming(&manager, "c1");
        manager.accept(&CallId::new("c1")).unwrap();
        settle().await;
        let frames_before = factory.sent().len();

        match manager.decline(&CallId::new("c1")) {
            Err(CallError::InvalidTransition(e)) => assert_eq!(e.current_state, "connected"),
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        settle().await;
        assert!(phase(&manager).is_connected());
        assert!(!manager.is_retired(&CallId::new("c1")));
        assert_eq!(factory.sent().len(), frames_before);
    }

    #[tokio::test]
    async fn test_caller_cancel_while_ringing_ends_session() {
        let (manager, _conn, _factory) = setup().await;
        incoming(&manager, "c1");
        inbound(&manager, r#"{"type":"call_reject","callId":"c1"}"#);

        match phase(&manager) {
            CallPhase::Ended { reason, .. } => assert_eq!(reason, EndCallReason::RemoteRejected),
            other => panic!("unexpected phase {other:?}"),
        }
        assert!(!manager.is_in_call());
    }

    #[tokio::test]
    async fn test_toggles_only_while_connected() {
        let (manager, _conn, factory) = setup().await;
        incoming(&manager, "c1");
        let id = CallId::new("c1");
        assert!(matches!(
            manager.toggle_mute(&id),
            Err(CallError::InvalidTransition(_))
        ));

        manager.accept(&id).unwrap();
        settle().await;
        let frames_before = factory.sent().len();

        assert!(manager.toggle_mute(&id).unwrap());
        assert!(manager.toggle_camera(&id).unwrap());
        assert!(!manager.toggle_mute(&id).unwrap());
        settle().await;

        let snapshot = manager.current().unwrap();
        assert!(!snapshot.muted);
        assert!(snapshot.camera_off);
        assert_eq!(factory.sent().len(), frames_before);
    }

    #[tokio::test]
    async fn test_release_requires_terminal_phase() {
        let (manager, _conn, _factory) = setup().await;
        incoming(&manager, "c1");
        let id = CallId::new("c1");
        manager.accept(&id).unwrap();
        assert!(!manager.release(&id));

        inbound(&manager, r#"{"type":"call_ended","callId":"c1"}"#);
        assert!(manager.release(&id));
        assert!(manager.current().is_none());

        inbound(&manager, r#"{"type":"call_accepted","callId":"c1"}"#);
        assert!(manager.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_timer_stops_when_call_ends() {
        let (manager, _conn, _factory) = setup().await;
        incoming(&manager, "c1");
        let id = CallId::new("c1");
        manager.accept(&id).unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(manager.current().unwrap().elapsed_secs, 2);
        assert_eq!(manager.current().unwrap().elapsed_display(), "00:02");

        manager.hang_up(&id).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = manager.current().unwrap();
        assert_eq!(snapshot.elapsed_secs, 2);
        match snapshot.phase {
            CallPhase::Ended { reason, .. } => assert_eq!(reason, EndCallReason::LocalHangUp),
            other => panic!("unexpected phase {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_accept_when_disconnected_keeps_ringing() {
        let (manager, connection, _factory) = setup().await;
        incoming(&manager, "c1");
        connection.close();
        settle().await;

        assert!(matches!(
            manager.accept(&CallId::new("c1")),
            Err(CallError::NotConnected)
        ));
        assert!(phase(&manager).is_ringing());
    }

    #[test]
    fn test_elapsed_display_formats_minutes() {
        let mut session = CallSession::new_outgoing(
            CallId::new("c9"),
            Participant::new("u1", "Ann"),
            "sup-1",
        );
        session.elapsed_secs = 754;
        assert_eq!(CallSnapshot::from(&session).elapsed_display(), "12:34");
    }
}
