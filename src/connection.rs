//! The single signaling connection.
//!
//! [`ConnectionManager`] owns at most one live transport at a time. Each
//! attempt gets a fresh transport and a new generation number; events from an
//! older generation are ignored. On open it announces presence, then decodes
//! every inbound text frame and hands it to the [`EventBus`] in arrival order.
//! When the transport goes away without an explicit [`ConnectionManager::close`],
//! a reconnect is scheduled with exponential backoff. A dial that does not
//! complete within the connect timeout, and a link that stays silent past the
//! keepalive timeout, count as unclean losses.

use crate::config::ClientConfig;
use crate::credentials::{self, CredentialStore};
use crate::error::{ConnectionError, SendError};
use crate::transport::{TransportEvent, TransportFactory, redact_token};
use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use sigcore::backoff::ReconnectPolicy;
use sigcore::protocol::{Message, Payload, PresenceStatus, decode_frame};
use sigcore::types::events::{Event, EventBus, EventHandler, StreamFilter, SubscriptionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const ERROR_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

struct ReconnectTimer {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct ConnectionInner {
    state: ConnectionState,
    /// Failed cycles since the last successful open.
    attempt: u32,
    last_open: Option<DateTime<Utc>>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    generation: u64,
    reconnect: Option<ReconnectTimer>,
    next_timer_id: u64,
}

pub struct ConnectionManager {
    config: ClientConfig,
    policy: ReconnectPolicy,
    credentials: Arc<dyn CredentialStore>,
    transport_factory: Arc<dyn TransportFactory>,
    dispatcher: Arc<EventBus>,
    inner: Mutex<ConnectionInner>,
    state_tx: watch::Sender<ConnectionState>,
    errors_tx: broadcast::Sender<ConnectionError>,
    decode_failures: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialStore>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (errors_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Arc::new(Self {
            policy: config.reconnect_policy(),
            config,
            credentials,
            transport_factory,
            dispatcher: Arc::new(EventBus::new()),
            inner: Mutex::new(ConnectionInner::default()),
            state_tx,
            errors_tx,
            decode_failures: AtomicU64::new(0),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut ConnectionInner, state: ConnectionState) {
        if inner.state != state {
            debug!(target: "Signal/Conn", "{:?} -> {:?}", inner.state, state);
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn report(&self, error: ConnectionError) {
        // No receivers is fine.
        let _ = self.errors_tx.send(error);
    }

    /// Starts a connection attempt in the background.
    ///
    /// Does nothing while Connecting or Open, or when the credential store
    /// has no usable token and user id. A pending reconnect timer is
    /// cancelled and the attempt happens now. Must be called from within a
    /// Tokio runtime.
    pub fn connect(self: &Arc<Self>) {
        let Some((token, user_id)) = credentials::usable(self.credentials.as_ref()) else {
            info!(target: "Signal/Conn", "No credentials available, staying disconnected");
            return;
        };
        let url = match self.config.ws_url(&token) {
            Ok(url) => url,
            Err(e) => {
                warn!(target: "Signal/Conn", "Cannot build signaling URL: {e}");
                self.report(ConnectionError::Config(e.to_string()));
                return;
            }
        };

        let mut inner = self.lock_inner();
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!(target: "Signal/Conn", "connect() ignored while {:?}", inner.state);
            return;
        }
        if let Some(timer) = inner.reconnect.take() {
            debug!(target: "Signal/Conn", "Cancelling pending reconnect, connecting now");
            timer.handle.abort();
        }

        inner.generation += 1;
        let generation = inner.generation;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        inner.outbound = Some(outbound_tx);
        self.set_state(&mut inner, ConnectionState::Connecting);
        let attempt = inner.attempt;
        drop(inner);

        info!(
            target: "Signal/Conn",
            "Connecting to {} (attempt {})",
            redact_token(&url),
            attempt + 1
        );
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_connection(generation, url, user_id, outbound_rx)
                .await
        });
    }

    async fn run_connection(
        self: Arc<Self>,
        generation: u64,
        url: String,
        user_id: String,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        let this = Arc::clone(&self);
        // Runs on every exit path; the value is whether the close was clean.
        let mut clean = scopeguard::guard(false, move |clean| {
            this.connection_lost(generation, clean);
        });

        let connect_timeout = self.config.connect_timeout();
        let dial = tokio::time::timeout(
            connect_timeout,
            self.transport_factory.create_transport(&url),
        );
        let (transport, mut events) = match dial.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(target: "Signal/Conn", "Connection attempt failed: {e}");
                self.report(ConnectionError::Transport(e.to_string()));
                return;
            }
            Err(_) => {
                warn!(target: "Signal/Conn", "Connection attempt timed out after {connect_timeout:?}");
                self.report(ConnectionError::Transport(format!(
                    "connect timed out after {}s",
                    connect_timeout.as_secs()
                )));
                return;
            }
        };

        let keepalive_period = self.config.keepalive_interval();
        let keepalive_timeout = self.config.keepalive_timeout();
        let mut keepalive =
            tokio::time::interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        last_inbound = Instant::now();
                        if !self.opened(generation, &user_id) {
                            debug!(target: "Signal/Conn", "Opened after close or supersede, dropping transport");
                            break;
                        }
                    }
                    Some(TransportEvent::TextReceived(text)) => {
                        last_inbound = Instant::now();
                        self.handle_frame(generation, &text);
                    }
                    Some(TransportEvent::Heartbeat) => {
                        last_inbound = Instant::now();
                        trace!(target: "Signal/Conn", "Heartbeat");
                    }
                    Some(TransportEvent::Disconnected { clean: was_clean }) => {
                        *clean = was_clean;
                        break;
                    }
                    None => break,
                },
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = transport.send_text(&frame).await {
                            warn!(target: "Signal/Conn", "Write failed: {e}");
                            self.report(ConnectionError::Transport(e.to_string()));
                            break;
                        }
                    }
                    None => {
                        debug!(target: "Signal/Conn", "Outbound queue closed, releasing transport");
                        *clean = true;
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    let silent = last_inbound.elapsed();
                    if silent >= keepalive_timeout {
                        warn!(target: "Signal/Conn", "Nothing received for {}s, dropping link", silent.as_secs());
                        self.report(ConnectionError::Transport(format!(
                            "no traffic for {}s",
                            silent.as_secs()
                        )));
                        break;
                    }
                    if let Err(e) = transport.ping().await {
                        warn!(target: "Signal/Conn", "Keepalive ping failed: {e}");
                        self.report(ConnectionError::Transport(e.to_string()));
                        break;
                    }
                }
            }
        }

        transport.disconnect().await;
    }

    /// Marks the connection Open and queues the presence announcement as its
    /// first frame. Returns false if this attempt is no longer wanted.
    fn opened(&self, generation: u64, user_id: &str) -> bool {
        let mut inner = self.lock_inner();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            return false;
        }
        inner.attempt = 0;
        inner.last_open = Some(Utc::now());
        self.set_state(&mut inner, ConnectionState::Open);
        info!(target: "Signal/Conn", "Connection open");

        let presence = Message::new(Payload::PresenceUpdate {
            user_id: user_id.to_string(),
            status: PresenceStatus::Online,
        });
        if let Err(e) = self.enqueue(&inner, &presence) {
            warn!(target: "Signal/Conn", "Failed to queue presence update: {e}");
        }
        true
    }

    fn delivers(&self, generation: u64) -> bool {
        let inner = self.lock_inner();
        inner.generation == generation && inner.state == ConnectionState::Open
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if !self.delivers(generation) {
            debug!(target: "Signal/Conn", "Dropping frame received after close");
            return;
        }

        let event = match decode_frame(text) {
            Ok(frame) => Event::from(frame),
            Err(e) => {
                let total = self.decode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(target: "Signal/Conn", "Dropping malformed frame ({total} so far): {e}");
                return;
            }
        };

        match &event {
            Event::Unknown(unknown) => {
                info!(target: "Signal/Conn", "Received frame of unknown type '{}'", unknown.message_type);
            }
            Event::Message(message) => {
                if let Payload::Error { message: reason } = &message.payload {
                    warn!(target: "Signal/Conn", "Server reported an error: {reason}");
                }
            }
        }

        // close() may have run while decoding.
        if !self.delivers(generation) {
            debug!(target: "Signal/Conn", "Dropping frame received after close");
            return;
        }
        self.dispatcher.dispatch(&event);
    }

    fn connection_lost(self: &Arc<Self>, generation: u64, clean: bool) {
        let mut inner = self.lock_inner();
        if inner.generation != generation {
            debug!(target: "Signal/Conn", "Superseded connection finished");
            return;
        }
        inner.outbound = None;

        if inner.state == ConnectionState::Closing {
            self.set_state(&mut inner, ConnectionState::Disconnected);
            info!(target: "Signal/Conn", "Connection closed");
            return;
        }

        let delay = self.policy.delay_for(inner.attempt);
        inner.attempt = inner.attempt.saturating_add(1);
        self.set_state(&mut inner, ConnectionState::Disconnected);
        info!(
            target: "Signal/Conn",
            "Connection lost ({}), reconnecting in {:?} (attempt {})",
            if clean { "closed by server" } else { "unclean" },
            delay,
            inner.attempt + 1
        );
        self.schedule_reconnect(&mut inner, delay);
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut ConnectionInner, delay: Duration) {
        if let Some(previous) = inner.reconnect.take() {
            previous.handle.abort();
        }
        inner.next_timer_id += 1;
        let id = inner.next_timer_id;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.fire_reconnect(id);
            }
        });
        inner.reconnect = Some(ReconnectTimer { id, handle });
    }

    fn fire_reconnect(self: &Arc<Self>, id: u64) {
        {
            let mut inner = self.lock_inner();
            if inner.reconnect.as_ref().is_none_or(|t| t.id != id) {
                return;
            }
            // Detach rather than abort: this is the timer's own task.
            inner.reconnect = None;
        }
        self.connect();
    }

    /// Sends `message`, stamped with the current time.
    ///
    /// Fails without queueing when the connection is not Open. Failures are
    /// also published on [`Self::errors`].
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        let result = {
            let inner = self.lock_inner();
            self.enqueue(&inner, &message)
        };
        if let Err(e) = &result {
            warn!(target: "Signal/Conn", "Send failed: {e}");
            self.report(ConnectionError::SendFailed(message.message_type()));
        }
        result
    }

    fn enqueue(&self, inner: &ConnectionInner, message: &Message) -> Result<(), SendError> {
        let not_connected = || SendError::NotConnected(message.message_type());
        if inner.state != ConnectionState::Open {
            return Err(not_connected());
        }
        let outbound = inner.outbound.as_ref().ok_or_else(not_connected)?;
        let frame = message.encode(Utc::now())?;
        outbound.send(frame).map_err(|_| not_connected())
    }

    /// Releases the transport and cancels any pending reconnect.
    ///
    /// Once this returns no new frame is handed to subscribers. A dispatch
    /// already running on another worker thread finishes its current frame.
    /// Subscribers stay registered; a later [`Self::connect`] resumes delivery
    /// to them.
    pub fn close(&self) {
        let mut inner = self.lock_inner();
        if let Some(timer) = inner.reconnect.take() {
            debug!(target: "Signal/Conn", "Cancelling pending reconnect");
            timer.handle.abort();
        }
        inner.outbound = None;
        if matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            info!(target: "Signal/Conn", "Closing connection");
            self.set_state(&mut inner, ConnectionState::Closing);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_inner().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn retry_attempt(&self) -> u32 {
        self.lock_inner().attempt
    }

    pub fn last_open(&self) -> Option<DateTime<Utc>> {
        self.lock_inner().last_open
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.lock_inner().reconnect.is_some()
    }

    /// Frames dropped because they could not be decoded.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.errors_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &Arc<EventBus> {
        &self.dispatcher
    }

    pub fn subscribe(
        &self,
        stream: impl Into<String>,
        filter: StreamFilter,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        self.dispatcher.subscribe(stream, filter, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::transport::Transport;
    use crate::transport::mock::MockTransportFactory;
    use async_trait::async_trait;
    use sigcore::protocol::MessageType;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn manager(
        credentials: StaticCredentials,
    ) -> (Arc<ConnectionManager>, Arc<MockTransportFactory>) {
        let factory = Arc::new(MockTransportFactory::new());
        let manager = ConnectionManager::new(
            ClientConfig::default(),
            Arc::new(credentials),
            factory.clone(),
        );
        (manager, factory)
    }

    async fn open(manager: &Arc<ConnectionManager>) {
        manager.connect();
        manager
            .subscribe_state()
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        settle().await;
    }

    fn frame_types(factory: &MockTransportFactory) -> Vec<String> {
        factory
            .sent()
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connect_without_token_stays_disconnected() {
        let (manager, factory) = manager(StaticCredentials::new("", "u1"));
        manager.connect();
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.has_pending_reconnect());
        assert!(factory.dialed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presence_update_is_first_frame() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        open(&manager).await;

        assert_eq!(
            factory.dialed.lock().unwrap().as_slice(),
            ["ws://127.0.0.1:3001/ws?token=tok"]
        );
        let first: serde_json::Value = serde_json::from_str(&factory.sent()[0]).unwrap();
        assert_eq!(first["type"], "presence_update");
        assert_eq!(first["userId"], "u1");
        assert_eq!(first["status"], "online");
        assert!(first["timestamp"].is_string());
        assert!(manager.last_open().is_some());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_open() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        open(&manager).await;
        manager.connect();
        settle().await;
        assert_eq!(factory.dialed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_and_reports() {
        let (manager, _factory) = manager(StaticCredentials::new("tok", "u1"));
        let mut errors = manager.errors();

        let result = manager.send(Message::new(Payload::CallEnd {
            call_id: "c1".into(),
        }));
        assert!(matches!(
            result,
            Err(SendError::NotConnected(MessageType::CallEnd))
        ));
        assert_eq!(
            errors.try_recv().unwrap(),
            ConnectionError::SendFailed(MessageType::CallEnd)
        );
    }

    #[tokio::test]
    async fn test_frames_are_sent_in_order() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        open(&manager).await;

        for call_id in ["c1", "c2"] {
            manager
                .send(Message::new(Payload::CallJoin {
                    call_id: call_id.into(),
                }))
                .unwrap();
        }
        manager
            .send(Message::new(Payload::CallEnd {
                call_id: "c2".into(),
            }))
            .unwrap();
        settle().await;

        assert_eq!(
            frame_types(&factory),
            vec!["presence_update", "call_join", "call_join", "call_end"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_schedules_reconnect_and_open_resets_attempt() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        open(&manager).await;

        factory
            .inject(TransportEvent::Disconnected { clean: false })
            .await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.has_pending_reconnect());
        assert_eq!(manager.retry_attempt(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(factory.dialed.lock().unwrap().len(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.retry_attempt(), 0);
        assert!(!manager.has_pending_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_connect_cancels_pending_timer() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        open(&manager).await;
        factory
            .inject(TransportEvent::Disconnected { clean: true })
            .await;
        settle().await;
        assert!(manager.has_pending_reconnect());

        manager.connect();
        assert!(!manager.has_pending_reconnect());
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Open);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(factory.dialed.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_reconnect_and_keeps_subscribers() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        manager.subscribe(
            "all",
            StreamFilter::All,
            Arc::new(move |_: &Event| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        open(&manager).await;

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closing);
        factory
            .inject(TransportEvent::TextReceived(
                r#"{"type":"call_ended","callId":"c1"}"#.to_string(),
            ))
            .await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.has_pending_reconnect());
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(factory.dialed.lock().unwrap().len(), 1);

        open(&manager).await;
        assert_eq!(manager.dispatcher().subscriber_count(), 1);
        factory
            .inject(TransportEvent::TextReceived(
                r#"{"type":"call_ended","callId":"c1"}"#.to_string(),
            ))
            .await;
        settle().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_counted_not_fatal() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        open(&manager).await;

        factory
            .inject(TransportEvent::TextReceived("{not json".to_string()))
            .await;
        factory
            .inject(TransportEvent::TextReceived(r#"{"type":"call_ended"}"#.to_string()))
            .await;
        settle().await;

        assert_eq!(manager.decode_failures(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    /// Accepts the dial but never completes the handshake.
    #[derive(Default)]
    struct StallingFactory {
        dials: AtomicUsize,
    }

    #[async_trait]
    impl TransportFactory for StallingFactory {
        async fn create_transport(
            &self,
            _url: &str,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_dial_times_out_into_backoff() {
        let factory = Arc::new(StallingFactory::default());
        let manager = ConnectionManager::new(
            ClientConfig::default(),
            Arc::new(StaticCredentials::new("tok", "u1")),
            factory.clone(),
        );
        let mut errors = manager.errors();
        manager.connect();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.has_pending_reconnect());
        assert_eq!(manager.retry_attempt(), 1);
        assert_eq!(factory.dials.load(Ordering::SeqCst), 1);
        assert!(matches!(
            errors.try_recv(),
            Ok(ConnectionError::Transport(reason)) if reason.contains("timed out")
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(factory.dials.load(Ordering::SeqCst), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_secs(600)).await;
        settle().await;
        assert!(factory.dials.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_link_is_dropped_and_redialed() {
        let (manager, factory) = manager(StaticCredentials::new("tok", "u1"));
        let mut errors = manager.errors();
        open(&manager).await;

        // Heartbeats keep an otherwise idle link open.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            factory.inject(TransportEvent::Heartbeat).await;
        }
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(factory.dialed.lock().unwrap().len(), 1);
        assert!(factory.pings() >= 4);

        // Silence past the keepalive timeout drops it; backoff redials.
        tokio::time::sleep(Duration::from_secs(65)).await;
        settle().await;
        assert_eq!(factory.dialed.lock().unwrap().len(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.retry_attempt(), 0);
        assert!(matches!(
            errors.try_recv(),
            Ok(ConnectionError::Transport(reason)) if reason.starts_with("no traffic")
        ));
    }
}
