#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use supervision_signal::calls::{CallManagerConfig, CallOrchestrator};
use supervision_signal::config::ClientConfig;
use supervision_signal::connection::{ConnectionManager, ConnectionState};
use supervision_signal::credentials::StaticCredentials;
use supervision_signal::transport::{Transport, TransportEvent, TransportFactory};
use tokio::sync::mpsc;
use tokio::time::Instant;

struct RecordingTransport {
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error> {
        self.sent.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn disconnect(&self) {}
}

/// In-memory server side: records every dial and outbound frame, and lets a
/// test push frames or drop the latest link.
#[derive(Default)]
pub struct ScriptedFactory {
    refuse: AtomicBool,
    dials: Mutex<Vec<Instant>>,
    sent: Arc<Mutex<Vec<String>>>,
    link: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// While set, every dial fails.
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn dial_times(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    /// Every frame written so far, across all links, decoded.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn sent_of_type(&self, message_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|f| f["type"] == message_type)
            .collect()
    }

    pub async fn push(&self, frame: &str) {
        self.event(TransportEvent::TextReceived(frame.to_string()))
            .await;
    }

    pub async fn drop_link(&self, clean: bool) {
        self.event(TransportEvent::Disconnected { clean }).await;
    }

    async fn event(&self, event: TransportEvent) {
        let link = self.link.lock().unwrap().clone();
        if let Some(link) = link {
            link.send(event).await.unwrap();
        }
        settle().await;
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn create_transport(
        &self,
        _url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        self.dials.lock().unwrap().push(Instant::now());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection refused"));
        }
        let (tx, rx) = mpsc::channel(64);
        tx.send(TransportEvent::Connected).await?;
        *self.link.lock().unwrap() = Some(tx);
        Ok((
            Arc::new(RecordingTransport {
                sent: self.sent.clone(),
            }),
            rx,
        ))
    }
}

pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub struct TestClient {
    pub connection: Arc<ConnectionManager>,
    pub orchestrator: CallOrchestrator,
    pub server: Arc<ScriptedFactory>,
}

impl TestClient {
    pub fn new(token: &str) -> Self {
        let server = ScriptedFactory::new();
        let config = ClientConfig::default();
        let connection = ConnectionManager::new(
            config.clone(),
            Arc::new(StaticCredentials::new(token, "sup-user")),
            server.clone(),
        );
        let orchestrator =
            CallOrchestrator::new(connection.clone(), CallManagerConfig::from(&config));
        Self {
            connection,
            orchestrator,
            server,
        }
    }

    pub async fn connected() -> Self {
        let client = Self::new("token-123");
        client.connection.connect();
        client
            .connection
            .subscribe_state()
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .unwrap();
        settle().await;
        client
    }

    pub async fn incoming_call(&self, call_id: &str) {
        self.server
            .push(&format!(
                r#"{{"type":"incoming_call","callId":"{call_id}","supervisionId":"sup-1","callData":{{"caller":{{"_id":"u7","name":"Bob"}}}},"timestamp":"2026-05-04T10:00:00.000Z"}}"#
            ))
            .await;
    }
}
