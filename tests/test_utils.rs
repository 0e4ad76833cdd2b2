// Shared harness for integration tests: an in-process pipeline with a
// scripted carrier backend, an in-memory correlation log, and a channel in
// place of the outbound Kafka topic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::mpsc;

use sms_gateway::backend::{SmsBackend, SubmitOutcome};
use sms_gateway::correlation::{CorrelationStore, InMemoryCorrelationLog};
use sms_gateway::crypto::{envelope, KeyVault};
use sms_gateway::emitter::{ResponseEmitter, StatusPublisher};
use sms_gateway::error::GatewayResult;
use sms_gateway::reducer::DeliveryStatusReducer;
use sms_gateway::service::GatewayService;
use sms_gateway::types::StatusEvent;
use sms_gateway::validator::RequestValidator;

/// Publishes status events onto a channel, decoded back from their wire
/// form so tests assert on exactly what a client would read.
pub struct ChannelPublisher(pub mpsc::Sender<StatusEvent>);

#[async_trait]
impl StatusPublisher for ChannelPublisher {
    async fn publish(&self, _key: &str, payload: Vec<u8>) -> GatewayResult<()> {
        let event: StatusEvent = serde_json::from_slice(&payload)?;
        let _ = self.0.send(event).await;
        Ok(())
    }
}

/// Carrier backend that replays a queue of scripted outcomes.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    outcomes: Arc<Mutex<VecDeque<SubmitOutcome>>>,
}

impl ScriptedBackend {
    pub fn push(&self, outcome: SubmitOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl SmsBackend for ScriptedBackend {
    async fn submit(&self, _message: &sms_gateway::message::SmsMessage) -> SubmitOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedBackend has no outcome queued")
    }
}

pub struct Harness {
    pub service: GatewayService,
    pub events: mpsc::Receiver<StatusEvent>,
    pub backend: ScriptedBackend,
    public_keys: HashMap<String, RsaPublicKey>,
    _key_dir: tempfile::TempDir,
}

impl Harness {
    /// Build a pipeline with generated keys for the given clients, all of
    /// which are allow-listed.
    pub async fn new(clients: &[&str]) -> Self {
        let key_dir = tempfile::tempdir().unwrap();
        let mut public_keys = HashMap::new();
        for client in clients {
            let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
            let pem = private.to_pkcs8_pem(LineEnding::LF).unwrap();
            std::fs::write(key_dir.path().join(format!("{}.pem", client)), pem.as_bytes())
                .unwrap();
            public_keys.insert(client.to_string(), RsaPublicKey::from(&private));
        }

        let vault = Arc::new(KeyVault::new(key_dir.path()));
        let validator = RequestValidator::new(
            clients.iter().map(|c| c.to_string()).collect(),
            vault,
        );

        let store = CorrelationStore::open(
            Box::new(InMemoryCorrelationLog::new()),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        let reducer = DeliveryStatusReducer::new(Arc::new(store));

        let (event_tx, events) = mpsc::channel(32);
        let emitter = Arc::new(ResponseEmitter::new(Box::new(ChannelPublisher(event_tx))));

        let backend = ScriptedBackend::default();
        let service = GatewayService::new(validator, Arc::new(backend.clone()), reducer, emitter)
            .with_test_script_delay(Duration::from_millis(50));

        Self {
            service,
            events,
            backend,
            public_keys,
            _key_dir: key_dir,
        }
    }

    /// Encrypt an SMS text under a client's public key, base64-encoded.
    pub fn payload_for(&self, client: &str, sms_text: &str) -> String {
        let public = &self.public_keys[client];
        BASE64.encode(envelope::encrypt(public, sms_text.as_bytes()).unwrap())
    }

    pub fn request(
        &self,
        client: &str,
        correl: &str,
        deadline: DateTime<Utc>,
        payload: &str,
    ) -> String {
        serde_json::json!({
            "client-id": client,
            "correl-id": correl,
            "deadline": deadline.to_rfc3339(),
            "payload": payload,
        })
        .to_string()
    }

    /// Receive the next emitted event, failing the test on a quiet channel.
    pub async fn next_event(&mut self) -> StatusEvent {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for a status event")
            .expect("event channel closed")
    }

    /// Assert that no further event arrives within a grace period.
    pub async fn expect_no_event(&mut self) {
        let quiet = tokio::time::timeout(Duration::from_millis(200), self.events.recv()).await;
        assert!(quiet.is_err(), "unexpected event: {:?}", quiet.unwrap());
    }
}

/// A deadline comfortably in the future.
pub fn future_deadline() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::minutes(10)
}

pub const VALID_SMS: &str = "To: +255700000000\nSender: INFO\n\nHello";
