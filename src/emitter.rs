use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::error::GatewayResult;
use crate::metrics;
use crate::types::StatusEvent;

/// Sink for encoded status events, implemented by the client-facing channel
/// (Kafka in production).
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    /// Publish one encoded event. The key decides channel partitioning;
    /// events of one request share a key so their order is preserved.
    async fn publish(&self, key: &str, payload: Vec<u8>) -> GatewayResult<()>;
}

/// Assembles and emits status events to the client-facing channel.
///
/// An event goes out if and only if client-id, correl-id and status are all
/// present; the status is guaranteed by the type, the ids are guarded here.
/// A refused event produces nothing but a warning, which keeps malformed or
/// unaddressable events away from clients.
pub struct ResponseEmitter {
    publisher: Box<dyn StatusPublisher>,
    client_log_dir: Option<PathBuf>,
}

impl ResponseEmitter {
    pub fn new(publisher: Box<dyn StatusPublisher>) -> Self {
        Self {
            publisher,
            client_log_dir: None,
        }
    }

    /// Also append every emitted event to `<dir>/<client-id>.tsv`.
    pub fn with_client_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.client_log_dir = Some(dir.into());
        self
    }

    pub async fn emit(&self, event: StatusEvent) {
        if event.client_id.is_empty() || event.correl_id.is_empty() {
            warn!("not producing response: no client ID and correl ID present");
            return;
        }

        debug!(
            client_id = %event.client_id,
            correl_id = %event.correl_id,
            status = %event.status,
            "producing response"
        );

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to serialize status event");
                return;
            }
        };

        metrics::STATUS_EVENTS_TOTAL
            .with_label_values(&[&event.status.to_string()])
            .inc();

        if let Err(e) = self.publisher.publish(&event.correl_id, payload).await {
            error!(
                correl_id = %event.correl_id,
                error = %e,
                "failed to publish status event"
            );
        }

        if let Some(dir) = &self.client_log_dir {
            if let Err(e) = append_client_log(dir, &event).await {
                // the client log is best-effort and never affects emission
                warn!(client_id = %event.client_id, error = %e, "failed to append client log");
            }
        }
    }
}

async fn append_client_log(dir: &PathBuf, event: &StatusEvent) -> std::io::Result<()> {
    let safe_name: String = event
        .client_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let path = dir.join(format!("{}.tsv", safe_name));

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(event.as_tsv().as_bytes()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SmsStatus;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CapturingPublisher {
        published: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl StatusPublisher for CapturingPublisher {
        async fn publish(&self, key: &str, payload: Vec<u8>) -> GatewayResult<()> {
            self.published
                .lock()
                .unwrap()
                .push((key.to_string(), String::from_utf8(payload).unwrap()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn emits_event_keyed_by_correl_id() {
        let publisher = CapturingPublisher::default();
        let emitter = ResponseEmitter::new(Box::new(publisher.clone()));

        emitter
            .emit(StatusEvent::new("client", "correl-1", SmsStatus::Sent).with_recall_id("R1"))
            .await;

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "correl-1");
        assert!(published[0].1.contains("\"sms-status\":\"SENT\""));
    }

    #[tokio::test]
    async fn refuses_unaddressable_event() {
        let publisher = CapturingPublisher::default();
        let emitter = ResponseEmitter::new(Box::new(publisher.clone()));

        emitter.emit(StatusEvent::new("", "correl-1", SmsStatus::Sent)).await;
        emitter.emit(StatusEvent::new("client", "", SmsStatus::Sent)).await;

        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_client_log_line() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = CapturingPublisher::default();
        let emitter = ResponseEmitter::new(Box::new(publisher)).with_client_log(dir.path());

        emitter
            .emit(
                StatusEvent::new("client", "correl-1", SmsStatus::Failed)
                    .with_error_text("backend said no"),
            )
            .await;
        emitter
            .emit(StatusEvent::new("client", "correl-2", SmsStatus::Sent))
            .await;

        let log = std::fs::read_to_string(dir.path().join("client.tsv")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("FAILED\t\tbackend said no"));
        assert!(lines[1].ends_with("SENT\t\t"));
    }
}
