use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::GatewayResult;
use crate::types::CorrelationRecord;

/// Durable, replayable log behind the correlation store.
///
/// The store appends every live record to the log and rebuilds itself from a
/// full replay at startup, so records created before a restart remain
/// resolvable. Entries are keyed by recall-id; retention is the log's
/// concern, not the store's.
#[async_trait]
pub trait CorrelationLog: Send + Sync {
    async fn append(&self, record: &CorrelationRecord) -> GatewayResult<()>;

    /// All retained records, oldest first.
    async fn replay(&self) -> GatewayResult<Vec<CorrelationRecord>>;
}

/// In-memory correlation log. Clones share the same entries, so a log can
/// outlive the store it backs and replay into a new one; used where no
/// durable backing is wanted.
#[derive(Clone, Default)]
pub struct InMemoryCorrelationLog {
    entries: Arc<Mutex<Vec<CorrelationRecord>>>,
}

impl InMemoryCorrelationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationLog for InMemoryCorrelationLog {
    async fn append(&self, record: &CorrelationRecord) -> GatewayResult<()> {
        self.entries.lock().await.push(record.clone());
        Ok(())
    }

    async fn replay(&self) -> GatewayResult<Vec<CorrelationRecord>> {
        Ok(self.entries.lock().await.clone())
    }
}

/// Maps a backend-assigned recall-id to the client request it belongs to.
///
/// The backend hands out its own correlation identifier when a message is
/// submitted, and later delivery notifications carry only that identifier.
/// This store is the bridge back to (client-id, correl-id). It is the one
/// piece of shared mutable state in the gateway and is safe for concurrent
/// readers and writers.
pub struct CorrelationStore {
    records: RwLock<HashMap<String, CorrelationRecord>>,
    log: Box<dyn CorrelationLog>,
    lookup_retry_delay: Duration,
}

impl CorrelationStore {
    /// Open the store, replaying the whole log before any lookup is served.
    pub async fn open(
        log: Box<dyn CorrelationLog>,
        lookup_retry_delay: Duration,
    ) -> GatewayResult<Self> {
        let mut records = HashMap::new();
        let replayed = log.replay().await?;
        let count = replayed.len();
        for record in replayed {
            records.insert(record.recall_id.clone(), record);
        }
        info!(records = count, "correlation store rebuilt from log");

        Ok(Self {
            records: RwLock::new(records),
            log,
            lookup_retry_delay,
        })
    }

    /// Store a record for a freshly submitted message: upsert in memory and
    /// append to the durable log. Refuses (logs, does not fail) a record
    /// without a recall-id. A failed log append is logged and does not fail
    /// the request; the record stays resolvable until restart.
    pub async fn store(&self, record: CorrelationRecord) {
        if record.recall_id.is_empty() {
            error!("refusing to store correlation record for empty recall-id");
            return;
        }

        debug!(
            recall_id = %record.recall_id,
            client_id = %record.client_id,
            correl_id = %record.correl_id,
            "add/replace correlation record"
        );

        if let Err(e) = self.log.append(&record).await {
            error!(recall_id = %record.recall_id, error = %e, "failed to append correlation record to log");
        }
        self.records
            .write()
            .await
            .insert(record.recall_id.clone(), record);
    }

    pub async fn fetch(&self, recall_id: &str) -> Option<CorrelationRecord> {
        self.records.read().await.get(recall_id).cloned()
    }

    /// Fetch with the one-retry race policy.
    ///
    /// A delivery notification can overtake the submit acknowledgement that
    /// creates its record, because the two travel on independent channels.
    /// A miss therefore waits one short interval and retries exactly once
    /// before the lookup counts as permanently failed. The wait suspends
    /// only this task.
    pub async fn fetch_with_retry(&self, recall_id: &str) -> Option<CorrelationRecord> {
        if let Some(record) = self.fetch(recall_id).await {
            return Some(record);
        }
        warn!(recall_id, "no correlation record yet, retrying once");
        tokio::time::sleep(self.lookup_retry_delay).await;
        self.fetch(recall_id).await
    }
}
