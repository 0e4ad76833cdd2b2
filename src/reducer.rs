use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::backend::SubmitOutcome;
use crate::correlation::CorrelationStore;
use crate::metrics;
use crate::types::{CorrelationRecord, DeliveryNotification, DeliveryState, SmsStatus, StatusEvent};
use crate::validator::RequestContext;

/// Reduces backend-specific submit outcomes and asynchronous delivery
/// notifications to canonical status events.
///
/// A request may legitimately produce a sequence of events over time (SENT
/// then DELIVERED, SENT then FAILED); later events supersede but never erase
/// earlier ones, and all of them are emitted.
pub struct DeliveryStatusReducer {
    store: Arc<CorrelationStore>,
}

impl DeliveryStatusReducer {
    pub fn new(store: Arc<CorrelationStore>) -> Self {
        Self { store }
    }

    /// Reduce the outcome of a submission attempt.
    ///
    /// A successful submission records the backend's recall-id in the
    /// correlation store before the event is produced, so that a delivery
    /// notification racing in behind the acknowledgement can resolve. An
    /// ambiguous outcome produces no event at all.
    pub async fn reduce_submit(
        &self,
        ctx: &RequestContext,
        outcome: SubmitOutcome,
    ) -> Option<StatusEvent> {
        match outcome {
            SubmitOutcome::Accepted { recall_id } => {
                if let Some(recall_id) = &recall_id {
                    self.store
                        .store(CorrelationRecord::new(
                            recall_id,
                            &ctx.client_id,
                            &ctx.correl_id,
                        ))
                        .await;
                }
                let mut event = StatusEvent::new(&ctx.client_id, &ctx.correl_id, SmsStatus::Sent);
                if let Some(recall_id) = recall_id {
                    event = event.with_recall_id(recall_id);
                }
                Some(event)
            }
            SubmitOutcome::Rejected { status, error_text } => Some(
                StatusEvent::new(&ctx.client_id, &ctx.correl_id, status)
                    .with_error_text(error_text),
            ),
            SubmitOutcome::Ambiguous => {
                warn!(
                    client_id = %ctx.client_id,
                    correl_id = %ctx.correl_id,
                    "ambiguous backend outcome, no status reported"
                );
                None
            }
        }
    }

    /// Reduce an asynchronous delivery notification.
    ///
    /// The notification carries only the backend's recall-id; identity is
    /// resolved through the correlation store with its one-retry race
    /// policy. A notification that cannot be resolved is logged and dropped:
    /// there is no client to notify.
    pub async fn reduce_notification(
        &self,
        notification: DeliveryNotification,
    ) -> Option<StatusEvent> {
        let (status, error_text) = classify_delivery_state(&notification);

        let Some(recall_id) = notification.recall_id else {
            error!("delivery notification without recall-id, dropping");
            metrics::NOTIFICATIONS_DROPPED.inc();
            return None;
        };

        let Some(record) = self.store.fetch_with_retry(&recall_id).await else {
            error!(
                %recall_id,
                "no correlation record for delivery notification, dropping"
            );
            metrics::NOTIFICATIONS_DROPPED.inc();
            return None;
        };

        debug!(
            %recall_id,
            client_id = %record.client_id,
            correl_id = %record.correl_id,
            status = %status,
            "delivery notification resolved"
        );

        let mut event =
            StatusEvent::new(&record.client_id, &record.correl_id, status).with_recall_id(recall_id);
        if let Some(error_text) = error_text {
            event = event.with_error_text(error_text);
        }
        Some(event)
    }
}

fn classify_delivery_state(notification: &DeliveryNotification) -> (SmsStatus, Option<String>) {
    let carrier_error = || {
        notification
            .error
            .clone()
            .unwrap_or_else(|| "(no error message)".to_string())
    };

    match &notification.state {
        DeliveryState::Accepted | DeliveryState::EnRoute => (SmsStatus::Sent, None),
        DeliveryState::Delivered => (SmsStatus::Delivered, None),
        DeliveryState::Expired => (SmsStatus::Expired, None),
        DeliveryState::Deleted => (
            SmsStatus::Failed,
            Some("Message was deleted".to_string()),
        ),
        DeliveryState::Undeliverable => (
            SmsStatus::Failed,
            Some(format!("Message was undeliverable: {}", carrier_error())),
        ),
        DeliveryState::Rejected => (
            SmsStatus::Invalid,
            Some(format!("SMSC rejects message: {}", carrier_error())),
        ),
        DeliveryState::Unknown => (
            SmsStatus::Failed,
            Some(format!("SMSC delivery state UNKNOWN: {}", carrier_error())),
        ),
        DeliveryState::Unrecognized(code) => (
            SmsStatus::Failed,
            Some(format!("Unknown delivery state: {}: {}", code, carrier_error())),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::InMemoryCorrelationLog;
    use std::time::Duration;

    async fn reducer() -> DeliveryStatusReducer {
        let store = CorrelationStore::open(
            Box::new(InMemoryCorrelationLog::new()),
            Duration::from_millis(20),
        )
        .await
        .unwrap();
        DeliveryStatusReducer::new(Arc::new(store))
    }

    fn ctx() -> RequestContext {
        RequestContext {
            client_id: "client".to_string(),
            correl_id: "correl-1".to_string(),
        }
    }

    fn notification(recall_id: Option<&str>, state: DeliveryState) -> DeliveryNotification {
        DeliveryNotification {
            recall_id: recall_id.map(String::from),
            state,
            error: None,
        }
    }

    #[tokio::test]
    async fn accepted_submission_yields_sent_and_records_correlation() {
        let reducer = reducer().await;
        let event = reducer
            .reduce_submit(
                &ctx(),
                SubmitOutcome::Accepted {
                    recall_id: Some("R1".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(event.status, SmsStatus::Sent);
        assert_eq!(event.recall_id.as_deref(), Some("R1"));
        assert!(event.error_text.is_none());

        let record = reducer.store.fetch("R1").await.unwrap();
        assert_eq!(record.client_id, "client");
        assert_eq!(record.correl_id, "correl-1");
    }

    #[tokio::test]
    async fn accepted_without_recall_id_still_reports_sent() {
        let reducer = reducer().await;
        let event = reducer
            .reduce_submit(&ctx(), SubmitOutcome::Accepted { recall_id: None })
            .await
            .unwrap();
        assert_eq!(event.status, SmsStatus::Sent);
        assert!(event.recall_id.is_none());
    }

    #[tokio::test]
    async fn rejection_carries_status_and_error_text() {
        let reducer = reducer().await;
        let event = reducer
            .reduce_submit(&ctx(), SubmitOutcome::failed("backend said no"))
            .await
            .unwrap();
        assert_eq!(event.status, SmsStatus::Failed);
        assert_eq!(event.error_text.as_deref(), Some("backend said no"));
        assert!(event.recall_id.is_none());
    }

    #[tokio::test]
    async fn ambiguous_outcome_produces_no_event() {
        let reducer = reducer().await;
        assert!(reducer
            .reduce_submit(&ctx(), SubmitOutcome::Ambiguous)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn notification_resolves_identity_through_store() {
        let reducer = reducer().await;
        reducer
            .reduce_submit(
                &ctx(),
                SubmitOutcome::Accepted {
                    recall_id: Some("R1".to_string()),
                },
            )
            .await;

        let event = reducer
            .reduce_notification(notification(Some("R1"), DeliveryState::Delivered))
            .await
            .unwrap();
        assert_eq!(event.status, SmsStatus::Delivered);
        assert_eq!(event.client_id, "client");
        assert_eq!(event.correl_id, "correl-1");
        assert_eq!(event.recall_id.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn unresolvable_notification_is_dropped() {
        let reducer = reducer().await;
        assert!(reducer
            .reduce_notification(notification(Some("unknown"), DeliveryState::Delivered))
            .await
            .is_none());
        assert!(reducer
            .reduce_notification(notification(None, DeliveryState::Delivered))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn delivery_state_mapping() {
        let reducer = reducer().await;
        reducer
            .reduce_submit(
                &ctx(),
                SubmitOutcome::Accepted {
                    recall_id: Some("R1".to_string()),
                },
            )
            .await;

        for (state, expect_status, expect_text) in [
            (DeliveryState::Accepted, SmsStatus::Sent, None),
            (DeliveryState::EnRoute, SmsStatus::Sent, None),
            (DeliveryState::Expired, SmsStatus::Expired, None),
            (
                DeliveryState::Deleted,
                SmsStatus::Failed,
                Some("Message was deleted"),
            ),
            (
                DeliveryState::Undeliverable,
                SmsStatus::Failed,
                Some("Message was undeliverable: (no error message)"),
            ),
            (
                DeliveryState::Rejected,
                SmsStatus::Invalid,
                Some("SMSC rejects message: (no error message)"),
            ),
            (
                DeliveryState::Unknown,
                SmsStatus::Failed,
                Some("SMSC delivery state UNKNOWN: (no error message)"),
            ),
        ] {
            let event = reducer
                .reduce_notification(notification(Some("R1"), state.clone()))
                .await
                .unwrap();
            assert_eq!(event.status, expect_status, "state {:?}", state);
            assert_eq!(event.error_text.as_deref(), expect_text, "state {:?}", state);
        }
    }

    #[tokio::test]
    async fn unrecognized_state_code_is_kept_verbatim() {
        let reducer = reducer().await;
        reducer
            .reduce_submit(
                &ctx(),
                SubmitOutcome::Accepted {
                    recall_id: Some("R1".to_string()),
                },
            )
            .await;

        let event = reducer
            .reduce_notification(notification(
                Some("R1"),
                DeliveryState::Unrecognized("SOMENEWSTATE".to_string()),
            ))
            .await
            .unwrap();
        assert_eq!(event.status, SmsStatus::Failed);
        assert!(event.error_text.unwrap().contains("SOMENEWSTATE"));
    }
}
