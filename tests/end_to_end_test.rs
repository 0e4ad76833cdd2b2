// End-to-end scenarios over the in-process pipeline: request in, status
// events out, with the carrier backend scripted.

mod test_utils;

use chrono::Utc;
use sms_gateway::backend::SubmitOutcome;
use sms_gateway::types::{DeliveryNotification, DeliveryState, SmsStatus};
use test_utils::{future_deadline, Harness, VALID_SMS};

#[tokio::test]
async fn accepted_request_yields_single_sent_event() {
    let mut h = Harness::new(&["acme"]).await;
    h.backend.push(SubmitOutcome::Accepted {
        recall_id: Some("R1".to_string()),
    });

    let payload = h.payload_for("acme", VALID_SMS);
    let raw = h.request("acme", "c-1", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    let event = h.next_event().await;
    assert_eq!(event.client_id, "acme");
    assert_eq!(event.correl_id, "c-1");
    assert_eq!(event.status, SmsStatus::Sent);
    assert_eq!(event.recall_id.as_deref(), Some("R1"));
    assert!(event.error_text.is_none());

    h.expect_no_event().await;
}

#[tokio::test]
async fn expired_request_yields_expired_without_error_text() {
    let mut h = Harness::new(&["acme"]).await;

    let payload = h.payload_for("acme", VALID_SMS);
    let raw = h.request(
        "acme",
        "c-2",
        Utc::now() - chrono::Duration::seconds(5),
        &payload,
    );
    h.service.handle_request(&raw).await;

    let event = h.next_event().await;
    assert_eq!(event.status, SmsStatus::Expired);
    assert!(event.error_text.is_none());
    assert!(event.recall_id.is_none());

    h.expect_no_event().await;
}

#[tokio::test]
async fn wrong_key_payload_yields_invalid() {
    let mut h = Harness::new(&["acme", "other"]).await;

    // encrypted under other's key but submitted as acme
    let payload = h.payload_for("other", VALID_SMS);
    let raw = h.request("acme", "c-3", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    let event = h.next_event().await;
    assert_eq!(event.status, SmsStatus::Invalid);
    assert!(event
        .error_text
        .unwrap()
        .starts_with("Failed to parse request payload"));

    h.expect_no_event().await;
}

#[tokio::test]
async fn deterministic_backend_rejection_yields_failed() {
    let mut h = Harness::new(&["acme"]).await;
    h.backend.push(SubmitOutcome::failed(
        "Error 4 from Vodacom: Error: Sender Address is not registered to WASP.",
    ));

    let payload = h.payload_for("acme", VALID_SMS);
    let raw = h.request("acme", "c-4", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    let event = h.next_event().await;
    assert_eq!(event.status, SmsStatus::Failed);
    assert!(event.error_text.unwrap().contains("not registered to WASP"));
    assert!(event.recall_id.is_none());

    h.expect_no_event().await;
}

#[tokio::test]
async fn delivery_notification_follows_sent() {
    let mut h = Harness::new(&["acme"]).await;
    h.backend.push(SubmitOutcome::Accepted {
        recall_id: Some("R1".to_string()),
    });

    let payload = h.payload_for("acme", VALID_SMS);
    let raw = h.request("acme", "c-5", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    let sent = h.next_event().await;
    assert_eq!(sent.status, SmsStatus::Sent);

    h.service
        .handle_notification(DeliveryNotification {
            recall_id: Some("R1".to_string()),
            state: DeliveryState::Delivered,
            error: None,
        })
        .await;

    let delivered = h.next_event().await;
    assert_eq!(delivered.status, SmsStatus::Delivered);
    assert_eq!(delivered.client_id, sent.client_id);
    assert_eq!(delivered.correl_id, sent.correl_id);
    assert_eq!(delivered.recall_id.as_deref(), Some("R1"));
}

#[tokio::test]
async fn ambiguous_outcome_emits_nothing() {
    let mut h = Harness::new(&["acme"]).await;
    h.backend.push(SubmitOutcome::Ambiguous);

    let payload = h.payload_for("acme", VALID_SMS);
    let raw = h.request("acme", "c-6", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    h.expect_no_event().await;
}

#[tokio::test]
async fn unaddressable_request_is_dropped_silently() {
    let mut h = Harness::new(&["acme"]).await;

    h.service
        .handle_request(r#"{"correl-id":"c-7","deadline":"2030-01-01T00:00:00Z"}"#)
        .await;
    h.service.handle_request("not even json").await;

    h.expect_no_event().await;
}

#[tokio::test]
async fn test_client_scripted_sequence() {
    let mut h = Harness::new(&["test"]).await;

    let payload = h.payload_for("test", "To: +255700000000\nSender: INFO\n\nS1D1 please");
    let raw = h.request("test", "c-8", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    let first = h.next_event().await;
    assert_eq!(first.status, SmsStatus::Sent);
    let second = h.next_event().await;
    assert_eq!(second.status, SmsStatus::Delivered);
    assert_eq!(second.correl_id, "c-8");

    h.expect_no_event().await;
}

#[tokio::test]
async fn test_client_silent_marker() {
    let mut h = Harness::new(&["test"]).await;

    let payload = h.payload_for("test", "To: +255700000000\nSender: INFO\n\nS0D0");
    let raw = h.request("test", "c-9", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    h.expect_no_event().await;
}

#[tokio::test]
async fn test_client_without_marker_is_invalid() {
    let mut h = Harness::new(&["test"]).await;

    let payload = h.payload_for("test", "To: +255700000000\nSender: INFO\n\nno marker here");
    let raw = h.request("test", "c-10", future_deadline(), &payload);
    h.service.handle_request(&raw).await;

    let event = h.next_event().await;
    assert_eq!(event.status, SmsStatus::Invalid);
    assert!(event.error_text.unwrap().contains("S1D1"));
}
