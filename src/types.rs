use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical SMS status values reported to clients.
///
/// FAILED means the message did not go out now but a retry may succeed;
/// INVALID means it will never go out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmsStatus {
    Sent,
    Delivered,
    Expired,
    Failed,
    Invalid,
}

impl fmt::Display for SmsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmsStatus::Sent => "SENT",
            SmsStatus::Delivered => "DELIVERED",
            SmsStatus::Expired => "EXPIRED",
            SmsStatus::Failed => "FAILED",
            SmsStatus::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

/// Inbound send request as decoded from the client-facing channel.
///
/// All fields are optional at the wire level; the validator decides what a
/// missing field means for the request.
#[derive(Debug, Clone, Deserialize)]
pub struct SendSmsRequest {
    #[serde(rename = "client-id")]
    pub client_id: Option<String>,
    #[serde(rename = "correl-id")]
    pub correl_id: Option<String>,
    /// ISO-8601 instant after which the message must not be sent.
    pub deadline: Option<String>,
    /// Base64 of the encrypted payload envelope.
    pub payload: Option<String>,
}

/// Outbound status event as encoded to the client-facing channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    #[serde(rename = "client-id")]
    pub client_id: String,
    #[serde(rename = "correl-id")]
    pub correl_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sms-status")]
    pub status: SmsStatus,
    #[serde(rename = "recall-id", skip_serializing_if = "Option::is_none")]
    pub recall_id: Option<String>,
    #[serde(rename = "error-text", skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl StatusEvent {
    pub fn new(client_id: &str, correl_id: &str, status: SmsStatus) -> Self {
        Self {
            client_id: client_id.to_string(),
            correl_id: correl_id.to_string(),
            timestamp: Utc::now(),
            status,
            recall_id: None,
            error_text: None,
        }
    }

    pub fn with_recall_id(mut self, recall_id: impl Into<String>) -> Self {
        self.recall_id = Some(recall_id.into());
        self
    }

    pub fn with_error_text(mut self, error_text: impl Into<String>) -> Self {
        self.error_text = Some(error_text.into());
        self
    }

    /// TSV rendering for the per-client response log. Absent fields render
    /// as empty strings.
    pub fn as_tsv(&self) -> String {
        fn b(s: &Option<String>) -> &str {
            s.as_deref().unwrap_or("")
        }
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            self.timestamp.to_rfc3339(),
            self.client_id,
            self.correl_id,
            self.status,
            b(&self.recall_id),
            b(&self.error_text),
        )
    }
}

/// Mapping from a backend-assigned recall-id to the client request it
/// belongs to. One record is written per accepted-and-submitted request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationRecord {
    #[serde(rename = "recall-id")]
    pub recall_id: String,
    #[serde(rename = "client-id")]
    pub client_id: String,
    #[serde(rename = "correl-id")]
    pub correl_id: String,
}

impl CorrelationRecord {
    pub fn new(recall_id: &str, client_id: &str, correl_id: &str) -> Self {
        Self {
            recall_id: recall_id.to_string(),
            client_id: client_id.to_string(),
            correl_id: correl_id.to_string(),
        }
    }
}

/// Carrier delivery state as reported in an asynchronous notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Accepted by the carrier, not yet delivered.
    Accepted,
    /// En route to the recipient.
    EnRoute,
    Delivered,
    /// Validity period ran out at the carrier.
    Expired,
    /// Deleted at the carrier, will not be delivered.
    Deleted,
    Undeliverable,
    /// Rejected by the carrier.
    Rejected,
    /// The carrier itself reports the state as unknown.
    Unknown,
    /// A state code this gateway does not recognise, kept verbatim.
    Unrecognized(String),
}

/// Asynchronous delivery notification from a backend.
///
/// Carries only the backend's own recall-id; client identity must be
/// resolved through the correlation store before a response can go out.
#[derive(Debug, Clone)]
pub struct DeliveryNotification {
    pub recall_id: Option<String>,
    pub state: DeliveryState,
    /// Carrier-specific error detail, if any.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_kebab_fields() {
        let event = StatusEvent::new("client", "correl-1", SmsStatus::Sent).with_recall_id("R1");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["client-id"], "client");
        assert_eq!(json["correl-id"], "correl-1");
        assert_eq!(json["sms-status"], "SENT");
        assert_eq!(json["recall-id"], "R1");
        // absent optionals are omitted entirely
        assert!(json.get("error-text").is_none());
    }

    #[test]
    fn send_request_tolerates_missing_fields() {
        let req: SendSmsRequest = serde_json::from_str(r#"{"client-id":"test"}"#).unwrap();
        assert_eq!(req.client_id.as_deref(), Some("test"));
        assert!(req.correl_id.is_none());
        assert!(req.deadline.is_none());
        assert!(req.payload.is_none());
    }

    #[test]
    fn correlation_record_round_trips_as_json() {
        let rec = CorrelationRecord::new("R1", "client", "correl-1");
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"recall-id\":\"R1\""));
        let back: CorrelationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
