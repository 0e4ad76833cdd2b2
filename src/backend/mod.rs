// Carrier backends. Each variant implements the one capability the gateway
// needs: submit a message and classify the outcome.

pub mod smpp;
pub mod testclient;
pub mod wasp;

use async_trait::async_trait;

use crate::message::{SmsMessage, HEADER_SENDER, HEADER_TO};
use crate::types::SmsStatus;

/// Classified result of one submission attempt.
///
/// The three-way split is the crux of backend error handling: a rejection is
/// only reported when the backend confirmed nothing went out, and an attempt
/// that may have reached the carrier must never be reported as failed.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The backend accepted the message. The recall-id is the backend's own
    /// correlation identifier for later delivery notifications; it can be
    /// absent when the backend did not return one.
    Accepted { recall_id: Option<String> },
    /// The backend deterministically did not accept the message, before or
    /// without it leaving the process. Safe to report to the client.
    Rejected {
        status: SmsStatus,
        error_text: String,
    },
    /// The attempt failed in a way that leaves the submission in doubt; the
    /// message may be in flight, so no status may be reported.
    Ambiguous,
}

impl SubmitOutcome {
    pub fn invalid(error_text: impl Into<String>) -> Self {
        SubmitOutcome::Rejected {
            status: SmsStatus::Invalid,
            error_text: error_text.into(),
        }
    }

    pub fn failed(error_text: impl Into<String>) -> Self {
        SubmitOutcome::Rejected {
            status: SmsStatus::Failed,
            error_text: error_text.into(),
        }
    }
}

/// A carrier backend able to submit SMS messages.
#[async_trait]
pub trait SmsBackend: Send + Sync {
    async fn submit(&self, message: &SmsMessage) -> SubmitOutcome;
}

/// Recipient and sender of a message, validated against the carrier
/// constraints shared by all backends.
#[derive(Debug)]
pub(crate) struct CarrierFields<'a> {
    pub recipient: &'a str,
    pub sender: &'a str,
    pub body: &'a str,
}

/// Validate the message against carrier addressing constraints before any
/// network contact. `backend` names the variant in the error texts.
pub(crate) fn carrier_fields<'a>(
    message: &'a SmsMessage,
    backend: &str,
) -> Result<CarrierFields<'a>, String> {
    let Some(recipient) = message.header(HEADER_TO) else {
        return Err("SMS lacks recipient".to_string());
    };
    if !recipient.starts_with("+255") {
        return Err(format!(
            "{} backend disallows foreign SMS recipient: {}",
            backend, recipient
        ));
    }
    if !recipient_in_numbering_plan(recipient) {
        return Err(format!(
            "SMS recipient number invalid for {} backend: {}",
            backend, recipient
        ));
    }

    let Some(sender) = message.header(HEADER_SENDER) else {
        return Err(format!("{} backend requires a message sender", backend));
    };
    if !(1..=11).contains(&sender.chars().count()) {
        return Err(format!(
            "SMS sender does not have a 1-11 character length: {}",
            sender
        ));
    }

    let body = message.body();
    if body.trim().is_empty() {
        return Err("SMS message is empty".to_string());
    }

    Ok(CarrierFields {
        recipient,
        sender,
        body,
    })
}

/// `+255` followed by exactly nine digits.
fn recipient_in_numbering_plan(recipient: &str) -> bool {
    recipient
        .strip_prefix("+255")
        .map(|rest| rest.len() == 9 && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}
