use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::crypto::KeyVault;
use crate::message::{SmsMessage, HEADER_SENDER, HEADER_TO};
use crate::types::{SendSmsRequest, SmsStatus};

/// Identity of a request, carried through processing so that every outcome
/// can be routed back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_id: String,
    pub correl_id: String,
}

/// Terminal result of validating one inbound request.
#[derive(Debug)]
pub enum Validation {
    /// The request is valid; hand the decrypted message to the dispatcher.
    Accepted {
        ctx: RequestContext,
        message: SmsMessage,
    },
    /// The request is finished with the given status. INVALID carries error
    /// text, EXPIRED never does.
    Rejected {
        ctx: RequestContext,
        status: SmsStatus,
        error_text: Option<String>,
    },
    /// No response can be addressed (client-id or correl-id missing, or the
    /// request did not even parse); nothing is emitted.
    Dropped,
}

/// Validates and decrypts inbound send requests.
///
/// Checks run strictly in sequence and the first failure is terminal for
/// the request. Once both ids are known every failure is reportable; before
/// that the request can only be dropped.
pub struct RequestValidator {
    allowed_clients: Vec<String>,
    vault: Arc<KeyVault>,
}

impl RequestValidator {
    pub fn new(allowed_clients: Vec<String>, vault: Arc<KeyVault>) -> Self {
        Self {
            allowed_clients,
            vault,
        }
    }

    /// Validate a raw inbound request.
    pub async fn validate(&self, raw: &str) -> Validation {
        let req: SendSmsRequest = match serde_json::from_str(raw) {
            Ok(req) => req,
            Err(e) => {
                error!(error = %e, "failed to parse request JSON, dropping");
                return Validation::Dropped;
            }
        };

        let Some(client_id) = req.client_id.clone() else {
            error!("request lacks client ID, dropping");
            return Validation::Dropped;
        };
        let Some(correl_id) = req.correl_id.clone() else {
            error!("request lacks correlation ID, dropping");
            return Validation::Dropped;
        };
        let ctx = RequestContext {
            client_id,
            correl_id,
        };

        if !self.allowed_clients.iter().any(|c| c == &ctx.client_id) {
            return invalid(ctx, "Client ID is unknown or disallowed".to_string());
        }

        let Some(payload) = req.payload else {
            return invalid(ctx, "Request lacks Payload field".to_string());
        };

        let deadline = req
            .deadline
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok());
        let Some(deadline) = deadline else {
            return invalid(
                ctx,
                format!("Invalid deadline value: {}", req.deadline.as_deref().unwrap_or("(unset)")),
            );
        };
        if deadline <= Utc::now() {
            warn!(
                client_id = %ctx.client_id,
                correl_id = %ctx.correl_id,
                "request has expired"
            );
            return Validation::Rejected {
                ctx,
                status: SmsStatus::Expired,
                error_text: None,
            };
        }

        let message = match self.decode_payload(&ctx.client_id, &payload).await {
            Ok(message) => message,
            Err(detail) => {
                return invalid(ctx, format!("Failed to parse request payload: {}", detail))
            }
        };

        if !message.has_header(HEADER_TO) {
            return invalid(ctx, format!("SMS lacks field: {}", HEADER_TO));
        }
        if !message.has_header(HEADER_SENDER) {
            return invalid(ctx, format!("SMS lacks field: {}", HEADER_SENDER));
        }
        if message.body().is_empty() {
            return invalid(ctx, "SMS body is empty".to_string());
        }

        debug!(
            client_id = %ctx.client_id,
            correl_id = %ctx.correl_id,
            "request passed validation"
        );
        Validation::Accepted { ctx, message }
    }

    async fn decode_payload(&self, client_id: &str, payload: &str) -> Result<SmsMessage, String> {
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| format!("base64 decode: {}", e))?;
        let plaintext = self
            .vault
            .decrypt(client_id, &bytes)
            .await
            .map_err(|e| e.to_string())?;
        SmsMessage::parse_bytes(&plaintext).map_err(|e| e.to_string())
    }
}

fn invalid(ctx: RequestContext, error_text: String) -> Validation {
    error!(
        client_id = %ctx.client_id,
        correl_id = %ctx.correl_id,
        error_text = %error_text,
        "request failed validation"
    );
    Validation::Rejected {
        ctx,
        status: SmsStatus::Invalid,
        error_text: Some(error_text),
    }
}
