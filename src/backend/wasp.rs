// HTTP carrier backend for the Vodacom WASP REST API. The provider offers
// the same API on several https endpoints; submissions use sticky failover:
// requests go to the last known good endpoint, and only a connection-level
// failure advances to the next one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::{carrier_fields, CarrierFields, SmsBackend, SubmitOutcome};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::message::SmsMessage;

const BACKEND_LABEL: &str = "Vodacom";
const INTERFACE_ID: &str = "JX";

#[derive(Debug, Clone)]
pub struct WaspConfig {
    /// Ordered endpoint URLs; all serve the same API.
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
    /// Bound on each endpoint attempt, so failover can proceed.
    pub request_timeout: Duration,
}

pub struct WaspBackend {
    client: reqwest::Client,
    config: WaspConfig,
    /// Index of the last known good endpoint. Owned by the backend instance,
    /// not per-request; advanced only on confirmed connection-level failure.
    sticky: AtomicUsize,
}

impl WaspBackend {
    pub fn new(config: WaspConfig) -> GatewayResult<Self> {
        if config.endpoints.is_empty() {
            return Err(GatewayError::config(
                "WASP backend needs at least one endpoint URL",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::backend(e.to_string()))?;
        Ok(Self {
            client,
            config,
            sticky: AtomicUsize::new(0),
        })
    }

    /// POST the document to the endpoints in sticky-failover order. Returns
    /// the first answered exchange, or `None` when every endpoint failed at
    /// the connection level.
    async fn exchange(&self, document: &str) -> Option<Result<reqwest::Response, reqwest::Error>> {
        let count = self.config.endpoints.len();
        let start = self.sticky.load(Ordering::Relaxed);

        for attempt in 0..count {
            let index = (start + attempt) % count;
            let url = &self.config.endpoints[index];
            debug!(%url, "submitting to WASP endpoint");

            match self
                .client
                .post(url)
                .header("Content-Type", "application/xml")
                .body(document.to_string())
                .send()
                .await
            {
                // any endpoint that answers stays sticky for later requests
                Ok(response) => return Some(Ok(response)),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!(%url, error = %e, "WASP endpoint unreachable, failing over");
                    metrics::BACKEND_FAILOVERS.inc();
                    self.sticky.store((index + 1) % count, Ordering::Relaxed);
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[async_trait]
impl SmsBackend for WaspBackend {
    async fn submit(&self, message: &SmsMessage) -> SubmitOutcome {
        let fields = match carrier_fields(message, BACKEND_LABEL) {
            Ok(fields) => fields,
            Err(error_text) => {
                error!(%error_text, "failed to produce WASP request");
                return SubmitOutcome::invalid(error_text);
            }
        };

        let request = SubmitReq::new(&self.config, &fields);
        let document = match quick_xml::se::to_string(&request) {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "failed to serialize WASP request");
                return SubmitOutcome::failed(format!("Failed to serialize WASP request: {}", e));
            }
        };

        let response = match self.exchange(&document).await {
            None => {
                error!("all WASP endpoints failed at the connection level");
                return SubmitOutcome::failed("No WASP endpoint reachable");
            }
            Some(Err(e)) => {
                // the request may have been transmitted; stay silent
                error!(error = %e, "WASP exchange error, not reporting a status");
                return SubmitOutcome::Ambiguous;
            }
            Some(Ok(response)) => response,
        };

        let http_status = response.status();
        if !http_status.is_success() {
            error!(status = %http_status, "error status from WASP endpoint");
            return SubmitOutcome::failed(format!("HTTP {} from WASP endpoint", http_status));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to read WASP response body, not reporting a status");
                return SubmitOutcome::Ambiguous;
            }
        };
        debug!(%body, "WASP backend response");

        let parsed: SubmitRsp = match quick_xml::de::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                // answered but undecodable: the submission state is unknown
                error!(error = %e, "undecodable WASP response, not reporting a status");
                return SubmitOutcome::Ambiguous;
            }
        };

        if parsed.status.status_code == 0 {
            let recall_id = parsed.message_id.filter(|id| !id.is_empty());
            info!(
                recall_id = recall_id.as_deref().unwrap_or("(none)"),
                "SMS accepted by WASP"
            );
            SubmitOutcome::Accepted { recall_id }
        } else {
            error!(
                status_code = parsed.status.status_code,
                status_text = parsed.status.status_text.as_deref().unwrap_or(""),
                "error response from Vodacom"
            );
            SubmitOutcome::failed(format!(
                "Error {} from Vodacom: {}: {}",
                parsed.status.status_code,
                parsed.status.status_text.as_deref().unwrap_or(""),
                parsed.status.detail.as_deref().unwrap_or(""),
            ))
        }
    }
}

// ===== WASP document schema =====

#[derive(Debug, Serialize)]
#[serde(rename = "SMSSubmitReq")]
struct SubmitReq {
    #[serde(rename = "InterfaceID")]
    interface_id: &'static str,
    #[serde(rename = "Sender")]
    sender: ReqSender,
    #[serde(rename = "Recipient")]
    recipient: ReqRecipient,
    #[serde(rename = "MsgDetails")]
    msg_details: ReqMsgDetails,
    #[serde(rename = "Tariff")]
    tariff: ReqTariff,
    #[serde(rename = "DeliveryReport")]
    delivery_report: ReqDeliveryReport,
}

#[derive(Debug, Serialize)]
struct ReqSender {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "SenderAddressType")]
    sender_address_type: u32,
    #[serde(rename = "Address")]
    address: String,
}

#[derive(Debug, Serialize)]
struct ReqRecipient {
    #[serde(rename = "Number")]
    number: String,
}

#[derive(Debug, Serialize)]
struct ReqMsgDetails {
    #[serde(rename = "ShortMessage")]
    short_message: String,
    #[serde(rename = "MsgType")]
    msg_type: u32,
}

#[derive(Debug, Serialize)]
struct ReqTariff {
    #[serde(rename = "TariffPrice")]
    tariff_price: u32,
}

#[derive(Debug, Serialize)]
struct ReqDeliveryReport {
    #[serde(rename = "ReportEnabled")]
    report_enabled: bool,
}

impl SubmitReq {
    fn new(config: &WaspConfig, fields: &CarrierFields<'_>) -> Self {
        Self {
            interface_id: INTERFACE_ID,
            sender: ReqSender {
                username: config.username.clone(),
                password: config.password.clone(),
                sender_address_type: 1,
                address: fields.sender.to_string(),
            },
            recipient: ReqRecipient {
                // the API wants the number without the leading '+'
                number: fields.recipient.trim_start_matches('+').to_string(),
            },
            msg_details: ReqMsgDetails {
                short_message: fields.body.to_string(),
                msg_type: 0,
            },
            tariff: ReqTariff { tariff_price: 0 },
            delivery_report: ReqDeliveryReport {
                report_enabled: false,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRsp {
    #[serde(rename = "MessageID", default)]
    message_id: Option<String>,
    #[serde(rename = "Status")]
    status: RspStatus,
}

#[derive(Debug, Deserialize)]
struct RspStatus {
    #[serde(rename = "StatusCode")]
    status_code: i32,
    #[serde(rename = "StatusText", default)]
    status_text: Option<String>,
    #[serde(rename = "Detail", default)]
    detail: Option<String>,
}
