// Session-protocol backend: a long-lived SMPP transceiver bind to the SMSC.
// Submissions travel out over the session; delivery receipts arrive back on
// the same session and feed the gateway's notification stream.

pub(crate) mod codec;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::backend::{carrier_fields, SmsBackend, SubmitOutcome};
use crate::error::{GatewayError, GatewayResult};
use crate::message::SmsMessage;
use crate::types::{DeliveryNotification, DeliveryState};

const BACKEND_LABEL: &str = "SMPP";

/// Longest short_message we submit in one PDU; longer bodies are split and
/// submitted as separate segments.
const MAX_SEGMENT_LEN: usize = 160;

const RECONNECT_DELAY_MIN: Duration = Duration::from_secs(1);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SmppConfig {
    pub host: String,
    pub port: u16,
    pub system_id: String,
    pub password: String,
    /// Bound on waiting for a submit_sm_resp; an elapsed timeout is an
    /// ambiguous outcome, not a failure.
    pub response_timeout: Duration,
}

/// Reply of the session task to one submit_sm.
#[derive(Debug)]
enum SubmitReply {
    Ack { message_id: String },
    Nack { status: u32 },
    /// The transport broke while the PDU may have been on the wire.
    TransportLost,
    /// There is no bound session; nothing was sent.
    NotConnected,
}

enum SessionCmd {
    Submit {
        source: String,
        dest: String,
        text: Vec<u8>,
        resp: oneshot::Sender<SubmitReply>,
    },
}

/// SMPP carrier backend. Owns a background session task; cloning the handle
/// shares the session.
pub struct SmppBackend {
    cmd_tx: mpsc::Sender<SessionCmd>,
    response_timeout: Duration,
}

impl SmppBackend {
    /// Start the backend and its session task. Delivery receipts from the
    /// SMSC arrive on the returned notification stream.
    pub fn start(config: SmppConfig) -> (Self, mpsc::Receiver<DeliveryNotification>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (notif_tx, notif_rx) = mpsc::channel(64);
        let response_timeout = config.response_timeout;
        tokio::spawn(session_loop(config, cmd_rx, notif_tx));
        (
            Self {
                cmd_tx,
                response_timeout,
            },
            notif_rx,
        )
    }

    async fn submit_segment(&self, source: &str, dest: &str, text: &str) -> SubmitReply {
        let (resp, rx) = oneshot::channel();
        let cmd = SessionCmd::Submit {
            source: source.to_string(),
            dest: dest.to_string(),
            text: text.as_bytes().to_vec(),
            resp,
        };
        if self.cmd_tx.send(cmd).await.is_err() {
            error!("SMPP session task is gone");
            return SubmitReply::NotConnected;
        }
        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // channel closed after the command was handed over: the PDU may
            // have been written
            Ok(Err(_)) => SubmitReply::TransportLost,
            Err(_) => {
                warn!("no submit_sm_resp within timeout");
                SubmitReply::TransportLost
            }
        }
    }
}

#[async_trait]
impl SmsBackend for SmppBackend {
    async fn submit(&self, message: &SmsMessage) -> SubmitOutcome {
        let fields = match carrier_fields(message, BACKEND_LABEL) {
            Ok(fields) => fields,
            Err(error_text) => {
                error!(%error_text, "failed to produce SMPP request");
                return SubmitOutcome::invalid(error_text);
            }
        };

        let mut message_ids = Vec::new();
        for segment in segments(fields.body) {
            match self
                .submit_segment(fields.sender, fields.recipient, segment)
                .await
            {
                SubmitReply::Ack { message_id } => message_ids.push(message_id),
                SubmitReply::Nack { status } => {
                    error!(status, "negative submit response from SMSC");
                    return SubmitOutcome::failed(format!(
                        "SMSC rejected message submission: command status {}",
                        status
                    ));
                }
                SubmitReply::NotConnected if message_ids.is_empty() => {
                    return SubmitOutcome::failed("Failed to send SMS through SMSC");
                }
                // a later segment failed after earlier ones went out, or the
                // transport broke mid-exchange: the message may be in flight
                SubmitReply::NotConnected | SubmitReply::TransportLost => {
                    error!("not reporting a status (message may have been sent)");
                    return SubmitOutcome::Ambiguous;
                }
            }
        }

        // only the last segment's id is used for correlation
        let recall_id = match message_ids.last().filter(|id| !id.is_empty()) {
            Some(id) => Some(normalize_recall_id(id)),
            None => {
                error!("SMS was sent but we did not receive a recall ID to correlate on");
                None
            }
        };
        SubmitOutcome::Accepted { recall_id }
    }
}

/// Split a body into submit-sized segments on char boundaries.
fn segments(body: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = body;
    while rest.len() > MAX_SEGMENT_LEN {
        let mut split = MAX_SEGMENT_LEN;
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        let (head, tail) = rest.split_at(split);
        out.push(head);
        rest = tail;
    }
    out.push(rest);
    out
}

/// The SMSC hands out message ids as hexadecimal strings but delivery
/// receipts quote their decimal equivalent, so ids are reinterpreted as hex
/// at submit time. Ids that do not parse are kept verbatim with a warning.
fn normalize_recall_id(id: &str) -> String {
    match i64::from_str_radix(id, 16) {
        Ok(numeric) => {
            let decimal = numeric.to_string();
            debug!(id, %decimal, "recall-id reinterpreted as hex");
            decimal
        }
        Err(_) => {
            warn!(id, "failed to parse recall ID as a hex number");
            id.to_string()
        }
    }
}

/// Receipts may quote the id zero-padded while the submit response was not.
fn strip_leading_zeros(id: &str) -> &str {
    let stripped = id.trim_start_matches('0');
    if stripped.is_empty() {
        "0"
    } else {
        stripped
    }
}

async fn session_loop(
    config: SmppConfig,
    mut cmd_rx: mpsc::Receiver<SessionCmd>,
    notif_tx: mpsc::Sender<DeliveryNotification>,
) {
    let mut reconnect_delay = RECONNECT_DELAY_MIN;
    loop {
        let stream = match connect_and_bind(&config).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, host = %config.host, port = config.port, "failed to bind to SMSC");
                if drain_while_disconnected(&mut cmd_rx, reconnect_delay).await.is_err() {
                    return;
                }
                reconnect_delay = (reconnect_delay * 2).min(RECONNECT_DELAY_MAX);
                continue;
            }
        };
        info!(host = %config.host, port = config.port, "bound to SMSC as transceiver");
        reconnect_delay = RECONNECT_DELAY_MIN;

        if run_session(stream, &mut cmd_rx, &notif_tx).await.is_err() {
            // command channel closed, gateway is shutting down
            return;
        }

        warn!("SMSC session ended, reconnecting");
        if drain_while_disconnected(&mut cmd_rx, reconnect_delay).await.is_err() {
            return;
        }
    }
}

async fn connect_and_bind(config: &SmppConfig) -> GatewayResult<TcpStream> {
    let mut stream = TcpStream::connect((config.host.as_str(), config.port)).await?;

    let bind = codec::bind_transceiver(1, &config.system_id, &config.password);
    stream.write_all(&bind.encode()).await?;

    let resp = codec::read_pdu(&mut stream).await?;
    if resp.command_id != codec::BIND_TRANSCEIVER_RESP {
        return Err(GatewayError::backend(format!(
            "unexpected PDU {:#010x} in response to bind",
            resp.command_id
        )));
    }
    if resp.command_status != codec::STATUS_OK {
        return Err(GatewayError::backend(format!(
            "bind rejected with command status {}",
            resp.command_status
        )));
    }
    Ok(stream)
}

/// Run one bound session until the transport breaks. Returns `Err(())` when
/// the command channel is closed and the loop should exit for good.
async fn run_session(
    stream: TcpStream,
    cmd_rx: &mut mpsc::Receiver<SessionCmd>,
    notif_tx: &mpsc::Sender<DeliveryNotification>,
) -> Result<(), ()> {
    let (mut reader, mut writer) = stream.into_split();

    // dedicated reader task keeps PDU framing intact across select arms
    let (pdu_tx, mut pdu_rx) = mpsc::channel::<GatewayResult<codec::Pdu>>(16);
    let read_task = tokio::spawn(async move {
        loop {
            match codec::read_pdu(&mut reader).await {
                Ok(pdu) => {
                    if pdu_tx.send(Ok(pdu)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = pdu_tx.send(Err(e)).await;
                    break;
                }
            }
        }
    });

    let mut pending: HashMap<u32, oneshot::Sender<SubmitReply>> = HashMap::new();
    let mut sequence: u32 = 1; // 1 was the bind

    let result = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(SessionCmd::Submit { source, dest, text, resp }) = cmd else {
                    break Err(());
                };
                sequence = sequence.wrapping_add(1);
                let sm = codec::SmBody {
                    source_addr: source,
                    dest_addr: dest,
                    esm_class: 0,
                    short_message: text,
                };
                let pdu = codec::encode_sm(codec::SUBMIT_SM, sequence, &sm);
                debug!(sequence, "submitting SMS to SMSC");
                if let Err(e) = writer.write_all(&pdu.encode()).await {
                    error!(error = %e, "failed to write submit_sm");
                    let _ = resp.send(SubmitReply::TransportLost);
                    break Ok(());
                }
                pending.insert(sequence, resp);
            }

            pdu = pdu_rx.recv() => {
                let pdu = match pdu {
                    Some(Ok(pdu)) => pdu,
                    Some(Err(e)) => {
                        error!(error = %e, "error reading from SMSC");
                        break Ok(());
                    }
                    None => break Ok(()),
                };
                if handle_pdu(pdu, &mut pending, &mut writer, notif_tx).await.is_err() {
                    break Ok(());
                }
            }
        }
    };

    read_task.abort();
    for (_, resp) in pending.drain() {
        let _ = resp.send(SubmitReply::TransportLost);
    }
    result
}

async fn handle_pdu(
    pdu: codec::Pdu,
    pending: &mut HashMap<u32, oneshot::Sender<SubmitReply>>,
    writer: &mut (impl AsyncWriteExt + Unpin),
    notif_tx: &mpsc::Sender<DeliveryNotification>,
) -> GatewayResult<()> {
    match pdu.command_id {
        codec::SUBMIT_SM_RESP => {
            let Some(resp) = pending.remove(&pdu.sequence) else {
                warn!(sequence = pdu.sequence, "submit_sm_resp for unknown sequence");
                return Ok(());
            };
            let reply = if pdu.command_status == codec::STATUS_OK {
                match codec::submit_sm_resp_message_id(&pdu) {
                    Ok(message_id) => SubmitReply::Ack { message_id },
                    // decode failure after the submit went out
                    Err(e) => {
                        error!(error = %e, "undecodable submit_sm_resp");
                        SubmitReply::TransportLost
                    }
                }
            } else {
                SubmitReply::Nack {
                    status: pdu.command_status,
                }
            };
            let _ = resp.send(reply);
        }

        codec::DELIVER_SM => {
            let sequence = pdu.sequence;
            handle_deliver_sm(pdu, notif_tx).await;
            writer
                .write_all(&codec::deliver_sm_resp(sequence).encode())
                .await?;
        }

        codec::ENQUIRE_LINK => {
            writer
                .write_all(&codec::enquire_link_resp(pdu.sequence).encode())
                .await?;
        }
        codec::ENQUIRE_LINK_RESP => {}

        codec::UNBIND => {
            writer
                .write_all(&codec::unbind_resp(pdu.sequence).encode())
                .await?;
            return Err(GatewayError::backend("SMSC requested unbind"));
        }

        other => {
            debug!(command_id = %format!("{:#010x}", other), "ignoring PDU");
        }
    }
    Ok(())
}

async fn handle_deliver_sm(pdu: codec::Pdu, notif_tx: &mpsc::Sender<DeliveryNotification>) {
    let sm = match codec::decode_sm(&pdu) {
        Ok(sm) => sm,
        Err(e) => {
            error!(error = %e, "undecodable deliver_sm");
            return;
        }
    };

    let text = String::from_utf8_lossy(&sm.short_message).into_owned();

    if sm.esm_class & codec::ESM_CLASS_DELIVERY_RECEIPT == 0 {
        warn!(source = %sm.source_addr, "ignoring a non-receipt message from the SMSC");
        return;
    }

    let Some(receipt) = codec::parse_delivery_receipt(&text) else {
        warn!(%text, "delivery receipt without stat field, ignoring");
        return;
    };

    let recall_id = receipt.message_id.as_deref().map(|id| {
        let stripped = strip_leading_zeros(id);
        if stripped != id {
            info!(id, stripped, "stripping leading zeros off the recall-id");
        }
        stripped.to_string()
    });
    if recall_id.is_none() {
        error!("delivery receipt without recall ID, can't report back to client");
    }
    info!(
        recall_id = recall_id.as_deref().unwrap_or("(none)"),
        state = %receipt.state,
        error = receipt.error.as_deref().unwrap_or("(none)"),
        "delivery receipt"
    );

    let notification = DeliveryNotification {
        recall_id,
        state: map_receipt_state(&receipt.state),
        error: receipt.error,
    };
    if notif_tx.send(notification).await.is_err() {
        warn!("notification channel closed, dropping delivery receipt");
    }
}

fn map_receipt_state(state: &str) -> DeliveryState {
    match state {
        "ACCEPTD" => DeliveryState::Accepted,
        "ENROUTE" => DeliveryState::EnRoute,
        "DELIVRD" => DeliveryState::Delivered,
        "EXPIRED" => DeliveryState::Expired,
        "DELETED" => DeliveryState::Deleted,
        "UNDELIV" => DeliveryState::Undeliverable,
        "REJECTD" => DeliveryState::Rejected,
        "UNKNOWN" => DeliveryState::Unknown,
        other => DeliveryState::Unrecognized(other.to_string()),
    }
}

/// Answer queued submits with NotConnected while waiting out the reconnect
/// delay. `Err(())` means the command channel closed.
async fn drain_while_disconnected(
    cmd_rx: &mut mpsc::Receiver<SessionCmd>,
    delay: Duration,
) -> Result<(), ()> {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        match tokio::time::timeout_at(deadline, cmd_rx.recv()).await {
            Ok(Some(SessionCmd::Submit { resp, .. })) => {
                let _ = resp.send(SubmitReply::NotConnected);
            }
            Ok(None) => return Err(()),
            Err(_) => return Ok(()),
        }
    }
}
