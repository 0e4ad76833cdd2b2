// Minimal SMPP 3.4 codec: the PDUs a transceiver session needs to bind,
// submit messages and take delivery receipts. Optional TLVs on inbound PDUs
// are ignored.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{GatewayError, GatewayResult};

pub const BIND_TRANSCEIVER: u32 = 0x0000_0009;
pub const BIND_TRANSCEIVER_RESP: u32 = 0x8000_0009;
pub const SUBMIT_SM: u32 = 0x0000_0004;
pub const SUBMIT_SM_RESP: u32 = 0x8000_0004;
pub const DELIVER_SM: u32 = 0x0000_0005;
pub const DELIVER_SM_RESP: u32 = 0x8000_0005;
pub const UNBIND: u32 = 0x0000_0006;
pub const UNBIND_RESP: u32 = 0x8000_0006;
pub const ENQUIRE_LINK: u32 = 0x0000_0015;
pub const ENQUIRE_LINK_RESP: u32 = 0x8000_0015;

pub const STATUS_OK: u32 = 0;

/// esm_class bit marking a deliver_sm as a delivery receipt.
pub const ESM_CLASS_DELIVERY_RECEIPT: u8 = 0x04;

const HEADER_LEN: usize = 16;
const MAX_PDU_LEN: usize = 64 * 1024;
const INTERFACE_VERSION: u8 = 0x34;

/// One protocol data unit: the 16-byte header plus the raw body.
#[derive(Debug, Clone)]
pub struct Pdu {
    pub command_id: u32,
    pub command_status: u32,
    pub sequence: u32,
    pub body: Vec<u8>,
}

impl Pdu {
    pub fn new(command_id: u32, command_status: u32, sequence: u32, body: Vec<u8>) -> Self {
        Self {
            command_id,
            command_status,
            sequence,
            body,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        buf.put_u32((HEADER_LEN + self.body.len()) as u32);
        buf.put_u32(self.command_id);
        buf.put_u32(self.command_status);
        buf.put_u32(self.sequence);
        buf.put_slice(&self.body);
        buf.to_vec()
    }
}

/// Read one PDU off the wire.
pub async fn read_pdu<R: AsyncRead + Unpin>(reader: &mut R) -> GatewayResult<Pdu> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let mut buf = &header[..];
    let command_length = buf.get_u32() as usize;
    let command_id = buf.get_u32();
    let command_status = buf.get_u32();
    let sequence = buf.get_u32();

    if !(HEADER_LEN..=MAX_PDU_LEN).contains(&command_length) {
        return Err(GatewayError::backend(format!(
            "invalid PDU length {}",
            command_length
        )));
    }

    let mut body = vec![0u8; command_length - HEADER_LEN];
    reader.read_exact(&mut body).await?;

    Ok(Pdu::new(command_id, command_status, sequence, body))
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn get_cstring(buf: &mut &[u8]) -> GatewayResult<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| GatewayError::backend("unterminated C-octet string in PDU"))?;
    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1);
    Ok(s)
}

fn get_u8(buf: &mut &[u8]) -> GatewayResult<u8> {
    if buf.is_empty() {
        return Err(GatewayError::backend("truncated PDU body"));
    }
    Ok(buf.get_u8())
}

pub fn bind_transceiver(sequence: u32, system_id: &str, password: &str) -> Pdu {
    let mut body = BytesMut::new();
    put_cstring(&mut body, system_id);
    put_cstring(&mut body, password);
    put_cstring(&mut body, ""); // system_type
    body.put_u8(INTERFACE_VERSION);
    body.put_u8(0); // addr_ton
    body.put_u8(0); // addr_npi
    put_cstring(&mut body, ""); // address_range
    Pdu::new(BIND_TRANSCEIVER, 0, sequence, body.to_vec())
}

pub fn bind_transceiver_resp(sequence: u32, status: u32, system_id: &str) -> Pdu {
    let mut body = BytesMut::new();
    put_cstring(&mut body, system_id);
    Pdu::new(BIND_TRANSCEIVER_RESP, status, sequence, body.to_vec())
}

/// Shared short-message body layout of submit_sm and deliver_sm.
#[derive(Debug, Clone)]
pub struct SmBody {
    pub source_addr: String,
    pub dest_addr: String,
    pub esm_class: u8,
    pub short_message: Vec<u8>,
}

/// Encode a submit_sm or deliver_sm PDU.
///
/// Source address is alphanumeric (TON 5), destination international
/// (TON 1). A delivery receipt is requested on submission.
pub fn encode_sm(command_id: u32, sequence: u32, sm: &SmBody) -> Pdu {
    let mut body = BytesMut::new();
    put_cstring(&mut body, ""); // service_type
    body.put_u8(5); // source_addr_ton: alphanumeric
    body.put_u8(0); // source_addr_npi
    put_cstring(&mut body, &sm.source_addr);
    body.put_u8(1); // dest_addr_ton: international
    body.put_u8(1); // dest_addr_npi: ISDN
    put_cstring(&mut body, &sm.dest_addr);
    body.put_u8(sm.esm_class);
    body.put_u8(0); // protocol_id
    body.put_u8(0); // priority_flag
    put_cstring(&mut body, ""); // schedule_delivery_time
    put_cstring(&mut body, ""); // validity_period
    body.put_u8(1); // registered_delivery: receipt requested
    body.put_u8(0); // replace_if_present
    body.put_u8(0); // data_coding
    body.put_u8(0); // sm_default_msg_id
    body.put_u8(sm.short_message.len() as u8);
    body.put_slice(&sm.short_message);
    Pdu::new(command_id, 0, sequence, body.to_vec())
}

/// Decode the body of a submit_sm or deliver_sm PDU.
pub fn decode_sm(pdu: &Pdu) -> GatewayResult<SmBody> {
    let mut buf = pdu.body.as_slice();
    get_cstring(&mut buf)?; // service_type
    get_u8(&mut buf)?; // source_addr_ton
    get_u8(&mut buf)?; // source_addr_npi
    let source_addr = get_cstring(&mut buf)?;
    get_u8(&mut buf)?; // dest_addr_ton
    get_u8(&mut buf)?; // dest_addr_npi
    let dest_addr = get_cstring(&mut buf)?;
    let esm_class = get_u8(&mut buf)?;
    get_u8(&mut buf)?; // protocol_id
    get_u8(&mut buf)?; // priority_flag
    get_cstring(&mut buf)?; // schedule_delivery_time
    get_cstring(&mut buf)?; // validity_period
    get_u8(&mut buf)?; // registered_delivery
    get_u8(&mut buf)?; // replace_if_present
    get_u8(&mut buf)?; // data_coding
    get_u8(&mut buf)?; // sm_default_msg_id
    let sm_length = get_u8(&mut buf)? as usize;
    if buf.len() < sm_length {
        return Err(GatewayError::backend("truncated short_message in PDU"));
    }
    let short_message = buf[..sm_length].to_vec();

    Ok(SmBody {
        source_addr,
        dest_addr,
        esm_class,
        short_message,
    })
}

pub fn submit_sm_resp(sequence: u32, status: u32, message_id: &str) -> Pdu {
    let mut body = BytesMut::new();
    put_cstring(&mut body, message_id);
    Pdu::new(SUBMIT_SM_RESP, status, sequence, body.to_vec())
}

/// The message id assigned by the SMSC in a submit_sm_resp.
pub fn submit_sm_resp_message_id(pdu: &Pdu) -> GatewayResult<String> {
    let mut buf = pdu.body.as_slice();
    get_cstring(&mut buf)
}

pub fn deliver_sm_resp(sequence: u32) -> Pdu {
    let mut body = BytesMut::new();
    put_cstring(&mut body, "");
    Pdu::new(DELIVER_SM_RESP, STATUS_OK, sequence, body.to_vec())
}

pub fn enquire_link_resp(sequence: u32) -> Pdu {
    Pdu::new(ENQUIRE_LINK_RESP, STATUS_OK, sequence, Vec::new())
}

pub fn unbind_resp(sequence: u32) -> Pdu {
    Pdu::new(UNBIND_RESP, STATUS_OK, sequence, Vec::new())
}

/// Fields extracted from the text of a delivery receipt
/// (`id:... sub:... dlvrd:... submit date:... done date:... stat:... err:... text:...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
    pub state: String,
    pub error: Option<String>,
}

/// Parse a delivery receipt text. Returns `None` when no `stat:` field is
/// present, which means the short message is not a receipt we understand.
pub fn parse_delivery_receipt(text: &str) -> Option<DeliveryReceipt> {
    let mut message_id = None;
    let mut state = None;
    let mut error = None;

    for token in text.split_whitespace() {
        if let Some(v) = token.strip_prefix("id:") {
            message_id = Some(v.to_string());
        } else if let Some(v) = token.strip_prefix("stat:") {
            state = Some(v.to_string());
        } else if let Some(v) = token.strip_prefix("err:") {
            if !v.is_empty() {
                error = Some(v.to_string());
            }
        }
    }

    state.map(|state| DeliveryReceipt {
        message_id: message_id.filter(|id| !id.is_empty()),
        state,
        error,
    })
}
