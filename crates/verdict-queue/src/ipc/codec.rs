//! # Protocol Codec
//!
//! Payload layouts carried inside envelopes (all little-endian).
//!
//! | Message | Direction | Layout |
//! |---------|-----------|--------|
//! | MODE | peer → queue | `mode: u8, pad: [u8; 3], range: u32` |
//! | VERDICT | peer → queue | `id: u64, verdict: i32, data_len: u32, payload` |
//! | PACKET | queue → peer | 72-byte header (below), `payload` |
//! | ERROR | queue → peer | `error: i32, original envelope` |
//!
//! Notification header:
//!
//! ```text
//! id: u64 | mark: u32 | ts_sec: i64 | ts_usec: i64 | hook: u32
//! in_ifname: [u8; 16] | out_ifname: [u8; 16] | hw_protocol: u16 | pad: u16
//! data_len: u32
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::domain::{
    CodecError, CopyMode, ElementId, ModeChange, NotifyJob, Verdict, VerdictRecord,
    MAX_COPY_RANGE,
};
use crate::ipc::wire::{frame, msg_type, Envelope, ENVELOPE_LEN};

pub const MODE_PAYLOAD_LEN: usize = 8;
pub const VERDICT_HEADER_LEN: usize = 16;
pub const NOTIFICATION_HEADER_LEN: usize = 72;
pub const ACK_PAYLOAD_LEN: usize = 4 + ENVELOPE_LEN;

/// Interface name field width, including the terminating NUL.
pub const IFNAMSIZ: usize = 16;

fn ensure(payload: &[u8], needed: usize) -> Result<(), CodecError> {
    if payload.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            available: payload.len(),
        });
    }
    Ok(())
}

pub fn decode_mode(payload: &[u8]) -> Result<ModeChange, CodecError> {
    ensure(payload, MODE_PAYLOAD_LEN)?;
    let mut buf = payload;
    let raw_mode = buf.get_u8();
    buf.advance(3);
    let range = buf.get_u32_le();
    let mode = CopyMode::from_u8(raw_mode).ok_or(CodecError::UnknownMode(raw_mode))?;
    Ok(ModeChange { mode, range })
}

pub fn encode_mode(change: ModeChange) -> Bytes {
    let mut buf = BytesMut::with_capacity(MODE_PAYLOAD_LEN);
    buf.put_u8(change.mode.as_u8());
    buf.put_bytes(0, 3);
    buf.put_u32_le(change.range);
    buf.freeze()
}

/// Parses a verdict. Nothing is mutated on failure.
///
/// The replacement payload, if any, is a slice of `payload`.
pub fn decode_verdict(payload: Bytes) -> Result<VerdictRecord, CodecError> {
    ensure(&payload, VERDICT_HEADER_LEN)?;
    let mut head = &payload[..VERDICT_HEADER_LEN];
    let id = head.get_u64_le();
    let code = head.get_i32_le();
    let data_len = head.get_u32_le() as usize;

    let verdict = Verdict::from_code(code).ok_or(CodecError::UnknownVerdict(code))?;

    let available = payload.len() - VERDICT_HEADER_LEN;
    if data_len > available {
        return Err(CodecError::LengthMismatch {
            declared: data_len,
            available,
        });
    }
    if data_len > MAX_COPY_RANGE as usize {
        return Err(CodecError::PayloadTooLarge {
            len: data_len,
            max: MAX_COPY_RANGE as usize,
        });
    }

    let replacement = (data_len > 0)
        .then(|| payload.slice(VERDICT_HEADER_LEN..VERDICT_HEADER_LEN + data_len));

    Ok(VerdictRecord {
        id,
        verdict,
        payload: replacement,
    })
}

pub fn encode_verdict(record: &VerdictRecord) -> Bytes {
    let data: &[u8] = record.payload.as_deref().unwrap_or_default();
    let mut buf = BytesMut::with_capacity(VERDICT_HEADER_LEN + data.len());
    buf.put_u64_le(record.id);
    buf.put_i32_le(record.verdict.code());
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
    buf.freeze()
}

/// Outbound packet notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub id: ElementId,
    pub mark: u32,
    pub timestamp_sec: i64,
    pub timestamp_usec: i64,
    pub hook: u32,
    pub in_dev: Option<String>,
    pub out_dev: Option<String>,
    pub hw_protocol: u16,
    /// Payload copy; empty in META mode.
    pub payload: Bytes,
}

impl Notification {
    pub fn from_job(job: &NotifyJob) -> Self {
        Self {
            id: job.id,
            mark: job.hook.mark,
            timestamp_sec: job.timestamp.0,
            timestamp_usec: job.timestamp.1,
            hook: job.hook.hook,
            in_dev: job.hook.in_dev.clone(),
            out_dev: job.hook.out_dev.clone(),
            hw_protocol: job.hook.hw_protocol,
            payload: job.payload.clone().unwrap_or_default(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(NOTIFICATION_HEADER_LEN + self.payload.len());
        buf.put_u64_le(self.id);
        buf.put_u32_le(self.mark);
        buf.put_i64_le(self.timestamp_sec);
        buf.put_i64_le(self.timestamp_usec);
        buf.put_u32_le(self.hook);
        put_ifname(&mut buf, self.in_dev.as_deref());
        put_ifname(&mut buf, self.out_dev.as_deref());
        buf.put_u16_le(self.hw_protocol);
        buf.put_u16_le(0);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Peer-side decoder.
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        ensure(payload, NOTIFICATION_HEADER_LEN)?;
        let mut buf = payload;
        let id = buf.get_u64_le();
        let mark = buf.get_u32_le();
        let timestamp_sec = buf.get_i64_le();
        let timestamp_usec = buf.get_i64_le();
        let hook = buf.get_u32_le();
        let in_dev = get_ifname(&mut buf);
        let out_dev = get_ifname(&mut buf);
        let hw_protocol = buf.get_u16_le();
        buf.advance(2);
        let data_len = buf.get_u32_le() as usize;
        if data_len > buf.remaining() {
            return Err(CodecError::LengthMismatch {
                declared: data_len,
                available: buf.remaining(),
            });
        }
        Ok(Self {
            id,
            mark,
            timestamp_sec,
            timestamp_usec,
            hook,
            in_dev,
            out_dev,
            hw_protocol,
            payload: Bytes::copy_from_slice(&buf[..data_len]),
        })
    }
}

/// Names longer than 15 bytes are truncated; the field stays NUL-terminated.
fn put_ifname(buf: &mut BytesMut, name: Option<&str>) {
    let bytes = name.map(str::as_bytes).unwrap_or_default();
    let len = bytes.len().min(IFNAMSIZ - 1);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, IFNAMSIZ - len);
}

fn get_ifname(buf: &mut &[u8]) -> Option<String> {
    let field = &buf[..IFNAMSIZ];
    let end = field.iter().position(|b| *b == 0).unwrap_or(IFNAMSIZ);
    let name = (end > 0).then(|| String::from_utf8_lossy(&field[..end]).into_owned());
    buf.advance(IFNAMSIZ);
    name
}

/// Builds a PACKET frame for `job`.
pub fn notification_frame(job: &NotifyJob, seq: u32) -> Bytes {
    let payload = Notification::from_job(job).encode();
    frame(msg_type::PACKET, 0, seq, 0, &payload)
}

/// Builds an acknowledgement echoing `original`; `error` 0 is positive.
pub fn ack_frame(error: i32, original: &Envelope) -> Bytes {
    let mut payload = BytesMut::with_capacity(ACK_PAYLOAD_LEN);
    payload.put_i32_le(error);
    original.encode(&mut payload);
    frame(msg_type::ERROR, 0, original.seq, 0, &payload)
}

/// Peer-side decoder for an acknowledgement payload.
pub fn decode_ack(payload: &[u8]) -> Result<(i32, Envelope), CodecError> {
    ensure(payload, ACK_PAYLOAD_LEN)?;
    let mut buf = payload;
    let error = buf.get_i32_le();
    let original = Envelope::decode(buf)?;
    Ok((error, original))
}
