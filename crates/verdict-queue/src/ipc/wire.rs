//! # Wire Envelope
//!
//! Every frame on the peer channel starts with a 16-byte little-endian
//! envelope:
//!
//! ```text
//! 0        4        6        8        12       16
//! +--------+--------+--------+--------+--------+----------------
//! | length |  type  | flags  |  seq   | source |  payload ...
//! +--------+--------+--------+--------+--------+----------------
//! ```
//!
//! `length` covers the envelope itself. Frames from the peer must carry
//! `REQUEST`, must not be `MULTI` fragments, and must name a non-zero source.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::domain::{CodecError, PeerPid, MAX_COPY_RANGE};

/// Envelope size in bytes.
pub const ENVELOPE_LEN: usize = 16;

/// Message types.
pub mod msg_type {
    pub const NOOP: u16 = 0x01;
    /// Acknowledgement, positive or negative.
    pub const ERROR: u16 = 0x02;
    /// Types at or below this value are control traffic and ignored.
    pub const BASE: u16 = 0x10;
    pub const MODE: u16 = 0x11;
    pub const VERDICT: u16 = 0x12;
    /// Packet notification (queue to peer).
    pub const PACKET: u16 = 0x13;
}

/// Envelope flags.
pub mod flags {
    pub const REQUEST: u16 = 0x1;
    pub const MULTI: u16 = 0x2;
    pub const ACK: u16 = 0x4;
}

/// Largest frame accepted from the peer: a verdict carrying a full payload.
pub const MAX_INBOUND_FRAME: usize = ENVELOPE_LEN + 16 + MAX_COPY_RANGE as usize;

/// Frame header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub length: u32,
    pub msg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub source: PeerPid,
}

impl Envelope {
    pub fn new(msg_type: u16, flags: u16, seq: u32, source: PeerPid) -> Self {
        Self {
            length: ENVELOPE_LEN as u32,
            msg_type,
            flags,
            seq,
            source,
        }
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Reads the envelope at the start of `raw`.
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < ENVELOPE_LEN {
            return Err(CodecError::Truncated {
                needed: ENVELOPE_LEN,
                available: raw.len(),
            });
        }
        let mut buf = &raw[..ENVELOPE_LEN];
        Ok(Self {
            length: buf.get_u32_le(),
            msg_type: buf.get_u16_le(),
            flags: buf.get_u16_le(),
            seq: buf.get_u32_le(),
            source: buf.get_u32_le(),
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.length);
        buf.put_u16_le(self.msg_type);
        buf.put_u16_le(self.flags);
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.source);
    }
}

/// Builds a complete frame around `payload`.
pub fn frame(msg_type: u16, flags: u16, seq: u32, source: PeerPid, payload: &[u8]) -> Bytes {
    let mut envelope = Envelope::new(msg_type, flags, seq, source);
    envelope.length = (ENVELOPE_LEN + payload.len()) as u32;

    let mut buf = BytesMut::with_capacity(ENVELOPE_LEN + payload.len());
    envelope.encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Length of the first frame in a stream buffer, once its envelope arrived.
pub fn peek_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let mut head = &buf[..4];
    Some(head.get_u32_le() as usize)
}

/// Structural checks on an inbound envelope.
pub struct EnvelopeValidator;

impl EnvelopeValidator {
    /// Validates `envelope` against the `available` bytes of its frame.
    ///
    /// Checks, in order:
    /// 1. Length sane (covers the envelope, fits the frame, within limits)
    /// 2. REQUEST flag set
    /// 3. Not a MULTI fragment
    /// 4. Source id non-zero
    pub fn validate(envelope: &Envelope, available: usize) -> Result<(), CodecError> {
        let declared = envelope.length as usize;
        if declared < ENVELOPE_LEN || declared > available || declared > MAX_INBOUND_FRAME {
            return Err(CodecError::LengthMismatch {
                declared,
                available,
            });
        }

        if !envelope.has_flag(flags::REQUEST) {
            return Err(CodecError::NotRequest);
        }

        if envelope.has_flag(flags::MULTI) {
            return Err(CodecError::Fragmented);
        }

        if envelope.source == 0 {
            return Err(CodecError::InvalidSource);
        }

        Ok(())
    }
}
