//! Packet buffer with a shared payload view.
//!
//! The payload is a `Bytes` view: notification snapshots are cheap slices
//! that share the allocation. Only the verdict path that rewrites the payload
//! needs a unique buffer, and it copies only if a snapshot is still alive.

use bytes::{Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

/// An intercepted packet.
#[derive(Clone, Debug)]
pub struct PacketBuffer {
    data: Bytes,
    altered: bool,
    received_at: SystemTime,
}

impl PacketBuffer {
    /// Wraps a payload received now.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_timestamp(data, SystemTime::now())
    }

    pub fn with_timestamp(data: impl Into<Bytes>, received_at: SystemTime) -> Self {
        Self {
            data: data.into(),
            altered: false,
            received_at,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shared view of the first `range` bytes; 0 means the whole payload.
    pub fn view(&self, range: usize) -> Bytes {
        if range == 0 || range >= self.data.len() {
            self.data.clone()
        } else {
            self.data.slice(..range)
        }
    }

    /// CRC-32 of the current payload.
    pub fn fingerprint(&self) -> u32 {
        crc32fast::hash(&self.data)
    }

    /// True once a verdict rewrote the payload.
    pub fn is_altered(&self) -> bool {
        self.altered
    }

    /// Arrival time as (seconds, microseconds) since the epoch.
    pub fn timestamp_parts(&self) -> (i64, i64) {
        let since = self
            .received_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (since.as_secs() as i64, i64::from(since.subsec_micros()))
    }

    /// Replaces the payload with `payload`, resizing the buffer.
    ///
    /// Shrinking truncates in place. Growing reserves tail room, which
    /// reallocates when the current capacity is too small.
    pub fn replace_payload(&mut self, payload: &[u8]) {
        let mut buf = match std::mem::take(&mut self.data).try_into_mut() {
            Ok(unique) => unique,
            Err(shared) => BytesMut::from(shared.as_ref()),
        };

        let current = buf.len();
        if payload.len() < current {
            buf.truncate(payload.len());
        } else if payload.len() > current {
            buf.reserve(payload.len() - current);
            buf.resize(payload.len(), 0);
        }
        buf.copy_from_slice(payload);

        self.data = buf.freeze();
        self.altered = true;
    }

    /// Consumes the buffer, returning its payload.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
