//! Peer transport over a Unix stream socket.
//!
//! Frames are length-prefixed by their envelope, so the reader splits the
//! byte stream on `Envelope::length`. Notifications use `try_write`: a full
//! socket buffer with nothing written yet is transient back-pressure, any
//! other I/O failure is peer death. Acknowledgements are written in full.
//!
//! A peer that stops reading halfway through a frame gets `stall_timeout` to
//! drain it; after that the connection is dropped and treated as dead, so the
//! connection lock is never held indefinitely.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::PeerPid;
use crate::ipc::security::{AuthorizationRules, Credentials};
use crate::ipc::wire::{peek_frame_len, ENVELOPE_LEN, MAX_INBOUND_FRAME};
use crate::ipc::ControlHandler;
use crate::ports::{PeerTransport, TransportError};

const READ_CHUNK: usize = 4096;
const STALL_TIMEOUT: Duration = Duration::from_secs(1);

struct Connection {
    id: u64,
    writer: OwnedWriteHalf,
}

/// Transport bound to the currently attached peer connection.
pub struct UnixStreamTransport {
    current: Mutex<Option<Connection>>,
    attached: AtomicU64,
    stall_timeout: Duration,
}

impl Default for UnixStreamTransport {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
            attached: AtomicU64::new(0),
            stall_timeout: STALL_TIMEOUT,
        }
    }
}

impl UnixStreamTransport {
    /// Creates a transport with no connection; sends fail until `attach()`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Like `new()`, with a custom bound on how long a partially written
    /// frame or an acknowledgement may wait for the peer to read.
    pub fn with_stall_timeout(stall_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            stall_timeout,
            ..Self::default()
        })
    }

    /// Takes over `stream` as the peer connection and spawns its reader.
    ///
    /// Credentials come from `SO_PEERCRED`; a previous connection's writer is
    /// replaced.
    pub async fn attach(
        self: &Arc<Self>,
        stream: UnixStream,
        handler: ControlHandler,
        rules: &AuthorizationRules,
    ) -> io::Result<JoinHandle<()>> {
        let cred = stream.peer_cred()?;
        let pid = cred.pid().map(|p| p as PeerPid).unwrap_or(0);
        let credentials = rules.credentials_for(pid, cred.uid());

        let (reader, writer) = stream.into_split();
        let id = self.attached.fetch_add(1, Ordering::SeqCst) + 1;
        *self.current.lock().await = Some(Connection { id, writer });
        info!(pid, uid = credentials.uid, "Peer connection attached");

        let transport = Arc::clone(self);
        Ok(tokio::spawn(async move {
            transport.read_loop(id, reader, handler, credentials).await;
        }))
    }

    async fn read_loop(
        self: Arc<Self>,
        id: u64,
        mut reader: OwnedReadHalf,
        handler: ControlHandler,
        credentials: Credentials,
    ) {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        'conn: loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(pid = credentials.pid, error = %e, "Peer read failed");
                    break;
                }
            }

            while let Some(len) = peek_frame_len(&buf) {
                let desynced = len < ENVELOPE_LEN || len > MAX_INBOUND_FRAME;
                if !desynced && buf.len() < len {
                    break;
                }
                if desynced && buf.len() < ENVELOPE_LEN {
                    break;
                }

                let frame = if desynced {
                    buf.split().freeze()
                } else {
                    buf.split_to(len).freeze()
                };
                if let Some(reply) = handler.handle_frame(frame, &credentials) {
                    if let Err(e) = self.write_all(&reply).await {
                        warn!(pid = credentials.pid, error = %e, "Failed to write acknowledgement");
                        break 'conn;
                    }
                }
                if desynced {
                    warn!(pid = credentials.pid, len, "Unframeable stream, closing connection");
                    break 'conn;
                }
            }
        }

        {
            // A newer connection may have replaced this one.
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|c| c.id == id) {
                current.take();
            }
        }
        if credentials.pid != 0 {
            handler.queue().peer_released(credentials.pid);
        }
        debug!(pid = credentials.pid, "Peer connection closed");
    }

    async fn write_all(&self, frame: &[u8]) -> io::Result<()> {
        let mut current = self.current.lock().await;
        let Some(conn) = current.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };
        tokio::time::timeout(self.stall_timeout, conn.writer.write_all(frame))
            .await
            .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()))
    }
}

/// Writes `frame` without blocking until the first byte is out, then
/// finishes it before `deadline`.
async fn write_frame(
    writer: &mut OwnedWriteHalf,
    pid: PeerPid,
    frame: &[u8],
    deadline: tokio::time::Instant,
) -> Result<(), TransportError> {
    let mut written = 0;
    while written < frame.len() {
        match writer.try_write(&frame[written..]) {
            Ok(0) => return Err(TransportError::Disconnected),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // Nothing sent yet: let the worker retry later. A partial
                // frame must be finished to keep the stream framed.
                if written == 0 {
                    return Err(TransportError::WouldBlock);
                }
                match tokio::time::timeout_at(deadline, writer.writable()).await {
                    Ok(ready) => ready.map_err(|e| TransportError::Io(e.to_string()))?,
                    Err(_) => {
                        warn!(pid, written, len = frame.len(), "Peer stalled mid-frame");
                        return Err(TransportError::Disconnected);
                    }
                }
            }
            Err(e) => {
                debug!(pid, error = %e, "Notification write failed");
                return Err(match e.kind() {
                    io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                        TransportError::Disconnected
                    }
                    _ => TransportError::Io(e.to_string()),
                });
            }
        }
    }
    Ok(())
}

#[async_trait]
impl PeerTransport for UnixStreamTransport {
    async fn send(&self, pid: PeerPid, frame: Bytes) -> Result<(), TransportError> {
        let mut current = self.current.lock().await;
        let Some(Connection { writer, .. }) = current.as_mut() else {
            return Err(TransportError::Disconnected);
        };
        let deadline = tokio::time::Instant::now() + self.stall_timeout;

        let result = write_frame(writer, pid, &frame, deadline).await;
        if matches!(result, Err(TransportError::Disconnected)) {
            // The stream may be mid-frame; it cannot carry anything else.
            current.take();
        }
        result
    }

    async fn close(&self) {
        let taken = self.current.lock().await.take();
        if let Some(mut conn) = taken {
            let _ = conn.writer.shutdown().await;
        }
    }
}

/// Accepts peer connections on `listener` and attaches each in turn.
///
/// Runs until accepting fails.
pub async fn serve_unix_peer(
    listener: UnixListener,
    transport: Arc<UnixStreamTransport>,
    handler: ControlHandler,
    rules: AuthorizationRules,
) -> io::Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        if let Err(e) = transport.attach(stream, handler.clone(), &rules).await {
            warn!(error = %e, "Failed to attach peer connection");
        }
    }
}
