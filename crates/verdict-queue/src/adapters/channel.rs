//! In-process peer transport over a bounded tokio channel.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::domain::PeerPid;
use crate::ports::{PeerTransport, TransportError};

/// Frame as seen by an in-process peer.
pub type PeerFrame = (PeerPid, Bytes);

/// Transport whose peer reads frames from an `mpsc::Receiver`.
///
/// A full channel is transient back-pressure; a dropped receiver is peer
/// death.
pub struct ChannelTransport {
    tx: Mutex<Option<mpsc::Sender<PeerFrame>>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PeerFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl PeerTransport for ChannelTransport {
    async fn send(&self, pid: PeerPid, frame: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.lock().clone();
        let Some(tx) = tx else {
            return Err(TransportError::Disconnected);
        };
        tx.try_send((pid, frame)).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::WouldBlock,
            TrySendError::Closed(_) => TransportError::Disconnected,
        })
    }

    async fn close(&self) {
        self.tx.lock().take();
    }
}
