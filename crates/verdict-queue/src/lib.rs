//! # Packet Verdict Queue
//!
//! Holds packets diverted at a policy checkpoint, hands each one to a single
//! userspace decision peer, and reinjects it with the peer's verdict.
//!
//! ## Purpose
//!
//! The hook delivers a packet; the queue notifies the peer over its
//! transport and keeps the packet until a verdict arrives. The peer may
//! rewrite the payload in its verdict. Nothing in the hook path blocks on the
//! peer.
//!
//! ## Queue Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | Length equals linked elements | `domain/store.rs` - length is `elements.len()` |
//! | Never more than `max_len` linked | `domain/store.rs` - `admit()` |
//! | Every packet reinjected exactly once | `domain/store.rs` - `begin_pass()` / `drain_all()` |
//! | Stale verdicts never match | `domain/store.rs` - monotonic ids |
//! | Hook callback never under the lock | `service/worker.rs`, `service/queue.rs` |
//!
//! ## Element Lifecycle
//!
//! ```text
//! [NEW] ──worker pass──→ [NOTIFYING] ──send ok──→ [WAITING] ──verdict──→ [VERDICT_SET]
//!   ↑                         │                                              │
//!   └──── transient failure ──┘                             worker pass: reinject
//! ```
//!
//! ## Queue State
//!
//! | State | Admits | Entered by | Left by |
//! |-------|--------|------------|---------|
//! | HOLD | no | start, completed flush | mode META/PACKET |
//! | COPY | yes | mode META/PACKET | mode NONE, peer death, shutdown |
//! | FLUSH | no | mode NONE, peer death, shutdown | worker flush pass |
//!
//! ## Error Policy
//!
//! | Failure | Handling |
//! |---------|----------|
//! | Queue full / inactive | DROP in the caller's context |
//! | Transient send failure | Back to NEW, retried after `retry_interval` |
//! | Fatal send failure | Peer cleared, FLUSH |
//! | Malformed / unauthorized frame | Negative ack, nothing mutated |
//! | Verdict for unknown id | Ignored |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - in-memory hook, channel and Unix socket transports │
//! │  ipc/      - envelope, codec, authorization, ControlHandler     │
//! │  service/  - VerdictQueue handle and worker task                │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - PacketInterceptor                          │
//! │  ports/outbound.rs - InterceptHook, PeerTransport               │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/store.rs    - QueueCore                                 │
//! │  domain/entities.rs - Element, Verdict, CopyMode, Peer          │
//! │  domain/packet.rs   - PacketBuffer                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use verdict_queue::{ChannelTransport, ControlHandler, QueueConfig, RecordingHook, VerdictQueue};
//!
//! let hook = Arc::new(RecordingHook::new());
//! let (transport, mut frames) = ChannelTransport::new(64);
//! let queue = VerdictQueue::start(QueueConfig::from_env()?, hook, Arc::new(transport))?;
//! let control = ControlHandler::new(queue.clone());
//! // feed peer frames into `control.handle_frame(..)`, read notifications from `frames`
//! queue.shutdown().await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ipc;
pub mod ports;
pub mod service;

pub use adapters::*;
pub use domain::*;
pub use ipc::{AuthorizationRules, ControlHandler, Credentials};
pub use ports::*;
pub use service::VerdictQueue;
