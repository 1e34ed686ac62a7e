//! # Inbound Port - PacketInterceptor
//!
//! Driving port the intercept hook calls for every packet it diverts.
//!
//! Runs in the interception context: it must not block. Implementations link
//! the packet and signal the worker, nothing more.

use crate::domain::{Admission, HookInfo, PacketBuffer};

/// Receives packets diverted at a policy checkpoint.
///
/// # Ownership
///
/// The packet moves into the queue. Whatever the returned `Admission`, the
/// hook's `reinject` is called exactly once for it: later with the peer's
/// verdict when accepted, or with DROP before `intercept` returns when
/// rejected.
pub trait PacketInterceptor: Send + Sync {
    fn intercept(&self, packet: PacketBuffer, hook: HookInfo) -> Admission;
}
