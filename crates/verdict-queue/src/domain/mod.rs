//! # Domain Layer - Verdict Queue
//!
//! Pure queue logic. No I/O, no async, no hook or transport calls.
//!
//! ## Components
//!
//! - `entities`: Element state machine, Verdict, CopyMode, Peer, HookInfo
//! - `packet`: PacketBuffer with shared payload views
//! - `store`: QueueCore, the ordered element store
//! - `value_objects`: Admission, VerdictRecord, PassPlan, diagnostics
//! - `config`: QueueConfig and its environment overrides
//! - `errors`: QueueError, CodecError and errno mapping

pub mod config;
pub mod entities;
pub mod errors;
pub mod packet;
pub mod store;
pub mod value_objects;

pub use config::*;
pub use entities::*;
pub use errors::*;
pub use packet::*;
pub use store::*;
pub use value_objects::*;
