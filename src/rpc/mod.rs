//! Remote calls over command messages
//!
//! Outbound calls get a connection-wide invoke ID when a reply is wanted;
//! replies are matched back to their target purely by that ID. Inbound
//! calls are looked up by name in a [`CallRegistry`].

pub mod engine;
pub mod handlers;

pub use engine::{Inbound, PendingCall, Reply, ReplyTarget, Responder, RpcEngine};
pub use handlers::{CallHandler, CallRegistry};
