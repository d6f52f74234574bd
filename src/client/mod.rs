//! RTMP client
//!
//! [`Connection`] is the protocol state machine and does no I/O.
//! [`RtmpClient`] runs one over TCP (or any [`Transport`]) on a tokio task
//! and hands out [`ClientHandle`]s for issuing requests.

pub mod config;
pub mod connection;
pub mod control;
pub mod session;
pub mod stream;
pub mod transport;

pub use config::{ClientConfig, ParsedUrl};
pub use connection::{Connection, ConnectionEvent, ConnectionState};
pub use control::{ControlAction, ControlChannel};
pub use session::{ClientHandle, EventReceiver, RtmpClient};
pub use stream::{NetStream, StreamHandle, StreamState};
pub use transport::{open_tcp, StreamTransport, Transport};
