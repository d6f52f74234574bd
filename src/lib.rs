//! rtmp-play: RTMP client core for media players
//!
//! This library implements the client side of RTMP:
//! - Strict C0C1/S0S1S2/C2 handshake
//! - Chunk multiplexing with round-robin output across channels
//! - AMF0 remote calls with invoke ID correlation
//! - Control channel housekeeping (ping, bandwidth, acknowledgements)
//! - Clock-paced, buffered playout with pluggable decoders
//!
//! The protocol core ([`Connection`]) is sans-io; [`RtmpClient`] drives it
//! over TCP with tokio.
//!
//! # Example: Play a stream
//!
//! ```no_run
//! use rtmp_play::{ClientConfig, ConnectionEvent, RtmpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("rtmp://localhost/live");
//!     let (client, mut events) = RtmpClient::connect(config).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             ConnectionEvent::Connected => {
//!                 client.create_stream().await?;
//!             }
//!             ConnectionEvent::StreamCreated { stream, .. } => {
//!                 client.play(stream, "show", -2.0).await?;
//!             }
//!             ConnectionEvent::Frame { frame, .. } => {
//!                 println!("{} frame at {}ms", frame.kind, frame.timestamp);
//!             }
//!             ConnectionEvent::Closed { error } => {
//!                 println!("closed: {:?}", error);
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod amf;
pub mod client;
pub mod clock;
pub mod error;
pub mod media;
pub mod playout;
pub mod protocol;
pub mod rpc;

// Re-export main types for convenience
pub use amf::{AmfObject, AmfValue};
pub use client::{
    ClientConfig, ClientHandle, Connection, ConnectionEvent, ConnectionState, RtmpClient, StreamHandle,
};
pub use clock::{Clock, ConnectionClock, ManualClock};
pub use error::{Error, Result};
pub use media::MediaKind;
pub use playout::{DecodedFrame, DecoderFactory, MediaDecoder};
pub use protocol::message::StatusInfo;
pub use rpc::Reply;
