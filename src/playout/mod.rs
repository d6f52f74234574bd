//! Buffered, clock-paced media playout
//!
//! Each playing stream owns one [`PlayoutScheduler`] per media kind. The
//! schedulers share the connection's [`TimerQueue`]; the event loop waits
//! for [`TimerQueue::next_deadline`] and feeds expired handles back.

pub mod decoder;
pub mod scheduler;
pub mod timer;

pub use decoder::{DecoderFactory, MediaDecoder, PassthroughDecoder, PassthroughDecoderFactory};
pub use scheduler::{DecodedFrame, PlayoutEvent, PlayoutScheduler};
pub use timer::{Timer, TimerHandle, TimerQueue};
