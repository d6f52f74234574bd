//! Per-stream state (one playback or publish unit)

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::MediaError;
use crate::media::MediaKind;
use crate::playout::{DecoderFactory, PlayoutEvent, PlayoutScheduler, Timer, TimerHandle};
use crate::rpc::CallRegistry;

/// Opaque reference to a stream owned by a connection
///
/// Wraps the channel ID the stream sends on; it never keeps the
/// connection or the stream alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub(crate) u32);

impl StreamHandle {
    /// Channel the stream's messages go out on
    pub fn channel(&self) -> u32 {
        self.0
    }
}

/// Stream lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// createStream sent, no stream ID yet
    Creating,
    /// Has a stream ID, not playing or publishing
    Idle,
    Playing,
    Paused,
    Publishing,
}

/// One NetStream
#[derive(Debug)]
pub struct NetStream {
    channel: u32,
    stream_id: Option<u32>,
    state: StreamState,
    name: Option<String>,
    receive_audio: bool,
    receive_video: bool,
    /// Latest media timestamp seen, for pause positions
    position: u32,
    audio: PlayoutScheduler,
    video: PlayoutScheduler,
    handlers: CallRegistry,
}

impl NetStream {
    pub fn new(channel: u32, threshold: Duration, factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            channel,
            stream_id: None,
            state: StreamState::Creating,
            name: None,
            receive_audio: true,
            receive_video: true,
            position: 0,
            audio: PlayoutScheduler::new(MediaKind::Audio, threshold, Arc::clone(&factory)),
            video: PlayoutScheduler::new(MediaKind::Video, threshold, factory),
            handlers: CallRegistry::new(),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle(self.channel)
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn stream_id(&self) -> Option<u32> {
        self.stream_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn handlers(&mut self) -> &mut CallRegistry {
        &mut self.handlers
    }

    pub fn scheduler(&self, kind: MediaKind) -> &PlayoutScheduler {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    pub(crate) fn set_created(&mut self, stream_id: u32) {
        self.stream_id = Some(stream_id);
        if self.state == StreamState::Creating {
            self.state = StreamState::Idle;
        }
    }

    pub(crate) fn set_playing(&mut self, name: &str) {
        self.name = Some(name.to_string());
        self.state = StreamState::Playing;
    }

    pub(crate) fn set_publishing(&mut self, name: &str) {
        self.name = Some(name.to_string());
        self.state = StreamState::Publishing;
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.state = match (paused, self.state) {
            (true, StreamState::Playing) => StreamState::Paused,
            (false, StreamState::Paused) => StreamState::Playing,
            (_, state) => state,
        };
    }

    pub(crate) fn set_receive(&mut self, kind: MediaKind, enabled: bool) {
        match kind {
            MediaKind::Audio => self.receive_audio = enabled,
            MediaKind::Video => self.receive_video = enabled,
        }
    }

    /// Feed a received media packet into its scheduler
    pub(crate) fn push_media(
        &mut self,
        kind: MediaKind,
        timestamp: u32,
        payload: Bytes,
        now: Duration,
        timer: &mut dyn Timer,
    ) -> Result<(), MediaError> {
        let enabled = match kind {
            MediaKind::Audio => self.receive_audio,
            MediaKind::Video => self.receive_video,
        };
        if !enabled {
            return Ok(());
        }
        self.position = timestamp;
        self.scheduler_mut(kind).push(timestamp, payload, now, timer)
    }

    /// Offer an expired timer to both schedulers
    pub(crate) fn on_timer(&mut self, handle: TimerHandle, now: Duration, timer: &mut dyn Timer) -> bool {
        self.audio.on_timer(handle, now, timer) || self.video.on_timer(handle, now, timer)
    }

    /// Drop buffered media (seek, stop)
    pub(crate) fn clear_playout(&mut self, timer: &mut dyn Timer) {
        self.audio.clear(timer);
        self.video.clear(timer);
    }

    /// Cancel timers and release decoders
    pub(crate) fn close(&mut self, timer: &mut dyn Timer) {
        self.audio.close(timer);
        self.video.close(timer);
    }

    /// Next playout event of either kind
    pub(crate) fn poll_playout(&mut self) -> Option<(MediaKind, PlayoutEvent)> {
        if let Some(ev) = self.audio.poll_event() {
            return Some((MediaKind::Audio, ev));
        }
        self.video.poll_event().map(|ev| (MediaKind::Video, ev))
    }

    fn scheduler_mut(&mut self, kind: MediaKind) -> &mut PlayoutScheduler {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::playout::{PassthroughDecoderFactory, TimerQueue};

    fn stream() -> NetStream {
        NetStream::new(4, Duration::from_millis(40), Arc::new(PassthroughDecoderFactory))
    }

    #[test]
    fn test_state_transitions() {
        let mut s = stream();
        assert_eq!(s.state(), StreamState::Creating);
        s.set_created(1);
        assert_eq!(s.state(), StreamState::Idle);
        assert_eq!(s.stream_id(), Some(1));

        s.set_paused(true);
        assert_eq!(s.state(), StreamState::Idle);

        s.set_playing("clip");
        s.set_paused(true);
        assert_eq!(s.state(), StreamState::Paused);
        s.set_paused(false);
        assert_eq!(s.state(), StreamState::Playing);
        assert_eq!(s.name(), Some("clip"));
    }

    #[test]
    fn test_disabled_kind_is_dropped() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new(clock);
        let mut s = stream();
        s.set_receive(MediaKind::Audio, false);

        for ts in [0u32, 20, 40] {
            s.push_media(MediaKind::Audio, ts, Bytes::from_static(&[0xAF, 1]), Duration::ZERO, &mut timers)
                .unwrap();
            s.push_media(MediaKind::Video, ts, Bytes::from_static(&[0x27, 1]), Duration::ZERO, &mut timers)
                .unwrap();
        }
        assert_eq!(s.scheduler(MediaKind::Audio).queued(), 0);
        assert_eq!(s.scheduler(MediaKind::Video).queued(), 3);
        assert!(s.scheduler(MediaKind::Video).is_playing());
        assert_eq!(s.poll_playout(), Some((MediaKind::Video, PlayoutEvent::Started)));
    }

    #[test]
    fn test_close_cancels_timers() {
        let clock = ManualClock::new();
        let mut timers = TimerQueue::new(clock);
        let mut s = stream();
        for ts in [0u32, 20, 40] {
            s.push_media(MediaKind::Video, ts, Bytes::from_static(&[0x27, 1]), Duration::ZERO, &mut timers)
                .unwrap();
        }
        assert_eq!(timers.len(), 1);
        s.close(&mut timers);
        assert!(timers.is_empty());
    }
}
