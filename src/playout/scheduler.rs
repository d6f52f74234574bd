//! Real-time playout of one media kind
//!
//! Packets are buffered until their summed durations reach a threshold,
//! then released one per timer firing. Each packet's duration is the gap
//! between its timestamp and the previous packet's, and the timer for a
//! packet is aligned to an absolute due time on the connection clock so
//! late firings do not accumulate drift.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::MediaError;
use crate::media::{CodecTag, MediaKind};
use crate::playout::decoder::{DecoderFactory, MediaDecoder};
use crate::playout::timer::{Timer, TimerHandle};

/// Timestamp jumps backwards or beyond this are treated as discontinuities
const MAX_PACKET_GAP_MS: u32 = 10_000;

/// Decoded output ready for presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub kind: MediaKind,
    pub codec: CodecTag,
    /// Timestamp of the source packet in milliseconds
    pub timestamp: u32,
    pub data: Bytes,
}

/// Observable playout transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayoutEvent {
    /// Buffer reached the threshold
    Started,
    /// A packet was decoded
    Frame(DecodedFrame),
    /// Queue drained (or cleared while playing)
    Stopped,
}

#[derive(Debug)]
struct QueuedPacket {
    duration: Duration,
    timestamp: u32,
    payload: Bytes,
    codec: CodecTag,
}

/// Buffer and pacing state for one media kind of one stream
pub struct PlayoutScheduler {
    kind: MediaKind,
    threshold: Duration,
    queue: VecDeque<QueuedPacket>,
    buffered: Duration,
    last_timestamp: Option<u32>,
    playing: bool,
    armed: Option<TimerHandle>,
    /// Clock time the armed packet is due at
    next_due: Duration,
    factory: Arc<dyn DecoderFactory>,
    decoder: Option<(CodecTag, Box<dyn MediaDecoder>)>,
    events: VecDeque<PlayoutEvent>,
}

impl PlayoutScheduler {
    pub fn new(kind: MediaKind, threshold: Duration, factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            kind,
            threshold,
            queue: VecDeque::new(),
            buffered: Duration::ZERO,
            last_timestamp: None,
            playing: false,
            armed: None,
            next_due: Duration::ZERO,
            factory,
            decoder: None,
            events: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Summed duration of queued packets
    pub fn buffered(&self) -> Duration {
        self.buffered
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn armed(&self) -> Option<TimerHandle> {
        self.armed
    }

    /// Codec of the active decoder
    pub fn active_codec(&self) -> Option<CodecTag> {
        self.decoder.as_ref().map(|(codec, _)| *codec)
    }

    /// Queue a packet; may start playback
    ///
    /// Packets whose codec cannot be identified are rejected without
    /// touching the queue.
    pub fn push(
        &mut self,
        timestamp: u32,
        payload: Bytes,
        now: Duration,
        timer: &mut dyn Timer,
    ) -> Result<(), MediaError> {
        let codec = CodecTag::from_payload(self.kind, &payload)?;

        let gap = match self.last_timestamp {
            Some(last) => {
                let gap = timestamp.wrapping_sub(last);
                if gap > MAX_PACKET_GAP_MS {
                    tracing::debug!(kind = %self.kind, last, timestamp, "Timestamp discontinuity");
                    0
                } else {
                    gap
                }
            }
            None => 0,
        };
        let duration = Duration::from_millis(gap as u64);
        self.last_timestamp = Some(timestamp);

        self.queue.push_back(QueuedPacket {
            duration,
            timestamp,
            payload,
            codec,
        });
        self.buffered += duration;

        if !self.playing && self.buffered >= self.threshold {
            self.playing = true;
            tracing::debug!(
                kind = %self.kind,
                buffered_ms = self.buffered.as_millis() as u64,
                "Playout started"
            );
            self.events.push_back(PlayoutEvent::Started);
            self.next_due = now;
            self.arm_next(now, timer);
        }
        Ok(())
    }

    /// Handle an expired timer; returns false if `handle` is not ours
    pub fn on_timer(&mut self, handle: TimerHandle, now: Duration, timer: &mut dyn Timer) -> bool {
        if self.armed != Some(handle) {
            return false;
        }
        self.armed = None;

        if let Some(packet) = self.queue.pop_front() {
            self.buffered = self.buffered.saturating_sub(packet.duration);
            self.present(packet);
        }

        if self.queue.is_empty() {
            self.playing = false;
            tracing::debug!(kind = %self.kind, "Playout stopped, queue drained");
            self.events.push_back(PlayoutEvent::Stopped);
        } else {
            self.arm_next(now, timer);
        }
        true
    }

    /// Drop everything queued and cancel the armed timer
    ///
    /// The decoder is kept; the next packet decides whether it still fits.
    pub fn clear(&mut self, timer: &mut dyn Timer) {
        if let Some(handle) = self.armed.take() {
            timer.cancel(handle);
        }
        self.queue.clear();
        self.buffered = Duration::ZERO;
        self.last_timestamp = None;
        if self.playing {
            self.playing = false;
            self.events.push_back(PlayoutEvent::Stopped);
        }
    }

    /// Clear and release the decoder
    pub fn close(&mut self, timer: &mut dyn Timer) {
        self.clear(timer);
        self.decoder = None;
    }

    pub fn poll_event(&mut self) -> Option<PlayoutEvent> {
        self.events.pop_front()
    }

    /// Arm the timer for the head packet, due its duration after the last one
    fn arm_next(&mut self, now: Duration, timer: &mut dyn Timer) {
        let head = match self.queue.front() {
            Some(head) => head,
            None => return,
        };
        self.next_due += head.duration;
        let delay = self.next_due.saturating_sub(now);

        if let Some(stale) = self.armed.take() {
            timer.cancel(stale);
        }
        self.armed = Some(timer.schedule(delay));
    }

    fn present(&mut self, packet: QueuedPacket) {
        if self.active_codec() != Some(packet.codec) {
            match self.factory.create(packet.codec) {
                Ok(decoder) => {
                    if let Some((old, _)) = &self.decoder {
                        tracing::info!(kind = %self.kind, from = %old, to = %packet.codec, "Switching decoder");
                    }
                    self.decoder = Some((packet.codec, decoder));
                }
                Err(e) => {
                    tracing::warn!(kind = %self.kind, codec = %packet.codec, error = %e, "No decoder for codec");
                    self.decoder = None;
                    return;
                }
            }
        }

        let decoder = match self.decoder.as_mut() {
            Some((_, decoder)) => decoder,
            None => return,
        };
        match decoder.decode(&packet.payload) {
            Ok(Some(data)) => self.events.push_back(PlayoutEvent::Frame(DecodedFrame {
                kind: self.kind,
                codec: packet.codec,
                timestamp: packet.timestamp,
                data,
            })),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(kind = %self.kind, timestamp = packet.timestamp, error = %e, "Decode failed");
            }
        }
    }
}

impl std::fmt::Debug for PlayoutScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayoutScheduler")
            .field("kind", &self.kind)
            .field("queued", &self.queue.len())
            .field("buffered", &self.buffered)
            .field("playing", &self.playing)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::playout::decoder::PassthroughDecoderFactory;
    use crate::playout::timer::TimerQueue;
    use std::sync::Mutex;

    const AVC: u8 = 0x27;
    const VP6: u8 = 0x24;

    fn packet(codec_byte: u8, n: u8) -> Bytes {
        Bytes::from(vec![codec_byte, n])
    }

    struct Setup {
        clock: Arc<ManualClock>,
        timers: TimerQueue,
        scheduler: PlayoutScheduler,
    }

    fn setup(factory: Arc<dyn DecoderFactory>) -> Setup {
        let clock = ManualClock::new();
        let timers = TimerQueue::new(clock.clone());
        let scheduler = PlayoutScheduler::new(MediaKind::Video, Duration::from_millis(100), factory);
        Setup {
            clock,
            timers,
            scheduler,
        }
    }

    impl Setup {
        fn push(&mut self, ts: u32, payload: Bytes) {
            let now = self.clock.now();
            self.scheduler.push(ts, payload, now, &mut self.timers).unwrap();
        }

        /// Advance to each deadline in turn, returning (fire time ms, event) pairs
        fn run(&mut self) -> Vec<(u64, PlayoutEvent)> {
            let mut out = Vec::new();
            while let Some(deadline) = self.timers.next_deadline() {
                self.clock.set(deadline);
                let now = self.clock.now();
                for handle in self.timers.expired(now) {
                    self.scheduler.on_timer(handle, now, &mut self.timers);
                }
                while let Some(ev) = self.scheduler.poll_event() {
                    out.push((now.as_millis() as u64, ev));
                }
            }
            out
        }

        fn events(&mut self) -> Vec<PlayoutEvent> {
            std::iter::from_fn(|| self.scheduler.poll_event()).collect()
        }
    }

    #[test]
    fn test_below_threshold_never_plays() {
        let mut s = setup(Arc::new(PassthroughDecoderFactory));
        for (i, ts) in [0u32, 20, 40, 60, 80].into_iter().enumerate() {
            s.push(ts, packet(AVC, i as u8));
        }
        assert_eq!(s.scheduler.buffered(), Duration::from_millis(80));
        assert!(!s.scheduler.is_playing());
        assert!(s.scheduler.armed().is_none());
        assert!(s.events().is_empty());
        assert!(s.timers.is_empty());
    }

    #[test]
    fn test_plays_in_order_at_declared_spacing() {
        let mut s = setup(Arc::new(PassthroughDecoderFactory));
        for (i, ts) in [0u32, 20, 40, 60, 80, 100].into_iter().enumerate() {
            s.push(ts, packet(AVC, i as u8));
        }
        assert!(s.scheduler.is_playing());
        assert_eq!(s.events(), vec![PlayoutEvent::Started]);

        let fired = s.run();
        let frames: Vec<(u64, u8)> = fired
            .iter()
            .filter_map(|(at, ev)| match ev {
                PlayoutEvent::Frame(f) => Some((*at, f.data[1])),
                _ => None,
            })
            .collect();
        assert_eq!(
            frames,
            vec![(0, 0), (20, 1), (40, 2), (60, 3), (80, 4), (100, 5)]
        );

        let stops = fired
            .iter()
            .filter(|(_, ev)| *ev == PlayoutEvent::Stopped)
            .count();
        assert_eq!(stops, 1);
        assert_eq!(fired.last().map(|(_, ev)| ev), Some(&PlayoutEvent::Stopped));
        assert!(!s.scheduler.is_playing());
        assert_eq!(s.scheduler.buffered(), Duration::ZERO);
    }

    #[test]
    fn test_late_firing_does_not_drift() {
        let mut s = setup(Arc::new(PassthroughDecoderFactory));
        for (i, ts) in [0u32, 50, 100, 150].into_iter().enumerate() {
            s.push(ts, packet(AVC, i as u8));
        }

        // First packet fires immediately; the second is due at 50
        let now = s.clock.now();
        for h in s.timers.expired(now) {
            s.scheduler.on_timer(h, now, &mut s.timers);
        }
        assert_eq!(s.timers.next_deadline(), Some(Duration::from_millis(50)));

        // Fire 15 ms late; the third stays due at 100, not 115
        s.clock.set(Duration::from_millis(65));
        let now = s.clock.now();
        for h in s.timers.expired(now) {
            s.scheduler.on_timer(h, now, &mut s.timers);
        }
        assert_eq!(s.timers.next_deadline(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_clear_cancels_armed_timer() {
        let mut s = setup(Arc::new(PassthroughDecoderFactory));
        for ts in [0u32, 50, 100, 150] {
            s.push(ts, packet(AVC, 0));
        }
        let armed = s.scheduler.armed().unwrap();
        s.events();

        s.scheduler.clear(&mut s.timers);
        assert!(!s.timers.is_armed(armed));
        assert!(s.scheduler.armed().is_none());
        assert_eq!(s.scheduler.queued(), 0);
        assert_eq!(s.events(), vec![PlayoutEvent::Stopped]);

        // A handle from before the clear is ignored
        let now = s.clock.now();
        assert!(!s.scheduler.on_timer(armed, now, &mut s.timers));
        assert!(s.events().is_empty());

        // Fresh timestamps after a seek start a new buffer
        s.push(5000, packet(AVC, 1));
        assert_eq!(s.scheduler.buffered(), Duration::ZERO);
    }

    struct CountingFactory {
        created: Mutex<Vec<CodecTag>>,
    }

    impl DecoderFactory for CountingFactory {
        fn create(&self, codec: CodecTag) -> Result<Box<dyn MediaDecoder>, MediaError> {
            self.created.lock().unwrap().push(codec);
            PassthroughDecoderFactory.create(codec)
        }
    }

    #[test]
    fn test_codec_change_recreates_decoder() {
        let factory = Arc::new(CountingFactory {
            created: Mutex::new(Vec::new()),
        });
        let mut s = setup(factory.clone());
        s.push(0, packet(AVC, 0));
        s.push(40, packet(AVC, 1));
        s.push(80, packet(VP6, 2));
        s.push(120, packet(AVC, 3));
        s.run();

        let created = factory.created.lock().unwrap();
        let ids: Vec<u8> = created.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 4, 7]);
        assert_eq!(s.scheduler.active_codec().map(|c| c.id), Some(7));
    }

    #[test]
    fn test_empty_packet_rejected() {
        let mut s = setup(Arc::new(PassthroughDecoderFactory));
        let now = s.clock.now();
        assert_eq!(
            s.scheduler.push(0, Bytes::new(), now, &mut s.timers),
            Err(MediaError::EmptyPacket)
        );
        assert_eq!(s.scheduler.queued(), 0);
    }

    #[test]
    fn test_refill_after_drain_starts_again() {
        let mut s = setup(Arc::new(PassthroughDecoderFactory));
        for ts in [0u32, 100] {
            s.push(ts, packet(AVC, 0));
        }
        s.run();
        assert!(!s.scheduler.is_playing());

        s.push(200, packet(AVC, 1));
        assert!(s.scheduler.is_playing());
        let fired = s.run();
        assert_eq!(
            fired.iter().filter(|(_, e)| *e == PlayoutEvent::Stopped).count(),
            1
        );
    }
}
