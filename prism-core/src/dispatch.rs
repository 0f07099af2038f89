//! Consumer-side event loop over one session's channels.
//!
//! The dispatcher multiplexes the three host→client channels onto a
//! set of sink traits. Priority is cursor > frame > clipboard: cursor
//! latency is the thing a user notices first, so pending cursor
//! updates are delivered even in the middle of draining a large frame
//! payload, between chunks. Frames beat clipboard because a stale
//! clipboard is invisible and a stale frame is not.

use crate::channel::{
    ClipboardData, ClipboardReader, CursorReader, CursorUpdate, FrameHeader, FrameReader,
};
use crate::error::PrismError;
use crate::spin::{Liveness, SpinWait, WaitMode};

// ── Sink traits ──────────────────────────────────────────────────

/// Receives decoded frames. `frame_chunk` is called zero or more
/// times between `begin_frame` and `end_frame` with consecutive runs
/// of payload bytes, in order, totalling `header.payload_len()`.
///
/// An error from any method aborts the dispatch loop; the channel
/// cursor is not advanced past bytes the sink rejected.
pub trait FrameSink {
    fn begin_frame(&mut self, header: &FrameHeader) -> Result<(), PrismError>;
    fn frame_chunk(&mut self, bytes: &[u8]) -> Result<(), PrismError>;
    fn end_frame(&mut self) -> Result<(), PrismError>;
}

/// Receives cursor position and shape updates.
pub trait CursorSink {
    fn cursor_update(&mut self, update: CursorUpdate) -> Result<(), PrismError>;
}

/// Receives host→client clipboard transfers.
pub trait ClipboardSink {
    fn clipboard(&mut self, data: ClipboardData) -> Result<(), PrismError>;
}

// Sinks are commonly owned by the caller and lent to the dispatcher.
impl<T: FrameSink + ?Sized> FrameSink for &mut T {
    fn begin_frame(&mut self, header: &FrameHeader) -> Result<(), PrismError> {
        (**self).begin_frame(header)
    }
    fn frame_chunk(&mut self, bytes: &[u8]) -> Result<(), PrismError> {
        (**self).frame_chunk(bytes)
    }
    fn end_frame(&mut self) -> Result<(), PrismError> {
        (**self).end_frame()
    }
}

impl<T: CursorSink + ?Sized> CursorSink for &mut T {
    fn cursor_update(&mut self, update: CursorUpdate) -> Result<(), PrismError> {
        (**self).cursor_update(update)
    }
}

impl<T: ClipboardSink + ?Sized> ClipboardSink for &mut T {
    fn clipboard(&mut self, data: ClipboardData) -> Result<(), PrismError> {
        (**self).clipboard(data)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Drives all consumer-side channels from a single thread.
pub struct Dispatcher<'r, F, C, B, L> {
    frames: FrameReader<'r>,
    cursor: CursorReader<'r>,
    clipboard: ClipboardReader<'r>,
    frame_sink: F,
    cursor_sink: C,
    clipboard_sink: B,
    liveness: L,
    idle: SpinWait,
}

impl<'r, F, C, B, L> Dispatcher<'r, F, C, B, L>
where
    F: FrameSink,
    C: CursorSink,
    B: ClipboardSink,
    L: Liveness,
{
    pub fn new(
        frames: FrameReader<'r>,
        cursor: CursorReader<'r>,
        clipboard: ClipboardReader<'r>,
        frame_sink: F,
        cursor_sink: C,
        clipboard_sink: B,
        liveness: L,
        mode: WaitMode,
    ) -> Self {
        Self {
            frames,
            cursor,
            clipboard,
            frame_sink,
            cursor_sink,
            clipboard_sink,
            liveness,
            idle: SpinWait::new(mode),
        }
    }

    /// Dispatch at most one pending unit of work (one cursor update,
    /// one whole frame, or one clipboard transfer). Returns whether
    /// anything was dispatched. Never blocks waiting for a channel to
    /// become non-empty; a frame, once started, is drained to the end.
    pub fn poll_once(&mut self) -> Result<bool, PrismError> {
        if self.cursor.has_update() {
            let update = self.cursor.read_update(&self.liveness)?;
            self.cursor_sink.cursor_update(update)?;
            return Ok(true);
        }
        if self.frames.has_frame() {
            self.dispatch_frame()?;
            return Ok(true);
        }
        if self.clipboard.has_data() {
            let data = self.clipboard.read(&self.liveness)?;
            self.clipboard_sink.clipboard(data)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Run until the session ends. Returns `Ok(())` on a clean
    /// teardown (liveness dropped between messages); a liveness loss
    /// mid-frame surfaces as [`PrismError::LivenessLost`] so the
    /// caller knows the last frame was truncated.
    pub fn run(&mut self) -> Result<(), PrismError> {
        loop {
            if self.poll_once()? {
                self.idle.reset();
                continue;
            }
            if !self.liveness.alive() {
                return Ok(());
            }
            self.idle.wait();
        }
    }

    fn dispatch_frame(&mut self) -> Result<(), PrismError> {
        // Disjoint borrows: the payload callback needs the cursor
        // reader and its sink while the frame reader is borrowed.
        let Self {
            frames,
            cursor,
            frame_sink,
            cursor_sink,
            liveness,
            ..
        } = self;
        // Shared reborrow so both the payload read and the closure can
        // consult the predicate.
        let liveness = &*liveness;

        let header = frames.read_header(liveness)?;
        frame_sink.begin_frame(&header)?;
        frames.read_payload_with(&header, liveness, &mut |bytes: &[u8]| {
            // A cursor update that lands while a large payload drains
            // must not wait for the frame to finish.
            while cursor.has_update() {
                let update = cursor.read_update(liveness)?;
                cursor_sink.cursor_update(update)?;
            }
            frame_sink.frame_chunk(bytes)
        })?;
        frame_sink.end_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::byte::CTRL_SIZE;
    use crate::channel::frame::FRAME_CHANNEL_OVERHEAD;
    use crate::channel::{
        ClipboardKind, ClipboardWriter, CursorPosition, CursorWriter, FrameWriter, PixelFormat,
    };
    use crate::region::SharedRegion;

    const ALIVE: fn() -> bool = || true;

    /// Flat log of everything the sinks saw, in order.
    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        BeginFrame { width: u32, height: u32 },
        FrameChunk(usize),
        EndFrame,
        Cursor { x: i32, y: i32 },
        Clipboard { len: usize },
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl FrameSink for Recorder {
        fn begin_frame(&mut self, header: &FrameHeader) -> Result<(), PrismError> {
            self.events.push(Event::BeginFrame {
                width: header.width,
                height: header.height,
            });
            Ok(())
        }
        fn frame_chunk(&mut self, bytes: &[u8]) -> Result<(), PrismError> {
            self.events.push(Event::FrameChunk(bytes.len()));
            Ok(())
        }
        fn end_frame(&mut self) -> Result<(), PrismError> {
            self.events.push(Event::EndFrame);
            Ok(())
        }
    }

    impl CursorSink for Recorder {
        fn cursor_update(&mut self, update: CursorUpdate) -> Result<(), PrismError> {
            if let CursorUpdate::Position(p) = update {
                self.events.push(Event::Cursor { x: p.x, y: p.y });
            }
            Ok(())
        }
    }

    impl ClipboardSink for Recorder {
        fn clipboard(&mut self, data: ClipboardData) -> Result<(), PrismError> {
            self.events.push(Event::Clipboard {
                len: data.data.len(),
            });
            Ok(())
        }
    }

    struct Channels {
        frame: SharedRegion,
        cursor: SharedRegion,
        clipboard: SharedRegion,
    }

    fn channels() -> Channels {
        Channels {
            frame: SharedRegion::anonymous(FRAME_CHANNEL_OVERHEAD + 16 * 1024).unwrap(),
            cursor: SharedRegion::anonymous(CTRL_SIZE + 1024).unwrap(),
            clipboard: SharedRegion::anonymous(CTRL_SIZE + 1024).unwrap(),
        }
    }

    fn header_16x16() -> FrameHeader {
        FrameHeader {
            format: PixelFormat::Bgra8,
            width: 16,
            height: 16,
            stride: 16,
            pitch: 64,
            flags: Default::default(),
            damage: Default::default(),
        }
    }

    fn dispatcher<'r>(
        ch: &'r Channels,
        recorder_frame: &'r mut Recorder,
        recorder_cursor: &'r mut Recorder,
        recorder_clipboard: &'r mut Recorder,
    ) -> Dispatcher<'r, &'r mut Recorder, &'r mut Recorder, &'r mut Recorder, fn() -> bool> {
        Dispatcher::new(
            FrameReader::attach(ch.frame.slice(0, ch.frame.capacity()).unwrap(), WaitMode::Spin)
                .unwrap(),
            CursorReader::attach(
                ch.cursor.slice(0, ch.cursor.capacity()).unwrap(),
                WaitMode::Spin,
            )
            .unwrap(),
            ClipboardReader::attach(
                ch.clipboard.slice(0, ch.clipboard.capacity()).unwrap(),
                WaitMode::Spin,
            )
            .unwrap(),
            recorder_frame,
            recorder_cursor,
            recorder_clipboard,
            ALIVE,
            WaitMode::Spin,
        )
    }

    #[test]
    fn test_poll_once_idle_returns_false() {
        let ch = channels();
        let mut rf = Recorder::default();
        let mut rc = Recorder::default();
        let mut rb = Recorder::default();
        let mut d = dispatcher(&ch, &mut rf, &mut rc, &mut rb);
        assert!(!d.poll_once().unwrap());
    }

    #[test]
    fn test_cursor_beats_buffered_frame() {
        let ch = channels();

        let mut fw =
            FrameWriter::attach(ch.frame.slice(0, ch.frame.capacity()).unwrap()).unwrap();
        let header = header_16x16();
        fw.begin_frame(&ALIVE).unwrap();
        fw.write_header(&header).unwrap();
        fw.write_payload(&vec![0u8; header.payload_len() as usize])
            .unwrap();
        fw.finish_frame().unwrap();

        let mut cw =
            CursorWriter::attach(ch.cursor.slice(0, ch.cursor.capacity()).unwrap()).unwrap();
        cw.send_position(
            CursorPosition {
                x: 5,
                y: 7,
                visible: true,
            },
            &ALIVE,
        )
        .unwrap();

        let mut rf = Recorder::default();
        let mut rc = Recorder::default();
        let mut rb = Recorder::default();
        {
            let mut d = dispatcher(&ch, &mut rf, &mut rc, &mut rb);
            // First poll must pick the cursor even though the frame
            // was published earlier.
            assert!(d.poll_once().unwrap());
            assert!(d.poll_once().unwrap());
            assert!(!d.poll_once().unwrap());
        }
        assert_eq!(rc.events, vec![Event::Cursor { x: 5, y: 7 }]);
        assert_eq!(
            rf.events,
            vec![
                Event::BeginFrame {
                    width: 16,
                    height: 16
                },
                Event::FrameChunk(1024),
                Event::EndFrame,
            ]
        );
    }

    #[test]
    fn test_clipboard_dispatched_last() {
        let ch = channels();
        let mut bw =
            ClipboardWriter::attach(ch.clipboard.slice(0, ch.clipboard.capacity()).unwrap())
                .unwrap();
        bw.send(ClipboardKind::Text, b"hello", &ALIVE).unwrap();

        let mut rf = Recorder::default();
        let mut rc = Recorder::default();
        let mut rb = Recorder::default();
        {
            let mut d = dispatcher(&ch, &mut rf, &mut rc, &mut rb);
            assert!(d.poll_once().unwrap());
            assert!(!d.poll_once().unwrap());
        }
        assert_eq!(rb.events, vec![Event::Clipboard { len: 5 }]);
    }

    #[test]
    fn test_cursor_update_lands_mid_frame() {
        let ch = channels();

        // Producer side, driven from another thread so the cursor
        // update genuinely arrives while the payload is in flight.
        let frame_slice = ch.frame.slice(0, ch.frame.capacity()).unwrap();
        let cursor_slice = ch.cursor.slice(0, ch.cursor.capacity()).unwrap();

        let mut rf = Recorder::default();
        let mut rc = Recorder::default();
        let mut rb = Recorder::default();
        let events = std::thread::scope(|s| {
            s.spawn(move || {
                let mut fw = FrameWriter::attach(frame_slice).unwrap();
                let mut cw = CursorWriter::attach(cursor_slice).unwrap();
                let header = header_16x16();
                let payload = vec![0xabu8; header.payload_len() as usize];

                fw.begin_frame(&ALIVE).unwrap();
                fw.write_header(&header).unwrap();
                fw.write_payload(&payload[..512]).unwrap();
                // Wait for the consumer to drain the first half, then
                // slip a cursor update in before the rest.
                while fw.pending() > 0 {
                    std::hint::spin_loop();
                }
                cw.send_position(
                    CursorPosition {
                        x: 1,
                        y: 2,
                        visible: true,
                    },
                    &ALIVE,
                )
                .unwrap();
                fw.write_payload(&payload[512..]).unwrap();
                fw.finish_frame().unwrap();
            });

            let mut d = dispatcher(&ch, &mut rf, &mut rc, &mut rb);
            // One frame; the cursor update is delivered during it.
            while !d.poll_once().unwrap() {
                std::hint::spin_loop();
            }
            (
                std::mem::take(&mut rf.events),
                std::mem::take(&mut rc.events),
            )
        });

        let (frame_events, cursor_events) = events;
        assert_eq!(cursor_events, vec![Event::Cursor { x: 1, y: 2 }]);
        // The payload arrived split, and end_frame came last.
        assert_eq!(frame_events.first().unwrap(), &Event::BeginFrame {
            width: 16,
            height: 16
        });
        assert_eq!(frame_events.last().unwrap(), &Event::EndFrame);
        let total: usize = frame_events
            .iter()
            .filter_map(|e| match e {
                Event::FrameChunk(n) => Some(*n),
                _ => None,
            })
            .sum();
        assert_eq!(total, 1024);
        assert!(frame_events.len() >= 4, "payload should arrive in parts");
    }
}
