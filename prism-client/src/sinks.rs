//! Consumer sinks: where dispatched events land.
//!
//! A real renderer would hand frame chunks to a GPU upload queue and
//! feed cursor updates to the window system. This client validates
//! and accounts instead, which is what you want when measuring the
//! transport itself.

use std::time::Instant;

use tracing::{debug, info};

use prism_core::{
    ClipboardData, ClipboardKind, ClipboardSink, CursorSink, CursorUpdate, FrameHeader, FrameSink,
    PrismError,
};

// ── StatsSink ────────────────────────────────────────────────────

/// Frame sink that validates chunk accounting and tracks throughput.
pub struct StatsSink {
    stats_every: u64,
    started: Instant,
    /// Bytes still expected for the frame in progress.
    outstanding: u64,
    pub frames: u64,
    pub bytes: u64,
}

impl StatsSink {
    pub fn new(stats_every: u64) -> Self {
        Self {
            stats_every: stats_every.max(1),
            started: Instant::now(),
            outstanding: 0,
            frames: 0,
            bytes: 0,
        }
    }

    /// Effective frame rate since the first frame.
    pub fn fps(&self) -> f64 {
        self.frames as f64 / self.started.elapsed().as_secs_f64().max(1e-9)
    }
}

impl FrameSink for StatsSink {
    fn begin_frame(&mut self, header: &FrameHeader) -> Result<(), PrismError> {
        self.outstanding = header.payload_len();
        debug!(
            "frame {}x{} {:?}, {} damage rects",
            header.width,
            header.height,
            header.format,
            header.damage.len()
        );
        Ok(())
    }

    fn frame_chunk(&mut self, bytes: &[u8]) -> Result<(), PrismError> {
        let len = bytes.len() as u64;
        if len > self.outstanding {
            return Err(PrismError::ProtocolViolation(
                "frame payload longer than header promised",
            ));
        }
        self.outstanding -= len;
        self.bytes += len;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), PrismError> {
        if self.outstanding != 0 {
            return Err(PrismError::ProtocolViolation(
                "frame ended with payload outstanding",
            ));
        }
        self.frames += 1;
        if self.frames % self.stats_every == 0 {
            info!(
                "{} frames, {:.1} fps, {:.1} MiB transferred",
                self.frames,
                self.fps(),
                self.bytes as f64 / (1024.0 * 1024.0)
            );
        }
        Ok(())
    }
}

// ── CursorTracker ────────────────────────────────────────────────

/// Cursor sink that remembers the latest position and shape.
#[derive(Default)]
pub struct CursorTracker {
    pub position: Option<(i32, i32)>,
    pub visible: bool,
    pub updates: u64,
}

impl CursorSink for CursorTracker {
    fn cursor_update(&mut self, update: CursorUpdate) -> Result<(), PrismError> {
        self.updates += 1;
        match update {
            CursorUpdate::Position(p) => {
                self.position = Some((p.x, p.y));
                self.visible = p.visible;
            }
            CursorUpdate::Shape(shape) => {
                debug!(
                    "cursor shape {:?} {}x{}, hotspot ({}, {})",
                    shape.format, shape.width, shape.height, shape.hot_x, shape.hot_y
                );
            }
        }
        Ok(())
    }
}

// ── ClipboardLogger ──────────────────────────────────────────────

/// Clipboard sink that logs transfers and keeps the last text one.
#[derive(Default)]
pub struct ClipboardLogger {
    pub last_text: Option<String>,
    pub transfers: u64,
}

impl ClipboardSink for ClipboardLogger {
    fn clipboard(&mut self, data: ClipboardData) -> Result<(), PrismError> {
        self.transfers += 1;
        info!("clipboard: {:?}, {} bytes", data.kind, data.data.len());
        if data.kind == ClipboardKind::Text {
            self.last_text = Some(String::from_utf8_lossy(&data.data).into_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{CursorPosition, FrameFlags, PixelFormat};

    fn header(pitch: u32, height: u32) -> FrameHeader {
        FrameHeader {
            format: PixelFormat::Bgra8,
            width: pitch / 4,
            height,
            stride: pitch / 4,
            pitch,
            flags: FrameFlags::empty(),
            damage: Default::default(),
        }
    }

    #[test]
    fn stats_sink_accounts_chunks() {
        let mut sink = StatsSink::new(1000);
        sink.begin_frame(&header(64, 4)).unwrap();
        sink.frame_chunk(&[0; 200]).unwrap();
        sink.frame_chunk(&[0; 56]).unwrap();
        sink.end_frame().unwrap();
        assert_eq!(sink.frames, 1);
        assert_eq!(sink.bytes, 256);
    }

    #[test]
    fn stats_sink_rejects_overrun() {
        let mut sink = StatsSink::new(1000);
        sink.begin_frame(&header(64, 1)).unwrap();
        let err = sink.frame_chunk(&[0; 100]).unwrap_err();
        assert!(matches!(err, PrismError::ProtocolViolation(_)));
    }

    #[test]
    fn stats_sink_rejects_short_frame() {
        let mut sink = StatsSink::new(1000);
        sink.begin_frame(&header(64, 1)).unwrap();
        sink.frame_chunk(&[0; 32]).unwrap();
        assert!(sink.end_frame().is_err());
    }

    #[test]
    fn cursor_tracker_follows_position() {
        let mut sink = CursorTracker::default();
        sink.cursor_update(CursorUpdate::Position(CursorPosition {
            x: 11,
            y: 22,
            visible: true,
        }))
        .unwrap();
        assert_eq!(sink.position, Some((11, 22)));
        assert!(sink.visible);
        assert_eq!(sink.updates, 1);
    }
}
