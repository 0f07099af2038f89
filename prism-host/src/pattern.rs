//! Synthetic display source: animated test pattern and cursor path.
//!
//! Stands in for a real capture backend so the transport can be run
//! end to end on any machine. One BGRA buffer is reused across frames;
//! each tick repaints it and reports what changed as damage rects.

use prism_core::{
    CursorPosition, DamageRect, FrameFlags, FrameHeader, MAX_DAMAGE_RECTS, PixelFormat,
};

/// Height in pixels of the scrolling bar the pattern animates.
const BAR_HEIGHT: u32 = 48;

/// Animated gradient with a scrolling horizontal bar.
pub struct TestPattern {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
    tick: u64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffer: vec![0; (width * height * 4) as usize],
            tick: 0,
        }
    }

    /// Bytes per row.
    pub fn pitch(&self) -> u32 {
        self.width * 4
    }

    /// Advance one frame and return the header describing the new
    /// buffer contents. The first frame damages everything; later
    /// frames damage only the rows the bar left and entered.
    pub fn next_frame(&mut self) -> FrameHeader {
        let mut header = FrameHeader {
            format: PixelFormat::Bgra8,
            width: self.width,
            height: self.height,
            stride: self.width,
            pitch: self.pitch(),
            flags: FrameFlags::empty(),
            damage: Default::default(),
        };

        if self.tick == 0 {
            self.paint_gradient();
        } else {
            let prev = self.bar_top(self.tick - 1);
            self.repaint_rows(prev, BAR_HEIGHT);
            // Damage list errors are impossible here: at most two
            // rects against a capacity of MAX_DAMAGE_RECTS.
            debug_assert!(MAX_DAMAGE_RECTS >= 2);
            let _ = header.damage.push(DamageRect {
                x: 0,
                y: prev,
                width: self.width,
                height: BAR_HEIGHT,
            });
        }

        let top = self.bar_top(self.tick);
        self.paint_bar(top);
        if self.tick > 0 {
            let _ = header.damage.push(DamageRect {
                x: 0,
                y: top,
                width: self.width,
                height: BAR_HEIGHT,
            });
        }

        self.tick += 1;
        header
    }

    /// The buffer described by the last header from `next_frame`.
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    /// Cursor position for the current tick: a slow circle around the
    /// display centre.
    pub fn cursor(&self) -> CursorPosition {
        let angle = (self.tick as f64) * 0.05;
        let r = (self.height.min(self.width) / 4) as f64;
        CursorPosition {
            x: (self.width as f64 / 2.0 + r * angle.cos()) as i32,
            y: (self.height as f64 / 2.0 + r * angle.sin()) as i32,
            visible: true,
        }
    }

    fn bar_top(&self, tick: u64) -> u32 {
        let span = self.height.saturating_sub(BAR_HEIGHT).max(1) as u64;
        ((tick * 4) % span) as u32
    }

    fn paint_gradient(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 4) as usize;
                self.buffer[i] = (x * 255 / self.width.max(1)) as u8; // B
                self.buffer[i + 1] = (y * 255 / self.height.max(1)) as u8; // G
                self.buffer[i + 2] = 0x40; // R
                self.buffer[i + 3] = 0xff; // A
            }
        }
    }

    fn repaint_rows(&mut self, top: u32, count: u32) {
        let bottom = (top + count).min(self.height);
        for y in top..bottom {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 4) as usize;
                self.buffer[i] = (x * 255 / self.width.max(1)) as u8;
                self.buffer[i + 1] = (y * 255 / self.height.max(1)) as u8;
                self.buffer[i + 2] = 0x40;
                self.buffer[i + 3] = 0xff;
            }
        }
    }

    fn paint_bar(&mut self, top: u32) {
        let bottom = (top + BAR_HEIGHT).min(self.height);
        for y in top..bottom {
            for x in 0..self.width {
                let i = ((y * self.width + x) * 4) as usize;
                self.buffer[i] = 0xff;
                self.buffer[i + 1] = 0xff;
                self.buffer[i + 2] = 0xff;
                self.buffer[i + 3] = 0xff;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_full_damage() {
        let mut p = TestPattern::new(64, 64);
        let header = p.next_frame();
        assert!(header.damage.is_empty());
        assert_eq!(header.payload_len(), 64 * 64 * 4);
        assert_eq!(p.payload().len(), 64 * 64 * 4);
    }

    #[test]
    fn later_frames_damage_two_bands() {
        let mut p = TestPattern::new(64, 256);
        p.next_frame();
        let header = p.next_frame();
        assert_eq!(header.damage.len(), 2);
        for rect in header.damage.as_slice() {
            assert_eq!(rect.width, 64);
            assert!(rect.y + rect.height <= 256 + BAR_HEIGHT);
        }
    }

    #[test]
    fn cursor_stays_on_screen() {
        let mut p = TestPattern::new(320, 200);
        for _ in 0..500 {
            p.next_frame();
            let c = p.cursor();
            assert!(c.x >= 0 && c.x < 320);
            assert!(c.y >= 0 && c.y < 200);
        }
    }
}
