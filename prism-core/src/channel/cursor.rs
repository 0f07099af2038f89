//! Cursor update framing over the byte channel.
//!
//! Cursor traffic is small and frequent — a position record is 16
//! bytes and allocation-free end to end. Shape records carry pixel
//! data and only appear when the pointer image actually changes.
//!
//! ## Wire format
//!
//! **Position record** (16 bytes):
//! ```text
//! tag:      u32  (4)   = 1
//! x:        i32  (4)
//! y:        i32  (4)
//! visible:  u32  (4)
//! ```
//!
//! **Shape record** (32-byte prefix + pixel data):
//! ```text
//! tag:      u32  (4)   = 2
//! format:   u32  (4)
//! width:    u32  (4)
//! height:   u32  (4)
//! pitch:    u32  (4)   bytes per row
//! hot_x:    u32  (4)   hotspot
//! hot_y:    u32  (4)
//! data_len: u32  (4)
//! data:     [u8] (data_len)
//! ```

use bytes::Bytes;

use crate::channel::byte::{ByteReader, ByteWriter};
use crate::error::PrismError;
use crate::region::RegionSlice;
use crate::spin::{Liveness, WaitMode};

const TAG_POSITION: u32 = 1;
const TAG_SHAPE: u32 = 2;

const POSITION_SIZE: usize = 16;
const SHAPE_PREFIX_SIZE: usize = 32;

// ── CursorShapeFormat ────────────────────────────────────────────

/// Pixel layout of a cursor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CursorShapeFormat {
    /// 4 bytes per pixel, straight alpha.
    Bgra8 = 1,
    /// 1 bit per pixel AND mask followed by 1 bit per pixel XOR mask.
    Monochrome = 2,
    /// BGRA colour plane plus a separate 1-bit mask plane.
    Masked = 3,
}

impl CursorShapeFormat {
    fn from_tag(tag: u32) -> Result<Self, PrismError> {
        match tag {
            1 => Ok(CursorShapeFormat::Bgra8),
            2 => Ok(CursorShapeFormat::Monochrome),
            3 => Ok(CursorShapeFormat::Masked),
            value => Err(PrismError::UnknownTag {
                type_name: "CursorShapeFormat",
                value,
            }),
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

/// Pointer position on the host desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    pub x: i32,
    pub y: i32,
    /// Whether the host cursor is currently visible.
    pub visible: bool,
}

/// Pointer image, sent when the host cursor changes appearance.
#[derive(Debug, Clone)]
pub struct CursorShape {
    pub format: CursorShapeFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of `data`.
    pub pitch: u32,
    /// Click point within the shape.
    pub hot_x: u32,
    pub hot_y: u32,
    pub data: Bytes,
}

/// A decoded cursor channel message.
#[derive(Debug, Clone)]
pub enum CursorUpdate {
    Position(CursorPosition),
    Shape(CursorShape),
}

// ── CursorWriter ─────────────────────────────────────────────────

/// Producer-side cursor channel handle.
pub struct CursorWriter<'r> {
    channel: ByteWriter<'r>,
}

impl<'r> CursorWriter<'r> {
    /// Attach the producer side to a cursor channel sub-range.
    pub fn attach(slice: RegionSlice<'r>) -> Result<Self, PrismError> {
        Ok(Self {
            channel: ByteWriter::attach(slice)?,
        })
    }

    /// Send a position update. Waits (spin + liveness) for the
    /// previous cursor message to drain first; position records are 16
    /// bytes, so the wait is nearly always zero iterations.
    pub fn send_position<L: Liveness>(
        &mut self,
        pos: CursorPosition,
        liveness: &L,
    ) -> Result<(), PrismError> {
        let mut buf = [0u8; POSITION_SIZE];
        buf[0..4].copy_from_slice(&TAG_POSITION.to_le_bytes());
        buf[4..8].copy_from_slice(&pos.x.to_le_bytes());
        buf[8..12].copy_from_slice(&pos.y.to_le_bytes());
        buf[12..16].copy_from_slice(&(pos.visible as u32).to_le_bytes());
        self.channel.begin_message(liveness)?;
        self.channel.write(&buf)
    }

    /// Send a shape update.
    pub fn send_shape<L: Liveness>(
        &mut self,
        shape: &CursorShape,
        liveness: &L,
    ) -> Result<(), PrismError> {
        let total = SHAPE_PREFIX_SIZE as u64 + shape.data.len() as u64;
        if total > self.channel.capacity() {
            return Err(PrismError::PayloadTooLarge {
                size: total,
                capacity: self.channel.capacity(),
            });
        }
        let mut buf = [0u8; SHAPE_PREFIX_SIZE];
        buf[0..4].copy_from_slice(&TAG_SHAPE.to_le_bytes());
        buf[4..8].copy_from_slice(&(shape.format as u32).to_le_bytes());
        buf[8..12].copy_from_slice(&shape.width.to_le_bytes());
        buf[12..16].copy_from_slice(&shape.height.to_le_bytes());
        buf[16..20].copy_from_slice(&shape.pitch.to_le_bytes());
        buf[20..24].copy_from_slice(&shape.hot_x.to_le_bytes());
        buf[24..28].copy_from_slice(&shape.hot_y.to_le_bytes());
        buf[28..32].copy_from_slice(&(shape.data.len() as u32).to_le_bytes());
        self.channel.begin_message(liveness)?;
        self.channel.write(&buf)?;
        self.channel.write(&shape.data)
    }
}

// ── CursorReader ─────────────────────────────────────────────────

/// Consumer-side cursor channel handle.
pub struct CursorReader<'r> {
    channel: ByteReader<'r>,
}

impl<'r> CursorReader<'r> {
    /// Attach the consumer side to a cursor channel sub-range.
    pub fn attach(slice: RegionSlice<'r>, mode: WaitMode) -> Result<Self, PrismError> {
        Ok(Self {
            channel: ByteReader::attach(slice, mode)?,
        })
    }

    /// Whether an update this reader has not picked up yet is pending.
    /// Non-blocking.
    pub fn has_update(&self) -> bool {
        self.channel.has_message()
    }

    /// Block until the next update arrives and decode it.
    pub fn read_update<L: Liveness>(&mut self, liveness: &L) -> Result<CursorUpdate, PrismError> {
        self.channel.next_message(liveness)?;

        let mut tag_buf = [0u8; 4];
        self.channel.read(&mut tag_buf, liveness)?;
        match u32::from_le_bytes(tag_buf) {
            TAG_POSITION => {
                let mut buf = [0u8; POSITION_SIZE - 4];
                self.channel.read(&mut buf, liveness)?;
                Ok(CursorUpdate::Position(CursorPosition {
                    x: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
                    y: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
                    visible: u32::from_le_bytes(buf[8..12].try_into().unwrap()) != 0,
                }))
            }
            TAG_SHAPE => {
                let mut buf = [0u8; SHAPE_PREFIX_SIZE - 4];
                self.channel.read(&mut buf, liveness)?;
                let format = CursorShapeFormat::from_tag(u32::from_le_bytes(
                    buf[0..4].try_into().unwrap(),
                ))?;
                let width = u32::from_le_bytes(buf[4..8].try_into().unwrap());
                let height = u32::from_le_bytes(buf[8..12].try_into().unwrap());
                let pitch = u32::from_le_bytes(buf[12..16].try_into().unwrap());
                let hot_x = u32::from_le_bytes(buf[16..20].try_into().unwrap());
                let hot_y = u32::from_le_bytes(buf[20..24].try_into().unwrap());
                let data_len = u32::from_le_bytes(buf[24..28].try_into().unwrap()) as u64;

                if SHAPE_PREFIX_SIZE as u64 + data_len > self.channel.capacity() {
                    return Err(PrismError::PayloadTooLarge {
                        size: SHAPE_PREFIX_SIZE as u64 + data_len,
                        capacity: self.channel.capacity(),
                    });
                }

                let mut data = vec![0u8; data_len as usize];
                self.channel.read(&mut data, liveness)?;
                Ok(CursorUpdate::Shape(CursorShape {
                    format,
                    width,
                    height,
                    pitch,
                    hot_x,
                    hot_y,
                    data: Bytes::from(data),
                }))
            }
            value => Err(PrismError::UnknownTag {
                type_name: "CursorUpdate",
                value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::byte::CTRL_SIZE;
    use crate::region::SharedRegion;

    const ALIVE: fn() -> bool = || true;

    #[test]
    fn test_position_roundtrip() {
        let region = SharedRegion::anonymous(CTRL_SIZE + 1024).unwrap();
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = CursorWriter::attach(slice).unwrap();
        let mut r = CursorReader::attach(slice, WaitMode::Spin).unwrap();

        w.send_position(
            CursorPosition {
                x: -5,
                y: 300,
                visible: true,
            },
            &ALIVE,
        )
        .unwrap();

        match r.read_update(&ALIVE).unwrap() {
            CursorUpdate::Position(p) => {
                assert_eq!(p.x, -5);
                assert_eq!(p.y, 300);
                assert!(p.visible);
            }
            other => panic!("expected position, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_roundtrip() {
        let region = SharedRegion::anonymous(CTRL_SIZE + 16 * 1024).unwrap();
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = CursorWriter::attach(slice).unwrap();
        let mut r = CursorReader::attach(slice, WaitMode::Spin).unwrap();

        let pixels: Vec<u8> = (0..32 * 32 * 4u32).map(|i| (i % 255) as u8).collect();
        let shape = CursorShape {
            format: CursorShapeFormat::Bgra8,
            width: 32,
            height: 32,
            pitch: 128,
            hot_x: 3,
            hot_y: 1,
            data: Bytes::from(pixels.clone()),
        };
        w.send_shape(&shape, &ALIVE).unwrap();

        match r.read_update(&ALIVE).unwrap() {
            CursorUpdate::Shape(s) => {
                assert_eq!(s.format, CursorShapeFormat::Bgra8);
                assert_eq!(s.width, 32);
                assert_eq!(s.hot_x, 3);
                assert_eq!(s.data, pixels);
            }
            other => panic!("expected shape, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_shape_rejected_before_send() {
        let region = SharedRegion::anonymous(CTRL_SIZE + 256).unwrap();
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = CursorWriter::attach(slice).unwrap();

        let shape = CursorShape {
            format: CursorShapeFormat::Bgra8,
            width: 64,
            height: 64,
            pitch: 256,
            hot_x: 0,
            hot_y: 0,
            data: Bytes::from(vec![0u8; 64 * 256]),
        };
        let err = w.send_shape(&shape, &ALIVE).unwrap_err();
        assert!(matches!(err, PrismError::PayloadTooLarge { .. }));
    }

    #[test]
    fn test_successive_updates_each_reset_the_channel() {
        let region = SharedRegion::anonymous(CTRL_SIZE + 1024).unwrap();
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = CursorWriter::attach(slice).unwrap();
        let mut r = CursorReader::attach(slice, WaitMode::Spin).unwrap();

        for i in 0..100i32 {
            w.send_position(
                CursorPosition {
                    x: i,
                    y: -i,
                    visible: i % 2 == 0,
                },
                &ALIVE,
            )
            .unwrap();
            match r.read_update(&ALIVE).unwrap() {
                CursorUpdate::Position(p) => {
                    assert_eq!(p.x, i);
                    assert_eq!(p.y, -i);
                }
                other => panic!("expected position, got {other:?}"),
            }
        }
    }
}
