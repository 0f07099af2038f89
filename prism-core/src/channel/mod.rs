//! Shared-memory channel primitives and the framing layers above them.
//!
//! | Module      | Purpose                                            |
//! |------------ |----------------------------------------------------|
//! | `byte`      | Lock-free SPSC byte stream (offsets + generation)  |
//! | `frame`     | Video frame header / damage rects / pixel payload  |
//! | `cursor`    | Cursor position and shape records                  |
//! | `clipboard` | Type-tagged variable-length clipboard payloads     |

pub mod byte;
pub mod clipboard;
pub mod cursor;
pub mod frame;

// ── Re-exports ───────────────────────────────────────────────────

pub use byte::{ByteReader, ByteWriter, CTRL_SIZE, WRITE_CHUNK};
pub use clipboard::{ClipboardData, ClipboardKind, ClipboardReader, ClipboardWriter};
pub use cursor::{
    CursorPosition, CursorReader, CursorShape, CursorShapeFormat, CursorUpdate, CursorWriter,
};
pub use frame::{
    DAMAGE_RECT_SIZE, DamageList, DamageRect, FRAME_CHANNEL_OVERHEAD, FRAME_HEADER_SIZE,
    FrameFlags, FrameHeader, FrameReader, FrameWriter, MAX_DAMAGE_RECTS, PixelFormat,
};
