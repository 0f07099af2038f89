//! # prism-core
//!
//! Shared-memory transport for the PRISM remote-display client.
//!
//! One mapped region, one producer (the host-side capture service) and
//! one consumer (the client renderer). All signalling happens through
//! atomics inside the region itself; the data path takes no locks and
//! makes no syscalls.
//!
//! This crate contains:
//! - **Region**: `SharedRegion` — POSIX shm / anonymous mappings and
//!   bounds-checked sub-range slicing
//! - **Channel**: lock-free SPSC byte stream (`ByteWriter` /
//!   `ByteReader`) and the typed channels layered on it — frame,
//!   cursor, clipboard
//! - **Session**: `SessionLayout` — how one region is carved into
//!   channels, plus the in-region alive flag
//! - **Dispatch**: `Dispatcher` — consumer-side event loop with
//!   cursor-over-frame priority
//! - **Spin**: `Liveness` predicate and the busy-wait policy
//! - **Error**: `PrismError` — typed, `thiserror`-based error
//!   hierarchy with an explicit fatal/clean-teardown split

pub mod channel;
pub mod dispatch;
pub mod error;
pub mod region;
pub mod session;
pub mod spin;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{
    ByteReader, ByteWriter, CTRL_SIZE, ClipboardData, ClipboardKind, ClipboardReader,
    ClipboardWriter, CursorPosition, CursorReader, CursorShape, CursorShapeFormat, CursorUpdate,
    CursorWriter, DamageList, DamageRect, FRAME_CHANNEL_OVERHEAD, FrameFlags, FrameHeader,
    FrameReader, FrameWriter, MAX_DAMAGE_RECTS, PixelFormat, WRITE_CHUNK,
};
pub use dispatch::{ClipboardSink, CursorSink, Dispatcher, FrameSink};
pub use error::PrismError;
pub use region::{RegionSlice, SharedRegion};
pub use session::{
    ClientChannels, HostChannels, LAYOUT_VERSION, SESSION_HEADER_SIZE, SESSION_MAGIC,
    SessionAlive, SessionConfig, SessionLayout,
};
pub use spin::{Liveness, SpinWait, WaitMode};
