//! Session layout: how one shared region is carved into channels.
//!
//! The region starts with a 64-byte session header written once by the
//! host when the region is established and validated by the client at
//! open. There is no negotiation — a magic or version mismatch is
//! fatal. The header's alive flag is the default liveness predicate
//! for both sides: the host clears it at teardown, turning every
//! spinning read into a prompt `LivenessLost`.
//!
//! ## Region layout
//!
//! ```text
//! offset 0    session header        (64 bytes)
//! . . . . .   frame channel         fence + ctrl + frame capacity
//! . . . . .   cursor channel        ctrl + cursor capacity
//! . . . . .   clipboard host→client ctrl + clipboard capacity
//! . . . . .   clipboard client→host ctrl + clipboard capacity
//! ```
//!
//! **Session header**:
//! ```text
//! magic:               u32  (4)   "PRSM"
//! version:             u32  (4)
//! alive:               u32  (4)   1 while the host is up
//! reserved:            u32  (4)
//! frame_capacity:      u64  (8)
//! cursor_capacity:     u64  (8)
//! clipboard_capacity:  u64  (8)   per direction
//! reserved:                 (24)
//! ```

use std::sync::atomic::{AtomicU32, Ordering};

use crate::channel::byte::CTRL_SIZE;
use crate::channel::frame::FRAME_CHANNEL_OVERHEAD;
use crate::channel::{
    ClipboardReader, ClipboardWriter, CursorReader, CursorWriter, FrameReader, FrameWriter,
};
use crate::error::PrismError;
use crate::region::{RegionSlice, SharedRegion};
use crate::spin::{Liveness, WaitMode};

/// `"PRSM"` in little-endian byte order.
pub const SESSION_MAGIC: u32 = u32::from_le_bytes(*b"PRSM");

/// Current region layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Encoded size of the session header.
pub const SESSION_HEADER_SIZE: usize = 64;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

// ── SessionConfig ────────────────────────────────────────────────

/// Channel capacities for a new session, chosen by the host.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frame payload capacity. Must hold one header plus the largest
    /// frame (`pitch × height`).
    pub frame_capacity: usize,
    /// Cursor channel capacity; bounds the largest cursor shape.
    pub cursor_capacity: usize,
    /// Clipboard capacity per direction; bounds one transfer.
    pub clipboard_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            // Enough for a 4K BGRA frame plus header slack.
            frame_capacity: 64 * 1024 * 1024,
            cursor_capacity: 64 * 1024,
            clipboard_capacity: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    /// Total region size this configuration needs.
    pub fn region_size(&self) -> usize {
        SESSION_HEADER_SIZE
            + FRAME_CHANNEL_OVERHEAD
            + align8(self.frame_capacity)
            + CTRL_SIZE
            + align8(self.cursor_capacity)
            + 2 * (CTRL_SIZE + align8(self.clipboard_capacity))
    }
}

// ── SessionLayout ────────────────────────────────────────────────

/// Resolved channel geometry of an established region.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    frame_capacity: usize,
    cursor_capacity: usize,
    clipboard_capacity: usize,
}

/// Header field byte offsets.
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_ALIVE: usize = 8;
const OFF_FRAME_CAP: usize = 16;
const OFF_CURSOR_CAP: usize = 24;
const OFF_CLIPBOARD_CAP: usize = 32;

impl SessionLayout {
    /// Host side: write the session header into a fresh region and
    /// mark the session alive.
    pub fn initialise(
        region: &SharedRegion,
        config: &SessionConfig,
    ) -> Result<Self, PrismError> {
        let layout = Self {
            frame_capacity: align8(config.frame_capacity),
            cursor_capacity: align8(config.cursor_capacity),
            clipboard_capacity: align8(config.clipboard_capacity),
        };
        let needed = layout
            .required_size()
            .ok_or(PrismError::InvalidHeader("channel capacities overflow"))?;
        if region.capacity() < needed {
            return Err(PrismError::RegionTooSmall {
                needed,
                offset: 0,
                capacity: region.capacity(),
            });
        }

        let base = region.base().as_ptr();
        // SAFETY: the header is the first SESSION_HEADER_SIZE bytes of
        // a region we just size-checked; the client does not look at it
        // until the alive flag below is raised.
        unsafe {
            write_u32(base, OFF_MAGIC, SESSION_MAGIC);
            write_u32(base, OFF_VERSION, LAYOUT_VERSION);
            write_u64(base, OFF_FRAME_CAP, layout.frame_capacity as u64);
            write_u64(base, OFF_CURSOR_CAP, layout.cursor_capacity as u64);
            write_u64(base, OFF_CLIPBOARD_CAP, layout.clipboard_capacity as u64);
        }
        layout.alive(region)?.raise();
        Ok(layout)
    }

    /// Client side: read and validate the session header.
    pub fn open(region: &SharedRegion) -> Result<Self, PrismError> {
        if region.capacity() < SESSION_HEADER_SIZE {
            return Err(PrismError::RegionTooSmall {
                needed: SESSION_HEADER_SIZE,
                offset: 0,
                capacity: region.capacity(),
            });
        }
        let base = region.base().as_ptr();
        // SAFETY: region holds at least the header, checked above.
        let (magic, version, frame_cap, cursor_cap, clipboard_cap) = unsafe {
            (
                read_u32(base, OFF_MAGIC),
                read_u32(base, OFF_VERSION),
                read_u64(base, OFF_FRAME_CAP),
                read_u64(base, OFF_CURSOR_CAP),
                read_u64(base, OFF_CLIPBOARD_CAP),
            )
        };
        if magic != SESSION_MAGIC {
            return Err(PrismError::BadMagic(magic));
        }
        if version != LAYOUT_VERSION {
            return Err(PrismError::UnsupportedVersion(version));
        }

        // The capacity fields crossed a process boundary; bound each
        // one before any arithmetic touches it.
        let region_cap = region.capacity() as u64;
        if frame_cap > region_cap || cursor_cap > region_cap || clipboard_cap > region_cap {
            return Err(PrismError::InvalidHeader(
                "channel capacity exceeds region size",
            ));
        }
        let layout = Self {
            frame_capacity: frame_cap as usize,
            cursor_capacity: cursor_cap as usize,
            clipboard_capacity: clipboard_cap as usize,
        };
        let needed = layout
            .required_size()
            .ok_or(PrismError::InvalidHeader("channel capacities overflow"))?;
        if region.capacity() < needed {
            return Err(PrismError::RegionTooSmall {
                needed,
                offset: 0,
                capacity: region.capacity(),
            });
        }
        Ok(layout)
    }

    /// Total region bytes the layout needs, or `None` if the
    /// capacities do not even fit the address space.
    fn required_size(&self) -> Option<usize> {
        let clipboard = CTRL_SIZE.checked_add(self.clipboard_capacity)?;
        SESSION_HEADER_SIZE
            .checked_add(FRAME_CHANNEL_OVERHEAD)?
            .checked_add(self.frame_capacity)?
            .checked_add(CTRL_SIZE)?
            .checked_add(self.cursor_capacity)?
            .checked_add(clipboard.checked_mul(2)?)
    }

    // ── Sub-range accessors ──────────────────────────────────────

    fn frame_offset(&self) -> usize {
        SESSION_HEADER_SIZE
    }

    fn cursor_offset(&self) -> usize {
        self.frame_offset() + FRAME_CHANNEL_OVERHEAD + self.frame_capacity
    }

    fn clipboard_to_client_offset(&self) -> usize {
        self.cursor_offset() + CTRL_SIZE + self.cursor_capacity
    }

    fn clipboard_to_host_offset(&self) -> usize {
        self.clipboard_to_client_offset() + CTRL_SIZE + self.clipboard_capacity
    }

    /// The frame channel sub-range (fence + control + data).
    pub fn frame_slice<'r>(&self, region: &'r SharedRegion) -> Result<RegionSlice<'r>, PrismError> {
        region.slice(
            self.frame_offset(),
            FRAME_CHANNEL_OVERHEAD + self.frame_capacity,
        )
    }

    /// The cursor channel sub-range.
    pub fn cursor_slice<'r>(
        &self,
        region: &'r SharedRegion,
    ) -> Result<RegionSlice<'r>, PrismError> {
        region.slice(self.cursor_offset(), CTRL_SIZE + self.cursor_capacity)
    }

    /// The host→client clipboard sub-range.
    pub fn clipboard_to_client_slice<'r>(
        &self,
        region: &'r SharedRegion,
    ) -> Result<RegionSlice<'r>, PrismError> {
        region.slice(
            self.clipboard_to_client_offset(),
            CTRL_SIZE + self.clipboard_capacity,
        )
    }

    /// The client→host clipboard sub-range.
    pub fn clipboard_to_host_slice<'r>(
        &self,
        region: &'r SharedRegion,
    ) -> Result<RegionSlice<'r>, PrismError> {
        region.slice(
            self.clipboard_to_host_offset(),
            CTRL_SIZE + self.clipboard_capacity,
        )
    }

    /// Handle to the session alive flag.
    pub fn alive<'r>(&self, region: &'r SharedRegion) -> Result<SessionAlive<'r>, PrismError> {
        let slice = region.slice(0, SESSION_HEADER_SIZE)?;
        // SAFETY: the alive word is inside the header slice and the
        // header start is 8-byte aligned.
        let flag = unsafe { &*(slice.as_ptr().as_ptr().add(OFF_ALIVE) as *const AtomicU32) };
        Ok(SessionAlive { flag })
    }

    /// All producer-side channel handles, bundled.
    pub fn host_channels<'r>(
        &self,
        region: &'r SharedRegion,
        mode: WaitMode,
    ) -> Result<HostChannels<'r>, PrismError> {
        Ok(HostChannels {
            frames: FrameWriter::attach(self.frame_slice(region)?)?,
            cursor: CursorWriter::attach(self.cursor_slice(region)?)?,
            clipboard_tx: ClipboardWriter::attach(self.clipboard_to_client_slice(region)?)?,
            clipboard_rx: ClipboardReader::attach(self.clipboard_to_host_slice(region)?, mode)?,
        })
    }

    /// All consumer-side channel handles, bundled.
    pub fn client_channels<'r>(
        &self,
        region: &'r SharedRegion,
        mode: WaitMode,
    ) -> Result<ClientChannels<'r>, PrismError> {
        Ok(ClientChannels {
            frames: FrameReader::attach(self.frame_slice(region)?, mode)?,
            cursor: CursorReader::attach(self.cursor_slice(region)?, mode)?,
            clipboard_rx: ClipboardReader::attach(self.clipboard_to_client_slice(region)?, mode)?,
            clipboard_tx: ClipboardWriter::attach(self.clipboard_to_host_slice(region)?)?,
        })
    }
}

/// Producer-side channel handles for one session.
pub struct HostChannels<'r> {
    pub frames: FrameWriter<'r>,
    pub cursor: CursorWriter<'r>,
    pub clipboard_tx: ClipboardWriter<'r>,
    pub clipboard_rx: ClipboardReader<'r>,
}

/// Consumer-side channel handles for one session.
pub struct ClientChannels<'r> {
    pub frames: FrameReader<'r>,
    pub cursor: CursorReader<'r>,
    pub clipboard_rx: ClipboardReader<'r>,
    pub clipboard_tx: ClipboardWriter<'r>,
}

// ── SessionAlive ─────────────────────────────────────────────────

/// The in-region session alive flag.
///
/// Implements [`Liveness`], so either side can pass it straight into
/// channel reads. The host raises it at establishment and clears it at
/// teardown.
#[derive(Clone, Copy)]
pub struct SessionAlive<'r> {
    flag: &'r AtomicU32,
}

impl SessionAlive<'_> {
    /// Mark the session live (host, at establishment).
    pub fn raise(&self) {
        self.flag.store(1, Ordering::Release);
    }

    /// Mark the session over (host, at teardown).
    pub fn shutdown(&self) {
        self.flag.store(0, Ordering::Release);
    }

    /// Current state.
    pub fn is_alive(&self) -> bool {
        self.flag.load(Ordering::Acquire) != 0
    }
}

impl Liveness for SessionAlive<'_> {
    fn alive(&self) -> bool {
        self.is_alive()
    }
}

// ── Raw header access ────────────────────────────────────────────

/// # Safety
///
/// `base + off .. base + off + 4` must be inside the mapped region.
unsafe fn read_u32(base: *const u8, off: usize) -> u32 {
    unsafe { (base.add(off) as *const u32).read_volatile() }
}

/// # Safety
///
/// As [`read_u32`].
unsafe fn write_u32(base: *mut u8, off: usize, value: u32) {
    unsafe { (base.add(off) as *mut u32).write_volatile(value) }
}

/// # Safety
///
/// `base + off .. base + off + 8` must be inside the mapped region.
unsafe fn read_u64(base: *const u8, off: usize) -> u64 {
    unsafe { (base.add(off) as *const u64).read_volatile() }
}

/// # Safety
///
/// As [`read_u64`].
unsafe fn write_u64(base: *mut u8, off: usize, value: u64) {
    unsafe { (base.add(off) as *mut u64).write_volatile(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SessionConfig {
        SessionConfig {
            frame_capacity: 64 * 1024,
            cursor_capacity: 4 * 1024,
            clipboard_capacity: 8 * 1024,
        }
    }

    #[test]
    fn test_initialise_then_open() {
        let config = small_config();
        let region = SharedRegion::anonymous(config.region_size()).unwrap();
        let created = SessionLayout::initialise(&region, &config).unwrap();
        let opened = SessionLayout::open(&region).unwrap();
        assert_eq!(opened.frame_capacity, created.frame_capacity);
        assert_eq!(opened.cursor_capacity, created.cursor_capacity);
        assert_eq!(opened.clipboard_capacity, created.clipboard_capacity);
        assert!(opened.alive(&region).unwrap().is_alive());
    }

    #[test]
    fn test_open_rejects_corrupt_capacity_fields() {
        let region = SharedRegion::anonymous(4096).unwrap();
        let base = region.base().as_ptr();
        // Plausible magic and version, garbage capacities.
        // SAFETY: the region holds well over SESSION_HEADER_SIZE bytes.
        unsafe {
            write_u32(base, OFF_MAGIC, SESSION_MAGIC);
            write_u32(base, OFF_VERSION, LAYOUT_VERSION);
            write_u64(base, OFF_FRAME_CAP, u64::MAX);
            write_u64(base, OFF_CURSOR_CAP, 1024);
            write_u64(base, OFF_CLIPBOARD_CAP, 1024);
        }
        let err = SessionLayout::open(&region).unwrap_err();
        assert!(matches!(err, PrismError::InvalidHeader(_)));

        // Capacities that each fit the region but cannot jointly.
        unsafe {
            write_u64(base, OFF_FRAME_CAP, 4096);
            write_u64(base, OFF_CURSOR_CAP, 4096);
            write_u64(base, OFF_CLIPBOARD_CAP, 4096);
        }
        let err = SessionLayout::open(&region).unwrap_err();
        assert!(matches!(err, PrismError::RegionTooSmall { .. }));
    }

    #[test]
    fn test_open_unestablished_region_is_bad_magic() {
        let region = SharedRegion::anonymous(4096).unwrap();
        let err = SessionLayout::open(&region).unwrap_err();
        assert!(matches!(err, PrismError::BadMagic(0)));
    }

    #[test]
    fn test_region_too_small_for_config() {
        let config = small_config();
        let region = SharedRegion::anonymous(1024).unwrap();
        let err = SessionLayout::initialise(&region, &config).unwrap_err();
        assert!(matches!(err, PrismError::RegionTooSmall { .. }));
    }

    #[test]
    fn test_shutdown_clears_liveness() {
        let config = small_config();
        let region = SharedRegion::anonymous(config.region_size()).unwrap();
        let layout = SessionLayout::initialise(&region, &config).unwrap();
        let alive = layout.alive(&region).unwrap();
        assert!(alive.alive());
        alive.shutdown();
        assert!(!alive.alive());
    }

    #[test]
    fn test_channel_slices_are_disjoint_and_in_bounds() {
        let config = small_config();
        let region = SharedRegion::anonymous(config.region_size()).unwrap();
        let layout = SessionLayout::initialise(&region, &config).unwrap();

        // Channel attachment exercises every bounds/alignment check.
        let host = layout.host_channels(&region, WaitMode::Spin).unwrap();
        let client = layout.client_channels(&region, WaitMode::Spin).unwrap();
        assert_eq!(host.frames.capacity(), client.frames.capacity());
        assert_eq!(host.frames.capacity(), 64 * 1024);
    }
}
