//! Video frame framing over the byte channel.
//!
//! Each frame is one channel message: a fixed 32-byte header, then
//! `rect_count × 16` bytes of damage rectangles, then `pitch × height`
//! bytes of pixel payload. All integers are little-endian.
//!
//! ## Wire format
//!
//! **Frame header** (32 bytes):
//! ```text
//! format:      u32  (4)   pixel format tag
//! width:       u32  (4)   pixels
//! height:      u32  (4)   pixels
//! stride:      u32  (4)   row length in pixels, including padding
//! pitch:       u32  (4)   row length in bytes
//! flags:       u32  (4)   FrameFlags bits
//! rect_count:  u32  (4)   number of damage rects that follow
//! reserved:    u32  (4)
//! ```
//!
//! **Damage rect** (16 bytes): `x, y, width, height` as u32 each.
//!
//! A single frame is in flight at a time. The [`FrameFence`] next to
//! the channel carries the ready/consumed signal: `begin_frame` while
//! the consumer has not released the previous frame is a protocol
//! violation, because resetting the offsets under a reader that is
//! still draining corrupts the stream.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use crate::channel::byte::{ByteReader, ByteWriter, CTRL_SIZE};
use crate::error::PrismError;
use crate::region::RegionSlice;
use crate::spin::{Liveness, WaitMode};

/// Encoded size of the fixed frame header prefix.
pub const FRAME_HEADER_SIZE: usize = 32;

/// Encoded size of one damage rectangle.
pub const DAMAGE_RECT_SIZE: usize = 16;

/// Maximum damage rectangles per frame. Beyond this the producer sends
/// a full-frame update anyway, so the header reserves no more.
pub const MAX_DAMAGE_RECTS: usize = 64;

/// Bytes reserved at the start of a frame channel sub-range for the
/// [`FrameFence`], ahead of the byte channel control block.
pub const FENCE_SIZE: usize = 16;

/// Fence + control block overhead of a frame channel sub-range.
pub const FRAME_CHANNEL_OVERHEAD: usize = FENCE_SIZE + CTRL_SIZE;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of the frame payload. Tags are part of the wire ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8 = 1,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8 = 2,
    /// 4 bytes per pixel: 10-bit RGB plus 2-bit alpha.
    Rgba10 = 3,
    /// 8 bytes per pixel: 16-bit float components.
    Rgba16F = 4,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 | PixelFormat::Rgba10 => 4,
            PixelFormat::Rgba16F => 8,
        }
    }

    /// Decode a wire tag.
    pub fn from_tag(tag: u32) -> Result<Self, PrismError> {
        match tag {
            1 => Ok(PixelFormat::Bgra8),
            2 => Ok(PixelFormat::Rgba8),
            3 => Ok(PixelFormat::Rgba10),
            4 => Ok(PixelFormat::Rgba16F),
            value => Err(PrismError::UnknownTag {
                type_name: "PixelFormat",
                value,
            }),
        }
    }
}

// ── FrameFlags ───────────────────────────────────────────────────

bitflags! {
    /// Per-frame property bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u32 {
        /// Payload is HDR content.
        const HDR = 1 << 0;
        /// HDR content uses PQ transfer encoding.
        const HDR_PQ = 1 << 1;
    }
}

// ── DamageRect ───────────────────────────────────────────────────

/// A sub-region of the frame that changed since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DamageRect {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl DamageRect {
    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.x.to_le_bytes());
        buf[4..8].copy_from_slice(&self.y.to_le_bytes());
        buf[8..12].copy_from_slice(&self.width.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            x: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            y: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            width: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            height: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

// ── DamageList ───────────────────────────────────────────────────

/// Fixed-capacity damage rectangle list — no heap allocation on the
/// frame path.
#[derive(Clone)]
pub struct DamageList {
    rects: [DamageRect; MAX_DAMAGE_RECTS],
    len: usize,
}

impl DamageList {
    /// Empty list.
    pub fn new() -> Self {
        Self {
            rects: [DamageRect::default(); MAX_DAMAGE_RECTS],
            len: 0,
        }
    }

    /// Append a rect; fails once [`MAX_DAMAGE_RECTS`] is reached.
    pub fn push(&mut self, rect: DamageRect) -> Result<(), PrismError> {
        if self.len >= MAX_DAMAGE_RECTS {
            return Err(PrismError::TooManyDamageRects {
                count: self.len as u32 + 1,
                max: MAX_DAMAGE_RECTS as u32,
            });
        }
        self.rects[self.len] = rect;
        self.len += 1;
        Ok(())
    }

    /// The rects pushed so far.
    pub fn as_slice(&self) -> &[DamageRect] {
        &self.rects[..self.len]
    }

    /// Number of rects.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list is empty (meaning: full-frame update).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for DamageList {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for DamageList {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for DamageList {}

impl std::fmt::Debug for DamageList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

// ── FrameHeader ──────────────────────────────────────────────────

/// Decoded per-frame metadata preceding the pixel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Pixel layout of the payload.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row length in pixels, including any GPU alignment padding.
    pub stride: u32,
    /// Row length in **bytes**.
    pub pitch: u32,
    /// Property bits (HDR and friends).
    pub flags: FrameFlags,
    /// Regions changed since the previous frame; empty means the whole
    /// frame changed.
    pub damage: DamageList,
}

impl FrameHeader {
    /// Payload size implied by the header: `pitch × height` bytes.
    pub fn payload_len(&self) -> u64 {
        self.pitch as u64 * self.height as u64
    }

    /// Encoded size of header plus damage rects.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.damage.len() * DAMAGE_RECT_SIZE
    }

    /// Serialize header and damage rects into `buf`, returning the
    /// number of bytes used. `buf` must hold [`Self::encoded_len`].
    pub fn encode_into(&self, buf: &mut [u8]) -> usize {
        buf[0..4].copy_from_slice(&(self.format as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.width.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.stride.to_le_bytes());
        buf[16..20].copy_from_slice(&self.pitch.to_le_bytes());
        buf[20..24].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[24..28].copy_from_slice(&(self.damage.len() as u32).to_le_bytes());
        buf[28..32].fill(0);
        let mut off = FRAME_HEADER_SIZE;
        for rect in self.damage.as_slice() {
            rect.encode_into(&mut buf[off..off + DAMAGE_RECT_SIZE]);
            off += DAMAGE_RECT_SIZE;
        }
        off
    }

    /// Decode and validate the fixed 32-byte prefix. Returns the
    /// header (with an empty damage list) and the rect count still to
    /// be read from the stream.
    fn decode_fixed(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<(Self, u32), PrismError> {
        let format = PixelFormat::from_tag(u32::from_le_bytes(buf[0..4].try_into().unwrap()))?;
        let width = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let height = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let stride = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let pitch = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let flags = FrameFlags::from_bits_truncate(u32::from_le_bytes(buf[20..24].try_into().unwrap()));
        let rect_count = u32::from_le_bytes(buf[24..28].try_into().unwrap());

        if width == 0 || height == 0 {
            return Err(PrismError::InvalidHeader("zero frame dimension"));
        }
        if (pitch as u64) < width as u64 * format.bytes_per_pixel() as u64 {
            return Err(PrismError::InvalidHeader("pitch smaller than one row"));
        }
        if stride < width {
            return Err(PrismError::InvalidHeader("stride smaller than width"));
        }
        if rect_count as usize > MAX_DAMAGE_RECTS {
            return Err(PrismError::TooManyDamageRects {
                count: rect_count,
                max: MAX_DAMAGE_RECTS as u32,
            });
        }

        Ok((
            Self {
                format,
                width,
                height,
                stride,
                pitch,
                flags,
                damage: DamageList::new(),
            },
            rect_count,
        ))
    }
}

// ── FrameFence ───────────────────────────────────────────────────

/// The ready/consumed flag pair coordinating single-frame-in-flight.
///
/// In-region layout (16 bytes): `in_flight: u32`, `ready: u32`, 8
/// reserved. Zeroed memory is the idle state. `in_flight` rises at
/// `begin_frame` and falls when the consumer releases the drained
/// frame; `ready` marks the producer having finished writing.
struct FrameFence<'r> {
    in_flight: &'r AtomicU32,
    ready: &'r AtomicU32,
}

impl<'r> FrameFence<'r> {
    /// # Safety
    ///
    /// `base` must point at [`FENCE_SIZE`] bytes of 8-byte-aligned
    /// region memory.
    unsafe fn attach(base: NonNull<u8>) -> Self {
        // SAFETY: caller guarantees alignment and size.
        unsafe {
            Self {
                in_flight: &*(base.as_ptr() as *const AtomicU32),
                ready: &*(base.as_ptr().add(4) as *const AtomicU32),
            }
        }
    }

    fn begin(&self) -> Result<(), PrismError> {
        if self.in_flight.load(Ordering::Acquire) != 0 {
            return Err(PrismError::ProtocolViolation(
                "begin_frame before previous frame was consumed",
            ));
        }
        self.in_flight.store(1, Ordering::Release);
        self.ready.store(0, Ordering::Release);
        Ok(())
    }

    fn publish(&self) {
        self.ready.store(1, Ordering::Release);
    }

    fn release(&self) {
        self.ready.store(0, Ordering::Release);
        self.in_flight.store(0, Ordering::Release);
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }
}

fn split_fence(slice: RegionSlice<'_>) -> Result<(FrameFence<'_>, RegionSlice<'_>), PrismError> {
    if slice.len() <= FRAME_CHANNEL_OVERHEAD {
        return Err(PrismError::RegionTooSmall {
            needed: FRAME_CHANNEL_OVERHEAD + 1,
            offset: 0,
            capacity: slice.len(),
        });
    }
    // SAFETY: the slice start is 8-byte aligned and at least FENCE_SIZE
    // bytes long, checked above.
    let fence = unsafe { FrameFence::attach(slice.as_ptr()) };
    let channel = slice.skip(FENCE_SIZE);
    Ok((fence, channel))
}

// ── FrameWriter ──────────────────────────────────────────────────

/// Producer-side frame channel handle (host capture agent).
pub struct FrameWriter<'r> {
    fence: FrameFence<'r>,
    channel: ByteWriter<'r>,
    /// Total bytes the current frame promised (header + payload), used
    /// to catch length mismatches at `finish_frame`.
    expected: u64,
}

impl<'r> FrameWriter<'r> {
    /// Attach the producer side to a frame channel sub-range.
    pub fn attach(slice: RegionSlice<'r>) -> Result<Self, PrismError> {
        let (fence, channel) = split_fence(slice)?;
        Ok(Self {
            fence,
            channel: ByteWriter::attach(channel)?,
            expected: 0,
        })
    }

    /// Payload capacity of the underlying channel.
    pub fn capacity(&self) -> u64 {
        self.channel.capacity()
    }

    /// Whether the previous frame has been released by the consumer.
    pub fn consumer_done(&self) -> bool {
        self.fence.is_idle()
    }

    /// Bytes written but not yet consumed.
    pub fn pending(&self) -> u64 {
        self.channel.pending()
    }

    /// Start a new frame: checks the fence, zeroes both channel
    /// offsets, and bumps the message generation.
    ///
    /// Calling this while the previous frame is undrained is a fatal
    /// [`PrismError::ProtocolViolation`].
    pub fn begin_frame<L: Liveness>(&mut self, liveness: &L) -> Result<(), PrismError> {
        self.fence.begin()?;
        self.channel.begin_message(liveness)?;
        self.expected = 0;
        Ok(())
    }

    /// Write the frame header (and its damage rects). Must be the
    /// first write of the frame.
    pub fn write_header(&mut self, header: &FrameHeader) -> Result<(), PrismError> {
        if self.channel.written() != 0 {
            return Err(PrismError::ProtocolViolation(
                "frame header must precede payload",
            ));
        }
        let mut buf = [0u8; FRAME_HEADER_SIZE + MAX_DAMAGE_RECTS * DAMAGE_RECT_SIZE];
        let used = header.encode_into(&mut buf);
        self.channel.write(&buf[..used])?;
        self.expected = used as u64 + header.payload_len();
        Ok(())
    }

    /// Append payload bytes, possibly across several calls (for
    /// example one per damage rect).
    pub fn write_payload(&mut self, bytes: &[u8]) -> Result<(), PrismError> {
        if self.expected == 0 {
            return Err(PrismError::ProtocolViolation(
                "frame payload before header",
            ));
        }
        self.channel.write(bytes)
    }

    /// Mark the frame fully written (raises the ready flag).
    ///
    /// Fails unless exactly the bytes the header promised were
    /// written: with fewer the consumer would spin forever waiting for
    /// the remainder, with more the excess would bleed into what the
    /// consumer parses next.
    pub fn finish_frame(&mut self) -> Result<(), PrismError> {
        let written = self.channel.written();
        if written < self.expected {
            return Err(PrismError::ProtocolViolation(
                "frame payload shorter than header promised",
            ));
        }
        if written > self.expected {
            return Err(PrismError::ProtocolViolation(
                "frame payload longer than header promised",
            ));
        }
        self.fence.publish();
        Ok(())
    }
}

// ── FrameReader ──────────────────────────────────────────────────

/// Consumer-side frame channel handle (client renderer).
pub struct FrameReader<'r> {
    fence: FrameFence<'r>,
    channel: ByteReader<'r>,
}

impl<'r> FrameReader<'r> {
    /// Attach the consumer side to a frame channel sub-range.
    pub fn attach(slice: RegionSlice<'r>, mode: WaitMode) -> Result<Self, PrismError> {
        let (fence, channel) = split_fence(slice)?;
        Ok(Self {
            fence,
            channel: ByteReader::attach(channel, mode)?,
        })
    }

    /// Payload capacity of the channel in bytes.
    pub fn capacity(&self) -> u64 {
        self.channel.capacity()
    }

    /// Whether a frame the reader has not picked up yet has begun.
    /// Non-blocking.
    pub fn has_frame(&self) -> bool {
        self.channel.has_message()
    }

    /// Block until the next frame begins and read its header,
    /// including damage rects. Validation failures are
    /// [`PrismError`] decode variants — session-fatal by policy.
    pub fn read_header<L: Liveness>(&mut self, liveness: &L) -> Result<FrameHeader, PrismError> {
        self.channel.next_message(liveness)?;

        let mut fixed = [0u8; FRAME_HEADER_SIZE];
        self.channel.read(&mut fixed, liveness)?;
        let (mut header, rect_count) = FrameHeader::decode_fixed(&fixed)?;

        if rect_count > 0 {
            let mut rect_buf = [0u8; MAX_DAMAGE_RECTS * DAMAGE_RECT_SIZE];
            let rect_bytes = rect_count as usize * DAMAGE_RECT_SIZE;
            self.channel.read(&mut rect_buf[..rect_bytes], liveness)?;
            for i in 0..rect_count as usize {
                let off = i * DAMAGE_RECT_SIZE;
                header
                    .damage
                    .push(DamageRect::decode(&rect_buf[off..off + DAMAGE_RECT_SIZE]))?;
            }
        }

        let total = header.encoded_len() as u64 + header.payload_len();
        if total > self.channel.capacity() {
            return Err(PrismError::PayloadTooLarge {
                size: total,
                capacity: self.channel.capacity(),
            });
        }
        Ok(header)
    }

    /// Stream the payload of the frame whose header was just read,
    /// handing each available run of bytes to `f` in place (no
    /// intermediate copy). Releases the fence once fully drained.
    pub fn read_payload_with<L, F>(
        &mut self,
        header: &FrameHeader,
        liveness: &L,
        f: &mut F,
    ) -> Result<(), PrismError>
    where
        L: Liveness,
        F: FnMut(&[u8]) -> Result<(), PrismError>,
    {
        self.channel.read_with(header.payload_len(), f, liveness)?;
        self.fence.release();
        Ok(())
    }

    /// Convenience: read header and stream the payload in one call.
    pub fn read_frame<L, F>(&mut self, liveness: &L, f: &mut F) -> Result<FrameHeader, PrismError>
    where
        L: Liveness,
        F: FnMut(&[u8]) -> Result<(), PrismError>,
    {
        let header = self.read_header(liveness)?;
        self.read_payload_with(&header, liveness, f)?;
        Ok(header)
    }
}
