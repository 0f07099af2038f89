//! Clipboard payload framing over the byte channel.
//!
//! One message per clipboard transfer: an 8-byte prefix {content-type
//! tag, payload length}, then the payload. Clipboard sync is
//! bidirectional, so a session carries two independent unidirectional
//! instances of this channel, one per direction.
//!
//! ## Wire format
//!
//! ```text
//! kind:  u32  (4)
//! len:   u32  (4)
//! data:  [u8] (len)
//! ```

use bytes::Bytes;

use crate::channel::byte::{ByteReader, ByteWriter};
use crate::error::PrismError;
use crate::region::RegionSlice;
use crate::spin::{Liveness, WaitMode};

const PREFIX_SIZE: usize = 8;

// ── ClipboardKind ────────────────────────────────────────────────

/// Content type of a clipboard payload. Tags are part of the wire ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClipboardKind {
    /// UTF-8 text.
    Text = 1,
    Png = 2,
    Bmp = 3,
    Tiff = 4,
    Jpeg = 5,
}

impl ClipboardKind {
    fn from_tag(tag: u32) -> Result<Self, PrismError> {
        match tag {
            1 => Ok(ClipboardKind::Text),
            2 => Ok(ClipboardKind::Png),
            3 => Ok(ClipboardKind::Bmp),
            4 => Ok(ClipboardKind::Tiff),
            5 => Ok(ClipboardKind::Jpeg),
            value => Err(PrismError::UnknownTag {
                type_name: "ClipboardKind",
                value,
            }),
        }
    }
}

// ── ClipboardData ────────────────────────────────────────────────

/// A decoded clipboard transfer.
#[derive(Debug, Clone)]
pub struct ClipboardData {
    pub kind: ClipboardKind,
    pub data: Bytes,
}

// ── ClipboardWriter ──────────────────────────────────────────────

/// Sending side of one clipboard direction.
pub struct ClipboardWriter<'r> {
    channel: ByteWriter<'r>,
}

impl<'r> ClipboardWriter<'r> {
    /// Attach the sending side to a clipboard channel sub-range.
    pub fn attach(slice: RegionSlice<'r>) -> Result<Self, PrismError> {
        Ok(Self {
            channel: ByteWriter::attach(slice)?,
        })
    }

    /// Send one clipboard payload. Waits (spin + liveness) for the
    /// previous transfer to drain.
    pub fn send<L: Liveness>(
        &mut self,
        kind: ClipboardKind,
        data: &[u8],
        liveness: &L,
    ) -> Result<(), PrismError> {
        let total = PREFIX_SIZE as u64 + data.len() as u64;
        if total > self.channel.capacity() {
            return Err(PrismError::PayloadTooLarge {
                size: total,
                capacity: self.channel.capacity(),
            });
        }
        let mut prefix = [0u8; PREFIX_SIZE];
        prefix[0..4].copy_from_slice(&(kind as u32).to_le_bytes());
        prefix[4..8].copy_from_slice(&(data.len() as u32).to_le_bytes());
        self.channel.begin_message(liveness)?;
        self.channel.write(&prefix)?;
        self.channel.write(data)
    }
}

// ── ClipboardReader ──────────────────────────────────────────────

/// Receiving side of one clipboard direction.
pub struct ClipboardReader<'r> {
    channel: ByteReader<'r>,
}

impl<'r> ClipboardReader<'r> {
    /// Attach the receiving side to a clipboard channel sub-range.
    pub fn attach(slice: RegionSlice<'r>, mode: WaitMode) -> Result<Self, PrismError> {
        Ok(Self {
            channel: ByteReader::attach(slice, mode)?,
        })
    }

    /// Whether a transfer this reader has not picked up yet is
    /// pending. Non-blocking.
    pub fn has_data(&self) -> bool {
        self.channel.has_message()
    }

    /// Block until the next transfer arrives and decode it.
    pub fn read<L: Liveness>(&mut self, liveness: &L) -> Result<ClipboardData, PrismError> {
        self.channel.next_message(liveness)?;

        let mut prefix = [0u8; PREFIX_SIZE];
        self.channel.read(&mut prefix, liveness)?;
        let kind = ClipboardKind::from_tag(u32::from_le_bytes(prefix[0..4].try_into().unwrap()))?;
        let len = u32::from_le_bytes(prefix[4..8].try_into().unwrap()) as u64;

        if PREFIX_SIZE as u64 + len > self.channel.capacity() {
            return Err(PrismError::PayloadTooLarge {
                size: PREFIX_SIZE as u64 + len,
                capacity: self.channel.capacity(),
            });
        }

        let mut data = vec![0u8; len as usize];
        self.channel.read(&mut data, liveness)?;
        Ok(ClipboardData {
            kind,
            data: Bytes::from(data),
        })
    }
}
