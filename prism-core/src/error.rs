//! Domain-specific error types for the PRISM transport.
//!
//! All fallible operations return `Result<T, PrismError>`.
//! No panics on invalid input — every error is typed.

use thiserror::Error;

/// The canonical error type for the PRISM shared-memory transport.
#[derive(Debug, Error)]
pub enum PrismError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A channel rule was broken by the caller. Fatal for the session;
    /// the stream carries no resync markers so there is no recovery.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The liveness predicate reported the peer dead while a read or
    /// write was spinning. `consumed` is the number of bytes of the
    /// current request that were transferred before the flip.
    #[error("session liveness lost after {consumed} bytes")]
    LivenessLost { consumed: usize },

    // ── Decode Errors ────────────────────────────────────────────
    /// A numeric tag did not map to any known enum variant.
    #[error("unknown {type_name} tag: {value:#x}")]
    UnknownTag { type_name: &'static str, value: u32 },

    /// A frame header declared more damage rectangles than the
    /// reserved maximum.
    #[error("damage rect count {count} exceeds maximum {max}")]
    TooManyDamageRects { count: u32, max: u32 },

    /// A decoded header describes a payload that cannot fit in the
    /// channel it arrived on.
    #[error("payload too large: {size} bytes (channel capacity {capacity})")]
    PayloadTooLarge { size: u64, capacity: u64 },

    /// A header field failed validation (zero dimension, pitch smaller
    /// than a row, and so on).
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    // ── Region / Session Errors ──────────────────────────────────
    /// The platform shared-memory mapping failed.
    #[error("shared memory mapping failed: {0}")]
    Map(#[from] rustix::io::Errno),

    /// A requested sub-range does not fit inside the region.
    #[error("region too small: need {needed} bytes at offset {offset}, capacity {capacity}")]
    RegionTooSmall {
        needed: usize,
        offset: usize,
        capacity: usize,
    },

    /// A channel sub-range was not aligned for its atomic control block.
    #[error("sub-range at offset {0} is not 8-byte aligned")]
    Misaligned(usize),

    /// The session header magic did not match — the region was not
    /// produced by a PRISM host.
    #[error("bad session magic: {0:#010x}")]
    BadMagic(u32),

    /// The session layout version is not one this build understands.
    #[error("unsupported session layout version: {0}")]
    UnsupportedVersion(u32),
}

impl PrismError {
    /// Whether the error is fatal for the session.
    ///
    /// Everything except a clean liveness loss is. The distinction only
    /// matters to callers deciding between "log and exit" and
    /// "tear down with an error status".
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PrismError::LivenessLost { .. })
    }
}
