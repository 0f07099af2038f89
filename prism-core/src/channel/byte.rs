//! Lock-free single-producer / single-consumer byte stream over a
//! shared memory sub-range.
//!
//! ## In-region layout
//!
//! ```text
//! offset 0   read offset   u64  (advanced by the reader only)
//! offset 8   write offset  u64  (advanced by the writer only)
//! offset 16  generation    u64  (bumped by the writer per message)
//! offset 24  reserved      u64
//! offset 32  data          [u8] (capacity = sub-range len − 32)
//! ```
//!
//! The offsets are monotonic within one message and are *not* wrapped
//! modulo capacity: a message is at most `capacity` bytes, and both
//! offsets are zeroed between messages. Because only the producer
//! advances the write offset and only the consumer advances the read
//! offset, neither side ever performs a read-modify-write on shared
//! state and no lock is needed. Correctness rests on ordering alone:
//! the write-offset store is a release that publishes the preceding
//! data copy, and the consumer's load of it is an acquire.
//!
//! The generation counter marks message boundaries. The producer bumps
//! it (release) after zeroing both offsets; the consumer waits for the
//! bump (acquire) before reading offsets again, so a write offset left
//! over from the previous message can never be mistaken for new data.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::PrismError;
use crate::region::RegionSlice;
use crate::spin::{Liveness, SpinWait, WaitMode};

/// Size of the control block preceding the data area.
pub const CTRL_SIZE: usize = 32;

/// Upper bound on a single producer-side copy. Bounds the time between
/// write-offset publications so the reader observes progress promptly;
/// it has no effect on correctness.
pub const WRITE_CHUNK: usize = 1024;

// ── Control ──────────────────────────────────────────────────────

/// Borrowed view of one channel's control block and data area.
#[derive(Clone, Copy)]
struct Control<'r> {
    rp: &'r AtomicU64,
    wp: &'r AtomicU64,
    generation: &'r AtomicU64,
    data: NonNull<u8>,
    capacity: u64,
}

impl<'r> Control<'r> {
    fn attach(slice: RegionSlice<'r>) -> Result<Self, PrismError> {
        if slice.len() <= CTRL_SIZE {
            return Err(PrismError::RegionTooSmall {
                needed: CTRL_SIZE + 1,
                offset: 0,
                capacity: slice.len(),
            });
        }
        let base = slice.as_ptr().as_ptr();
        // SAFETY: the slice is 8-byte aligned (checked at construction
        // by SharedRegion::slice) and at least CTRL_SIZE + 1 bytes long,
        // so the three u64 cells and the data pointer are all in bounds.
        unsafe {
            Ok(Self {
                rp: &*(base as *const AtomicU64),
                wp: &*(base.add(8) as *const AtomicU64),
                generation: &*(base.add(16) as *const AtomicU64),
                data: NonNull::new_unchecked(base.add(CTRL_SIZE)),
                capacity: (slice.len() - CTRL_SIZE) as u64,
            })
        }
    }
}

// ── ByteWriter ───────────────────────────────────────────────────

/// Producer-side handle. Exactly one per channel, on the host side.
///
/// The writer/reader split is the single-writer / single-reader
/// ownership contract: a consumer holding a [`ByteReader`] has no way
/// to call a write.
pub struct ByteWriter<'r> {
    ctrl: Control<'r>,
    /// Local shadow of the shared write offset.
    woff: u64,
}

// SAFETY: the handle owns the producer role for its sub-range; the
// only shared state it touches is the atomic control block.
unsafe impl Send for ByteWriter<'_> {}

impl<'r> ByteWriter<'r> {
    /// Attach the producer side to a channel sub-range.
    pub fn attach(slice: RegionSlice<'r>) -> Result<Self, PrismError> {
        let ctrl = Control::attach(slice)?;
        let woff = ctrl.wp.load(Ordering::Acquire);
        Ok(Self { ctrl, woff })
    }

    /// Usable data capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.ctrl.capacity
    }

    /// Bytes written in the current message.
    pub fn written(&self) -> u64 {
        self.woff
    }

    /// Bytes of the current message not yet consumed by the reader.
    pub fn pending(&self) -> u64 {
        self.woff - self.ctrl.rp.load(Ordering::Acquire)
    }

    /// Start a new message: wait for the previous one to be fully
    /// drained, zero both offsets, and bump the generation counter.
    ///
    /// Spins while undrained; `liveness` turns a dead consumer into
    /// [`PrismError::LivenessLost`].
    pub fn begin_message<L: Liveness>(&mut self, liveness: &L) -> Result<(), PrismError> {
        let mut spin = SpinWait::new(WaitMode::Spin);
        while self.ctrl.rp.load(Ordering::Acquire) != self.woff {
            if !liveness.alive() {
                return Err(PrismError::LivenessLost { consumed: 0 });
            }
            spin.wait();
        }
        self.ctrl.wp.store(0, Ordering::Relaxed);
        self.ctrl.rp.store(0, Ordering::Relaxed);
        self.woff = 0;
        // Release-publishes the zeroed offsets together with the bump.
        self.ctrl.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Append `bytes` to the current message.
    ///
    /// Copies in [`WRITE_CHUNK`]-sized pieces, publishing the write
    /// offset after each piece so the reader can stream concurrently.
    /// Never blocks. The total message must fit the capacity; an
    /// overrun is a fatal [`PrismError::ProtocolViolation`].
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), PrismError> {
        if self.woff + bytes.len() as u64 > self.ctrl.capacity {
            return Err(PrismError::ProtocolViolation(
                "message exceeds channel capacity",
            ));
        }
        let mut src = bytes;
        while !src.is_empty() {
            let n = src.len().min(WRITE_CHUNK);
            // SAFETY: woff + n <= capacity (checked above); the reader
            // only reads below the write offset, so [woff, woff + n) is
            // exclusively ours until the release store below.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    self.ctrl.data.as_ptr().add(self.woff as usize),
                    n,
                );
            }
            self.woff += n as u64;
            self.ctrl.wp.store(self.woff, Ordering::Release);
            src = &src[n..];
        }
        Ok(())
    }
}

// ── ByteReader ───────────────────────────────────────────────────

/// Consumer-side handle. Exactly one per channel, on the client side.
pub struct ByteReader<'r> {
    ctrl: Control<'r>,
    /// Local shadow of the shared read offset.
    roff: u64,
    /// Generation of the message currently being (or last) read.
    generation: u64,
    mode: WaitMode,
}

// SAFETY: as for ByteWriter; this handle owns the consumer role.
unsafe impl Send for ByteReader<'_> {}

impl<'r> ByteReader<'r> {
    /// Attach the consumer side to a channel sub-range.
    pub fn attach(slice: RegionSlice<'r>, mode: WaitMode) -> Result<Self, PrismError> {
        let ctrl = Control::attach(slice)?;
        let generation = ctrl.generation.load(Ordering::Acquire);
        let roff = ctrl.rp.load(Ordering::Acquire);
        Ok(Self {
            ctrl,
            roff,
            generation,
            mode,
        })
    }

    /// Usable data capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.ctrl.capacity
    }

    /// Bytes consumed from the current message.
    pub fn consumed(&self) -> u64 {
        self.roff
    }

    /// Whether the producer has begun a message this reader has not
    /// yet picked up. Non-blocking; this is the dispatcher's poll.
    pub fn has_message(&self) -> bool {
        self.ctrl.generation.load(Ordering::Acquire) != self.generation
    }

    /// Block (spin) until the producer begins the next message, then
    /// rewind the local read shadow to its start.
    pub fn next_message<L: Liveness>(&mut self, liveness: &L) -> Result<(), PrismError> {
        let mut spin = SpinWait::new(self.mode);
        loop {
            let g = self.ctrl.generation.load(Ordering::Acquire);
            if g != self.generation {
                self.generation = g;
                self.roff = 0;
                return Ok(());
            }
            if !liveness.alive() {
                return Err(PrismError::LivenessLost { consumed: 0 });
            }
            spin.wait();
        }
    }

    /// Read exactly `dst.len()` bytes into `dst`, spinning while the
    /// producer is behind. Never reads past the observed write offset.
    pub fn read<L: Liveness>(&mut self, dst: &mut [u8], liveness: &L) -> Result<(), PrismError> {
        let total = dst.len();
        let mut filled = 0usize;
        let mut spin = SpinWait::new(self.mode);
        while filled < total {
            let avail = self.wait_available(total - filled, liveness, &mut spin, filled)?;
            // SAFETY: [roff, roff + avail) is below the write offset
            // published with release ordering, so the data copy that
            // preceded it is visible; bounds were validated against
            // capacity in wait_available.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.ctrl.data.as_ptr().add(self.roff as usize),
                    dst.as_mut_ptr().add(filled),
                    avail,
                );
            }
            self.advance(avail);
            filled += avail;
            spin.reset();
        }
        Ok(())
    }

    /// Read exactly `count` bytes, handing each available run to `f`
    /// in place instead of copying — the zero-copy path for payloads
    /// that go straight to the GPU.
    ///
    /// If `f` fails, the read aborts immediately; the read offset is
    /// not advanced past the failed chunk.
    pub fn read_with<L, F>(&mut self, count: u64, f: &mut F, liveness: &L) -> Result<(), PrismError>
    where
        L: Liveness,
        F: FnMut(&[u8]) -> Result<(), PrismError>,
    {
        let mut remaining = count;
        let mut spin = SpinWait::new(self.mode);
        while remaining > 0 {
            let avail = self.wait_available(
                remaining as usize,
                liveness,
                &mut spin,
                (count - remaining) as usize,
            )?;
            // SAFETY: as in read(); the slice stays valid for the
            // duration of the callback since only this reader can
            // advance the read offset.
            let chunk = unsafe {
                std::slice::from_raw_parts(self.ctrl.data.as_ptr().add(self.roff as usize), avail)
            };
            f(chunk)?;
            self.advance(avail);
            remaining -= avail as u64;
            spin.reset();
        }
        Ok(())
    }

    /// Spin until at least one byte is available, then return
    /// `min(available, wanted)`. `consumed_so_far` seeds the
    /// [`PrismError::LivenessLost`] byte count on failure.
    fn wait_available<L: Liveness>(
        &self,
        wanted: usize,
        liveness: &L,
        spin: &mut SpinWait,
        consumed_so_far: usize,
    ) -> Result<usize, PrismError> {
        loop {
            let wp = self.ctrl.wp.load(Ordering::Acquire);
            if wp > self.ctrl.capacity || wp < self.roff {
                return Err(PrismError::ProtocolViolation(
                    "write offset outside channel bounds",
                ));
            }
            let avail = (wp - self.roff) as usize;
            if avail > 0 {
                return Ok(avail.min(wanted));
            }
            if !liveness.alive() {
                return Err(PrismError::LivenessLost {
                    consumed: consumed_so_far,
                });
            }
            spin.wait();
        }
    }

    fn advance(&mut self, n: usize) {
        self.roff += n as u64;
        self.ctrl.rp.store(self.roff, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::SharedRegion;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    const ALIVE: fn() -> bool = || true;

    fn channel_region(capacity: usize) -> SharedRegion {
        SharedRegion::anonymous(CTRL_SIZE + capacity).unwrap()
    }

    #[test]
    fn test_writes_concatenate_in_order() {
        let region = channel_region(4096);
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = ByteWriter::attach(slice).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();

        w.begin_message(&ALIVE).unwrap();
        w.write(b"hello ").unwrap();
        w.write(b"shared ").unwrap();
        w.write(b"memory").unwrap();

        r.next_message(&ALIVE).unwrap();
        let mut buf = [0u8; 19];
        r.read(&mut buf, &ALIVE).unwrap();
        assert_eq!(&buf, b"hello shared memory");
    }

    #[test]
    fn test_capacity_overrun_is_protocol_violation() {
        let region = channel_region(64);
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = ByteWriter::attach(slice).unwrap();

        w.begin_message(&ALIVE).unwrap();
        w.write(&[0u8; 64]).unwrap();
        // Exactly capacity is fine; one more byte is fatal.
        let err = w.write(&[0u8; 1]).unwrap_err();
        assert!(matches!(err, PrismError::ProtocolViolation(_)));
    }

    #[test]
    fn test_read_never_passes_write_offset() {
        let region = channel_region(4096);
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = ByteWriter::attach(slice).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();

        w.begin_message(&ALIVE).unwrap();
        w.write(&[7u8; 100]).unwrap();

        r.next_message(&ALIVE).unwrap();
        let mut buf = [0u8; 100];
        r.read(&mut buf, &ALIVE).unwrap();
        assert_eq!(r.consumed(), 100);
        assert_eq!(w.pending(), 0);
    }

    #[test]
    fn test_chunked_write_of_large_message() {
        let region = channel_region(16 * 1024);
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = ByteWriter::attach(slice).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        w.begin_message(&ALIVE).unwrap();
        w.write(&payload).unwrap();

        r.next_message(&ALIVE).unwrap();
        let mut buf = vec![0u8; payload.len()];
        r.read(&mut buf, &ALIVE).unwrap();
        assert_eq!(buf, payload);
    }

    #[test]
    fn test_read_with_aborting_callback_does_not_advance() {
        let region = channel_region(4096);
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = ByteWriter::attach(slice).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();

        w.begin_message(&ALIVE).unwrap();
        w.write(&[1u8; 256]).unwrap();

        r.next_message(&ALIVE).unwrap();
        let before = r.consumed();
        let err = r
            .read_with(
                256,
                &mut |_chunk: &[u8]| Err(PrismError::ProtocolViolation("sink refused")),
                &ALIVE,
            )
            .unwrap_err();
        assert!(matches!(err, PrismError::ProtocolViolation(_)));
        assert_eq!(r.consumed(), before, "failed chunk must not be consumed");

        // The data is still there for a retry.
        let mut buf = [0u8; 256];
        r.read(&mut buf, &ALIVE).unwrap();
        assert_eq!(buf, [1u8; 256]);
    }

    #[test]
    fn test_liveness_flip_mid_read_reports_consumed_bytes() {
        // Producer writes 10 of 20 requested bytes, then dies.
        let region = Arc::new(channel_region(4096));
        let alive = Arc::new(AtomicBool::new(true));

        let producer = {
            let region = Arc::clone(&region);
            let alive = Arc::clone(&alive);
            std::thread::spawn(move || {
                let slice = region.slice(0, region.capacity()).unwrap();
                let mut w = ByteWriter::attach(slice).unwrap();
                w.begin_message(&*alive).unwrap();
                w.write(&[9u8; 10]).unwrap();
                // Let the consumer drain the 10 bytes before dying so
                // the consumed count is deterministic.
                while w.pending() > 0 {
                    std::hint::spin_loop();
                }
                alive.store(false, std::sync::atomic::Ordering::Release);
            })
        };

        let slice = region.slice(0, region.capacity()).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();
        r.next_message(&*alive).unwrap();
        let mut buf = [0u8; 20];
        let err = r.read(&mut buf, &*alive).unwrap_err();
        match err {
            PrismError::LivenessLost { consumed } => assert_eq!(consumed, 10),
            other => panic!("expected LivenessLost, got {other}"),
        }
        assert_eq!(r.consumed(), 10);
        assert_eq!(&buf[..10], &[9u8; 10]);
        producer.join().unwrap();
    }

    #[test]
    fn test_message_reset_resynchronises_reader() {
        let region = channel_region(4096);
        let slice = region.slice(0, region.capacity()).unwrap();
        let mut w = ByteWriter::attach(slice).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();

        for round in 0u8..5 {
            w.begin_message(&ALIVE).unwrap();
            let msg = [round; 33];
            w.write(&msg).unwrap();

            r.next_message(&ALIVE).unwrap();
            let mut buf = [0u8; 33];
            r.read(&mut buf, &ALIVE).unwrap();
            assert_eq!(buf, msg);
        }
    }

    #[test]
    fn test_cross_thread_streaming() {
        let region = Arc::new(channel_region(8 * 1024));
        let expected: Vec<u8> = (0..8000u32).map(|i| (i % 253) as u8).collect();

        let producer = {
            let region = Arc::clone(&region);
            let payload = expected.clone();
            std::thread::spawn(move || {
                let slice = region.slice(0, region.capacity()).unwrap();
                let mut w = ByteWriter::attach(slice).unwrap();
                w.begin_message(&ALIVE).unwrap();
                for part in payload.chunks(500) {
                    w.write(part).unwrap();
                }
            })
        };

        let slice = region.slice(0, region.capacity()).unwrap();
        let mut r = ByteReader::attach(slice, WaitMode::Spin).unwrap();
        r.next_message(&ALIVE).unwrap();
        let mut got = Vec::with_capacity(expected.len());
        r.read_with(
            expected.len() as u64,
            &mut |chunk| {
                got.extend_from_slice(chunk);
                Ok(())
            },
            &ALIVE,
        )
        .unwrap();
        assert_eq!(got, expected);
        producer.join().unwrap();
    }
}
