//! Shared memory region lifecycle.
//!
//! A [`SharedRegion`] owns one fixed-size byte region visible to both
//! the host capture agent and the client renderer. It does lifecycle
//! only — map and unmap — and hands out bounds-checked sub-ranges for
//! the channels to live in. No channel logic crosses this boundary.
//!
//! Three backings are supported:
//!
//! - **POSIX shared memory** (`shm_open` + `mmap`): the normal
//!   cross-process path. The creating side unlinks the name on drop.
//! - **Anonymous mapping**: single-process, used by tests and demos
//!   that run producer and consumer as threads.
//! - **Raw**: a pre-established mapping supplied by the session layer
//!   (base pointer + capacity); never unmapped by us.

use std::marker::PhantomData;
use std::ptr::NonNull;

use rustix::fs::{Mode, ftruncate};
use rustix::mm::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap};
use rustix::shm;

use crate::error::PrismError;

// ── Backing ──────────────────────────────────────────────────────

/// How the region's memory came to exist, which dictates cleanup.
enum Backing {
    /// `shm_open`-backed object. `unlink` is true for the creating side.
    Posix { name: String, unlink: bool },
    /// Anonymous mapping, unmapped on drop.
    Anonymous,
    /// Foreign mapping owned by someone else; left untouched on drop.
    Raw,
}

// ── SharedRegion ─────────────────────────────────────────────────

/// A fixed-size memory region shared between exactly two processes.
///
/// The region outlives every channel built on it, which the borrow
/// checker enforces: [`RegionSlice`]s borrow the region.
pub struct SharedRegion {
    base: NonNull<u8>,
    capacity: usize,
    backing: Backing,
}

// SAFETY: the region is a plain byte range. Concurrent access is
// governed entirely by the channel layer's atomic offset protocol;
// SharedRegion itself only exposes raw sub-ranges.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create a new POSIX shared memory object of `capacity` bytes and
    /// map it. The name is unlinked when this region drops.
    ///
    /// `name` must start with `/` and contain no further slashes, per
    /// `shm_open` rules.
    pub fn create(name: &str, capacity: usize) -> Result<Self, PrismError> {
        let fd = shm::open(
            name,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )?;

        if let Err(e) = ftruncate(&fd, capacity as u64) {
            let _ = shm::unlink(name);
            return Err(e.into());
        }

        // SAFETY: fresh mapping of a just-created object; aliases no
        // existing Rust memory in this process.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                capacity,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        };
        let ptr = match ptr {
            Ok(p) => p,
            Err(e) => {
                let _ = shm::unlink(name);
                return Err(e.into());
            }
        };

        // SAFETY: ptr covers exactly `capacity` freshly mapped bytes.
        // Zeroing puts every channel control block in its initial state.
        unsafe { std::ptr::write_bytes(ptr as *mut u8, 0, capacity) };

        Ok(Self {
            base: NonNull::new(ptr as *mut u8).expect("mmap returned null"),
            capacity,
            backing: Backing::Posix {
                name: name.to_string(),
                unlink: true,
            },
        })
    }

    /// Open and map an existing POSIX shared memory object created by
    /// the peer. The name is *not* unlinked on drop.
    pub fn open(name: &str) -> Result<Self, PrismError> {
        let fd = shm::open(name, shm::OFlags::RDWR, Mode::empty())?;
        let stat = rustix::fs::fstat(&fd)?;
        let capacity = stat.st_size as usize;

        // SAFETY: mapping an existing object; size taken from fstat.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                capacity,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )?
        };

        Ok(Self {
            base: NonNull::new(ptr as *mut u8).expect("mmap returned null"),
            capacity,
            backing: Backing::Posix {
                name: name.to_string(),
                unlink: false,
            },
        })
    }

    /// Map an anonymous region of `capacity` bytes, visible only inside
    /// this process. Producer and consumer then run as threads sharing
    /// the one mapping — the arrangement every test in this crate uses.
    pub fn anonymous(capacity: usize) -> Result<Self, PrismError> {
        // SAFETY: fresh anonymous mapping, zero-filled by the kernel.
        let ptr = unsafe {
            mmap_anonymous(
                std::ptr::null_mut(),
                capacity,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
            )?
        };
        Ok(Self {
            base: NonNull::new(ptr as *mut u8).expect("mmap returned null"),
            capacity,
            backing: Backing::Anonymous,
        })
    }

    /// Wrap a mapping established by an outer session layer.
    ///
    /// The region never unmaps it; the caller keeps ownership.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `capacity` bytes of readable,
    /// writable memory that stays mapped for the region's lifetime and
    /// is not accessed through any other Rust reference.
    pub unsafe fn from_raw(base: NonNull<u8>, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            backing: Backing::Raw,
        }
    }

    /// Base address of the mapping.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A bounds-checked sub-range of the region.
    ///
    /// Channel control blocks hold atomics, so the sub-range start must
    /// be 8-byte aligned.
    pub fn slice(&self, offset: usize, len: usize) -> Result<RegionSlice<'_>, PrismError> {
        let end = offset.checked_add(len).ok_or(PrismError::RegionTooSmall {
            needed: len,
            offset,
            capacity: self.capacity,
        })?;
        if end > self.capacity {
            return Err(PrismError::RegionTooSmall {
                needed: len,
                offset,
                capacity: self.capacity,
            });
        }
        let addr = self.base.as_ptr() as usize + offset;
        if addr % 8 != 0 {
            return Err(PrismError::Misaligned(offset));
        }
        // SAFETY: offset + len is within the mapping, checked above.
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Ok(RegionSlice {
            ptr,
            len,
            _region: PhantomData,
        })
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        match &self.backing {
            Backing::Raw => {}
            Backing::Anonymous => {
                // SAFETY: base/capacity describe a mapping we created.
                unsafe {
                    let _ = munmap(self.base.as_ptr() as *mut _, self.capacity);
                }
            }
            Backing::Posix { name, unlink } => {
                // SAFETY: as above.
                unsafe {
                    let _ = munmap(self.base.as_ptr() as *mut _, self.capacity);
                }
                if *unlink {
                    let _ = shm::unlink(name);
                }
            }
        }
    }
}

// ── RegionSlice ──────────────────────────────────────────────────

/// A borrowed sub-range of a [`SharedRegion`].
///
/// This is the only currency the channel layer accepts: it cannot
/// outlive its region and cannot be constructed out of bounds.
#[derive(Clone, Copy)]
pub struct RegionSlice<'r> {
    ptr: NonNull<u8>,
    len: usize,
    _region: PhantomData<&'r SharedRegion>,
}

// SAFETY: a slice is a base + length pair into memory whose concurrent
// use is mediated by the channel protocol.
unsafe impl Send for RegionSlice<'_> {}

impl<'r> RegionSlice<'r> {
    /// Start of the sub-range.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Length of the sub-range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the sub-range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop the first `n` bytes of the sub-range. `n` must be a
    /// multiple of 8 (alignment is part of the slice contract) and at
    /// most the length.
    pub(crate) fn skip(self, n: usize) -> RegionSlice<'r> {
        debug_assert!(n % 8 == 0 && n <= self.len);
        // SAFETY: n <= len, so the result stays inside the region.
        let ptr = unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(n)) };
        RegionSlice {
            ptr,
            len: self.len - n,
            _region: PhantomData,
        }
    }
}
