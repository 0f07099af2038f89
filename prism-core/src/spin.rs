//! Spin-wait strategy and session liveness.
//!
//! All waiting in the transport is busy-wait polling — the latency
//! target rules out condition variables and OS wake-ups. The primitive
//! itself has no timeout, so every spin loop consults a caller-provided
//! [`Liveness`] predicate; a dead peer turns the spin into a prompt
//! `LivenessLost` instead of a hang.

use std::sync::atomic::{AtomicBool, Ordering};

// ── Liveness ─────────────────────────────────────────────────────

/// Caller-supplied "session still valid" predicate.
///
/// Consulted on every spin iteration of every blocking read and write.
/// The transport cannot distinguish a slow peer from a dead one; this
/// predicate is the only source of that knowledge.
pub trait Liveness {
    /// `true` while the session peer should be assumed alive.
    fn alive(&self) -> bool;
}

impl<F: Fn() -> bool> Liveness for F {
    fn alive(&self) -> bool {
        self()
    }
}

/// A plain shared flag; `false` means the session is over.
impl Liveness for AtomicBool {
    fn alive(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

// ── WaitMode ─────────────────────────────────────────────────────

/// How a spin loop behaves while the condition is not yet met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Pure busy-wait with CPU relax hints. Lowest latency; burns a
    /// core. The right choice when the consumer has a core to itself.
    #[default]
    Spin,
    /// Busy-wait, but yield the thread to the scheduler periodically.
    /// For non-real-time targets sharing cores with other work.
    SpinYield,
}

// ── SpinWait ─────────────────────────────────────────────────────

/// Iteration state for one spin episode.
///
/// ```
/// use prism_core::spin::{SpinWait, WaitMode};
///
/// let mut spin = SpinWait::new(WaitMode::Spin);
/// let mut tries = 0;
/// while tries < 3 {
///     tries += 1;
///     spin.wait();
/// }
/// ```
pub struct SpinWait {
    mode: WaitMode,
    spins: u32,
}

/// Spins between scheduler yields in [`WaitMode::SpinYield`].
const YIELD_INTERVAL: u32 = 64;

impl SpinWait {
    /// New episode in the given mode.
    pub fn new(mode: WaitMode) -> Self {
        Self { mode, spins: 0 }
    }

    /// One wait step: CPU relax hint, plus an occasional scheduler
    /// yield in [`WaitMode::SpinYield`].
    pub fn wait(&mut self) {
        self.spins = self.spins.wrapping_add(1);
        std::hint::spin_loop();
        if self.mode == WaitMode::SpinYield && self.spins % YIELD_INTERVAL == 0 {
            std::thread::yield_now();
        }
    }

    /// Restart the episode after progress was made.
    pub fn reset(&mut self) {
        self.spins = 0;
    }
}
