//! A single activated (or activating) board (spec §3, §4.6).

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bluenoc_abi::DebugBits;
use bluenoc_lib::{IrqMutex, WaitQueue};
use bluenoc_mm::Bar0;

use crate::error::DriverError;
use crate::ladder::{Activated, ActivationLevel, IrqMode};
use crate::status::DmaStatusCache;

/// Identity fields read off the device during activation (spec §4.1,
/// surfaced verbatim by the `IDENTIFY` ioctl).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity {
    pub major_rev: u32,
    pub minor_rev: u32,
    pub build: u32,
    pub timestamp: u32,
    pub bytes_per_beat: u8,
    pub content_id: u64,
    pub subvendor_id: u32,
    pub subdevice_id: u32,
}

/// Per-board counters accumulated while `DebugBits::PROFILE` is set
/// (spec §4.6's `SET_DEBUG` PROFILE-bit transition).
#[derive(Debug, Default)]
pub struct ProfileCounters {
    pub reads: AtomicU32,
    pub writes: AtomicU32,
    pub read_bytes: AtomicU32,
    pub write_bytes: AtomicU32,
    pub interrupts: AtomicU32,
}

impl ProfileCounters {
    pub const fn new() -> Self {
        Self {
            reads: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            read_bytes: AtomicU32::new(0),
            write_bytes: AtomicU32::new(0),
            interrupts: AtomicU32::new(0),
        }
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.read_bytes.store(0, Ordering::Relaxed);
        self.write_bytes.store(0, Ordering::Relaxed);
        self.interrupts.store(0, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: u32) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: u32) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }
}

/// One registered board: its mapped BAR0, activation state, status cache,
/// gates, and wait queue.
///
/// Generic over the concrete [`Bar0`] implementation so the whole stack
/// above this runs unmodified in unit tests against `SimBar0`.
///
/// `activated` is `None` exactly when the board's rung is below
/// `BarsMapped` — in particular, after a `DEACTIVATE` has run the full
/// ladder teardown (spec §4.2) and before a matching `REACTIVATE` remaps
/// the BAR and picks a (possibly new) interrupt mode. Every caller above
/// this layer goes through [`Board::with_bar0`] rather than assuming the
/// mapping is always live.
pub struct Board<B: Bar0> {
    pub board_number: u32,
    activated: IrqMutex<Option<Activated<B>>>,
    pub identity: Identity,
    level: IrqMutex<ActivationLevel>,
    pub status: DmaStatusCache,
    pub debug: IrqMutex<DebugBits>,
    read_gate: AtomicBool,
    write_gate: AtomicBool,
    pub read_wait: WaitQueue,
    pub write_wait: WaitQueue,
    pub profile: ProfileCounters,
    pub open_count: AtomicU32,
}

impl<B: Bar0> Board<B> {
    pub fn new(board_number: u32, bar0: B, identity: Identity, irq_mode: IrqMode) -> Self {
        Self {
            board_number,
            activated: IrqMutex::new(Some(Activated { bar0, irq_mode })),
            identity,
            level: IrqMutex::new(ActivationLevel::FullyActive),
            status: DmaStatusCache::new(),
            debug: IrqMutex::new(DebugBits::empty()),
            read_gate: AtomicBool::new(false),
            write_gate: AtomicBool::new(false),
            read_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
            profile: ProfileCounters::new(),
            open_count: AtomicU32::new(0),
        }
    }

    pub fn level(&self) -> ActivationLevel {
        *self.level.lock()
    }

    pub fn set_level(&self, level: ActivationLevel) {
        *self.level.lock() = level;
    }

    pub fn is_active(&self) -> bool {
        self.level() == ActivationLevel::FullyActive
    }

    pub fn irq_mode(&self) -> Option<IrqMode> {
        self.activated.lock().as_ref().map(|a| a.irq_mode)
    }

    /// Run `f` against the mapped BAR0. Fails with [`DriverError::IoError`]
    /// if the board's rung is below `BarsMapped` (torn down by
    /// `DEACTIVATE`, not yet remapped by `REACTIVATE`).
    ///
    /// The lock is held only for the duration of `f` — never across a
    /// sleep, same discipline as [`DmaStatusCache`]'s lock.
    pub fn with_bar0<R>(&self, f: impl FnOnce(&B) -> R) -> Result<R, DriverError> {
        let guard = self.activated.lock();
        match guard.as_ref() {
            Some(a) => Ok(f(&a.bar0)),
            None => Err(DriverError::IoError),
        }
    }

    /// Take the mapped BAR0 and its interrupt mode out, leaving the slot
    /// empty. Used by a ladder teardown to hand both to
    /// [`crate::ladder::deactivate`], which consumes the BAR.
    pub fn take_activated(&self) -> Option<Activated<B>> {
        self.activated.lock().take()
    }

    /// Install the result of a fresh ladder reactivate climb.
    pub fn set_activated(&self, activated: Activated<B>) {
        *self.activated.lock() = Some(activated);
    }

    /// Attempt the single-holder exclusive read gate (spec §5). Returns
    /// `None` if another reader already holds it.
    ///
    /// Deliberately an `AtomicBool` compare-exchange rather than
    /// `bluenoc_lib::IrqMutex`: a transfer holds this gate across its whole
    /// duration, including the blocking `wait_event` calls that sleep until
    /// the device's interrupt posts completion. An `IrqMutex` guard keeps
    /// this core's interrupts masked for as long as it is held (spec §5's
    /// "never across a sleep" rule for the *status cache* lock applies with
    /// even more force here) — that would starve the very IRQ the sleeper is
    /// waiting on. This gate only needs mutual exclusion, not IRQ-context
    /// safety, so it costs nothing to make it IRQ-transparent.
    pub fn try_read_gate(&self) -> Option<GateGuard<'_>> {
        GateGuard::try_acquire(&self.read_gate)
    }

    pub fn try_write_gate(&self) -> Option<GateGuard<'_>> {
        GateGuard::try_acquire(&self.write_gate)
    }
}

/// RAII handle for a held [`Board::try_read_gate`] / [`Board::try_write_gate`].
/// Releases the gate on drop; carries no interrupt-masking side effect.
pub struct GateGuard<'a> {
    held: &'a AtomicBool,
}

impl<'a> GateGuard<'a> {
    fn try_acquire(held: &'a AtomicBool) -> Option<Self> {
        held.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { held })
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
