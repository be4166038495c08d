//! Interrupt Handler (spec §4.5).
//!
//! Grounded on the original driver's `intr_handler`: refresh the cached
//! status word, bump the profiling interrupt counter, optionally log the
//! buffer-level/completion snapshot under `DebugBits::INTR`, then wake
//! every task blocked on either direction. The device raises one interrupt
//! per FIFO-empty/queue-drained/flush event regardless of which direction
//! caused it, so both wait queues are always woken together — each
//! direction's own `wait_event` predicate filters out the wakeup that
//! doesn't apply to it.

use bluenoc_abi::DebugBits;
use bluenoc_abi::regs::Direction;
use bluenoc_core::Board;
use bluenoc_lib::klog_debug;
use bluenoc_mm::Bar0;

/// Service one interrupt for `board`. Returns the number of tasks woken
/// across both wait queues, mirroring the original's
/// `wake_up_interruptible` return convention.
pub fn handle_interrupt<B: Bar0>(board: &Board<B>) -> usize {
    if board.debug.lock().contains(DebugBits::PROFILE) {
        board.profile.record_interrupt();
    }

    // A race against DEACTIVATE: the IRQ fired just as the ladder unbound
    // it. Nothing to refresh or wake against an unmapped BAR0.
    let Ok(snap) = board.with_bar0(|bar0| board.status.refresh(bar0)) else {
        return 0;
    };

    if board.debug.lock().contains(DebugBits::INTR) {
        klog_debug!(
            "bluenoc{}: intr read_level={} read_ok={} read_completed={} read_flushed={} write_level={} write_ok={} write_completed={}",
            board.board_number,
            snap.buffers_level(Direction::Read),
            snap.ok(Direction::Read),
            snap.completed(Direction::Read),
            snap.read_flushed,
            snap.buffers_level(Direction::Write),
            snap.ok(Direction::Write),
            snap.completed(Direction::Write),
        );
    }

    board.read_wait.wake_all() + board.write_wait.wake_all()
}
