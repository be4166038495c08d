//! User buffer pinning for the Transfer Engine (spec §4.4 "Pinning").
//!
//! Pinning a user buffer's pages is squarely a host-kernel service — the
//! same `get_user_pages()`/`pin_user_pages()` call a Rust-for-Linux block
//! driver makes. This module only owns the *contract*: a
//! [`UserPageBackend`] the host registers once, and [`PinnedPages`], the
//! RAII-ish handle the Transfer Engine holds for the lifetime of one
//! request and releases through [`PinnedPages::finish`].

use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use bluenoc_abi::PAGE_SIZE;
use bluenoc_lib::IrqMutex;

use crate::error::MmError;
use crate::user_ptr::UserVirtAddr;

/// Host-provided page pinning, backing [`pin_user_pages`].
///
/// `writable` mirrors spec §4.4: a READ call pins pages for the device to
/// write into (`writable = true`), a WRITE call pins them read-only
/// (`writable = false`).
pub trait UserPageBackend: Sync {
    /// Pin up to `page_count` pages starting at user VA `addr`. Returns the
    /// physical frame number of each page actually pinned, in ascending
    /// address order. A returned length shorter than `page_count` is a
    /// short pin (spec §4.4); the caller unwinds it.
    fn pin(&self, addr: u64, page_count: usize, writable: bool) -> Vec<u64>;

    /// Release previously pinned frames. `dirty_count` is the number of
    /// frames (from the start of `frames`) to mark dirty before releasing.
    fn unpin(&self, frames: &[u64], dirty_count: usize);
}

static BACKEND: IrqMutex<Option<&'static dyn UserPageBackend>> = IrqMutex::new(None);
static BACKEND_SET: AtomicBool = AtomicBool::new(false);

/// Register the host's page-pinning backend. Call once at driver init.
pub fn register_user_page_backend(backend: &'static dyn UserPageBackend) {
    *BACKEND.lock() = Some(backend);
    BACKEND_SET.store(true, Ordering::Release);
}

#[cfg(test)]
pub fn reset_user_page_backend() {
    *BACKEND.lock() = None;
    BACKEND_SET.store(false, Ordering::Release);
}

fn backend() -> Option<&'static dyn UserPageBackend> {
    if !BACKEND_SET.load(Ordering::Acquire) {
        return None;
    }
    *BACKEND.lock()
}

/// A set of pages pinned for one transfer request.
///
/// Owns the physical frame list for the buffer's lifetime; [`finish`]
/// must be called exactly once to unpin and (for a READ) mark the pages
/// that were actually touched dirty.
///
/// [`finish`]: PinnedPages::finish
pub struct PinnedPages {
    frames: Vec<u64>,
    writable: bool,
    offset_in_first_page: u64,
    byte_len: usize,
    released: Cell<bool>,
}

impl PinnedPages {
    #[inline]
    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn offset_in_first_page(&self) -> u64 {
        self.offset_in_first_page
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Release the pinned pages. `transferred` is the number of bytes the
    /// device actually moved; for a READ direction, every page covering
    /// the first `transferred` bytes is marked dirty (spec §4.4 "Page
    /// accounting", §9 open question resolved: any transferred byte dirties
    /// the first page).
    pub fn finish(self, transferred: usize) {
        self.released.set(true);
        let Some(backend) = backend() else {
            return;
        };
        let dirty_count = if self.writable && transferred > 0 {
            let covered = self.offset_in_first_page as usize + transferred;
            covered.div_ceil(PAGE_SIZE as usize).min(self.frames.len())
        } else {
            0
        };
        backend.unpin(&self.frames, dirty_count);
    }
}

impl Drop for PinnedPages {
    fn drop(&mut self) {
        // A caller that panics or takes an early-return error path before
        // calling `finish` still must not leak the pin; release with no
        // bytes transferred (nothing marked dirty) as a safety net. Normal
        // completion always goes through `finish` explicitly.
        if !self.released.get() {
            if let Some(backend) = backend() {
                backend.unpin(&self.frames, 0);
            }
        }
    }
}

/// Pin the pages backing `addr..addr+len` for DMA.
///
/// `writable` pins for device-write access (the READ direction); `false`
/// pins read-only (the WRITE direction). A short pin is unwound here and
/// reported as [`MmError::ShortPin`], matching spec §4.4's "rolled back by
/// releasing whatever was pinned and reporting invalid-argument" — the
/// caller maps that to the invalid-argument error kind.
pub fn pin_user_pages(addr: UserVirtAddr, len: usize, writable: bool) -> Result<PinnedPages, MmError> {
    let offset = addr.page_offset();
    let page_count = (offset as usize + len).div_ceil(PAGE_SIZE as usize).max(1);

    let backend = backend().ok_or(MmError::NoMemory)?;
    let frames = backend.pin(addr.as_u64(), page_count, writable);

    if frames.len() < page_count {
        backend.unpin(&frames, 0);
        return Err(MmError::ShortPin {
            requested: page_count,
            pinned: frames.len(),
        });
    }

    Ok(PinnedPages {
        frames,
        writable,
        offset_in_first_page: offset,
        byte_len: len,
        released: Cell::new(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    struct FakeBackend {
        short_by: usize,
        unpin_calls: AtomicUsize,
        last_dirty_count: AtomicUsize,
    }

    impl UserPageBackend for FakeBackend {
        fn pin(&self, addr: u64, page_count: usize, _writable: bool) -> Vec<u64> {
            let granted = page_count.saturating_sub(self.short_by);
            (0..granted).map(|i| addr + i as u64 * PAGE_SIZE).collect()
        }

        fn unpin(&self, _frames: &[u64], dirty_count: usize) {
            self.unpin_calls.fetch_add(1, Ordering::Relaxed);
            self.last_dirty_count.store(dirty_count, Ordering::Relaxed);
        }
    }

    static FULL_BACKEND: FakeBackend = FakeBackend {
        short_by: 0,
        unpin_calls: AtomicUsize::new(0),
        last_dirty_count: AtomicUsize::new(0),
    };
    static SHORT_BACKEND: FakeBackend = FakeBackend {
        short_by: 1,
        unpin_calls: AtomicUsize::new(0),
        last_dirty_count: AtomicUsize::new(0),
    };

    #[test]
    fn pins_requested_page_count() {
        register_user_page_backend(&FULL_BACKEND);
        let pinned = pin_user_pages(UserVirtAddr::try_new(0x3000, 256).unwrap(), 256, true).unwrap();
        assert_eq!(pinned.page_count(), 1);
        pinned.finish(256);
        assert_eq!(FULL_BACKEND.unpin_calls.load(Ordering::Relaxed), 1);
        assert_eq!(FULL_BACKEND.last_dirty_count.load(Ordering::Relaxed), 1);
        reset_user_page_backend();
    }

    #[test]
    fn spans_multiple_pages_for_unaligned_tail() {
        register_user_page_backend(&FULL_BACKEND);
        // offset 128 into the page, 2 pages + a bit of a third.
        let addr = UserVirtAddr::try_new(0x4080, 9000).unwrap();
        let pinned = pin_user_pages(addr, 9000, true).unwrap();
        assert_eq!(pinned.page_count(), 3);
        pinned.finish(9000);
        reset_user_page_backend();
    }

    #[test]
    fn short_pin_unwinds_and_reports_error() {
        register_user_page_backend(&SHORT_BACKEND);
        let addr = UserVirtAddr::try_new(0x5000, 9000).unwrap();
        let err = pin_user_pages(addr, 9000, true).unwrap_err();
        assert!(matches!(err, MmError::ShortPin { .. }));
        assert_eq!(SHORT_BACKEND.unpin_calls.load(Ordering::Relaxed), 1);
        reset_user_page_backend();
    }

    #[test]
    fn zero_bytes_transferred_marks_nothing_dirty() {
        register_user_page_backend(&FULL_BACKEND);
        FULL_BACKEND.unpin_calls.store(0, Ordering::Relaxed);
        let pinned = pin_user_pages(UserVirtAddr::try_new(0x6000, 64).unwrap(), 64, true).unwrap();
        pinned.finish(0);
        assert_eq!(FULL_BACKEND.last_dirty_count.load(Ordering::Relaxed), 0);
        reset_user_page_backend();
    }

    #[test]
    fn read_only_pin_never_marks_dirty() {
        register_user_page_backend(&FULL_BACKEND);
        let pinned = pin_user_pages(UserVirtAddr::try_new(0x7000, 64).unwrap(), 64, false).unwrap();
        pinned.finish(64);
        assert_eq!(FULL_BACKEND.last_dirty_count.load(Ordering::Relaxed), 0);
        reset_user_page_backend();
    }

    #[test]
    fn no_registered_backend_fails_closed() {
        reset_user_page_backend();
        let err = pin_user_pages(UserVirtAddr::try_new(0x8000, 64).unwrap(), 64, true).unwrap_err();
        assert_eq!(err, MmError::NoMemory);
    }

}
