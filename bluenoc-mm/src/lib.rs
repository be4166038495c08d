#![cfg_attr(not(test), no_std)]

//! BAR0 MMIO access and user-buffer pinning/validation for the bluenoc
//! driver stack (spec §3, §4.1, §4.4).
//!
//! This crate deliberately does not implement page-table management,
//! kernel heap allocation, or process address-space bookkeeping — those
//! are host-kernel services a PCIe function driver calls into, not
//! something a driver crate owns. `mmio` wraps an already-`ioremap`'d BAR
//! window behind the [`mmio::Bar0`] trait; `pin` wraps the host's
//! `pin_user_pages()`/`unpin_user_pages()`-equivalent behind
//! [`pin::UserPageBackend`].

extern crate alloc;

pub mod error;
pub mod mmio;
pub mod pin;
pub mod user_ptr;

pub use error::{MmError, MmResult};
pub use mmio::{Bar0, MmioRegion};
pub use pin::{PinnedPages, UserPageBackend, pin_user_pages, register_user_page_backend};
pub use user_ptr::UserVirtAddr;
