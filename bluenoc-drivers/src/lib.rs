#![cfg_attr(not(test), no_std)]
#![allow(unsafe_op_in_unsafe_fn)]

//! The bluenoc PCIe function driver: PCI probe/remove, the scatter-gather
//! Transfer Engine, the interrupt handler, the character-device ioctl
//! surface, and the clock tunnel helper (spec §4).
//!
//! Everything below [`probe`]/[`chardev`] is generic over
//! [`bluenoc_mm::Bar0`] and runs against `bluenoc_mm::mmio::sim::SimBar0`
//! in unit tests; only the PCI registration glue in `probe` is
//! monomorphized against the real MMIO-backed `Bar0` impl.

extern crate alloc;

pub mod chardev;
pub mod clock;
pub mod intr;
pub mod msi;
pub mod msix;
pub mod pci;
pub mod pci_defs;
pub mod probe;
pub mod sg;
pub mod transfer;
