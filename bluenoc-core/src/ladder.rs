//! The Activation Ladder (spec §4.2).
//!
//! Twelve ordered rungs between "a PCI device the kernel noticed" and "a
//! board callers may submit DMA to". Climbing stops at the first failing
//! rung; everything already climbed unwinds in exact reverse order. The
//! rungs that only touch BAR0 (`MagicOk`, `MsixUnmasked`, `FullyActive`)
//! are implemented directly against [`Bar0`]; the rungs that acquire a
//! real host resource (PCI command bits, BAR reservations, an MSI/MSI-X
//! vector, an IRQ line) are delegated to [`ActivationBackend`], which a
//! PCI probe callback implements once per bus.

use bluenoc_abi::regs::{REG_ACTIVATION_STROBE, REG_MAGIC, REG_MSIX_ENTRY0_VECTOR_CTRL};
use bluenoc_abi::{DMA_ADDR_BITS, MAGIC_VALUE};
use bluenoc_mm::Bar0;

use crate::error::ActivationError;

/// A rung of the ladder, in climb order. Discriminants double as the
/// "how far did we get" value stashed on unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ActivationLevel {
    /// The PCI core found the device and matched it to this driver.
    Probed = 0,
    /// A board number has been allocated in the registry.
    Numbered = 1,
    /// `PCI_COMMAND` has memory-space and bus-master bits set.
    PciEnabled = 2,
    /// BAR0 is reserved against other claimants.
    BarsReserved = 3,
    /// BAR0 is mapped into kernel virtual address space.
    BarsMapped = 4,
    /// [`REG_MAGIC`] reads back `"Bluespec"`.
    MagicOk = 5,
    /// The host DMA mask is set wide enough for [`DMA_ADDR_BITS`].
    DmaMaskSet = 6,
    /// MSI or MSI-X is enabled for the function.
    MsiEnabled = 7,
    /// The IRQ line (or MSI-X vector 0) is bound to our handler.
    IrqBound = 8,
    /// MSI-X entry 0's vector-control mask bit is cleared.
    MsixUnmasked = 9,
    /// PCI bus-mastering is turned on.
    BusMaster = 10,
    /// [`REG_ACTIVATION_STROBE`] has been struck; the board accepts I/O.
    FullyActive = 11,
}

/// Which interrupt mechanism [`ActivationBackend::enable_msi_or_msix`] won.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    Msi,
    Msix,
}

/// Host-provided resource acquisition for the rungs that reach outside
/// this crate: PCI config space, BAR reservation/mapping, interrupt
/// plumbing. Implemented once by whatever glues this driver to the PCI
/// core (see `bluenoc-drivers::probe`).
///
/// Generic over the concrete [`Bar0`] implementation so the ladder can
/// run, unmodified, against `bluenoc_mm::mmio::sim::SimBar0` in tests and
/// `bluenoc_mm::MmioRegion` in production.
pub trait ActivationBackend {
    type Bar: Bar0;

    fn enable_pci(&self) -> Result<(), ActivationError>;
    fn disable_pci(&self);

    fn reserve_bars(&self) -> Result<(), ActivationError>;
    fn release_bars(&self);

    fn map_bars(&self) -> Result<Self::Bar, ActivationError>;
    /// Safety: `bar0` must be the exact value returned by `map_bars` and
    /// must not be used again after this call.
    fn unmap_bars(&self, bar0: Self::Bar);

    fn set_dma_mask(&self, bits: u32) -> Result<(), ActivationError>;

    fn enable_msi_or_msix(&self) -> Result<IrqMode, ActivationError>;
    fn disable_msi_or_msix(&self);

    fn bind_irq(&self) -> Result<(), ActivationError>;
    fn unbind_irq(&self);

    fn set_bus_master(&self, on: bool) -> Result<(), ActivationError>;
}

/// Result of a successful climb: everything later rungs need.
pub struct Activated<B: Bar0> {
    pub bar0: B,
    pub irq_mode: IrqMode,
}

/// Climb every rung from [`ActivationLevel::Numbered`] to
/// [`ActivationLevel::FullyActive`], unwinding in reverse on the first
/// failure (spec §4.2's "precise reverse symmetry").
///
/// `backend` acquires host resources; `on_level` is called after each
/// rung succeeds, letting the caller update a board's stored level
/// before the next rung runs (so a concurrent reader never observes a
/// level the ladder hasn't actually reached).
pub fn activate<A, F>(backend: &A, mut on_level: F) -> Result<Activated<A::Bar>, ActivationError>
where
    A: ActivationBackend,
    F: FnMut(ActivationLevel),
{
    backend.enable_pci()?;
    on_level(ActivationLevel::PciEnabled);

    if let Err(e) = backend.reserve_bars() {
        backend.disable_pci();
        return Err(e);
    }
    on_level(ActivationLevel::BarsReserved);

    let bar0 = match backend.map_bars() {
        Ok(region) => region,
        Err(e) => {
            backend.release_bars();
            backend.disable_pci();
            return Err(e);
        }
    };
    on_level(ActivationLevel::BarsMapped);

    if bar0.read64(REG_MAGIC) != MAGIC_VALUE {
        backend.unmap_bars(bar0);
        backend.release_bars();
        backend.disable_pci();
        return Err(ActivationError::HardwareInvalid);
    }
    on_level(ActivationLevel::MagicOk);

    if let Err(e) = backend.set_dma_mask(DMA_ADDR_BITS) {
        backend.unmap_bars(bar0);
        backend.release_bars();
        backend.disable_pci();
        return Err(e);
    }
    on_level(ActivationLevel::DmaMaskSet);

    let irq_mode = match backend.enable_msi_or_msix() {
        Ok(mode) => mode,
        Err(e) => {
            backend.unmap_bars(bar0);
            backend.release_bars();
            backend.disable_pci();
            return Err(e);
        }
    };
    on_level(ActivationLevel::MsiEnabled);

    if let Err(e) = backend.bind_irq() {
        backend.disable_msi_or_msix();
        backend.unmap_bars(bar0);
        backend.release_bars();
        backend.disable_pci();
        return Err(e);
    }
    on_level(ActivationLevel::IrqBound);

    if irq_mode == IrqMode::Msix {
        bar0.write32(REG_MSIX_ENTRY0_VECTOR_CTRL, 0);
    }
    on_level(ActivationLevel::MsixUnmasked);

    if let Err(e) = backend.set_bus_master(true) {
        backend.unbind_irq();
        backend.disable_msi_or_msix();
        backend.unmap_bars(bar0);
        backend.release_bars();
        backend.disable_pci();
        return Err(e);
    }
    on_level(ActivationLevel::BusMaster);

    bar0.write8(REG_ACTIVATION_STROBE, 1);
    on_level(ActivationLevel::FullyActive);

    Ok(Activated { bar0, irq_mode })
}

/// Unwind every rung from [`ActivationLevel::FullyActive`] back to
/// [`ActivationLevel::Numbered`], in exact reverse climb order.
pub fn deactivate<A: ActivationBackend>(backend: &A, activated: Activated<A::Bar>) {
    let Activated { bar0, .. } = activated;
    bar0.write8(REG_ACTIVATION_STROBE, 0);
    backend.set_bus_master(false).ok();
    backend.unbind_irq();
    backend.disable_msi_or_msix();
    backend.unmap_bars(bar0);
    backend.release_bars();
    backend.disable_pci();
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;
    use alloc::vec::Vec;
    use bluenoc_mm::mmio::sim::SimBar0;
    use core::cell::RefCell;

    struct FakeBackend {
        fail_at: Option<&'static str>,
        bad_magic: bool,
        calls: RefCell<Vec<&'static str>>,
        strobe_at_unmap: core::cell::Cell<Option<u8>>,
    }

    impl FakeBackend {
        fn new(fail_at: Option<&'static str>) -> Self {
            Self {
                fail_at,
                bad_magic: false,
                calls: RefCell::new(Vec::new()),
                strobe_at_unmap: core::cell::Cell::new(None),
            }
        }

        fn with_bad_magic() -> Self {
            Self {
                fail_at: None,
                bad_magic: true,
                calls: RefCell::new(Vec::new()),
                strobe_at_unmap: core::cell::Cell::new(None),
            }
        }

        fn record(&self, name: &'static str) -> Result<(), ActivationError> {
            self.calls.borrow_mut().push(name);
            if self.fail_at == Some(name) {
                Err(ActivationError::IoError)
            } else {
                Ok(())
            }
        }
    }

    impl ActivationBackend for FakeBackend {
        type Bar = SimBar0;

        fn enable_pci(&self) -> Result<(), ActivationError> {
            self.record("enable_pci")
        }
        fn disable_pci(&self) {
            self.calls.borrow_mut().push("disable_pci");
        }
        fn reserve_bars(&self) -> Result<(), ActivationError> {
            self.record("reserve_bars")
        }
        fn release_bars(&self) {
            self.calls.borrow_mut().push("release_bars");
        }
        fn map_bars(&self) -> Result<SimBar0, ActivationError> {
            self.record("map_bars")?;
            if self.bad_magic {
                Ok(SimBar0::with_bad_magic())
            } else {
                Ok(SimBar0::with_identity(1, 0, 1, 0, 16, 0))
            }
        }
        fn unmap_bars(&self, bar0: SimBar0) {
            self.strobe_at_unmap.set(Some(bar0.read8(REG_ACTIVATION_STROBE)));
            self.calls.borrow_mut().push("unmap_bars");
        }
        fn set_dma_mask(&self, _bits: u32) -> Result<(), ActivationError> {
            self.record("set_dma_mask")
        }
        fn enable_msi_or_msix(&self) -> Result<IrqMode, ActivationError> {
            self.record("enable_msi_or_msix")?;
            Ok(IrqMode::Msix)
        }
        fn disable_msi_or_msix(&self) {
            self.calls.borrow_mut().push("disable_msi_or_msix");
        }
        fn bind_irq(&self) -> Result<(), ActivationError> {
            self.record("bind_irq")
        }
        fn unbind_irq(&self) {
            self.calls.borrow_mut().push("unbind_irq");
        }
        fn set_bus_master(&self, on: bool) -> Result<(), ActivationError> {
            self.record(if on { "set_bus_master_on" } else { "set_bus_master_off" })
        }
    }

    #[test]
    fn full_climb_reaches_fully_active_and_strikes_strobe() {
        let backend = FakeBackend::new(None);
        let mut levels = Vec::new();
        let activated = activate(&backend, |lvl| levels.push(lvl)).unwrap();
        assert_eq!(activated.irq_mode, IrqMode::Msix);
        assert_eq!(activated.bar0.read8(REG_ACTIVATION_STROBE), 1);
        assert_eq!(activated.bar0.read32(REG_MSIX_ENTRY0_VECTOR_CTRL), 0);
        assert_eq!(*levels.last().unwrap(), ActivationLevel::FullyActive);
        assert_eq!(levels.len(), 10);
    }

    #[test]
    fn bad_magic_fails_at_magic_ok_and_unwinds_to_disable_pci() {
        let backend = FakeBackend::with_bad_magic();
        let err = activate(&backend, |_| {}).unwrap_err();
        assert_eq!(err, ActivationError::HardwareInvalid);
        let calls = backend.calls.borrow();
        assert_eq!(
            &calls[..],
            &["enable_pci", "reserve_bars", "map_bars", "unmap_bars", "release_bars", "disable_pci"]
        );
    }

    #[test]
    fn mid_ladder_failure_unwinds_in_exact_reverse() {
        let backend = FakeBackend::new(Some("bind_irq"));
        let err = activate(&backend, |_| {}).unwrap_err();
        assert_eq!(err, ActivationError::IoError);
        let calls = backend.calls.borrow();
        assert_eq!(
            &calls[..],
            &[
                "enable_pci",
                "reserve_bars",
                "map_bars",
                "set_dma_mask",
                "enable_msi_or_msix",
                "bind_irq",
                "disable_msi_or_msix",
                "unmap_bars",
                "release_bars",
                "disable_pci",
            ]
        );
    }

    #[test]
    fn deactivate_clears_strobe_and_releases_everything() {
        let backend = FakeBackend::new(None);
        let activated = activate(&backend, |_| {}).unwrap();
        deactivate(&backend, activated);
        assert_eq!(backend.strobe_at_unmap.get(), Some(0));
        let calls = backend.calls.borrow();
        assert_eq!(calls.last().unwrap(), &"disable_pci");
    }
}
