//! PCI bus registration (spec §4.6).
//!
//! Grounded on the teacher's `virtio_blk` module: a `match_fn` on
//! vendor/device id, a `probe` that brings the device up and stashes the
//! result in a static registry, and a static [`PciDriver`] record handed to
//! [`pci_register_driver`]. `probe` here climbs the whole Activation Ladder
//! instead of a virtqueue handshake, and unlike `virtio_blk` this driver
//! supports more than one card, so `remove` has to find the right board
//! again by PCI address rather than reaching for a single static slot.
//!
//! Resource acquisition this crate has no business doing itself — BAR
//! reservation, `ioremap`/`iounmap`, the DMA addressing mask, and IRQ line
//! binding all reach into host kernel bookkeeping this driver doesn't own —
//! is indirected through [`HostOps`], registered once via
//! [`register_host_ops`], the same backend-indirection pattern
//! `bluenoc_lib::klog` and `bluenoc_lib::runtime` use for their own host
//! hooks.

use core::cell::Cell;

use bluenoc_abi::regs::{REG_BUILD, REG_CONTENT_ID, REG_MAJOR_REV, REG_MINOR_REV, REG_NOC_PARAMS, REG_TIMESTAMP};
use bluenoc_abi::{BLUESPEC_NOC_DEVICE_ID, BLUESPEC_VENDOR_ID, DMA_ADDR_BITS, MAX_BOARDS};
use bluenoc_core::{
    ActivationBackend, ActivationError, ActivationLevel, Board, BoardRegistry, DriverError,
    Identity, IrqMode, activate, deactivate,
};
use bluenoc_lib::{IrqMutex, klog_info, klog_warn};
use bluenoc_mm::Bar0;
use bluenoc_mm::mmio::MmioRegion;

use crate::chardev;
use crate::msi::{msi_configure, msi_disable, msi_read_capability};
use crate::msix::{msix_disable, msix_enable, msix_read_capability};
use crate::pci::{PciConfigSpace, PciDriver, find_capability, pci_register_driver};
use crate::pci_defs::{
    PCI_CAP_ID_MSI, PCI_CAP_ID_MSIX, PCI_COMMAND_BUS_MASTER, PCI_COMMAND_MEMORY_SPACE,
    PCI_COMMAND_OFFSET, PCI_SUBDEVICE_ID_OFFSET, PCI_SUBVENDOR_ID_OFFSET, PciDeviceInfo,
};

/// A PCI function's bus/device/function triple, the way `remove` finds the
/// board it needs to tear down without relying on a pointer the host might
/// hand back stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PciAddress {
    bus: u8,
    device: u8,
    function: u8,
}

impl PciAddress {
    fn of(info: &PciDeviceInfo) -> Self {
        Self {
            bus: info.bus,
            device: info.device,
            function: info.function,
        }
    }
}

/// Host resource hooks `probe`/`remove` cannot perform on their own.
///
/// `map_bar0`/`unmap_bar0` stand in for `pci_iomap`/`iounmap`: the physical
/// BAR0 address this driver sees in [`PciDeviceInfo`] still needs page-table
/// mapping before it's safe to hand to [`bluenoc_mm::Bar0`], and only the
/// host kernel's memory manager can do that. `alloc_msi_vector` stands in
/// for the host's interrupt-vector allocator; `bind_irq`/`unbind_irq` for
/// `request_irq`/`free_irq`.
///
/// The `cfg_*` hooks are what let `DEACTIVATE`/`REACTIVATE` rebuild a
/// [`PciConfigSpace`] long after the PCI core's `probe`/`remove` callback
/// (which only lends one for the callback's duration) has returned: unlike
/// a borrowed config-space handle, these are plain functions of a
/// [`PciDeviceInfo`] the registry can keep around indefinitely.
#[derive(Clone, Copy)]
pub struct HostOps {
    pub reserve_bars: fn(&PciDeviceInfo) -> bool,
    pub release_bars: fn(&PciDeviceInfo),
    pub map_bar0: fn(&PciDeviceInfo) -> Option<(usize, usize)>,
    pub unmap_bar0: fn(usize, usize),
    pub set_dma_mask: fn(&PciDeviceInfo, u32) -> bool,
    pub alloc_msi_vector: fn() -> Option<(u8, u8)>,
    pub bind_irq: fn(&PciDeviceInfo) -> bool,
    pub unbind_irq: fn(&PciDeviceInfo),
    pub cfg_read8: fn(&PciDeviceInfo, u16) -> u8,
    pub cfg_read16: fn(&PciDeviceInfo, u16) -> u16,
    pub cfg_read32: fn(&PciDeviceInfo, u16) -> u32,
    pub cfg_write8: fn(&PciDeviceInfo, u16, u8),
    pub cfg_write16: fn(&PciDeviceInfo, u16, u16),
    pub cfg_write32: fn(&PciDeviceInfo, u16, u32),
}

/// A [`PciConfigSpace`] built from [`HostOps`]'s `cfg_*` hooks plus a
/// [`PciDeviceInfo`] value, rather than a borrowed handle — the only way to
/// access configuration space outside the lifetime of a `probe`/`remove`
/// callback.
struct DeviceConfigSpace<'a> {
    device: &'a PciDeviceInfo,
    ops: HostOps,
}

impl PciConfigSpace for DeviceConfigSpace<'_> {
    fn read8(&self, offset: u16) -> u8 {
        (self.ops.cfg_read8)(self.device, offset)
    }
    fn read16(&self, offset: u16) -> u16 {
        (self.ops.cfg_read16)(self.device, offset)
    }
    fn read32(&self, offset: u16) -> u32 {
        (self.ops.cfg_read32)(self.device, offset)
    }
    fn write8(&self, offset: u16, value: u8) {
        (self.ops.cfg_write8)(self.device, offset, value)
    }
    fn write16(&self, offset: u16, value: u16) {
        (self.ops.cfg_write16)(self.device, offset, value)
    }
    fn write32(&self, offset: u16, value: u32) {
        (self.ops.cfg_write32)(self.device, offset, value)
    }
}

static HOST_OPS: IrqMutex<Option<HostOps>> = IrqMutex::new(None);

/// Register the host resource hooks. Must be called once, before the PCI
/// core can match a device to this driver and call `probe`.
pub fn register_host_ops(ops: HostOps) {
    *HOST_OPS.lock() = Some(ops);
}

/// Clear the registered hooks (used by tests between cases).
#[cfg(test)]
fn reset_host_ops() {
    *HOST_OPS.lock() = None;
}

fn host_ops() -> Option<HostOps> {
    *HOST_OPS.lock()
}

/// Maps a live board's PCI address back to its board number, so `remove`
/// can find the slot [`BoardRegistry::insert_prepared`] gave it without
/// threading an extra handle through the host's callback table.
static PCI_TO_BOARD: IrqMutex<[Option<(PciAddress, u32)>; MAX_BOARDS]> = IrqMutex::new([None; MAX_BOARDS]);

fn record_board_address(address: PciAddress, board_number: u32) {
    let mut table = PCI_TO_BOARD.lock();
    for slot in table.iter_mut() {
        if slot.is_none() {
            *slot = Some((address, board_number));
            return;
        }
    }
}

fn forget_board_address(address: PciAddress) -> Option<u32> {
    let mut table = PCI_TO_BOARD.lock();
    for slot in table.iter_mut() {
        if slot.is_some_and(|(a, _)| a == address) {
            return slot.take().map(|(_, number)| number);
        }
    }
    None
}

/// Board number to [`PciDeviceInfo`] table, indexed by `board_number - 1`.
/// Kept alive for as long as the board is registered so `DEACTIVATE`/
/// `REACTIVATE` ioctls, which run long after `probe` returned, can rebuild
/// an [`ActivationBackend`] for the right device.
static BOARD_DEVICE: IrqMutex<[Option<PciDeviceInfo>; MAX_BOARDS]> = IrqMutex::new([None; MAX_BOARDS]);

fn record_board_device(board_number: u32, device: PciDeviceInfo) {
    let Some(index) = (board_number as usize).checked_sub(1) else {
        return;
    };
    if let Some(slot) = BOARD_DEVICE.lock().get_mut(index) {
        *slot = Some(device);
    }
}

fn forget_board_device(board_number: u32) {
    if let Some(index) = (board_number as usize).checked_sub(1) {
        if let Some(slot) = BOARD_DEVICE.lock().get_mut(index) {
            *slot = None;
        }
    }
}

fn board_device(board_number: u32) -> Option<PciDeviceInfo> {
    let index = (board_number as usize).checked_sub(1)?;
    BOARD_DEVICE.lock().get(index).copied().flatten()
}

static BOARDS: BoardRegistry<MmioRegion> = BoardRegistry::new();

/// Bridges [`ActivationBackend`] to real PCI config space and [`HostOps`]
/// for one device, for the duration of a single `probe` or `remove` call.
struct ProbeBackend<'a> {
    device: &'a PciDeviceInfo,
    cfg: &'a dyn PciConfigSpace,
    ops: HostOps,
    irq_mode: Cell<Option<IrqMode>>,
}

impl<'a> ActivationBackend for ProbeBackend<'a> {
    type Bar = MmioRegion;

    fn enable_pci(&self) -> Result<(), ActivationError> {
        let cmd = self.cfg.read16(PCI_COMMAND_OFFSET);
        self.cfg.write16(PCI_COMMAND_OFFSET, cmd | PCI_COMMAND_MEMORY_SPACE);
        Ok(())
    }

    fn disable_pci(&self) {
        let cmd = self.cfg.read16(PCI_COMMAND_OFFSET);
        self.cfg.write16(PCI_COMMAND_OFFSET, cmd & !PCI_COMMAND_MEMORY_SPACE);
    }

    fn reserve_bars(&self) -> Result<(), ActivationError> {
        if (self.ops.reserve_bars)(self.device) {
            Ok(())
        } else {
            Err(ActivationError::ResourceBusy)
        }
    }

    fn release_bars(&self) {
        (self.ops.release_bars)(self.device);
    }

    fn map_bars(&self) -> Result<MmioRegion, ActivationError> {
        let (virt_base, size) = (self.ops.map_bar0)(self.device).ok_or(ActivationError::IoError)?;
        // SAFETY: `map_bar0` is contracted to return either `None` or a
        // virtual address already `ioremap`'d for `size` bytes.
        Ok(unsafe { MmioRegion::new(virt_base, size) })
    }

    fn unmap_bars(&self, bar0: MmioRegion) {
        (self.ops.unmap_bar0)(bar0.virt_base(), bar0.size());
    }

    fn set_dma_mask(&self, bits: u32) -> Result<(), ActivationError> {
        if (self.ops.set_dma_mask)(self.device, bits) {
            Ok(())
        } else {
            Err(ActivationError::IoError)
        }
    }

    fn enable_msi_or_msix(&self) -> Result<IrqMode, ActivationError> {
        if let Some(cap) = find_capability(self.cfg, PCI_CAP_ID_MSIX) {
            let msix = msix_read_capability(self.cfg, cap.offset);
            msix_enable(self.cfg, &msix);
            self.irq_mode.set(Some(IrqMode::Msix));
            return Ok(IrqMode::Msix);
        }

        let cap = find_capability(self.cfg, PCI_CAP_ID_MSI).ok_or(ActivationError::IoError)?;
        let (vector, target_apic_id) = (self.ops.alloc_msi_vector)().ok_or(ActivationError::IoError)?;
        let msi = msi_read_capability(self.cfg, cap.offset);
        msi_configure(self.cfg, &msi, vector, target_apic_id).map_err(|_| ActivationError::IoError)?;
        self.irq_mode.set(Some(IrqMode::Msi));
        Ok(IrqMode::Msi)
    }

    /// Re-walks the capability list rather than trusting a cached offset:
    /// `disable_msi_or_msix` also runs from [`remove`], which builds a fresh
    /// [`ProbeBackend`] that never ran `enable_msi_or_msix` itself.
    fn disable_msi_or_msix(&self) {
        match self.irq_mode.get() {
            Some(IrqMode::Msix) => {
                if let Some(cap) = find_capability(self.cfg, PCI_CAP_ID_MSIX) {
                    let msix = msix_read_capability(self.cfg, cap.offset);
                    msix_disable(self.cfg, &msix);
                }
            }
            Some(IrqMode::Msi) => {
                if let Some(cap) = find_capability(self.cfg, PCI_CAP_ID_MSI) {
                    let msi = msi_read_capability(self.cfg, cap.offset);
                    msi_disable(self.cfg, &msi);
                }
            }
            None => {}
        }
    }

    fn bind_irq(&self) -> Result<(), ActivationError> {
        if (self.ops.bind_irq)(self.device) {
            Ok(())
        } else {
            Err(ActivationError::IoError)
        }
    }

    fn unbind_irq(&self) {
        (self.ops.unbind_irq)(self.device);
    }

    fn set_bus_master(&self, on: bool) -> Result<(), ActivationError> {
        let cmd = self.cfg.read16(PCI_COMMAND_OFFSET);
        let new_cmd = if on { cmd | PCI_COMMAND_BUS_MASTER } else { cmd & !PCI_COMMAND_BUS_MASTER };
        self.cfg.write16(PCI_COMMAND_OFFSET, new_cmd);
        Ok(())
    }
}

fn matches(device: &PciDeviceInfo) -> bool {
    device.vendor_id == BLUESPEC_VENDOR_ID && device.device_id == BLUESPEC_NOC_DEVICE_ID
}

/// Read the identity fields (spec §4.1) a newly activated board surfaces
/// verbatim through `IDENTIFY`. `subvendor_id`/`subdevice_id` come from
/// configuration space, not BAR0 — they're standard PCI fields the card
/// doesn't bother duplicating into its own register map.
fn read_identity(bar0: &MmioRegion, cfg: &dyn PciConfigSpace) -> Identity {
    Identity {
        major_rev: bar0.read32(REG_MAJOR_REV),
        minor_rev: bar0.read32(REG_MINOR_REV),
        build: bar0.read32(REG_BUILD),
        timestamp: bar0.read32(REG_TIMESTAMP),
        bytes_per_beat: (bar0.read32(REG_NOC_PARAMS) & 0xFF) as u8,
        content_id: bar0.read64(REG_CONTENT_ID),
        subvendor_id: cfg.read16(PCI_SUBVENDOR_ID_OFFSET) as u32,
        subdevice_id: cfg.read16(PCI_SUBDEVICE_ID_OFFSET) as u32,
    }
}

fn probe(device: &PciDeviceInfo, cfg: &dyn PciConfigSpace) -> i32 {
    let Some(ops) = host_ops() else {
        klog_warn!("bluenoc: probe called before host ops were registered");
        return -1;
    };

    let backend = ProbeBackend {
        device,
        cfg,
        ops,
        irq_mode: Cell::new(None),
    };

    let activated = match activate(&backend, |_level| {}) {
        Ok(a) => a,
        Err(e) => {
            klog_warn!("bluenoc: activation failed for device: {}", e);
            return -1;
        }
    };

    let identity = read_identity(&activated.bar0, cfg);
    // `board_number` is a placeholder (`Board::new`'s first argument) until
    // `insert_prepared` assigns the real, registry-allocated number.
    let board = Board::new(0, activated.bar0, identity, activated.irq_mode);
    board.set_level(ActivationLevel::FullyActive);

    match BOARDS.insert_prepared(board) {
        Ok(number) => {
            record_board_address(PciAddress::of(device), number);
            record_board_device(number, *device);
            klog_info!(
                "bluenoc{}: activated, rev {}.{} build {}",
                number,
                identity.major_rev,
                identity.minor_rev,
                identity.build
            );
            0
        }
        Err((board, e)) => {
            klog_warn!("bluenoc: {}, tearing activated board back down", e);
            if let Some(activated) = board.take_activated() {
                deactivate(&backend, activated);
            }
            -1
        }
    }
}

fn remove(device: &PciDeviceInfo, cfg: &dyn PciConfigSpace) {
    let Some(ops) = host_ops() else {
        return;
    };
    let Some(number) = forget_board_address(PciAddress::of(device)) else {
        klog_warn!("bluenoc: remove called for an unregistered device");
        return;
    };
    forget_board_device(number);
    let Some(board) = BOARDS.remove(number) else {
        return;
    };

    let irq_mode = board.irq_mode();
    let backend = ProbeBackend {
        device,
        cfg,
        ops,
        irq_mode: Cell::new(irq_mode),
    };
    if let Some(activated) = board.take_activated() {
        deactivate(&backend, activated);
    }
    klog_info!("bluenoc{}: removed", number);
}

/// `DEACTIVATE`: run a full Activation Ladder teardown against the same
/// kind of [`ActivationBackend`] `probe` used to bring the board up, built
/// fresh from [`HostOps`] and the device's [`PciDeviceInfo`] rather than a
/// callback-scoped config-space borrow (spec §4.2, §4.6).
pub fn deactivate_board(board: &Board<MmioRegion>) -> Result<(), DriverError> {
    let ops = host_ops().ok_or(DriverError::IoError)?;
    let device = board_device(board.board_number).ok_or(DriverError::IoError)?;
    let cfg = DeviceConfigSpace { device: &device, ops };
    let irq_mode = board.irq_mode();
    let backend = ProbeBackend {
        device: &device,
        cfg: &cfg,
        ops,
        irq_mode: Cell::new(irq_mode),
    };
    chardev::deactivate(board, &backend)
}

/// `REACTIVATE`: run a full ladder reactivate against a freshly rebuilt
/// backend, remapping BAR0 and re-binding the interrupt `DEACTIVATE` tore
/// down (spec §4.2, §4.6).
pub fn reactivate_board(board: &Board<MmioRegion>) -> Result<(), DriverError> {
    let ops = host_ops().ok_or(DriverError::IoError)?;
    let device = board_device(board.board_number).ok_or(DriverError::IoError)?;
    let cfg = DeviceConfigSpace { device: &device, ops };
    let backend = ProbeBackend {
        device: &device,
        cfg: &cfg,
        ops,
        irq_mode: Cell::new(None),
    };
    chardev::reactivate(board, &backend)
}

static BLUENOC_DRIVER: PciDriver = PciDriver {
    name: "bluenoc",
    match_fn: matches,
    probe,
    remove,
};

/// Register this driver with the PCI core. Call once at module-init time,
/// after [`register_host_ops`].
pub fn register_driver() -> bool {
    pci_register_driver(&BLUENOC_DRIVER)
}

/// Borrow the board registry this module populates. Used by the
/// character-device layer to resolve a minor number to a [`Board`].
pub fn boards() -> &'static BoardRegistry<MmioRegion> {
    &BOARDS
}
