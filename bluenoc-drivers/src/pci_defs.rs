//! PCI configuration-space constants and device descriptors.
//!
//! Single source of truth for the PCI constants the bluenoc driver touches:
//! capability walking, BAR geometry, and MSI/MSI-X discovery. Bus
//! enumeration and ECAM/port-I/O config-space access are the host kernel's
//! job — this driver only ever sees one device at a time, handed to it
//! through `PciDriver::probe`.

// =============================================================================
// Configuration Space Register Offsets
// =============================================================================

pub const PCI_VENDOR_ID_OFFSET: u16 = 0x00;
pub const PCI_DEVICE_ID_OFFSET: u16 = 0x02;
pub const PCI_COMMAND_OFFSET: u16 = 0x04;
pub const PCI_STATUS_OFFSET: u16 = 0x06;
pub const PCI_REVISION_ID_OFFSET: u16 = 0x08;
pub const PCI_HEADER_TYPE_OFFSET: u16 = 0x0E;
pub const PCI_BAR0_OFFSET: u16 = 0x10;
pub const PCI_SUBVENDOR_ID_OFFSET: u16 = 0x2C;
pub const PCI_SUBDEVICE_ID_OFFSET: u16 = 0x2E;
pub const PCI_CAP_PTR_OFFSET: u16 = 0x34;
pub const PCI_INTERRUPT_LINE_OFFSET: u16 = 0x3C;
pub const PCI_INTERRUPT_PIN_OFFSET: u16 = 0x3D;

/// Status: Capabilities list present (bit 4).
pub const PCI_STATUS_CAP_LIST: u16 = 0x10;

/// Enable memory space access (bit 1).
pub const PCI_COMMAND_MEMORY_SPACE: u16 = 0x0002;
/// Enable bus master capability (bit 2).
pub const PCI_COMMAND_BUS_MASTER: u16 = 0x0004;
/// Disable legacy INTx assertion (bit 10). Must be set when MSI or MSI-X
/// is enabled.
pub const PCI_COMMAND_INTX_DISABLE: u16 = 0x0400;

/// PCI Capability ID: MSI (Message Signaled Interrupts).
pub const PCI_CAP_ID_MSI: u8 = 0x05;
/// PCI Capability ID: MSI-X (Extended Message Signaled Interrupts).
pub const PCI_CAP_ID_MSIX: u8 = 0x11;

/// Invalid vendor id (no device present / read failure sentinel).
pub const PCI_VENDOR_ID_INVALID: u16 = 0xFFFF;

/// Maximum registered PCI drivers.
pub const PCI_DRIVER_MAX: usize = 8;
/// Maximum number of BARs per device.
pub const PCI_MAX_BARS: usize = 6;

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct PciBarInfo {
    pub base: u64,
    pub size: u64,
    pub is_io: u8,
    pub is_64bit: u8,
    pub prefetchable: u8,
}

impl PciBarInfo {
    pub const fn zeroed() -> Self {
        Self {
            base: 0,
            size: 0,
            is_io: 0,
            is_64bit: 0,
            prefetchable: 0,
        }
    }
}

/// A single PCI capability discovered in the configuration space linked
/// list. Each capability header has an 8-bit ID (`PCI_CAP_ID_*`) and
/// occupies a variable-length region of config space starting at `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciCapability {
    /// Byte offset of this capability header in configuration space.
    pub offset: u16,
    /// Capability ID (`PCI_CAP_ID_MSI`, `PCI_CAP_ID_MSIX`, etc.).
    pub id: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct PciDeviceInfo {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub subvendor_id: u16,
    pub subdevice_id: u16,
    pub revision: u8,
    pub header_type: u8,
    pub irq_line: u8,
    pub irq_pin: u8,
    pub bar_count: u8,
    pub bars: [PciBarInfo; PCI_MAX_BARS],
    /// Config-space offset of the MSI capability, if present.
    pub msi_cap_offset: Option<u16>,
    /// Config-space offset of the MSI-X capability, if present.
    pub msix_cap_offset: Option<u16>,
}

impl PciDeviceInfo {
    pub const fn zeroed() -> Self {
        Self {
            bus: 0,
            device: 0,
            function: 0,
            vendor_id: 0,
            device_id: 0,
            subvendor_id: 0,
            subdevice_id: 0,
            revision: 0,
            header_type: 0,
            irq_line: 0,
            irq_pin: 0,
            bar_count: 0,
            bars: [PciBarInfo::zeroed(); PCI_MAX_BARS],
            msi_cap_offset: None,
            msix_cap_offset: None,
        }
    }

    /// Whether this device advertises MSI capability.
    #[inline]
    pub const fn has_msi(&self) -> bool {
        self.msi_cap_offset.is_some()
    }

    /// Whether this device advertises MSI-X capability.
    #[inline]
    pub const fn has_msix(&self) -> bool {
        self.msix_cap_offset.is_some()
    }
}
