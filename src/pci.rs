//! PCI configuration space access through configuration mechanism #1
//! (ports 0xCF8/0xCFC), bus enumeration and BAR sizing.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::iter::FusedIterator;

use crate::error::{ProbeError, ProbeResult};
use crate::hal::{CriticalSection, Hal};
use crate::structs::{
    Bar, BarKind, PciAddress, PciClass, PciConfigAddress, PciDeviceInfo, PciHeaderType, PCI_BAR0, PCI_BAR_COUNT,
    PCI_BAR_IO_ATTR_MASK, PCI_BAR_MEMORY_ATTR_MASK, PCI_BUS_MAX, PCI_CLASS_CODE, PCI_COMMAND,
    PCI_COMMAND_DECODE_MASK, PCI_CONFIG_ADDRESS_PORT, PCI_CONFIG_DATA_PORT, PCI_CONFIG_MECHANISM_PORT,
    PCI_CONFIG_SPACE_SIZE, PCI_DEVICE_ID, PCI_EXPANSION_ROM, PCI_FUNC_MAX, PCI_HEADER_MULTI_FUNCTION, PCI_HEADER_TYPE,
    PCI_PROG_IF, PCI_REVISION_ID, PCI_SLOT_MAX, PCI_SUBCLASS, PCI_SUBSYSTEM_ID, PCI_SUBSYSTEM_VENDOR_ID, PCI_VENDOR_ID,
    PCI_VENDOR_NONE,
};
use crate::utils::{extract_u16, extract_u8, is_pow2, merge_u16, merge_u8};

fn config_address(address: PciAddress, offset: u8) -> u32 {
    PciConfigAddress::new()
        .with_register(offset & 0xFC)
        .with_function(address.func & PCI_FUNC_MAX)
        .with_device(address.slot & PCI_SLOT_MAX)
        .with_bus(address.bus)
        .with_enable(true)
        .into_bits()
}

// Port sequences below run with interrupts already masked by the caller.
fn port_read32<H: Hal>(hal: &mut H, address: PciAddress, offset: u8) -> u32 {
    hal.io_write32(PCI_CONFIG_ADDRESS_PORT, config_address(address, offset));
    hal.io_read32(PCI_CONFIG_DATA_PORT)
}

fn port_write32<H: Hal>(hal: &mut H, address: PciAddress, offset: u8, value: u32) {
    hal.io_write32(PCI_CONFIG_ADDRESS_PORT, config_address(address, offset));
    hal.io_write32(PCI_CONFIG_DATA_PORT, value);
}

fn port_write8<H: Hal>(hal: &mut H, address: PciAddress, offset: u8, value: u8) {
    let dword = port_read32(hal, address, offset);
    port_write32(hal, address, offset, merge_u8(dword, offset, value));
}

fn config_read32<H: Hal>(hal: &mut H, address: PciAddress, offset: u8) -> u32 {
    let mut cs = CriticalSection::enter(hal);
    port_read32(&mut *cs, address, offset)
}

fn config_write32<H: Hal>(hal: &mut H, address: PciAddress, offset: u8, value: u32) {
    let mut cs = CriticalSection::enter(hal);
    port_write32(&mut *cs, address, offset, value);
}

fn config_read8<H: Hal>(hal: &mut H, address: PciAddress, offset: u8) -> u8 {
    extract_u8(config_read32(hal, address, offset), offset)
}

/// Read-modify-write of the containing dword under a single critical section.
fn config_write8<H: Hal>(hal: &mut H, address: PciAddress, offset: u8, value: u8) {
    let mut cs = CriticalSection::enter(hal);
    port_write8(&mut *cs, address, offset, value);
}

fn config_write16<H: Hal>(hal: &mut H, address: PciAddress, offset: u8, value: u16) {
    let mut cs = CriticalSection::enter(hal);
    let dword = port_read32(&mut *cs, address, offset);
    port_write32(&mut *cs, address, offset, merge_u16(dword, offset, value));
}

/// Restores a BAR and the command register when dropped, so a probe that
/// bails out (or unwinds) never leaves decode disabled or the BAR clobbered.
/// Interrupts stay masked from `begin` until the restore has finished.
struct BarProbe<'a, H: Hal> {
    cs: CriticalSection<'a, H>,
    address: PciAddress,
    bar_offset: u8,
    saved_bar: u32,
    saved_command: u8,
}

impl<'a, H: Hal> BarProbe<'a, H> {
    fn begin(hal: &'a mut H, address: PciAddress, bar_offset: u8) -> Self {
        let mut cs = CriticalSection::enter(hal);
        let saved_bar = port_read32(&mut *cs, address, bar_offset);
        let saved_command = extract_u8(port_read32(&mut *cs, address, PCI_COMMAND), PCI_COMMAND);
        let mut probe = Self { cs, address, bar_offset, saved_bar, saved_command };

        // Disable I/O and memory decode while the BAR holds the probe pattern.
        port_write8(&mut *probe.cs, address, PCI_COMMAND, saved_command & !PCI_COMMAND_DECODE_MASK);
        probe
    }

    fn read_mask(&mut self) -> u32 {
        port_write32(&mut *self.cs, self.address, self.bar_offset, 0xFFFF_FFFF);
        port_read32(&mut *self.cs, self.address, self.bar_offset)
    }
}

// Fields drop after this runs, so the critical section outlives the restore.
impl<H: Hal> Drop for BarProbe<'_, H> {
    fn drop(&mut self) {
        port_write32(&mut *self.cs, self.address, self.bar_offset, self.saved_bar);
        port_write8(&mut *self.cs, self.address, PCI_COMMAND, self.saved_command);
    }
}

/// Saved enumeration position.
///
/// After a device is returned the cursor still points at it with
/// `check_multi_function` set, so the next advance steps past it to the next
/// function of a multi-function device or straight to the next slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciCursor {
    position: PciAddress,
    check_multi_function: bool,
    exhausted: bool,
}

impl PciCursor {
    pub fn start() -> Self {
        Self { position: PciAddress::default(), check_multi_function: false, exhausted: false }
    }

    pub fn resume_after(previous: PciAddress) -> Self {
        Self { position: previous, check_multi_function: true, exhausted: false }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn advance<H: Hal>(&mut self, hal: &mut H) -> Option<PciAddress> {
        while !self.exhausted {
            if self.check_multi_function {
                self.check_multi_function = false;
                self.step(hal);
                continue;
            }

            let here = self.position;
            if is_present(hal, here) {
                self.check_multi_function = true;
                return Some(here);
            }
            self.step(hal);
        }
        None
    }

    fn step<H: Hal>(&mut self, hal: &mut H) {
        let pos = &mut self.position;
        let slot_function0 = PciAddress { func: 0, ..*pos };

        if pos.func < PCI_FUNC_MAX && is_multi_function(hal, slot_function0) {
            pos.func += 1;
            return;
        }

        pos.func = 0;
        if pos.slot < PCI_SLOT_MAX {
            pos.slot += 1;
            return;
        }

        pos.slot = 0;
        if pos.bus < PCI_BUS_MAX {
            pos.bus += 1;
            return;
        }

        self.exhausted = true;
    }
}

impl Default for PciCursor {
    fn default() -> Self {
        Self::start()
    }
}

fn is_present<H: Hal>(hal: &mut H, address: PciAddress) -> bool {
    extract_u16(config_read32(hal, address, PCI_VENDOR_ID), PCI_VENDOR_ID) != PCI_VENDOR_NONE
}

fn is_multi_function<H: Hal>(hal: &mut H, address: PciAddress) -> bool {
    is_present(hal, address) && config_read8(hal, address, PCI_HEADER_TYPE) & PCI_HEADER_MULTI_FUNCTION != 0
}

/// Lazily yields every present function in ascending bus/slot/func order.
/// Once it returns `None` it stays exhausted; start a new one to rescan.
pub struct PciDevices<'a, H: Hal> {
    hal: &'a mut H,
    cursor: PciCursor,
}

impl<H: Hal> Iterator for PciDevices<'_, H> {
    type Item = PciAddress;

    fn next(&mut self) -> Option<PciAddress> {
        self.cursor.advance(&mut *self.hal)
    }
}

impl<H: Hal> FusedIterator for PciDevices<'_, H> {}

pub struct PciConfigSpace<H: Hal> {
    hal: H,
}

impl<H: Hal> PciConfigSpace<H> {
    pub fn new(hal: H) -> Self {
        Self { hal }
    }

    /// Consumes the accessor and hands the executor back.
    pub fn into_hal(self) -> H {
        self.hal
    }

    pub fn read32(&mut self, address: PciAddress, offset: u8) -> u32 {
        config_read32(&mut self.hal, address, offset)
    }

    pub fn read16(&mut self, address: PciAddress, offset: u8) -> u16 {
        extract_u16(self.read32(address, offset), offset)
    }

    pub fn read8(&mut self, address: PciAddress, offset: u8) -> u8 {
        config_read8(&mut self.hal, address, offset)
    }

    /// Fills `buffer` with `buffer.len()` bytes starting at `offset`. A span
    /// running past the 256-byte header fails without touching the device.
    pub fn read_bytes(&mut self, address: PciAddress, offset: u8, buffer: &mut [u8]) -> ProbeResult<()> {
        if offset as usize + buffer.len() > PCI_CONFIG_SPACE_SIZE {
            return Err(ProbeError::InvalidParameter);
        }

        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.read8(address, offset + i as u8);
        }
        Ok(())
    }

    pub fn write32(&mut self, address: PciAddress, offset: u8, value: u32) {
        config_write32(&mut self.hal, address, offset, value);
    }

    /// Read-modify-write of the containing dword.
    pub fn write16(&mut self, address: PciAddress, offset: u8, value: u16) {
        config_write16(&mut self.hal, address, offset, value);
    }

    /// Read-modify-write of the containing dword.
    pub fn write8(&mut self, address: PciAddress, offset: u8, value: u8) {
        config_write8(&mut self.hal, address, offset, value);
    }

    pub fn vendor_id(&mut self, address: PciAddress) -> u16 {
        self.read16(address, PCI_VENDOR_ID)
    }

    pub fn device_id(&mut self, address: PciAddress) -> u16 {
        self.read16(address, PCI_DEVICE_ID)
    }

    /// Raw class code byte (offset 0x0B).
    pub fn class_code(&mut self, address: PciAddress) -> u8 {
        self.read8(address, PCI_CLASS_CODE)
    }

    pub fn subclass(&mut self, address: PciAddress) -> u8 {
        self.read8(address, PCI_SUBCLASS)
    }

    pub fn is_present(&mut self, address: PciAddress) -> bool {
        is_present(&mut self.hal, address)
    }

    pub fn is_multi_function(&mut self, address: PciAddress) -> bool {
        is_multi_function(&mut self.hal, address)
    }

    /// Returns the first present function after `previous`, or the first one
    /// on the machine when `previous` is `None`.
    pub fn next_device(&mut self, previous: Option<PciAddress>) -> Option<PciAddress> {
        let mut cursor = match previous {
            Some(previous) => PciCursor::resume_after(previous),
            None => PciCursor::start(),
        };
        cursor.advance(&mut self.hal)
    }

    /// Drives a caller-held cursor to the next present function. An exhausted
    /// cursor keeps returning `None`.
    pub fn advance(&mut self, cursor: &mut PciCursor) -> Option<PciAddress> {
        cursor.advance(&mut self.hal)
    }

    pub fn devices(&mut self) -> PciDevices<'_, H> {
        PciDevices { hal: &mut self.hal, cursor: PciCursor::start() }
    }

    pub fn find_device(&mut self, vendor_id: u16, device_id: u16) -> Option<PciAddress> {
        let mut cursor = PciCursor::start();
        while let Some(address) = cursor.advance(&mut self.hal) {
            let id = self.read32(address, PCI_VENDOR_ID);
            log::debug!(
                "[{:02x}:{:02x}.{:x}] {:04x}:{:04x}",
                address.bus,
                address.slot,
                address.func,
                id as u16,
                (id >> 16) as u16
            );
            if id as u16 == vendor_id && (id >> 16) as u16 == device_id {
                return Some(address);
            }
        }
        None
    }

    /// Sizes memory BAR `index` by writing all-ones and reading the mask back.
    /// The BAR value and command register are restored before this returns.
    pub fn bar_size(&mut self, address: PciAddress, index: usize) -> ProbeResult<u32> {
        if index >= PCI_BAR_COUNT {
            return Err(ProbeError::InvalidParameter);
        }

        if !self.is_present(address) {
            return Err(ProbeError::DeviceNotPresent);
        }

        let bar_offset = PCI_BAR0 + (index as u8) * 4;
        let readback = {
            let mut probe = BarProbe::begin(&mut self.hal, address, bar_offset);
            probe.read_mask()
        };

        let size = (!(readback & !PCI_BAR_MEMORY_ATTR_MASK)).wrapping_add(1);
        if size != 0 && !is_pow2(size) {
            log::warn!("BAR{} of {:?} sized to non power of two {:#x}", index, address, size);
        }
        Ok(size)
    }

    pub fn populate_device_info(&mut self, address: PciAddress) -> ProbeResult<PciDeviceInfo> {
        if !self.is_present(address) {
            return Err(ProbeError::DeviceNotPresent);
        }

        let header = self.read8(address, PCI_HEADER_TYPE);
        let class = self.read8(address, PCI_CLASS_CODE);

        let mut info = PciDeviceInfo {
            vendor_id: self.vendor_id(address),
            device_id: self.device_id(address),
            sub_vendor_id: self.read16(address, PCI_SUBSYSTEM_VENDOR_ID),
            sub_device_id: self.read16(address, PCI_SUBSYSTEM_ID),
            is_multi_function: header & PCI_HEADER_MULTI_FUNCTION != 0,
            subclass: self.subclass(address),
            prog_if: self.read8(address, PCI_PROG_IF),
            revision: self.read8(address, PCI_REVISION_ID),
            expansion_rom: self.read32(address, PCI_EXPANSION_ROM),
            ..Default::default()
        };

        log::debug!(
            "VEN {:04x} DEV {:04x} CLASS {:02x} SUBCLASS {:02x} HDRTYPE {:02x}",
            info.vendor_id,
            info.device_id,
            class,
            info.subclass,
            header
        );

        let (Ok(class_code), Ok(header_type)) =
            (PciClass::try_from(class), PciHeaderType::try_from(header & !PCI_HEADER_MULTI_FUNCTION))
        else {
            log::debug!("{:?}: class {:#04x} / header {:#04x} out of range", address, class, header);
            return Err(ProbeError::CorruptConfigSpace);
        };
        info.class_code = class_code;
        info.header_type = header_type;

        if header_type == PciHeaderType::Endpoint {
            for index in 0..PCI_BAR_COUNT {
                info.bars[index] = self.decode_bar(address, index)?;
            }
        }

        Ok(info)
    }

    fn decode_bar(&mut self, address: PciAddress, index: usize) -> ProbeResult<Bar> {
        let raw = self.read32(address, PCI_BAR0 + (index as u8) * 4);

        // I/O BARs are reported with size 0; only memory BARs are probed.
        let bar = if raw & 0x01 == 0 {
            let size_bytes = self.bar_size(address, index)?;
            Bar { address: raw & !PCI_BAR_MEMORY_ATTR_MASK, kind: BarKind::Memory, size_bytes }
        } else {
            Bar { address: raw & !PCI_BAR_IO_ATTR_MASK, kind: BarKind::Io, size_bytes: 0 }
        };

        if bar.address != 0 {
            log::debug!(" --> BAR[{}] = {:08x} {:?} SIZE {} KB", index, bar.address, bar.kind, bar.size_bytes / 1024);
        }
        Ok(bar)
    }

    /// Checks that configuration mechanism #1 latches the address register.
    /// The previous latch value is put back before returning.
    pub fn is_config_mechanism_available(&mut self) -> bool {
        let mut cs = CriticalSection::enter(&mut self.hal);
        cs.io_write8(PCI_CONFIG_MECHANISM_PORT, 0x01);
        let saved = cs.io_read32(PCI_CONFIG_ADDRESS_PORT);
        cs.io_write32(PCI_CONFIG_ADDRESS_PORT, 0x8000_0000);
        let test = cs.io_read32(PCI_CONFIG_ADDRESS_PORT);
        cs.io_write32(PCI_CONFIG_ADDRESS_PORT, saved);

        if test != 0x8000_0000 {
            log::debug!("PCI config mechanism test: expected 0x80000000, got {:#010x}", test);
            return false;
        }
        true
    }
}
