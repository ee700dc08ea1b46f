//! Register layouts, hardware constants and the plain data types handed to callers.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use bitfield_struct::bitfield;

use crate::error::ProbeError;

//
// public structs/definitions
//

/// Location of a function in PCI configuration space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub slot: u8, // 0..=31
    pub func: u8, // 0..=7
}

impl PciAddress {
    pub const fn new(bus: u8, slot: u8, func: u8) -> Self {
        assert!(slot <= PCI_SLOT_MAX && func <= PCI_FUNC_MAX);
        Self { bus, slot, func }
    }
}

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PciHeaderType {
    #[default]
    Endpoint = 0,
    PciToPciBridge = 1,
    PciToCardBusBridge = 2,
}

impl TryFrom<u8> for PciHeaderType {
    type Error = ProbeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PciHeaderType::Endpoint),
            1 => Ok(PciHeaderType::PciToPciBridge),
            2 => Ok(PciHeaderType::PciToCardBusBridge),
            _ => Err(ProbeError::CorruptConfigSpace),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PciClass {
    #[default]
    Unclassified = 0x00,
    MassStorage = 0x01,
    Network = 0x02,
    Display = 0x03,
    Multimedia = 0x04,
    Memory = 0x05,
    Bridge = 0x06,
    SimpleCommunication = 0x07,
    BaseSystemPeripheral = 0x08,
    InputDevice = 0x09,
    DockingStation = 0x0A,
    Processor = 0x0B,
    SerialBus = 0x0C,
    Wireless = 0x0D,
    IntelligentIo = 0x0E,
    SatelliteCommunication = 0x0F,
    Encryption = 0x10,
    SignalProcessing = 0x11,
}

impl TryFrom<u8> for PciClass {
    type Error = ProbeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => PciClass::Unclassified,
            0x01 => PciClass::MassStorage,
            0x02 => PciClass::Network,
            0x03 => PciClass::Display,
            0x04 => PciClass::Multimedia,
            0x05 => PciClass::Memory,
            0x06 => PciClass::Bridge,
            0x07 => PciClass::SimpleCommunication,
            0x08 => PciClass::BaseSystemPeripheral,
            0x09 => PciClass::InputDevice,
            0x0A => PciClass::DockingStation,
            0x0B => PciClass::Processor,
            0x0C => PciClass::SerialBus,
            0x0D => PciClass::Wireless,
            0x0E => PciClass::IntelligentIo,
            0x0F => PciClass::SatelliteCommunication,
            0x10 => PciClass::Encryption,
            0x11 => PciClass::SignalProcessing,
            _ => return Err(ProbeError::CorruptConfigSpace),
        })
    }
}

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    #[default]
    Memory = 0,
    Io = 1,
}

/// One decoded base address register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bar {
    pub address: u32, // attribute bits masked off
    pub kind: BarKind,
    pub size_bytes: u32, // always 0 for I/O BARs
}

/// Identity and resources of one PCI function, filled fresh by each probe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PciDeviceInfo {
    pub vendor_id: u16,
    pub device_id: u16,
    pub sub_vendor_id: u16,
    pub sub_device_id: u16,
    pub is_multi_function: bool,
    pub class_code: PciClass,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision: u8,
    pub header_type: PciHeaderType,
    pub expansion_rom: u32,
    pub bars: [Bar; PCI_BAR_COUNT], // only populated for endpoints
}

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrderMode {
    /// All writes strongly ordered (slow)
    #[default]
    All = 0,
    /// All except uncacheable / write-combined (fast)
    AllExceptUncacheableOrWriteCombined = 1,
    /// No write ordering (fastest)
    None = 2,
}

impl TryFrom<u8> for WriteOrderMode {
    type Error = ProbeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WriteOrderMode::All),
            1 => Ok(WriteOrderMode::AllExceptUncacheableOrWriteCombined),
            2 => Ok(WriteOrderMode::None),
            _ => Err(ProbeError::InvalidParameter),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteAllocateConfig {
    pub size_kb: u32,
    pub memory_hole: bool, // 15-16 MiB excluded from write allocation
}

/// One of the two K6 memory type range slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MtrrRange {
    pub is_valid: bool,
    pub offset: u32, // physical byte address, 128 KiB aligned
    pub size_kb: u32,
    pub write_combine: bool,
    pub uncacheable: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MtrrConfig {
    pub ranges: [MtrrRange; K6_MTRR_COUNT],
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionType {
    #[default]
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    Bad,
    Other(u32),
}

impl From<u32> for MemoryRegionType {
    fn from(value: u32) -> Self {
        match value {
            1 => MemoryRegionType::Usable,
            2 => MemoryRegionType::Reserved,
            3 => MemoryRegionType::AcpiReclaimable,
            4 => MemoryRegionType::AcpiNvs,
            5 => MemoryRegionType::Bad,
            other => MemoryRegionType::Other(other),
        }
    }
}

/// One entry of the BIOS physical memory map.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub region_type: MemoryRegionType,
    pub extended_flags: u32, // ACPI 3.0 extended attributes, 0 when not returned
}

impl MemoryRegion {
    pub fn new(base: u64, length: u64, region_type: MemoryRegionType) -> Self {
        Self { base, length, region_type, extended_flags: 0 }
    }

    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemorySize {
    pub total_bytes: u64,
    pub has_memory_hole: bool,
}

/// Register image passed to and returned from a BIOS interrupt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BiosRegisters {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub carry: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuidRegisters {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

//
// structs/definitions internal to the library
//

pub(crate) const PCI_BUS_MAX: u8 = 255;
pub(crate) const PCI_SLOT_MAX: u8 = 31;
pub(crate) const PCI_FUNC_MAX: u8 = 7;
pub(crate) const PCI_BAR_COUNT: usize = 6;
pub(crate) const PCI_CONFIG_SPACE_SIZE: usize = 256;

pub(crate) const PCI_CONFIG_ADDRESS_PORT: u16 = 0xCF8;
pub(crate) const PCI_CONFIG_DATA_PORT: u16 = 0xCFC;
pub(crate) const PCI_CONFIG_MECHANISM_PORT: u16 = 0xCFB;

pub(crate) const PCI_VENDOR_ID: u8 = 0x00;
pub(crate) const PCI_DEVICE_ID: u8 = 0x02;
pub(crate) const PCI_COMMAND: u8 = 0x04;
pub(crate) const PCI_REVISION_ID: u8 = 0x08;
pub(crate) const PCI_PROG_IF: u8 = 0x09;
pub(crate) const PCI_SUBCLASS: u8 = 0x0A;
pub(crate) const PCI_CLASS_CODE: u8 = 0x0B;
pub(crate) const PCI_HEADER_TYPE: u8 = 0x0E;
pub(crate) const PCI_BAR0: u8 = 0x10;
pub(crate) const PCI_SUBSYSTEM_VENDOR_ID: u8 = 0x2C;
pub(crate) const PCI_SUBSYSTEM_ID: u8 = 0x2E;
pub(crate) const PCI_EXPANSION_ROM: u8 = 0x30;

pub(crate) const PCI_VENDOR_NONE: u16 = 0xFFFF;
pub(crate) const PCI_HEADER_MULTI_FUNCTION: u8 = 0x80;
pub(crate) const PCI_COMMAND_DECODE_MASK: u8 = 0x03; // I/O space + memory space
pub(crate) const PCI_BAR_MEMORY_ATTR_MASK: u32 = 0x0000_000F;
pub(crate) const PCI_BAR_IO_ATTR_MASK: u32 = 0x0000_0003;

pub(crate) const MSR_K6_EFER: u32 = 0xC000_0080;
pub(crate) const MSR_K6_WHCR: u32 = 0xC000_0082;
pub(crate) const MSR_K6_UWCCR: u32 = 0xC000_0085;
pub(crate) const MSR_K6_EPMR: u32 = 0xC000_0086;

pub(crate) const K6_EPMR_IO_BASE: u16 = 0xFFF0;
pub(crate) const K6_BVC_PORT: u16 = K6_EPMR_IO_BASE + 0x08;
pub(crate) const K6_MTRR_COUNT: usize = 2;
pub(crate) const K6_WHCR_GRANULARITY_KB: u32 = 4 * 1024;

pub(crate) const CR0_CACHE_DISABLE: u32 = 1 << 30;
pub(crate) const CONTROL_REGISTER_COUNT: u8 = 8;

pub(crate) const BIOS_INT_SYSTEM_SERVICES: u8 = 0x15;
pub(crate) const E820_FUNCTION: u32 = 0x0000_E820;
pub(crate) const E801_FUNCTION: u32 = 0x0000_E801;
pub(crate) const E820_SMAP_SIGNATURE: u32 = 0x534D_4150; // 'SMAP'
pub(crate) const E820_ENTRY_SIZE: usize = 24;
pub(crate) const E820_MAX_REGIONS: usize = 128;
pub(crate) const BIOS_UNSUPPORTED_FUNCTION: u32 = 0x86;

pub(crate) const SIZE_64KB: u64 = 0x0001_0000;
pub(crate) const SIZE_1MB: u64 = 0x0010_0000;
pub(crate) const MEMORY_HOLE_BASE: u64 = 15 * SIZE_1MB;
pub(crate) const MEMORY_HOLE_SIZE: u64 = SIZE_1MB;

pub(crate) const CPUID_SIGNATURE: u32 = 0;
pub(crate) const CPUID_VERSION_INFO: u32 = 1;

/// Size lookup entry for a K6 MTRR mask pattern.
pub(crate) struct K6MtrrMask {
    pub mask: u16, // 15-bit pattern as stored in bits 16:2
    pub size_kb: u32,
}

const fn k6_mtrr_mask(shift: u32) -> K6MtrrMask {
    K6MtrrMask { mask: ((0x7FFFu32 << shift) & 0x7FFF) as u16, size_kb: 128 << shift }
}

// 128 KiB .. 4 GiB, strictly increasing
pub(crate) const K6_MTRR_MASK_TABLE: [K6MtrrMask; 16] = [
    k6_mtrr_mask(0),
    k6_mtrr_mask(1),
    k6_mtrr_mask(2),
    k6_mtrr_mask(3),
    k6_mtrr_mask(4),
    k6_mtrr_mask(5),
    k6_mtrr_mask(6),
    k6_mtrr_mask(7),
    k6_mtrr_mask(8),
    k6_mtrr_mask(9),
    k6_mtrr_mask(10),
    k6_mtrr_mask(11),
    k6_mtrr_mask(12),
    k6_mtrr_mask(13),
    k6_mtrr_mask(14),
    k6_mtrr_mask(15),
];

const _: () = assert!(K6_MTRR_MASK_TABLE[0].size_kb == 128);
const _: () = assert!(K6_MTRR_MASK_TABLE[15].size_kb == 4 * 1024 * 1024);
const _: () = assert!(K6_MTRR_MASK_TABLE[15].mask == 0);

// Sentinel for multipliers the K6-2+/III+ cannot run at.
pub(crate) const K6_BAD_MULTIPLIER: u8 = 0xFF;

// Indexed by whole * 2 + fraction / 5, values are internal bus divisor codes.
pub(crate) const K6_MULTIPLIER_TABLE: [u8; 13] = [
    K6_BAD_MULTIPLIER, // 0.0x
    K6_BAD_MULTIPLIER, // 0.5x
    K6_BAD_MULTIPLIER, // 1.0x
    K6_BAD_MULTIPLIER, // 1.5x
    0x04,              // 2.0x
    K6_BAD_MULTIPLIER, // 2.5x
    0x05,              // 3.0x
    0x07,              // 3.5x
    0x02,              // 4.0x
    0x00,              // 4.5x
    0x01,              // 5.0x
    0x03,              // 5.5x
    0x06,              // 6.0x
];

// PCI configuration mechanism #1 address written to port 0xCF8.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct PciConfigAddress {
    #[bits(8)]
    pub register: u8, // [Bits 7:0] Register offset, bits 1:0 always zero
    #[bits(3)]
    pub function: u8, // [Bits 10:8] Function number
    #[bits(5)]
    pub device: u8, // [Bits 15:11] Device (slot) number
    #[bits(8)]
    pub bus: u8, // [Bits 23:16] Bus number
    #[bits(7)]
    pub reserved: u8, // [Bits 30:24] Reserved
    #[bits(1)]
    pub enable: bool, // [Bit 31] Configuration space enable
}

/// A 64-bit MSR value split into the EAX (lo) and EDX (hi) halves of RDMSR/WRMSR.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct CpuMsr {
    #[bits(32)]
    pub lo: u32, // [Bits 31:0] EAX
    #[bits(32)]
    pub hi: u32, // [Bits 63:32] EDX
}

// One half of UWCCR (UC/WC Cacheability Control Register).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct K6MtrrHalf {
    #[bits(1)]
    pub uc: bool, // [Bit 0] Uncacheable
    #[bits(1)]
    pub wc: bool, // [Bit 1] Write combining
    #[bits(15)]
    pub mask: u16, // [Bits 16:2] Address mask
    #[bits(15)]
    pub offset: u16, // [Bits 31:17] Address offset in 128 KiB units
}

// Low half of EFER on the K6-2 CXT core and later.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct K6Efer {
    #[bits(1)]
    pub sce: bool, // [Bit 0] System call extension
    #[bits(1)]
    pub dpe: bool, // [Bit 1] Data prefetch enable
    #[bits(2)]
    pub ewbec: u8, // [Bits 3:2] EWBE control (write ordering)
    #[bits(1)]
    pub l2_disable: bool, // [Bit 4] L2 cache disable
    #[bits(27)]
    pub reserved: u32, // [Bits 31:5] Reserved
}

// Low half of WHCR (Write Handling Control Register).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct K6Whcr {
    #[bits(5)]
    pub reserved1: u8, // [Bits 4:0] Reserved
    #[bits(1)]
    pub memory_hole: bool, // [Bit 5] Exclude 15-16 MiB from write allocation
    #[bits(16)]
    pub reserved2: u16, // [Bits 21:6] Reserved
    #[bits(10)]
    pub limit: u16, // [Bits 31:22] Write allocate limit in 4 MiB units
}

// Low half of EPMR (Enhanced Power Management Register).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct K6Epmr {
    #[bits(1)]
    pub enable: bool, // [Bit 0] I/O block enable
    #[bits(3)]
    pub reserved1: u8, // [Bits 3:1] Reserved
    #[bits(12)]
    pub io_base: u16, // [Bits 15:4] I/O block base address bits 15:4
    #[bits(16)]
    pub reserved2: u16, // [Bits 31:16] Reserved
}

// Bus Divisor and Voltage ID Control, at EPMR I/O base + 8.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub(crate) struct K6Bvc {
    #[bits(5)]
    pub vid: u8, // [Bits 4:0] Voltage ID
    #[bits(3)]
    pub ibf: u8, // [Bits 7:5] Internal bus frequency divisor
    #[bits(2)]
    pub bvcc: u8, // [Bits 9:8] Bus divisor control, 10b samples IBF at stop grant
    #[bits(2)]
    pub reserved: u8, // [Bits 11:10] Reserved
    #[bits(20)]
    pub sgtc: u32, // [Bits 31:12] Stop grant time counter
}

pub(crate) const K6_BVC_SAMPLE_ON_STOP_GRANT: u8 = 0b10;
pub(crate) const K6_BVC_STOP_GRANT_COUNT: u32 = 1;

/// CPUID leaf 1 EAX.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct CpuidVersionInfo {
    #[bits(4)]
    pub stepping: u8, // [Bits 3:0] Stepping ID
    #[bits(4)]
    pub model: u8, // [Bits 7:4] Model
    #[bits(4)]
    pub family: u8, // [Bits 11:8] Family
    #[bits(2)]
    pub processor_type: u8, // [Bits 13:12] Processor type
    #[bits(2)]
    pub reserved1: u8, // [Bits 15:14] Reserved
    #[bits(4)]
    pub extended_model: u8, // [Bits 19:16] Extended model
    #[bits(8)]
    pub extended_family: u8, // [Bits 27:20] Extended family
    #[bits(4)]
    pub reserved2: u8, // [Bits 31:28] Reserved
}
