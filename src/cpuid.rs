//! CPU identification helpers.
//!
//! Only call these on processors that implement CPUID (486 DX4 and later).
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use crate::hal::Hal;
use crate::structs::{CpuidVersionInfo, CPUID_SIGNATURE, CPUID_VERSION_INFO};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuManufacturer {
    Amd,
    Centaur,
    Cyrix,
    Intel,
    Transmeta,
    NationalSemiconductor,
    NexGen,
    Rise,
    Sis,
    Umc,
    Dmp,
    Zhaoxin,
    Hygon,
    Rdc,
    Mcst,
    Via,
    AmdK5EngineeringSample,
    Mister,
    Microsoft,
    Apple,
    Unknown,
}

impl CpuManufacturer {
    pub fn name(&self) -> &'static str {
        match self {
            CpuManufacturer::Amd => "AMD",
            CpuManufacturer::Centaur => "IDT/Centaur",
            CpuManufacturer::Cyrix => "Cyrix/STM/IBM",
            CpuManufacturer::Intel => "Intel",
            CpuManufacturer::Transmeta => "Transmeta",
            CpuManufacturer::NationalSemiconductor => "National Semiconductor",
            CpuManufacturer::NexGen => "NexGen",
            CpuManufacturer::Rise => "Rise",
            CpuManufacturer::Sis => "SiS",
            CpuManufacturer::Umc => "UMC",
            CpuManufacturer::Dmp => "DM&P",
            CpuManufacturer::Zhaoxin => "Zhaoxin",
            CpuManufacturer::Hygon => "Hygon",
            CpuManufacturer::Rdc => "RDC",
            CpuManufacturer::Mcst => "MCST Elbrus",
            CpuManufacturer::Via => "VIA",
            CpuManufacturer::AmdK5EngineeringSample => "AMD (K5 ES)",
            CpuManufacturer::Mister => "MiSTer ao486",
            CpuManufacturer::Microsoft => "Microsoft",
            CpuManufacturer::Apple => "Apple",
            CpuManufacturer::Unknown => "Unknown",
        }
    }
}

const VENDOR_TABLE: [(&[u8; 12], CpuManufacturer); 23] = [
    (b"AuthenticAMD", CpuManufacturer::Amd),
    (b"CentaurHauls", CpuManufacturer::Centaur),
    (b"CyrixInstead", CpuManufacturer::Cyrix),
    (b"GenuineIntel", CpuManufacturer::Intel),
    (b"GenuineIotel", CpuManufacturer::Intel),
    (b"TransmetaCPU", CpuManufacturer::Transmeta),
    (b"GenuineTMx86", CpuManufacturer::Transmeta),
    (b"Geode by NSC", CpuManufacturer::NationalSemiconductor),
    (b"NexGenDriven", CpuManufacturer::NexGen),
    (b"RiseRiseRise", CpuManufacturer::Rise),
    (b"SiS SiS SiS ", CpuManufacturer::Sis),
    (b"UMC UMC UMC ", CpuManufacturer::Umc),
    (b"Vortex86 SoC", CpuManufacturer::Dmp),
    (b"  Shanghai  ", CpuManufacturer::Zhaoxin),
    (b"HygonGenuine", CpuManufacturer::Hygon),
    (b"Genuine  RDC", CpuManufacturer::Rdc),
    (b"E2K MACHINE ", CpuManufacturer::Mcst),
    (b"VIA VIA VIA ", CpuManufacturer::Via),
    (b"AMD ISBETTER", CpuManufacturer::AmdK5EngineeringSample),
    (b"GenuineAO486", CpuManufacturer::Mister),
    (b"MiSTer AO486", CpuManufacturer::Mister),
    (b"MicrosoftXTA", CpuManufacturer::Microsoft),
    (b"VirtualApple", CpuManufacturer::Apple),
];

/// Returns the 12-byte vendor string from CPUID leaf 0 (EBX, EDX, ECX order).
pub fn vendor_string<H: Hal>(hal: &mut H) -> [u8; 12] {
    let regs = hal.cpuid(CPUID_SIGNATURE);
    let mut vendor = [0u8; 12];
    vendor[0..4].copy_from_slice(&regs.ebx.to_le_bytes());
    vendor[4..8].copy_from_slice(&regs.edx.to_le_bytes());
    vendor[8..12].copy_from_slice(&regs.ecx.to_le_bytes());
    vendor
}

pub fn manufacturer<H: Hal>(hal: &mut H) -> CpuManufacturer {
    let vendor = vendor_string(hal);
    VENDOR_TABLE
        .iter()
        .find(|(id, _)| **id == vendor)
        .map(|(_, mfr)| *mfr)
        .unwrap_or(CpuManufacturer::Unknown)
}

pub fn version_info<H: Hal>(hal: &mut H) -> CpuidVersionInfo {
    CpuidVersionInfo::from_bits(hal.cpuid(CPUID_VERSION_INFO).eax)
}
