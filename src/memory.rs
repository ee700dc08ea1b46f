//! Installed memory detection through the INT 15h E820 memory map, falling
//! back to the coarser E801 counts when no map is available.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use alloc::vec::Vec;

use crate::error::{ProbeError, ProbeResult};
use crate::hal::{CriticalSection, Hal};
use crate::structs::{
    BiosRegisters, MemoryRegion, MemoryRegionType, MemorySize, BIOS_INT_SYSTEM_SERVICES, BIOS_UNSUPPORTED_FUNCTION,
    E801_FUNCTION, E820_ENTRY_SIZE, E820_FUNCTION, E820_MAX_REGIONS, E820_SMAP_SIGNATURE, MEMORY_HOLE_BASE,
    MEMORY_HOLE_SIZE, SIZE_1MB, SIZE_64KB,
};

/// Sorts `regions` by base address and shortens each region so it ends where
/// the next one begins. Regions are never merged or removed.
pub fn normalize_regions(regions: &mut [MemoryRegion]) {
    regions.sort_by_key(|region| region.base);

    for i in 1..regions.len() {
        let next_base = regions[i].base;
        let prev = &mut regions[i - 1];
        if prev.end() > next_base {
            prev.length = next_base - prev.base;
        }
    }
}

fn is_memory_hole(base: u64, length: u64) -> bool {
    base == MEMORY_HOLE_BASE && length == MEMORY_HOLE_SIZE
}

/// Totals a normalized map from 1 MiB upwards.
///
/// The walk stops at the first gap, except for a gap at exactly 15-16 MiB
/// which is the ISA memory hole: it is flagged and counted. A reserved region
/// covering the same range is flagged as well. A non-zero total includes
/// the first megabyte.
pub fn summarize_regions(regions: &[MemoryRegion]) -> MemorySize {
    let mut cursor = SIZE_1MB;
    let mut total_bytes = 0u64;
    let mut has_memory_hole = false;

    for region in regions {
        if region.end() <= cursor {
            continue;
        }

        let start = region.base.max(cursor);
        if start > cursor {
            let gap = start - cursor;
            if !is_memory_hole(cursor, gap) {
                log::debug!("gap at {:#x} length {:#x}, end of memory?", cursor, gap);
                break;
            }
            log::debug!("16MB memory hole found (gap)");
            has_memory_hole = true;
            total_bytes += gap;
        }

        if region.region_type == MemoryRegionType::Reserved && is_memory_hole(region.base, region.length) {
            log::debug!("16MB memory hole found (reserved region)");
            has_memory_hole = true;
        }

        total_bytes += region.end() - start;
        cursor = region.end();
    }

    if total_bytes != 0 {
        total_bytes += SIZE_1MB;
    }

    MemorySize { total_bytes, has_memory_hole }
}

fn parse_e820_entry(entry: &[u8; E820_ENTRY_SIZE], returned_size: u32) -> MemoryRegion {
    let mut base = [0u8; 8];
    let mut length = [0u8; 8];
    let mut region_type = [0u8; 4];
    let mut extended = [0u8; 4];
    base.copy_from_slice(&entry[0..8]);
    length.copy_from_slice(&entry[8..16]);
    region_type.copy_from_slice(&entry[16..20]);
    extended.copy_from_slice(&entry[20..24]);

    let mut region =
        MemoryRegion::new(u64::from_le_bytes(base), u64::from_le_bytes(length), u32::from_le_bytes(region_type).into());
    // 20-byte BIOSes leave the ACPI 3.0 attribute dword untouched.
    if returned_size as usize >= E820_ENTRY_SIZE {
        region.extended_flags = u32::from_le_bytes(extended);
    }
    region
}

pub struct MemoryProber<H: Hal> {
    hal: H,
}

impl<H: Hal> MemoryProber<H> {
    pub fn new(hal: H) -> Self {
        Self { hal }
    }

    pub fn into_hal(self) -> H {
        self.hal
    }

    fn system_services(&mut self, regs: &mut BiosRegisters, buffer: &mut [u8]) -> ProbeResult<()> {
        let mut cs = CriticalSection::enter(&mut self.hal);
        cs.bios_interrupt(BIOS_INT_SYSTEM_SERVICES, regs, buffer)
    }

    /// Reads the whole E820 map and returns it normalized. Any failed call
    /// discards everything read so far.
    pub fn e820_regions(&mut self) -> ProbeResult<Vec<MemoryRegion>> {
        let mut regions = Vec::new();
        let mut continuation = 0u32;

        loop {
            if regions.len() == E820_MAX_REGIONS {
                log::warn!("E820 map exceeds {} entries", E820_MAX_REGIONS);
                return Err(ProbeError::TooManyRegions);
            }

            let mut entry = [0u8; E820_ENTRY_SIZE];
            let mut regs = BiosRegisters {
                eax: E820_FUNCTION,
                ebx: continuation,
                ecx: E820_ENTRY_SIZE as u32,
                edx: E820_SMAP_SIGNATURE,
                carry: false,
            };
            self.system_services(&mut regs, &mut entry)?;

            if regs.carry {
                return Err(ProbeError::BiosCallFailed);
            }
            if regs.eax != E820_SMAP_SIGNATURE {
                return Err(ProbeError::BiosSignatureMismatch);
            }

            let region = parse_e820_entry(&entry, regs.ecx);
            log::debug!(
                "E820 region [{}] - address: {:#010x} length: {:#010x}, type {:?}",
                regions.len(),
                region.base,
                region.length,
                region.region_type
            );
            regions.push(region);

            continuation = regs.ebx;
            if continuation == 0 {
                break;
            }
        }

        normalize_regions(&mut regions);
        Ok(regions)
    }

    pub fn e820_size(&mut self) -> ProbeResult<MemorySize> {
        let regions = self.e820_regions()?;
        let size = summarize_regions(&regions);
        log::debug!("E820 total size: {:#x}", size.total_bytes);
        Ok(size)
    }

    /// Sizes memory from the E801 KiB (1-16 MiB) and 64 KiB block (above
    /// 16 MiB) counts.
    pub fn e801_size(&mut self) -> ProbeResult<MemorySize> {
        let mut regs = BiosRegisters { eax: E801_FUNCTION, ..Default::default() };
        self.system_services(&mut regs, &mut [])?;

        if regs.carry || (regs.eax >> 8) & 0xFF == BIOS_UNSUPPORTED_FUNCTION {
            return Err(ProbeError::BiosCallFailed);
        }

        // CX/DX hold the configured memory; some BIOSes only fill AX/BX.
        let (below_16m_kb, above_16m_blocks) = if regs.ecx as u16 != 0 {
            (regs.ecx as u16, regs.edx as u16)
        } else {
            (regs.eax as u16, regs.ebx as u16)
        };

        let below_16m_kb = below_16m_kb as u64 + 1024;
        let mut above_16m_blocks = above_16m_blocks as u64;
        // The block count reported above 16 MiB is one short.
        if above_16m_blocks != 0 {
            above_16m_blocks += 1;
        }

        let size = MemorySize {
            total_bytes: below_16m_kb * 1024 + above_16m_blocks * SIZE_64KB,
            has_memory_hole: below_16m_kb == 15 * 1024,
        };
        log::debug!("E801 total size: {:#x}", size.total_bytes);
        Ok(size)
    }

    /// Tries E820 first and falls back to E801 when E820 fails or finds
    /// nothing above 1 MiB.
    pub fn memory_size(&mut self) -> ProbeResult<MemorySize> {
        match self.e820_size() {
            Ok(size) if size.total_bytes != 0 => return Ok(size),
            Ok(_) => log::debug!("E820 reported no memory, trying E801"),
            Err(err) => log::debug!("E820 failed ({}), trying E801", err),
        }
        self.e801_size()
    }
}
