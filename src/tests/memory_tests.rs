//! BIOS memory map tests: E820 walking and normalization, E801 sizing and
//! the fallback between the two.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use crate::error::ProbeError;
use crate::memory::{normalize_regions, summarize_regions, MemoryProber};
use crate::structs::{
    BiosRegisters, MemoryRegion, MemoryRegionType, MemorySize, BIOS_INT_SYSTEM_SERVICES, E801_FUNCTION,
    E820_FUNCTION, E820_MAX_REGIONS, E820_SMAP_SIGNATURE,
};
use crate::tests::mock_hal::MockHal;

const MB: u64 = 1024 * 1024;

fn usable(base: u64, length: u64) -> MemoryRegion {
    MemoryRegion::new(base, length, MemoryRegionType::Usable)
}

fn reserved(base: u64, length: u64) -> MemoryRegion {
    MemoryRegion::new(base, length, MemoryRegionType::Reserved)
}

fn e801_response(ax: u16, bx: u16, cx: u16, dx: u16) -> BiosRegisters {
    BiosRegisters { eax: ax as u32, ebx: bx as u32, ecx: cx as u32, edx: dx as u32, carry: false }
}

#[test]
fn unit_test_normalize_truncates_overlaps() {
    let mut regions = vec![usable(0, 0x10_0000), reserved(0x9_0000, 0x8_0000)];
    normalize_regions(&mut regions);
    assert_eq!(regions, vec![usable(0, 0x9_0000), reserved(0x9_0000, 0x8_0000)]);
}

#[test]
fn unit_test_normalize_sorts_without_dropping() {
    let mut regions = vec![usable(16 * MB, 48 * MB), reserved(0xF_0000, 0x1_0000), usable(0, 0xA_0000), usable(MB, 15 * MB)];
    normalize_regions(&mut regions);
    assert_eq!(
        regions,
        vec![usable(0, 0xA_0000), reserved(0xF_0000, 0x1_0000), usable(MB, 15 * MB), usable(16 * MB, 48 * MB)]
    );
}

#[test]
fn unit_test_summarize_reserved_hole_is_counted() {
    let regions = [usable(0, 0x9_FC00), usable(MB, 14 * MB), reserved(15 * MB, MB), usable(16 * MB, 48 * MB)];
    assert_eq!(summarize_regions(&regions), MemorySize { total_bytes: 64 * MB, has_memory_hole: true });
}

#[test]
fn unit_test_summarize_gap_hole_counts_following_region() {
    let regions = [usable(0, 0x9_FC00), usable(MB, 14 * MB), usable(16 * MB, 16 * MB)];
    assert_eq!(summarize_regions(&regions), MemorySize { total_bytes: 32 * MB, has_memory_hole: true });
}

#[test]
fn unit_test_summarize_stops_at_unexplained_gap() {
    let regions = [usable(MB, 7 * MB), usable(9 * MB, 23 * MB)];
    assert_eq!(summarize_regions(&regions), MemorySize { total_bytes: 8 * MB, has_memory_hole: false });
}

#[test]
fn unit_test_summarize_region_straddling_first_megabyte() {
    let regions = [usable(0, 2 * MB)];
    assert_eq!(summarize_regions(&regions), MemorySize { total_bytes: 2 * MB, has_memory_hole: false });

    // Nothing above 1 MiB at all.
    let regions = [usable(0, 0xA_0000)];
    assert_eq!(summarize_regions(&regions), MemorySize::default());
}

#[test]
fn unit_test_e820_regions_walk() {
    let mut hal = MockHal::new();
    hal.push_e820_entry(MB, 31 * MB, 1, 0x10);
    hal.push_e820_entry(0, 0x9_FC00, 1, 0x20);
    hal.push_e820_entry(0xF_0000, 0x1_0000, 2, 0);
    let mut prober = MemoryProber::new(hal);

    let regions = prober.e820_regions().expect("map should read");
    assert_eq!(regions.len(), 3);
    assert_eq!((regions[0].base, regions[0].length), (0, 0x9_FC00));
    assert_eq!(regions[1].region_type, MemoryRegionType::Reserved);
    assert_eq!((regions[2].base, regions[2].length), (MB, 31 * MB));
    assert_eq!(regions[2].extended_flags, 1);

    let hal = prober.into_hal();
    let continuations: Vec<u32> = hal.bios_calls.iter().map(|(_, regs)| regs.ebx).collect();
    assert_eq!(continuations, vec![0, 0x10, 0x20]);
    for (vector, regs) in &hal.bios_calls {
        assert_eq!(*vector, BIOS_INT_SYSTEM_SERVICES);
        assert_eq!(regs.eax, E820_FUNCTION);
        assert_eq!(regs.ecx, 24);
        assert_eq!(regs.edx, E820_SMAP_SIGNATURE);
    }
    assert_eq!(hal.unmasked_accesses, 0);
}

#[test]
fn unit_test_e820_signature_mismatch_discards_map() {
    let mut hal = MockHal::new();
    hal.push_e820_entry(0, 0x9_FC00, 1, 1);
    hal.push_bios_response(BiosRegisters { eax: 0x1234, ebx: 2, ecx: 24, ..Default::default() }, vec![0; 24]);
    hal.push_e820_entry(MB, 31 * MB, 1, 0);
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.e820_regions(), Err(ProbeError::BiosSignatureMismatch));
    assert_eq!(prober.into_hal().pending_bios_responses(), 1);
}

#[test]
fn unit_test_e820_carry_fails() {
    let mut hal = MockHal::new();
    hal.push_bios_response(BiosRegisters { eax: E820_SMAP_SIGNATURE, carry: true, ..Default::default() }, vec![]);
    let mut prober = MemoryProber::new(hal);
    assert_eq!(prober.e820_regions(), Err(ProbeError::BiosCallFailed));
}

#[test]
fn unit_test_e820_call_budget() {
    let mut hal = MockHal::new();
    for i in 0..=E820_MAX_REGIONS as u64 {
        hal.push_e820_entry(i * MB, MB, 1, 1);
    }
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.e820_regions(), Err(ProbeError::TooManyRegions));
    assert_eq!(prober.into_hal().bios_calls.len(), E820_MAX_REGIONS);
}

#[test]
fn unit_test_e801_uses_ax_bx_when_cx_clear() {
    let mut hal = MockHal::new();
    hal.push_bios_response(e801_response(0x3C00, 0x0300, 0, 0), vec![]);
    let mut prober = MemoryProber::new(hal);

    let size = prober.e801_size().expect("E801 should succeed");
    assert_eq!(size, MemorySize { total_bytes: 16 * MB + 0x301 * 64 * 1024, has_memory_hole: false });
    assert_eq!(prober.into_hal().bios_calls[0].1.eax, E801_FUNCTION);
}

#[test]
fn unit_test_e801_prefers_cx_dx_and_detects_hole() {
    let mut hal = MockHal::new();
    hal.push_bios_response(e801_response(0x3C00, 0x0100, 14 * 1024, 0), vec![]);
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.e801_size(), Ok(MemorySize { total_bytes: 15 * MB, has_memory_hole: true }));
}

#[test]
fn unit_test_e801_failures() {
    let mut hal = MockHal::new();
    hal.push_bios_response(e801_response(0x8600, 0, 0, 0), vec![]);
    hal.push_bios_response(BiosRegisters { eax: 0x3C00, carry: true, ..Default::default() }, vec![]);
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.e801_size(), Err(ProbeError::BiosCallFailed));
    assert_eq!(prober.e801_size(), Err(ProbeError::BiosCallFailed));
}

#[test]
fn unit_test_memory_size_prefers_e820() {
    let mut hal = MockHal::new();
    hal.push_e820_entry(0, 0x9_FC00, 1, 1);
    hal.push_e820_entry(MB, 63 * MB, 1, 0);
    hal.push_bios_response(e801_response(0x3C00, 0x0300, 0, 0), vec![]);
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.memory_size(), Ok(MemorySize { total_bytes: 64 * MB, has_memory_hole: false }));
    // The E801 reply was never consumed.
    assert_eq!(prober.into_hal().pending_bios_responses(), 1);
}

#[test]
fn unit_test_memory_size_falls_back_to_e801() {
    let mut hal = MockHal::new();
    hal.push_bios_response(BiosRegisters { carry: true, ..Default::default() }, vec![]);
    hal.push_bios_response(e801_response(0x3C00, 0x0010, 0, 0), vec![]);
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.memory_size(), Ok(MemorySize { total_bytes: 16 * MB + 0x11 * 64 * 1024, has_memory_hole: false }));
}

#[test]
fn unit_test_memory_size_falls_back_when_e820_finds_nothing() {
    let mut hal = MockHal::new();
    hal.push_e820_entry(0, 0x9_FC00, 1, 0);
    hal.push_bios_response(e801_response(0x3C00, 0, 0, 0), vec![]);
    let mut prober = MemoryProber::new(hal);

    assert_eq!(prober.memory_size(), Ok(MemorySize { total_bytes: 16 * MB, has_memory_hole: false }));
}

#[test]
fn unit_test_memory_size_both_methods_fail() {
    let mut prober = MemoryProber::new(MockHal::new());
    assert_eq!(prober.memory_size(), Err(ProbeError::Unsupported));
}
