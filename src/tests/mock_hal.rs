//! Mock implementation of the HAL trait for use in unit tests, simulating
//! PCI configuration space, the MSR file, control registers and BIOS services.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use std::collections::{HashMap, VecDeque};

use crate::error::{ProbeError, ProbeResult};
use crate::hal::Hal;
use crate::structs::{
    BiosRegisters, CpuidRegisters, PciAddress, PciConfigAddress, CONTROL_REGISTER_COUNT, E820_SMAP_SIGNATURE,
    PCI_BAR0, PCI_BAR_COUNT, PCI_CONFIG_ADDRESS_PORT, PCI_CONFIG_DATA_PORT,
};

const CONFIG_DWORDS: usize = 64;

/// Scripted return of one BIOS interrupt.
#[derive(Debug, Clone, Default)]
pub struct BiosResponse {
    pub regs: BiosRegisters,
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortWrite {
    Byte(u16, u8),
    Word(u16, u16),
    Dword(u16, u32),
}

pub struct MockHal {
    // Mocked PCI configuration space.
    pci_functions: HashMap<PciAddress, [u32; CONFIG_DWORDS]>,
    bar_write_masks: HashMap<(PciAddress, usize), u32>,
    config_address: u32,
    panic_on_bar_probe: bool,

    // Mocked MSR file.
    msrs: HashMap<u32, u64>,
    msr_read_failures: Vec<u32>,
    msr_write_budget: HashMap<u32, usize>,
    msr_read_only_bits: HashMap<u32, u64>,
    pub msr_writes: Vec<(u32, u64)>,

    control_registers: [u32; CONTROL_REGISTER_COUNT as usize],
    bios_responses: VecDeque<BiosResponse>,
    pub bios_calls: Vec<(u8, BiosRegisters)>,
    cpuid_leaves: HashMap<u32, CpuidRegisters>,

    // Mocked hal functions state.
    interrupt_state: bool,
    pub port_writes: Vec<PortWrite>,
    pub cache_flushes: usize,
    /// Number of times interrupts were masked.
    pub critical_sections: usize,
    /// Privileged accesses issued while interrupts were enabled.
    pub unmasked_accesses: usize,
}

impl MockHal {
    pub fn new() -> Self {
        Self {
            pci_functions: HashMap::new(),
            bar_write_masks: HashMap::new(),
            config_address: 0,
            panic_on_bar_probe: false,
            msrs: HashMap::new(),
            msr_read_failures: Vec::new(),
            msr_write_budget: HashMap::new(),
            msr_read_only_bits: HashMap::new(),
            msr_writes: Vec::new(),
            control_registers: [0; CONTROL_REGISTER_COUNT as usize],
            bios_responses: VecDeque::new(),
            bios_calls: Vec::new(),
            cpuid_leaves: HashMap::new(),
            interrupt_state: true,
            port_writes: Vec::new(),
            cache_flushes: 0,
            critical_sections: 0,
            unmasked_accesses: 0,
        }
    }

    //
    // PCI
    //

    /// Adds a function with the given identity. `header_type` includes the
    /// multi-function bit.
    pub fn add_pci_function(
        &mut self,
        address: PciAddress,
        vendor_id: u16,
        device_id: u16,
        class_code: u8,
        subclass: u8,
        header_type: u8,
    ) {
        let mut space = [0u32; CONFIG_DWORDS];
        space[0] = (device_id as u32) << 16 | vendor_id as u32;
        space[2] = (class_code as u32) << 24 | (subclass as u32) << 16 | 0x01;
        space[3] = (header_type as u32) << 16;
        self.pci_functions.insert(address, space);
    }

    pub fn set_config_dword(&mut self, address: PciAddress, offset: u8, value: u32) {
        let space = self.pci_functions.get_mut(&address).expect("function not added");
        space[(offset >> 2) as usize] = value;
    }

    pub fn config_dword(&self, address: PciAddress, offset: u8) -> u32 {
        self.pci_functions.get(&address).map_or(0xFFFF_FFFF, |space| space[(offset >> 2) as usize])
    }

    /// Programs BAR `index` with `value`; the BAR decodes `size` bytes, so
    /// only the address bits above the size are writable.
    pub fn set_bar(&mut self, address: PciAddress, index: usize, value: u32, size: u32) {
        assert!(index < PCI_BAR_COUNT && size.is_power_of_two());
        self.set_config_dword(address, PCI_BAR0 + index as u8 * 4, value);
        self.bar_write_masks.insert((address, index), !(size - 1));
    }

    /// Panics right after the all-ones pattern lands in a BAR.
    pub fn panic_on_bar_probe(&mut self) {
        self.panic_on_bar_probe = true;
    }

    pub fn config_address(&self) -> u32 {
        self.config_address
    }

    fn latched_function(&self) -> Option<(PciAddress, u8)> {
        let latch = PciConfigAddress::from_bits(self.config_address);
        if !latch.enable() {
            return None;
        }
        let address = PciAddress { bus: latch.bus(), slot: latch.device(), func: latch.function() };
        Some((address, latch.register()))
    }

    fn config_data_read(&mut self) -> u32 {
        match self.latched_function() {
            Some((address, register)) => self.config_dword(address, register),
            None => 0xFFFF_FFFF,
        }
    }

    fn config_data_write(&mut self, value: u32) {
        let Some((address, register)) = self.latched_function() else {
            return;
        };
        let Some(space) = self.pci_functions.get_mut(&address) else {
            return;
        };

        let dword = (register >> 2) as usize;
        let bar = register.wrapping_sub(PCI_BAR0) as usize / 4;
        let is_bar = register >= PCI_BAR0 && bar < PCI_BAR_COUNT;

        if is_bar {
            // BARs without a decode size are unimplemented and hardwired to zero.
            if let Some(&mask) = self.bar_write_masks.get(&(address, bar)) {
                space[dword] = (value & mask) | (space[dword] & !mask);
            }
        } else {
            space[dword] = value;
        }

        if is_bar && value == 0xFFFF_FFFF && self.panic_on_bar_probe {
            self.panic_on_bar_probe = false;
            panic!("simulated fault during BAR probe");
        }
    }

    fn note_privileged_access(&mut self) {
        if self.interrupt_state {
            self.unmasked_accesses += 1;
        }
    }

    //
    // MSR / CR
    //

    pub fn set_msr(&mut self, msr: u32, value: u64) {
        self.msrs.insert(msr, value);
    }

    pub fn msr(&self, msr: u32) -> u64 {
        self.msrs.get(&msr).copied().unwrap_or(0)
    }

    pub fn fail_msr_read(&mut self, msr: u32) {
        self.msr_read_failures.push(msr);
    }

    /// Lets `successes` writes to `msr` through, then fails every later one.
    pub fn fail_msr_write_after(&mut self, msr: u32, successes: usize) {
        self.msr_write_budget.insert(msr, successes);
    }

    /// Bits in `mask` keep their old value on write.
    pub fn set_msr_read_only_bits(&mut self, msr: u32, mask: u64) {
        self.msr_read_only_bits.insert(msr, mask);
    }

    pub fn set_control_register(&mut self, index: u8, value: u32) {
        self.control_registers[index as usize] = value;
    }

    pub fn control_register(&self, index: u8) -> u32 {
        self.control_registers[index as usize]
    }

    //
    // BIOS / CPUID
    //

    pub fn push_bios_response(&mut self, regs: BiosRegisters, buffer: Vec<u8>) {
        self.bios_responses.push_back(BiosResponse { regs, buffer });
    }

    /// Queues one successful E820 reply. `continuation` 0 ends the map.
    pub fn push_e820_entry(&mut self, base: u64, length: u64, region_type: u32, continuation: u32) {
        let mut buffer = Vec::with_capacity(24);
        buffer.extend_from_slice(&base.to_le_bytes());
        buffer.extend_from_slice(&length.to_le_bytes());
        buffer.extend_from_slice(&region_type.to_le_bytes());
        buffer.extend_from_slice(&1u32.to_le_bytes());
        let regs = BiosRegisters { eax: E820_SMAP_SIGNATURE, ebx: continuation, ecx: 24, edx: 0, carry: false };
        self.push_bios_response(regs, buffer);
    }

    pub fn pending_bios_responses(&self) -> usize {
        self.bios_responses.len()
    }

    pub fn set_cpuid(&mut self, leaf: u32, regs: CpuidRegisters) {
        self.cpuid_leaves.insert(leaf, regs);
    }
}

impl Hal for MockHal {
    fn save_and_disable_interrupts(&mut self) -> bool {
        let interrupt_state = self.get_interrupt_state();
        self.interrupt_state = false;
        self.critical_sections += 1;
        interrupt_state
    }

    fn set_interrupt_state(&mut self, interrupt_state: bool) {
        self.interrupt_state = interrupt_state;
    }

    #[inline(always)]
    fn get_interrupt_state(&self) -> bool {
        self.interrupt_state
    }

    fn write_back_invalidate_cache(&mut self) {
        self.cache_flushes += 1;
    }

    fn io_read8(&mut self, _port: u16) -> u8 {
        0xFF
    }

    fn io_read16(&mut self, _port: u16) -> u16 {
        0xFFFF
    }

    fn io_read32(&mut self, port: u16) -> u32 {
        match port {
            PCI_CONFIG_ADDRESS_PORT => {
                self.note_privileged_access();
                self.config_address
            }
            PCI_CONFIG_DATA_PORT => {
                self.note_privileged_access();
                self.config_data_read()
            }
            _ => 0xFFFF_FFFF,
        }
    }

    fn io_write8(&mut self, port: u16, value: u8) {
        self.port_writes.push(PortWrite::Byte(port, value));
    }

    fn io_write16(&mut self, port: u16, value: u16) {
        self.port_writes.push(PortWrite::Word(port, value));
    }

    fn io_write32(&mut self, port: u16, value: u32) {
        self.port_writes.push(PortWrite::Dword(port, value));
        match port {
            PCI_CONFIG_ADDRESS_PORT => {
                self.note_privileged_access();
                self.config_address = value;
            }
            PCI_CONFIG_DATA_PORT => {
                self.note_privileged_access();
                self.config_data_write(value);
            }
            _ => {}
        }
    }

    fn read_msr(&mut self, msr: u32) -> ProbeResult<u64> {
        self.note_privileged_access();
        if self.msr_read_failures.contains(&msr) {
            return Err(ProbeError::MsrAccessFailed);
        }
        Ok(self.msr(msr))
    }

    fn write_msr(&mut self, msr: u32, value: u64) -> ProbeResult<()> {
        self.note_privileged_access();
        if let Some(budget) = self.msr_write_budget.get_mut(&msr) {
            if *budget == 0 {
                return Err(ProbeError::MsrAccessFailed);
            }
            *budget -= 1;
        }

        self.msr_writes.push((msr, value));
        let read_only = self.msr_read_only_bits.get(&msr).copied().unwrap_or(0);
        let stored = (value & !read_only) | (self.msr(msr) & read_only);
        self.msrs.insert(msr, stored);
        Ok(())
    }

    fn read_control_register(&mut self, index: u8) -> ProbeResult<u32> {
        self.note_privileged_access();
        assert!(index < CONTROL_REGISTER_COUNT, "CR{} reached the executor", index);
        Ok(self.control_registers[index as usize])
    }

    fn write_control_register(&mut self, index: u8, value: u32) -> ProbeResult<()> {
        self.note_privileged_access();
        assert!(index < CONTROL_REGISTER_COUNT, "CR{} reached the executor", index);
        self.control_registers[index as usize] = value;
        Ok(())
    }

    fn bios_interrupt(&mut self, vector: u8, regs: &mut BiosRegisters, buffer: &mut [u8]) -> ProbeResult<()> {
        self.note_privileged_access();
        self.bios_calls.push((vector, *regs));

        let Some(response) = self.bios_responses.pop_front() else {
            return Err(ProbeError::Unsupported);
        };
        *regs = response.regs;
        let len = response.buffer.len().min(buffer.len());
        buffer[..len].copy_from_slice(&response.buffer[..len]);
        Ok(())
    }

    fn cpuid(&mut self, leaf: u32) -> CpuidRegisters {
        self.cpuid_leaves.get(&leaf).copied().unwrap_or_default()
    }
}
