//! # Introduction
//! Hardware probing for legacy x86 systems: PCI bus enumeration and BAR
//! sizing, AMD K6-2+/III+ model specific controls and BIOS memory detection.
//!
//! All privileged instructions go through the [`hal::Hal`] trait. The real
//! executor is [`hal::X86Hal`]; tests plug in a mock.
//!
//! # Getting Started
//!
//! ## Public API:
//! ```ignore
//! pub fn create_pci_config_space() -> PciConfigSpace<X86Hal>;
//! pub fn create_k6_controller() -> K6Controller<X86Hal>;
//! pub fn create_memory_prober() -> MemoryProber<X86Hal>;
//!
//! impl<H: Hal> PciConfigSpace<H> {
//!     pub fn next_device(&mut self, previous: Option<PciAddress>) -> Option<PciAddress>;
//!     pub fn devices(&mut self) -> PciDevices<'_, H>;
//!     pub fn bar_size(&mut self, address: PciAddress, index: usize) -> ProbeResult<u32>;
//!     pub fn populate_device_info(&mut self, address: PciAddress) -> ProbeResult<PciDeviceInfo>;
//! }
//!
//! impl<H: Hal> K6Controller<H> {
//!     pub fn set_multiplier(&mut self, whole: u16, fraction: u16) -> ProbeResult<()>;
//!     pub fn set_write_order_mode(&mut self, mode: WriteOrderMode) -> ProbeResult<()>;
//!     pub fn get_memory_type_ranges(&mut self) -> ProbeResult<MtrrConfig>;
//!     pub fn set_memory_type_ranges(&mut self, config: &MtrrConfig) -> ProbeResult<()>;
//!     // ...
//! }
//!
//! impl<H: Hal> MemoryProber<H> {
//!     pub fn memory_size(&mut self) -> ProbeResult<MemorySize>;
//!     pub fn e820_regions(&mut self) -> ProbeResult<Vec<MemoryRegion>>;
//! }
//!```
//!
//! ## API usage:
//! ```ignore
//! use legacy_hwprobe::create_pci_config_space;
//!
//! fn list_devices() {
//!     let mut pci = create_pci_config_space();
//!
//!     let mut previous = None;
//!     while let Some(address) = pci.next_device(previous) {
//!         if let Ok(info) = pci.populate_device_info(address) {
//!             log::info!("{:04x}:{:04x} {:?}", info.vendor_id, info.device_id, info.class_code);
//!         }
//!         previous = Some(address);
//!     }
//! }
//!```
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]
extern crate alloc;

pub mod cpuid;
pub mod error;
pub mod hal;
pub mod k6;
pub mod memory;
pub mod msr;
pub mod pci;
pub mod structs;
mod utils;

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        use hal::X86Hal;
        use k6::K6Controller;
        use memory::MemoryProber;
        use pci::PciConfigSpace;

        /// PCI configuration space accessor on the running machine.
        pub fn create_pci_config_space() -> PciConfigSpace<X86Hal> {
            PciConfigSpace::new(X86Hal::new())
        }

        /// K6 controller on the running machine. The K6 MSRs fault on other CPUs.
        pub fn create_k6_controller() -> K6Controller<X86Hal> {
            K6Controller::new(X86Hal::new())
        }

        /// Memory prober on the running machine. [`X86Hal`] has no real-mode
        /// thunk, so BIOS calls fail unless the platform supplies its own executor.
        pub fn create_memory_prober() -> MemoryProber<X86Hal> {
            MemoryProber::new(X86Hal::new())
        }
    }
}

#[cfg(test)]
mod tests;
