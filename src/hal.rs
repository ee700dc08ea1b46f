//! Privileged operation executor.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::ops::{Deref, DerefMut};

use crate::error::ProbeResult;
use crate::structs::{BiosRegisters, CpuidRegisters};

/// HAL trait for the probing library - This trait abstracts every privileged
/// instruction the library needs (port I/O, MSRs, control registers, BIOS
/// interrupts and CPUID). The reason for this, to make the PCI, K6 and memory
/// probing code unit testable by plugging in a mock HAL. `struct X86Hal`
/// implements the real operations where as `struct MockHal` in
/// `tests\mock_hal.rs` implements a mock version of it.
pub trait Hal {
    fn save_and_disable_interrupts(&mut self) -> bool;
    fn set_interrupt_state(&mut self, interrupt_state: bool);
    fn get_interrupt_state(&self) -> bool;
    fn write_back_invalidate_cache(&mut self);

    fn io_read8(&mut self, port: u16) -> u8;
    fn io_read16(&mut self, port: u16) -> u16;
    fn io_read32(&mut self, port: u16) -> u32;
    fn io_write8(&mut self, port: u16, value: u8);
    fn io_write16(&mut self, port: u16, value: u16);
    fn io_write32(&mut self, port: u16, value: u32);

    fn read_msr(&mut self, msr: u32) -> ProbeResult<u64>;
    fn write_msr(&mut self, msr: u32, value: u64) -> ProbeResult<()>;
    fn read_control_register(&mut self, index: u8) -> ProbeResult<u32>;
    fn write_control_register(&mut self, index: u8, value: u32) -> ProbeResult<()>;

    /// Invoke BIOS interrupt `vector`. `buffer` is the ES:DI transfer area for
    /// services that fill one; it may be empty.
    fn bios_interrupt(&mut self, vector: u8, regs: &mut BiosRegisters, buffer: &mut [u8]) -> ProbeResult<()>;

    fn cpuid(&mut self, leaf: u32) -> CpuidRegisters;
}

impl<H: Hal + ?Sized> Hal for &mut H {
    fn save_and_disable_interrupts(&mut self) -> bool {
        (**self).save_and_disable_interrupts()
    }

    fn set_interrupt_state(&mut self, interrupt_state: bool) {
        (**self).set_interrupt_state(interrupt_state)
    }

    fn get_interrupt_state(&self) -> bool {
        (**self).get_interrupt_state()
    }

    fn write_back_invalidate_cache(&mut self) {
        (**self).write_back_invalidate_cache()
    }

    fn io_read8(&mut self, port: u16) -> u8 {
        (**self).io_read8(port)
    }

    fn io_read16(&mut self, port: u16) -> u16 {
        (**self).io_read16(port)
    }

    fn io_read32(&mut self, port: u16) -> u32 {
        (**self).io_read32(port)
    }

    fn io_write8(&mut self, port: u16, value: u8) {
        (**self).io_write8(port, value)
    }

    fn io_write16(&mut self, port: u16, value: u16) {
        (**self).io_write16(port, value)
    }

    fn io_write32(&mut self, port: u16, value: u32) {
        (**self).io_write32(port, value)
    }

    fn read_msr(&mut self, msr: u32) -> ProbeResult<u64> {
        (**self).read_msr(msr)
    }

    fn write_msr(&mut self, msr: u32, value: u64) -> ProbeResult<()> {
        (**self).write_msr(msr, value)
    }

    fn read_control_register(&mut self, index: u8) -> ProbeResult<u32> {
        (**self).read_control_register(index)
    }

    fn write_control_register(&mut self, index: u8, value: u32) -> ProbeResult<()> {
        (**self).write_control_register(index, value)
    }

    fn bios_interrupt(&mut self, vector: u8, regs: &mut BiosRegisters, buffer: &mut [u8]) -> ProbeResult<()> {
        (**self).bios_interrupt(vector, regs, buffer)
    }

    fn cpuid(&mut self, leaf: u32) -> CpuidRegisters {
        (**self).cpuid(leaf)
    }
}

/// Interrupts stay masked while this guard is alive. The previous interrupt
/// state is restored on drop, including during unwinding.
pub(crate) struct CriticalSection<'a, H: Hal> {
    hal: &'a mut H,
    interrupt_state: bool,
}

impl<'a, H: Hal> CriticalSection<'a, H> {
    pub(crate) fn enter(hal: &'a mut H) -> Self {
        let interrupt_state = hal.save_and_disable_interrupts();
        Self { hal, interrupt_state }
    }
}

impl<H: Hal> Deref for CriticalSection<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.hal
    }
}

impl<H: Hal> DerefMut for CriticalSection<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.hal
    }
}

impl<H: Hal> Drop for CriticalSection<'_, H> {
    fn drop(&mut self) {
        self.hal.set_interrupt_state(self.interrupt_state);
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        use core::arch::asm;

        use crate::error::ProbeError;

        /// Executor issuing the real instructions. Requires ring 0.
        pub struct X86Hal;

        impl X86Hal {
            pub fn new() -> Self {
                Self
            }
        }

        impl Default for X86Hal {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Hal for X86Hal {
            fn save_and_disable_interrupts(&mut self) -> bool {
                let interrupt_state = self.get_interrupt_state();
                unsafe {
                    asm!("cli", options(nomem, nostack));
                }
                interrupt_state
            }

            fn set_interrupt_state(&mut self, interrupt_state: bool) {
                if interrupt_state {
                    unsafe {
                        asm!("sti", options(nomem, nostack));
                    }
                } else {
                    unsafe {
                        asm!("cli", options(nomem, nostack));
                    }
                }
            }

            #[inline(always)]
            fn get_interrupt_state(&self) -> bool {
                let r: usize;

                #[cfg(target_arch = "x86_64")]
                unsafe {
                    asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags));
                }
                #[cfg(target_arch = "x86")]
                unsafe {
                    asm!("pushfd; pop {}", out(reg) r, options(nomem, preserves_flags));
                }

                (r >> 9) & 1 == 1
            }

            #[inline(always)]
            fn write_back_invalidate_cache(&mut self) {
                unsafe {
                    asm!("wbinvd", options(nostack, preserves_flags));
                }
            }

            fn io_read8(&mut self, port: u16) -> u8 {
                let value: u8;
                unsafe {
                    asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
                }
                value
            }

            fn io_read16(&mut self, port: u16) -> u16 {
                let value: u16;
                unsafe {
                    asm!("in ax, dx", out("ax") value, in("dx") port, options(nomem, nostack, preserves_flags));
                }
                value
            }

            fn io_read32(&mut self, port: u16) -> u32 {
                let value: u32;
                unsafe {
                    asm!("in eax, dx", out("eax") value, in("dx") port, options(nomem, nostack, preserves_flags));
                }
                value
            }

            fn io_write8(&mut self, port: u16, value: u8) {
                unsafe {
                    asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
                }
            }

            fn io_write16(&mut self, port: u16, value: u16) {
                unsafe {
                    asm!("out dx, ax", in("dx") port, in("ax") value, options(nomem, nostack, preserves_flags));
                }
            }

            fn io_write32(&mut self, port: u16, value: u32) {
                unsafe {
                    asm!("out dx, eax", in("dx") port, in("eax") value, options(nomem, nostack, preserves_flags));
                }
            }

            fn read_msr(&mut self, msr: u32) -> ProbeResult<u64> {
                let (high, low): (u32, u32);
                unsafe {
                    asm!(
                        "rdmsr",
                        in("ecx") msr,
                        out("eax") low, out("edx") high,
                        options(nomem, nostack, preserves_flags),
                    );
                }
                Ok(((high as u64) << 32) | (low as u64))
            }

            fn write_msr(&mut self, msr: u32, value: u64) -> ProbeResult<()> {
                let low = value as u32;
                let high = (value >> 32) as u32;
                unsafe {
                    asm!(
                        "wrmsr",
                        in("ecx") msr,
                        in("eax") low, in("edx") high,
                        options(nostack, preserves_flags),
                    );
                }
                Ok(())
            }

            fn read_control_register(&mut self, index: u8) -> ProbeResult<u32> {
                let value: usize;
                unsafe {
                    match index {
                        0 => asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags)),
                        2 => asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags)),
                        3 => asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)),
                        4 => asm!("mov {}, cr4", out(reg) value, options(nomem, nostack, preserves_flags)),
                        // CR1, CR5-CR7 raise #UD
                        _ => return Err(ProbeError::ControlRegisterAccessFailed),
                    }
                }
                Ok(value as u32)
            }

            fn write_control_register(&mut self, index: u8, value: u32) -> ProbeResult<()> {
                // Upper half of 64-bit control registers is preserved.
                let current = match index {
                    0 | 2 | 3 | 4 => self.read_full_control_register(index),
                    _ => return Err(ProbeError::ControlRegisterAccessFailed),
                };
                let value = (current & !(u32::MAX as usize)) | value as usize;
                unsafe {
                    match index {
                        0 => asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags)),
                        2 => asm!("mov cr2, {}", in(reg) value, options(nostack, preserves_flags)),
                        3 => asm!("mov cr3, {}", in(reg) value, options(nostack, preserves_flags)),
                        _ => asm!("mov cr4, {}", in(reg) value, options(nostack, preserves_flags)),
                    }
                }
                Ok(())
            }

            fn bios_interrupt(&mut self, vector: u8, regs: &mut BiosRegisters, _buffer: &mut [u8]) -> ProbeResult<()> {
                // Real-mode services need a platform thunk; inject an executor that provides one.
                log::warn!("BIOS interrupt {:#04x} (eax {:#010x}) not reachable from this executor", vector, regs.eax);
                Err(ProbeError::Unsupported)
            }

            fn cpuid(&mut self, leaf: u32) -> CpuidRegisters {
                cfg_if::cfg_if! {
                    if #[cfg(target_arch = "x86_64")] {
                        #[allow(unused_unsafe)]
                        let result = unsafe { core::arch::x86_64::__cpuid(leaf) };
                    } else {
                        #[allow(unused_unsafe)]
                        let result = unsafe { core::arch::x86::__cpuid(leaf) };
                    }
                }
                CpuidRegisters { eax: result.eax, ebx: result.ebx, ecx: result.ecx, edx: result.edx }
            }
        }

        impl X86Hal {
            fn read_full_control_register(&self, index: u8) -> usize {
                let value: usize;
                unsafe {
                    match index {
                        0 => asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags)),
                        2 => asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags)),
                        3 => asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags)),
                        _ => asm!("mov {}, cr4", out(reg) value, options(nomem, nostack, preserves_flags)),
                    }
                }
                value
            }
        }
    }
}
