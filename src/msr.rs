//! Typed MSR and control register access on top of the [`Hal`].
//!
//! Each access runs with interrupts masked and the caches written back, the
//! same sequence the K6 documentation asks for around RDMSR/WRMSR.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use crate::error::{ProbeError, ProbeResult};
use crate::hal::{CriticalSection, Hal};
use crate::structs::{CpuMsr, CONTROL_REGISTER_COUNT};

pub fn read_msr<H: Hal>(hal: &mut H, msr: u32) -> ProbeResult<CpuMsr> {
    let mut cs = CriticalSection::enter(hal);
    cs.write_back_invalidate_cache();
    let value = CpuMsr::from_bits(cs.read_msr(msr)?);
    log::trace!("read MSR {:#010x}: lo {:#010x} hi {:#010x}", msr, value.lo(), value.hi());
    Ok(value)
}

pub fn write_msr<H: Hal>(hal: &mut H, msr: u32, value: CpuMsr) -> ProbeResult<()> {
    let mut cs = CriticalSection::enter(hal);
    cs.write_back_invalidate_cache();
    cs.write_msr(msr, value.into_bits())?;
    log::trace!("wrote MSR {:#010x}: lo {:#010x} hi {:#010x}", msr, value.lo(), value.hi());
    Ok(())
}

/// Writes `value` and reads it back. Bits that did not stick are a
/// [`ProbeError::VerifyMismatch`].
pub fn write_msr_and_verify<H: Hal>(hal: &mut H, msr: u32, value: CpuMsr) -> ProbeResult<()> {
    write_msr(hal, msr, value)?;
    let readback = read_msr(hal, msr)?;
    if readback != value {
        log::debug!(
            "MSR {:#010x} verify failed: wrote {:#018x}, read {:#018x}",
            msr,
            value.into_bits(),
            readback.into_bits()
        );
        return Err(ProbeError::VerifyMismatch);
    }
    Ok(())
}

pub fn read_control_register<H: Hal>(hal: &mut H, index: u8) -> ProbeResult<u32> {
    if index >= CONTROL_REGISTER_COUNT {
        return Err(ProbeError::ControlRegisterAccessFailed);
    }
    let mut cs = CriticalSection::enter(hal);
    let value = cs.read_control_register(index)?;
    log::trace!("read CR{}: {:#010x}", index, value);
    Ok(value)
}

pub fn write_control_register<H: Hal>(hal: &mut H, index: u8, value: u32) -> ProbeResult<()> {
    if index >= CONTROL_REGISTER_COUNT {
        return Err(ProbeError::ControlRegisterAccessFailed);
    }
    let mut cs = CriticalSection::enter(hal);
    cs.write_control_register(index, value)?;
    log::trace!("wrote CR{}: {:#010x}", index, value);
    Ok(())
}
