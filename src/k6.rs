//! AMD K6-2+/III+ model specific controls: clock multiplier, write ordering,
//! write allocation, the two UC/WC memory type ranges and cache/prefetch bits.
//!
//! Only meaningful on a K6 family processor; other CPUs fault on these MSRs.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use crate::error::{ProbeError, ProbeResult};
use crate::hal::Hal;
use crate::msr::{read_control_register, read_msr, write_control_register, write_msr, write_msr_and_verify};
use crate::structs::{
    CpuMsr, K6Bvc, K6Efer, K6Epmr, K6MtrrHalf, K6Whcr, MtrrConfig, MtrrRange, WriteAllocateConfig, WriteOrderMode,
    CR0_CACHE_DISABLE, K6_BAD_MULTIPLIER, K6_BVC_PORT, K6_BVC_SAMPLE_ON_STOP_GRANT, K6_BVC_STOP_GRANT_COUNT,
    K6_EPMR_IO_BASE, K6_MTRR_MASK_TABLE, K6_MULTIPLIER_TABLE, K6_WHCR_GRANULARITY_KB, MSR_K6_EFER, MSR_K6_EPMR,
    MSR_K6_UWCCR, MSR_K6_WHCR,
};

const MTRR_OFFSET_MASK: u32 = 0xFFFE_0000;

fn decode_mtrr_half(raw: u32) -> MtrrRange {
    // All-zero is how an unused slot reads back, even though mask 0 is the 4 GiB pattern.
    if raw == 0 {
        return MtrrRange::default();
    }

    let half = K6MtrrHalf::from_bits(raw);
    let size_kb = K6_MTRR_MASK_TABLE.iter().find(|entry| entry.mask == half.mask()).map(|entry| entry.size_kb);

    MtrrRange {
        is_valid: size_kb.is_some(),
        offset: raw & MTRR_OFFSET_MASK,
        size_kb: size_kb.unwrap_or(0),
        write_combine: half.wc(),
        uncacheable: half.uc(),
    }
}

fn encode_mtrr_half(range: &MtrrRange) -> ProbeResult<u32> {
    if !range.is_valid {
        return Ok(0);
    }

    let Some(entry) = K6_MTRR_MASK_TABLE.iter().find(|entry| entry.size_kb == range.size_kb) else {
        log::debug!("MTRR: no mask for {} KB", range.size_kb);
        return Err(ProbeError::InvalidParameter);
    };

    Ok(K6MtrrHalf::new()
        .with_uc(range.uncacheable)
        .with_wc(range.write_combine)
        .with_mask(entry.mask)
        .with_offset(((range.offset & MTRR_OFFSET_MASK) >> 17) as u16)
        .into_bits())
}

impl MtrrConfig {
    /// Decodes a raw UWCCR image. Slot 0 is the low half, slot 1 the high half.
    pub fn decode(raw: u64) -> Self {
        let msr = CpuMsr::from_bits(raw);
        Self { ranges: [decode_mtrr_half(msr.lo()), decode_mtrr_half(msr.hi())] }
    }

    /// Encodes both slots. Invalid slots become an all-zero half; a valid
    /// slot whose size is not one of the 16 mask sizes is rejected.
    pub fn encode(&self) -> ProbeResult<u64> {
        let msr = CpuMsr::new()
            .with_lo(encode_mtrr_half(&self.ranges[0])?)
            .with_hi(encode_mtrr_half(&self.ranges[1])?);
        log::debug!("MTRR encode: [{:#010x}, {:#010x}]", msr.lo(), msr.hi());
        Ok(msr.into_bits())
    }
}

pub struct K6Controller<H: Hal> {
    hal: H,
}

impl<H: Hal> K6Controller<H> {
    pub fn new(hal: H) -> Self {
        Self { hal }
    }

    pub fn into_hal(self) -> H {
        self.hal
    }

    /// Maps or unmaps the EPMR I/O block at 0xFFF0. Must bracket any access
    /// to the BVC port.
    pub fn enable_epmr_io_block(&mut self, enable: bool) -> ProbeResult<()> {
        let epmr = K6Epmr::new().with_enable(enable).with_io_base(K6_EPMR_IO_BASE >> 4);
        write_msr(&mut self.hal, MSR_K6_EPMR, CpuMsr::new().with_lo(epmr.into_bits()))
    }

    /// Programs the internal bus divisor for `whole.fraction` x, where
    /// `fraction` is 0 or 5. The new ratio is applied at the next stop grant.
    pub fn set_multiplier(&mut self, whole: u16, fraction: u16) -> ProbeResult<()> {
        if (fraction != 0 && fraction != 5) || whole > 6 {
            return Err(ProbeError::BadMultiplier);
        }

        let index = (whole * 2 + fraction / 5) as usize;
        let divisor = match K6_MULTIPLIER_TABLE.get(index) {
            Some(&divisor) if divisor != K6_BAD_MULTIPLIER => divisor,
            _ => {
                log::debug!("setMultiplier: {}.{}x not supported", whole, fraction);
                return Err(ProbeError::BadMultiplier);
            }
        };

        self.enable_epmr_io_block(true).map_err(|_| ProbeError::EpmrWindowFailed)?;

        let bvc = K6Bvc::new()
            .with_ibf(divisor & 0x07)
            .with_bvcc(K6_BVC_SAMPLE_ON_STOP_GRANT)
            .with_sgtc(K6_BVC_STOP_GRANT_COUNT);
        log::debug!("setMultiplier: {}.{}x, BVC {:#010x}", whole, fraction, bvc.into_bits());
        self.hal.io_write32(K6_BVC_PORT, bvc.into_bits());

        self.enable_epmr_io_block(false).map_err(|_| ProbeError::EpmrWindowFailed)
    }

    pub fn set_write_order_mode(&mut self, mode: WriteOrderMode) -> ProbeResult<()> {
        self.update_efer(|efer| efer.with_ewbec(mode as u8))
    }

    /// Sets the write allocate limit, rounded down to 4 MiB, and the
    /// 15-16 MiB hole exclusion. The write is read back and compared.
    pub fn set_write_allocate_range(&mut self, config: &WriteAllocateConfig) -> ProbeResult<()> {
        let whcr = K6Whcr::new()
            .with_limit((config.size_kb / K6_WHCR_GRANULARITY_KB) as u16 & 0x3FF)
            .with_memory_hole(config.memory_hole);
        write_msr_and_verify(&mut self.hal, MSR_K6_WHCR, CpuMsr::new().with_lo(whcr.into_bits()))
    }

    pub fn get_write_allocate_range(&mut self) -> ProbeResult<WriteAllocateConfig> {
        let whcr = K6Whcr::from_bits(read_msr(&mut self.hal, MSR_K6_WHCR)?.lo());
        Ok(WriteAllocateConfig {
            size_kb: whcr.limit() as u32 * K6_WHCR_GRANULARITY_KB,
            memory_hole: whcr.memory_hole(),
        })
    }

    pub fn get_memory_type_ranges(&mut self) -> ProbeResult<MtrrConfig> {
        let msr = read_msr(&mut self.hal, MSR_K6_UWCCR)?;
        Ok(MtrrConfig::decode(msr.into_bits()))
    }

    pub fn set_memory_type_ranges(&mut self, config: &MtrrConfig) -> ProbeResult<()> {
        let raw = config.encode()?;
        write_msr_and_verify(&mut self.hal, MSR_K6_UWCCR, CpuMsr::from_bits(raw))
    }

    pub fn set_l1_cache(&mut self, enable: bool) -> ProbeResult<()> {
        let cr0 = read_control_register(&mut self.hal, 0)?;
        let cr0 = if enable { cr0 & !CR0_CACHE_DISABLE } else { cr0 | CR0_CACHE_DISABLE };
        write_control_register(&mut self.hal, 0, cr0)
    }

    pub fn get_l1_cache(&mut self) -> ProbeResult<bool> {
        Ok(read_control_register(&mut self.hal, 0)? & CR0_CACHE_DISABLE == 0)
    }

    pub fn set_l2_cache(&mut self, enable: bool) -> ProbeResult<()> {
        self.update_efer(|efer| efer.with_l2_disable(!enable))
    }

    pub fn get_l2_cache(&mut self) -> ProbeResult<bool> {
        let efer = K6Efer::from_bits(read_msr(&mut self.hal, MSR_K6_EFER)?.lo());
        Ok(!efer.l2_disable())
    }

    pub fn set_data_prefetch(&mut self, enable: bool) -> ProbeResult<()> {
        self.update_efer(|efer| efer.with_dpe(enable))
    }

    // Read-modify-write of the EFER low half; the high half is written back unchanged.
    fn update_efer(&mut self, f: impl FnOnce(K6Efer) -> K6Efer) -> ProbeResult<()> {
        let msr = read_msr(&mut self.hal, MSR_K6_EFER)?;
        let efer = f(K6Efer::from_bits(msr.lo()));
        write_msr(&mut self.hal, MSR_K6_EFER, msr.with_lo(efer.into_bits()))
    }
}
