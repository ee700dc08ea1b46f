//! Error types and result aliases for the hardware probing library.
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
use core::fmt;

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Probe and controller error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// No device answers at the configuration address (vendor id 0xFFFF)
    DeviceNotPresent,
    /// Class code or header type decoded outside the defined enumerations
    CorruptConfigSpace,
    /// Multiplier is out of range or not supported by the hardware
    BadMultiplier,
    /// Enabling or disabling the EPMR I/O control window failed
    EpmrWindowFailed,
    /// Invalid parameter
    InvalidParameter,
    /// The executor could not read or write the MSR
    MsrAccessFailed,
    /// The control register does not exist or could not be accessed
    ControlRegisterAccessFailed,
    /// A register read back a different value than was written
    VerifyMismatch,
    /// The BIOS reported failure (carry set or function unsupported)
    BiosCallFailed,
    /// The BIOS did not return the expected 'SMAP' signature
    BiosSignatureMismatch,
    /// The BIOS memory map did not terminate within the call budget
    TooManyRegions,
    /// The executor cannot perform this operation in the current environment
    Unsupported,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProbeError::DeviceNotPresent => "no PCI device at address",
            ProbeError::CorruptConfigSpace => "PCI configuration space read looks corrupt",
            ProbeError::BadMultiplier => "unsupported CPU multiplier",
            ProbeError::EpmrWindowFailed => "failed to toggle EPMR I/O block",
            ProbeError::InvalidParameter => "invalid parameter",
            ProbeError::MsrAccessFailed => "MSR access failed",
            ProbeError::ControlRegisterAccessFailed => "control register access failed",
            ProbeError::VerifyMismatch => "register read-back mismatch",
            ProbeError::BiosCallFailed => "BIOS call failed",
            ProbeError::BiosSignatureMismatch => "BIOS signature mismatch",
            ProbeError::TooManyRegions => "BIOS memory map exceeded region limit",
            ProbeError::Unsupported => "operation not supported by executor",
        };
        f.write_str(text)
    }
}
