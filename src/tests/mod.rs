//! Unit tests for the probing library, run against [`mock_hal::MockHal`].
//!
//! ## License
//!
//! Copyright (c) Microsoft Corporation.
//!
//! SPDX-License-Identifier: Apache-2.0
//!
mod memory_tests;
mod mock_hal;
