// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

pub mod bmd_rsp;
pub mod loopback;
pub mod remote;

use crate::error::Result;

/// A blocking transport carrying remote protocol packets to a probe and responses back
pub trait RemoteInterface
{
	/// Send one complete request packet
	fn buffer_write(&mut self, message: &str) -> Result<()>;
	/// Receive one response, returned without its leading `&` and trailing `#`
	fn buffer_read(&mut self) -> Result<String>;
}
