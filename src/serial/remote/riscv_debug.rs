// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::cell::Cell;
use std::sync::Arc;

use crate::error::Result;
use crate::serial::remote::BmdRiscvProtocol;

/// A RISC-V Debug Module Interface reached through a Debug Transport Module on the JTAG chain
pub struct RiscvDmi
{
	/// The index of the DTM's TAP on the JTAG chain
	dev_index: u8,
	/// Run-Test/Idle cycles the DTM needs between accesses
	idle_cycles: u8,
	/// Width of the DMI address field
	address_width: u8,
	/// Whether the last access faulted, and how
	fault: Cell<u8>,

	protocol: Arc<dyn BmdRiscvProtocol>,
}

impl RiscvDmi
{
	pub fn new(protocol: Arc<dyn BmdRiscvProtocol>, dev_index: u8, idle_cycles: u8, address_width: u8) -> Self
	{
		Self {
			dev_index,
			idle_cycles,
			address_width,
			fault: Cell::new(0),
			protocol,
		}
	}

	pub fn dev_index(&self) -> u8
	{
		self.dev_index
	}

	pub fn idle_cycles(&self) -> u8
	{
		self.idle_cycles
	}

	pub fn address_width(&self) -> u8
	{
		self.address_width
	}

	pub fn fault(&self) -> u8
	{
		self.fault.get()
	}

	pub(crate) fn set_fault(&self, fault: u8)
	{
		self.fault.set(fault);
	}

	pub fn clear_fault(&self)
	{
		self.fault.set(0);
	}

	/// Read a DMI register, `None` meaning the access failed and [`Self::fault`] says why
	pub fn read(&self, address: u32) -> Result<Option<u32>>
	{
		self.protocol.dmi_read(self, address)
	}

	pub fn write(&self, address: u32, value: u32) -> Result<bool>
	{
		self.protocol.dmi_write(self, address, value)
	}
}
