// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::sync::Arc;

use log::{debug, error, warn};

use crate::adiv5::{
	AdiV5AccessPort, AdiV5DebugPort, Align, BmdAdiV5Protocol, TargetAddr32, TargetAddr64, check_address_range,
};
use crate::error::Result;
use crate::serial::remote::codec::{
	self, ADIV5_RELAY_V1, REMOTE_ADIV5_MEM_READ_BLOCK, REMOTE_ADIV5_MEM_WRITE_LENGTH, RemoteResponse, ResponseStatus,
	write_block_size,
};
use crate::serial::remote::protocol_v0::RemoteV0;
use crate::serial::remote::{
	Acceleration, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSpiProtocol, BmdSwdProtocol, JtagDev,
	ProtocolVersion, SharedInterface, TargetArchitecture, TargetFamily, remote_transact,
};

pub struct RemoteV1(RemoteV0);

/// The v1 ADIv5 relay. Firmware speaking this version reports errors without saying what kind
/// they were, so register accesses that fail come back as opaque remote errors and memory
/// accesses that fail mark the DP as faulted.
pub struct RemoteV1ADIv5
{
	interface: SharedInterface,
}

impl From<SharedInterface> for RemoteV1
{
	fn from(interface: SharedInterface) -> Self
	{
		warn!(
			"Probe firmware does not support the newer JTAG commands, ADIv6 acceleration or RISC-V JTAG acceleration, \
			 please update it"
		);
		Self::new(interface)
	}
}

impl RemoteV1
{
	pub(crate) fn new(interface: SharedInterface) -> Self
	{
		Self(RemoteV0::new(interface))
	}

	pub(crate) fn transact(&self, request: &str) -> Result<String>
	{
		self.0.transact(request)
	}
}

impl BmdRemoteProtocol for RemoteV1
{
	fn version(&self) -> ProtocolVersion
	{
		ProtocolVersion::V1
	}

	fn clone_interface(&self) -> SharedInterface
	{
		self.0.clone_interface()
	}

	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		self.0.jtag_init()
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		self.0.swd_init()
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		warn!("Please update your probe's firmware for improved error handling");
		Some(Arc::new(RemoteV1ADIv5::from(self.clone_interface())))
	}

	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		self.0.adiv6_init()
	}

	fn riscv_jtag_init(&self) -> Result<Option<Arc<dyn BmdRiscvProtocol>>>
	{
		self.0.riscv_jtag_init()
	}

	fn spi_init(&self) -> Option<Box<dyn BmdSpiProtocol>>
	{
		self.0.spi_init()
	}

	fn add_jtag_dev(&self, dev_index: u8, jtag_dev: &JtagDev) -> Result<()>
	{
		let buffer = self.transact(&codec::add_jtag_dev(dev_index, jtag_dev))?;
		// The firmware doesn't get upset if this fails, so neither do we beyond noting it
		if RemoteResponse::parse(&buffer)?.status() != ResponseStatus::Ok {
			warn!("Failed to describe JTAG device {} to the probe", dev_index);
		}
		Ok(())
	}

	fn get_comms_frequency(&self) -> Result<u32>
	{
		self.0.get_comms_frequency()
	}

	fn set_comms_frequency(&self, freq: u32) -> Result<bool>
	{
		self.0.set_comms_frequency(freq)
	}

	fn target_clk_output_enable(&self, enable: bool) -> Result<()>
	{
		self.0.target_clk_output_enable(enable)
	}

	fn supported_accelerations(&self) -> Option<Acceleration>
	{
		self.0.supported_accelerations()
	}

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>
	{
		self.0.supported_architectures()
	}

	fn supported_families(&self) -> Result<Option<TargetFamily>>
	{
		self.0.supported_families()
	}
}

impl From<SharedInterface> for RemoteV1ADIv5
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV1ADIv5
{
	fn read_register(&self, request: &str, operation: &'static str) -> Result<u32>
	{
		let buffer = remote_transact(&self.interface, request)?;
		RemoteResponse::parse(&buffer)?.expect_ok(operation)?.register()
	}
}

impl BmdAdiV5Protocol for RemoteV1ADIv5
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		let result = self.read_register(
			&ADIV5_RELAY_V1.raw_access(dp.dev_index(), rnw, addr, value),
			"ADIv5 raw access",
		)?;
		debug!("Remote raw access: addr {:04x} {} {:08x}", addr, if rnw != 0 { "->" } else { "<-" }, result);
		Ok(result)
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32>
	{
		let value = self.read_register(&ADIV5_RELAY_V1.dp_read(dp.dev_index(), addr), "ADIv5 DP read")?;
		debug!("Remote DP read: addr {:04x} -> {:08x}", addr, value);
		Ok(value)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort<'_>, addr: u16) -> Result<u32>
	{
		let value = self.read_register(
			&ADIV5_RELAY_V1.ap_read(ap.dp().dev_index(), ap.apsel(), addr),
			"ADIv5 AP read",
		)?;
		debug!("Remote AP read: addr {:04x} -> {:08x}", addr, value);
		Ok(value)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort<'_>, addr: u16, value: u32) -> Result<()>
	{
		let buffer = remote_transact(
			&self.interface,
			&ADIV5_RELAY_V1.ap_write(ap.dp().dev_index(), ap.apsel(), addr, value),
		)?;
		RemoteResponse::parse(&buffer)?.expect_ok("ADIv5 AP write")?;
		debug!("Remote AP write: addr {:04x} <- {:08x}", addr, value);
		Ok(())
	}

	fn mem_read(&self, ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>
	{
		// The relay only carries 32-bit addresses
		check_address_range(src, dest.len())?;
		let dp = ap.dp();
		let mut address = src as TargetAddr32;
		for chunk in dest.chunks_mut(REMOTE_ADIV5_MEM_READ_BLOCK) {
			let request = ADIV5_RELAY_V1.mem_read(dp.dev_index(), ap.apsel(), ap.csw(), address, chunk.len());
			let buffer = remote_transact(&self.interface, &request)?;
			let response = RemoteResponse::parse(&buffer)?;
			if response.status() != ResponseStatus::Ok {
				error!("Remote memory read error around {:#010x}", address);
				dp.set_fault(1);
				return Ok(());
			}
			response.data(chunk)?;
			address = address.wrapping_add(chunk.len() as u32);
		}
		Ok(())
	}

	fn mem_write(&self, ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
	{
		check_address_range(dest, src.len())?;
		let dp = ap.dp();
		let blocksize = write_block_size(REMOTE_ADIV5_MEM_WRITE_LENGTH, align);
		let mut address = dest as TargetAddr32;
		for chunk in src.chunks(blocksize) {
			let request = ADIV5_RELAY_V1.mem_write(dp.dev_index(), ap.apsel(), ap.csw(), align, address, chunk)?;
			let buffer = remote_transact(&self.interface, &request)?;
			if RemoteResponse::parse(&buffer)?.status() != ResponseStatus::Ok {
				error!("Remote memory write error around {:#010x}", address);
				dp.set_fault(1);
				return Ok(());
			}
			address = address.wrapping_add(chunk.len() as u32);
		}
		Ok(())
	}
}
