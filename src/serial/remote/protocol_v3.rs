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
	self, ADIV5_RELAY_V3, REMOTE_ADIV5_MEM_READ_BLOCK, REMOTE_ADIV5_MEM_WRITE_LENGTH, RemoteResponse, ResponseStatus,
	spi_write_block_size,
};
use crate::serial::remote::protocol_v2::RemoteV2;
use crate::serial::remote::{
	Acceleration, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSpiProtocol, BmdSwdProtocol, JtagDev,
	ProtocolVersion, REMOTE_ERROR_FAULT, SharedInterface, SpiBus, SpiFlashId, TargetArchitecture, TargetFamily,
	check_remote_error, remote_transact,
};

pub struct RemoteV3(RemoteV2);

pub struct RemoteV3ADIv5
{
	interface: SharedInterface,
}

pub struct RemoteV3SPI
{
	interface: SharedInterface,
}

impl From<SharedInterface> for RemoteV3
{
	fn from(interface: SharedInterface) -> Self
	{
		warn!("Probe firmware does not support ADIv6 acceleration or RISC-V JTAG acceleration, please update it");
		Self::new(interface)
	}
}

impl RemoteV3
{
	pub(crate) fn new(interface: SharedInterface) -> Self
	{
		Self(RemoteV2::new(interface))
	}

	pub(crate) fn transact(&self, request: &str) -> Result<String>
	{
		self.0.transact(request)
	}
}

impl BmdRemoteProtocol for RemoteV3
{
	fn version(&self) -> ProtocolVersion
	{
		ProtocolVersion::V3
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
		Some(Arc::new(RemoteV3ADIv5::from(self.clone_interface())))
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
		Some(Box::new(RemoteV3SPI::from(self.clone_interface())))
	}

	fn add_jtag_dev(&self, dev_index: u8, jtag_dev: &JtagDev) -> Result<()>
	{
		self.0.add_jtag_dev(dev_index, jtag_dev)
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

/// Perform a register read style request, bridging any fault or exception the remote reports
pub(crate) fn adiv5_read_register(
	interface: &SharedInterface,
	dp: &AdiV5DebugPort,
	request: &str,
	function: &str,
) -> Result<u32>
{
	let buffer = remote_transact(interface, request)?;
	let response = RemoteResponse::parse(&buffer)?;
	if !check_remote_error(function, &response, |fault| dp.set_fault(fault))? {
		return Ok(0);
	}
	response.register()
}

pub(crate) fn adiv5_write_register(
	interface: &SharedInterface,
	dp: &AdiV5DebugPort,
	request: &str,
	function: &str,
) -> Result<bool>
{
	let buffer = remote_transact(interface, request)?;
	check_remote_error(function, &RemoteResponse::parse(&buffer)?, |fault| dp.set_fault(fault))
}

/// Read memory in blocks that fit a response, building each block's request with `encode`
pub(crate) fn adiv5_mem_read_blocks(
	interface: &SharedInterface,
	dp: &AdiV5DebugPort,
	dest: &mut [u8],
	src: TargetAddr64,
	blocksize: usize,
	encode: impl Fn(TargetAddr64, usize) -> String,
) -> Result<()>
{
	let mut address = src;
	for chunk in dest.chunks_mut(blocksize) {
		let buffer = remote_transact(interface, &encode(address, chunk.len()))?;
		let response = RemoteResponse::parse(&buffer)?;
		if !check_remote_error("mem_read", &response, |fault| dp.set_fault(fault))? {
			error!("Remote memory read error around {:#010x}", address);
			return Ok(());
		}
		response.data(chunk)?;
		address += chunk.len() as u64;
	}
	Ok(())
}

/// Write memory in blocks that fit a request, building each block's request with `encode`
pub(crate) fn adiv5_mem_write_blocks(
	interface: &SharedInterface,
	dp: &AdiV5DebugPort,
	dest: TargetAddr64,
	src: &[u8],
	blocksize: usize,
	encode: impl Fn(TargetAddr64, &[u8]) -> Result<String>,
) -> Result<()>
{
	let mut address = dest;
	for chunk in src.chunks(blocksize) {
		let buffer = remote_transact(interface, &encode(address, chunk)?)?;
		if !check_remote_error("mem_write", &RemoteResponse::parse(&buffer)?, |fault| dp.set_fault(fault))? {
			error!("Remote memory write error around {:#010x}", address);
			return Ok(());
		}
		address += chunk.len() as u64;
	}
	Ok(())
}

impl From<SharedInterface> for RemoteV3ADIv5
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}
}

impl BmdAdiV5Protocol for RemoteV3ADIv5
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		let request = ADIV5_RELAY_V3.raw_access(dp.dev_index(), rnw, addr, value);
		let result = adiv5_read_register(&self.interface, dp, &request, "raw_access")?;
		debug!("Remote raw access: addr {:04x} {} {:08x}", addr, if rnw != 0 { "->" } else { "<-" }, result);
		Ok(result)
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32>
	{
		let request = ADIV5_RELAY_V3.dp_read(dp.dev_index(), addr);
		let value = adiv5_read_register(&self.interface, dp, &request, "dp_read")?;
		debug!("Remote DP read: addr {:04x} -> {:08x}", addr, value);
		Ok(value)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort<'_>, addr: u16) -> Result<u32>
	{
		let request = ADIV5_RELAY_V3.ap_read(ap.dp().dev_index(), ap.apsel(), addr);
		let value = adiv5_read_register(&self.interface, ap.dp(), &request, "ap_read")?;
		debug!("Remote AP read: addr {:04x} -> {:08x}", addr, value);
		Ok(value)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort<'_>, addr: u16, value: u32) -> Result<()>
	{
		let request = ADIV5_RELAY_V3.ap_write(ap.dp().dev_index(), ap.apsel(), addr, value);
		if adiv5_write_register(&self.interface, ap.dp(), &request, "ap_write")? {
			debug!("Remote AP write: addr {:04x} <- {:08x}", addr, value);
		}
		Ok(())
	}

	fn mem_read(&self, ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>
	{
		if dest.is_empty() {
			return Ok(());
		}
		check_address_range(src, dest.len())?;
		debug!("Remote memory read @{:08x}+{:x}", src, dest.len());
		let dp = ap.dp();
		adiv5_mem_read_blocks(&self.interface, dp, dest, src, REMOTE_ADIV5_MEM_READ_BLOCK, |address, count| {
			ADIV5_RELAY_V3.mem_read(dp.dev_index(), ap.apsel(), ap.csw(), address as TargetAddr32, count)
		})
	}

	fn mem_write(&self, ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
	{
		if src.is_empty() {
			return Ok(());
		}
		check_address_range(dest, src.len())?;
		debug!("Remote memory write @{:08x}+{:x} alignment {}", dest, src.len(), align);
		let dp = ap.dp();
		let blocksize = codec::write_block_size(REMOTE_ADIV5_MEM_WRITE_LENGTH, align);
		adiv5_mem_write_blocks(&self.interface, dp, dest, src, blocksize, |address, data| {
			ADIV5_RELAY_V3.mem_write(dp.dev_index(), ap.apsel(), ap.csw(), align, address as TargetAddr32, data)
		})
	}
}

impl From<SharedInterface> for RemoteV3SPI
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}
}

/// Describe why a SPI request failed
fn spi_fault_to_string(response: &RemoteResponse<'_>) -> &'static str
{
	match response.status() {
		ResponseStatus::Error => match response.value() {
			Ok(code) if code & 0xff == REMOTE_ERROR_FAULT => "fault occured on probe",
			Ok(_) => "unknown error occured",
			Err(_) => "truncated error packet",
		},
		ResponseStatus::NotSupported => "not supported",
		ResponseStatus::ParameterError => "parameter error in request",
		ResponseStatus::Ok => "[BUG] impossible fault state",
	}
}

impl RemoteV3SPI
{
	/// Send a SPI request, logging the failure if the probe didn't accept it
	fn request(&self, request: &str, operation: &str) -> Result<Option<String>>
	{
		let buffer = remote_transact(&self.interface, request)?;
		let response = RemoteResponse::parse(&buffer)?;
		if response.status() != ResponseStatus::Ok {
			error!("Remote SPI {} failed, {}", operation, spi_fault_to_string(&response));
			return Ok(None);
		}
		Ok(Some(buffer))
	}
}

impl BmdSpiProtocol for RemoteV3SPI
{
	fn begin(&self, bus: SpiBus) -> Result<bool>
	{
		let ok = self.request(&codec::spi_begin(bus), "initialisation")?.is_some();
		debug!("Remote SPI begin: bus {:?}", bus);
		Ok(ok)
	}

	fn end(&self, bus: SpiBus) -> Result<bool>
	{
		let ok = self.request(&codec::spi_end(bus), "deinitialisation")?.is_some();
		debug!("Remote SPI end: bus {:?}", bus);
		Ok(ok)
	}

	fn chip_select(&self, device_select: u8) -> Result<bool>
	{
		Ok(self
			.request(&codec::spi_chip_select(device_select), "chip select")?
			.is_some())
	}

	fn xfer(&self, bus: SpiBus, value: u8) -> Result<u8>
	{
		let Some(buffer) = self.request(&codec::spi_xfer(bus, value), "transfer")? else {
			return Ok(u8::MAX);
		};
		let result = RemoteResponse::parse(&buffer)?.value()? as u8;
		debug!("Remote SPI transfer: bus {:?} => {:02x} -> {:02x}", bus, value, result);
		Ok(result)
	}

	fn read_chip_id(&self, bus: SpiBus, device_select: u8) -> Result<SpiFlashId>
	{
		let buffer = remote_transact(&self.interface, &codec::spi_chip_id(bus, device_select))?;
		let response = RemoteResponse::parse(&buffer)?.expect_ok("SPI chip ID")?;
		let mut id = [0u8; 3];
		response.data(&mut id)?;
		Ok(SpiFlashId {
			manufacturer: id[0],
			device_type: id[1],
			capacity: id[2],
		})
	}

	fn run_command(&self, bus: SpiBus, device_select: u8, command: u16, address: u32) -> Result<bool>
	{
		Ok(self
			.request(&codec::spi_run_command(bus, device_select, command, address), "command")?
			.is_some())
	}

	fn read(&self, bus: SpiBus, device_select: u8, command: u16, address: u32, data: &mut [u8]) -> Result<bool>
	{
		let mut offset = address;
		for chunk in data.chunks_mut(REMOTE_ADIV5_MEM_READ_BLOCK) {
			let request = codec::spi_read(bus, device_select, command, offset, chunk.len());
			let Some(buffer) = self.request(&request, "read")? else {
				return Ok(false);
			};
			RemoteResponse::parse(&buffer)?.data(chunk)?;
			offset += chunk.len() as u32;
		}
		Ok(true)
	}

	fn write(&self, bus: SpiBus, device_select: u8, command: u16, address: u32, data: &[u8]) -> Result<bool>
	{
		let mut offset = address;
		for chunk in data.chunks(spi_write_block_size()) {
			let request = codec::spi_write(bus, device_select, command, offset, chunk)?;
			if self.request(&request, "write")?.is_none() {
				return Ok(false);
			}
			offset += chunk.len() as u32;
		}
		Ok(true)
	}
}
