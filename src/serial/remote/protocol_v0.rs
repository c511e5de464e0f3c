// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::sync::Arc;

use log::{debug, error, trace, warn};

use crate::adiv5::BmdAdiV5Protocol;
use crate::error::{BmdError, Result};
use crate::serial::remote::codec::{self, RemoteResponse, ResponseStatus};
use crate::serial::remote::{
	Acceleration, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSpiProtocol, BmdSwdProtocol, JtagDev,
	ProtocolVersion, SharedInterface, TargetArchitecture, TargetFamily, remote_transact,
};

pub struct RemoteV0
{
	interface: SharedInterface,
}

pub struct RemoteV0Plus(RemoteV0);

pub struct RemoteV0JTAG
{
	interface: SharedInterface,
}

pub struct RemoteV0SWD
{
	interface: SharedInterface,
}

impl From<SharedInterface> for RemoteV0
{
	fn from(interface: SharedInterface) -> Self
	{
		warn!(
			"Probe firmware does not support the newer JTAG commands, ADIv5 acceleration, ADIv6 acceleration or \
			 RISC-V JTAG acceleration, please update it"
		);
		Self::new(interface)
	}
}

/// Send a request the v0 way, where anything other than an error response is taken as success
pub(crate) fn transact_checked(interface: &SharedInterface, request: &str, operation: &str) -> Result<String>
{
	let buffer = remote_transact(interface, request)?;
	let response = RemoteResponse::parse(&buffer)?;
	if response.status() == ResponseStatus::Error {
		let message = if response.payload().is_empty() {
			"unknown"
		} else {
			response.payload()
		};
		return Err(BmdError::comms(format!("{} failed, error {}", operation, message)));
	}
	Ok(buffer)
}

impl RemoteV0
{
	pub(crate) fn new(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}

	pub(crate) fn transact(&self, request: &str) -> Result<String>
	{
		remote_transact(&self.interface, request)
	}
}

impl BmdRemoteProtocol for RemoteV0
{
	fn version(&self) -> ProtocolVersion
	{
		ProtocolVersion::V0
	}

	fn clone_interface(&self) -> SharedInterface
	{
		self.interface.clone()
	}

	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		// Try to have the probe initialise JTAG comms to any connected targets
		debug!("Remote JTAG init");
		transact_checked(&self.interface, codec::REMOTE_JTAG_INIT, "Remote JTAG init")?;
		// Otherwise, return the v0 JTAG protocol implementation
		Ok(Box::new(RemoteV0JTAG::from(self.clone_interface())))
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		debug!("Remote SWD init");
		transact_checked(&self.interface, codec::REMOTE_SWD_INIT, "Remote SWD init")?;
		Ok(Box::new(RemoteV0SWD::from(self.clone_interface())))
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		warn!("Falling back to non-accelerated probe interface");
		warn!("Please update your probe's firmware for a substantial speed increase");
		None
	}

	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		None
	}

	fn riscv_jtag_init(&self) -> Result<Option<Arc<dyn BmdRiscvProtocol>>>
	{
		Ok(None)
	}

	fn spi_init(&self) -> Option<Box<dyn BmdSpiProtocol>>
	{
		None
	}

	fn add_jtag_dev(&self, _dev_index: u8, _jtag_dev: &JtagDev) -> Result<()>
	{
		Ok(())
	}

	fn get_comms_frequency(&self) -> Result<u32>
	{
		Ok(u32::MAX)
	}

	fn set_comms_frequency(&self, _freq: u32) -> Result<bool>
	{
		Ok(false)
	}

	fn target_clk_output_enable(&self, _enable: bool) -> Result<()>
	{
		Ok(())
	}

	fn supported_accelerations(&self) -> Option<Acceleration>
	{
		None
	}

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>
	{
		Ok(None)
	}

	fn supported_families(&self) -> Result<Option<TargetFamily>>
	{
		Ok(None)
	}
}

impl From<SharedInterface> for RemoteV0Plus
{
	fn from(interface: SharedInterface) -> Self
	{
		warn!(
			"Probe firmware does not support the newer JTAG commands, ADIv6 acceleration or RISC-V JTAG acceleration, \
			 please update it"
		);
		Self(RemoteV0::new(interface))
	}
}

impl BmdRemoteProtocol for RemoteV0Plus
{
	fn version(&self) -> ProtocolVersion
	{
		ProtocolVersion::V0Plus
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
		None
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

impl From<SharedInterface> for RemoteV0JTAG
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}
}

impl RemoteV0JTAG
{
	/// Shift data through the scan chain 32 bits at a time, that being all old firmware can handle
	/// in one go. Only the final chunk carries the TMS transition.
	fn shift(&self, mut data_out: Option<&mut [u8]>, final_tms: bool, data_in: Option<&[u8]>, clock_cycles: usize)
		-> Result<()>
	{
		if clock_cycles == 0 || (data_in.is_none() && data_out.is_none()) {
			return Ok(());
		}
		let length = clock_cycles.div_ceil(8);
		let too_short = |data: Option<&[u8]>| data.is_some_and(|data| data.len() < length);
		if too_short(data_in) || too_short(data_out.as_deref()) {
			error!("JTAG sequence of {} cycles needs {} bytes of buffer", clock_cycles, length);
			return Err(BmdError::Parameter);
		}

		let mut offset = 0;
		for cycle in (0..clock_cycles).step_by(32) {
			let chunk_length = (clock_cycles - cycle).min(32);
			let chunk_tms = final_tms && cycle + chunk_length == clock_cycles;
			let bytes = chunk_length.div_ceil(8);

			let mut packet_data_in = 0u64;
			if let Some(data_in) = data_in {
				for (idx, byte) in data_in[offset..offset + bytes].iter().enumerate() {
					packet_data_in |= u64::from(*byte) << (idx * 8);
				}
			}

			let buffer = transact_checked(
				&self.interface,
				&codec::jtag_tdi_tdo(chunk_tms, packet_data_in, chunk_length),
				"Remote JTAG TDI/TDO sequence",
			)?;
			if let Some(data_out) = data_out.as_deref_mut() {
				let packet_data_out = RemoteResponse::parse(&buffer)?.value()?;
				for (idx, byte) in data_out[offset..offset + bytes].iter_mut().enumerate() {
					*byte = (packet_data_out >> (idx * 8)) as u8;
				}
			}
			offset += bytes;
		}
		Ok(())
	}
}

impl BmdJtagProtocol for RemoteV0JTAG
{
	fn tap_reset(&self) -> Result<()>
	{
		transact_checked(&self.interface, codec::REMOTE_JTAG_RESET, "Remote JTAG reset")?;
		Ok(())
	}

	fn tap_next(&self, tms: bool, tdi: bool) -> Result<bool>
	{
		let buffer = transact_checked(&self.interface, &codec::jtag_next(tms, tdi), "Remote JTAG next")?;
		Ok(RemoteResponse::parse(&buffer)?.value()? & 1 != 0)
	}

	fn tap_tms_seq(&self, tms_states: u32, clock_cycles: usize) -> Result<()>
	{
		transact_checked(
			&self.interface,
			&codec::jtag_tms_seq(tms_states, clock_cycles),
			"Remote JTAG TMS sequence",
		)?;
		Ok(())
	}

	fn tap_tdi_tdo_seq(
		&self,
		data_out: Option<&mut [u8]>,
		final_tms: bool,
		data_in: Option<&[u8]>,
		clock_cycles: usize,
	) -> Result<()>
	{
		self.shift(data_out, final_tms, data_in, clock_cycles)
	}

	fn tap_tdi_seq(&self, final_tms: bool, data_in: &[u8], clock_cycles: usize) -> Result<()>
	{
		self.shift(None, final_tms, Some(data_in), clock_cycles)
	}

	fn tap_cycle(&self, tms: bool, tdi: bool, clock_cycles: usize) -> Result<()>
	{
		// There's no clock cycle command before v2 so run the TAP one step at a time
		for _ in 0..clock_cycles {
			self.tap_next(tms, tdi)?;
		}
		Ok(())
	}
}

impl From<SharedInterface> for RemoteV0SWD
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}
}

impl BmdSwdProtocol for RemoteV0SWD
{
	fn seq_in(&self, clock_cycles: usize) -> Result<u32>
	{
		let buffer = transact_checked(&self.interface, &codec::swd_seq_in(clock_cycles), "Remote SWD sequence in")?;
		let result = RemoteResponse::parse(&buffer)?.value()? as u32;
		trace!("SWD seq_in {} clock cycles: {:08x}", clock_cycles, result);
		Ok(result)
	}

	fn seq_in_parity(&self, clock_cycles: usize) -> Result<(u32, bool)>
	{
		let buffer = transact_checked(
			&self.interface,
			&codec::swd_seq_in_parity(clock_cycles),
			"Remote SWD sequence in w/ parity",
		)?;
		// A parity failure comes back as a parameter error response still carrying the data
		let response = RemoteResponse::parse(&buffer)?;
		let result = response.value()? as u32;
		let parity_ok = response.status() == ResponseStatus::Ok;
		trace!(
			"SWD seq_in_parity {} clock cycles: {:08x} {}",
			clock_cycles,
			result,
			if parity_ok { "OK" } else { "ERR" }
		);
		Ok((result, parity_ok))
	}

	fn seq_out(&self, value: u32, clock_cycles: usize) -> Result<()>
	{
		trace!("SWD seq_out {} clock cycles: {:08x}", clock_cycles, value);
		transact_checked(
			&self.interface,
			&codec::swd_seq_out(value, clock_cycles),
			"Remote SWD sequence out",
		)?;
		Ok(())
	}

	fn seq_out_parity(&self, value: u32, clock_cycles: usize) -> Result<()>
	{
		trace!("SWD seq_out_parity {} clock cycles: {:08x}", clock_cycles, value);
		transact_checked(
			&self.interface,
			&codec::swd_seq_out_parity(value, clock_cycles),
			"Remote SWD sequence out w/ parity",
		)?;
		Ok(())
	}
}
