// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::sync::Arc;

use log::{debug, error, warn};

use crate::adiv5::BmdAdiV5Protocol;
use crate::error::Result;
use crate::serial::remote::codec::{self, RemoteResponse, ResponseStatus};
use crate::serial::remote::protocol_v0::{RemoteV0JTAG, transact_checked};
use crate::serial::remote::protocol_v1::RemoteV1;
use crate::serial::remote::{
	Acceleration, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSpiProtocol, BmdSwdProtocol, JtagDev,
	ProtocolVersion, SharedInterface, TargetArchitecture, TargetFamily, remote_transact,
};

/// The frequency reported when the probe cannot tell us its own
const FREQ_FIXED: u32 = u32::MAX;

pub struct RemoteV2(RemoteV1);

/// v2 JTAG is the v0 implementation plus a native clock cycle command
pub struct RemoteV2JTAG
{
	inner: RemoteV0JTAG,
	interface: SharedInterface,
}

impl From<SharedInterface> for RemoteV2
{
	fn from(interface: SharedInterface) -> Self
	{
		warn!(
			"Probe firmware does not support ADIv6 acceleration or RISC-V JTAG acceleration, please update it"
		);
		Self::new(interface)
	}
}

impl RemoteV2
{
	pub(crate) fn new(interface: SharedInterface) -> Self
	{
		Self(RemoteV1::new(interface))
	}

	pub(crate) fn transact(&self, request: &str) -> Result<String>
	{
		self.0.transact(request)
	}
}

impl BmdRemoteProtocol for RemoteV2
{
	fn version(&self) -> ProtocolVersion
	{
		ProtocolVersion::V2
	}

	fn clone_interface(&self) -> SharedInterface
	{
		self.0.clone_interface()
	}

	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		debug!("Remote JTAG init");
		let interface = self.clone_interface();
		transact_checked(&interface, codec::REMOTE_JTAG_INIT, "Remote JTAG init")?;
		Ok(Box::new(RemoteV2JTAG::from(interface)))
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		self.0.swd_init()
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		self.0.adiv5_init()
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
		let buffer = self.transact(codec::REMOTE_FREQ_GET)?;
		let response = RemoteResponse::parse(&buffer)?;
		if response.status() != ResponseStatus::Ok {
			error!("Remote frequency query failed");
			return Ok(FREQ_FIXED);
		}
		Ok(response.value()? as u32)
	}

	fn set_comms_frequency(&self, freq: u32) -> Result<bool>
	{
		let buffer = self.transact(&codec::freq_set(freq))?;
		let accepted = RemoteResponse::parse(&buffer)?.status() == ResponseStatus::Ok;
		if !accepted {
			error!("Remote frequency update to {}Hz failed", freq);
		}
		Ok(accepted)
	}

	fn target_clk_output_enable(&self, enable: bool) -> Result<()>
	{
		let buffer = self.transact(&codec::clk_output_enable(enable))?;
		if RemoteResponse::parse(&buffer)?.status() != ResponseStatus::Ok {
			error!("Remote clock output {} failed", if enable { "enable" } else { "disable" });
		}
		Ok(())
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

impl From<SharedInterface> for RemoteV2JTAG
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			inner: RemoteV0JTAG::from(interface.clone()),
			interface,
		}
	}
}

impl BmdJtagProtocol for RemoteV2JTAG
{
	fn tap_reset(&self) -> Result<()>
	{
		self.inner.tap_reset()
	}

	fn tap_next(&self, tms: bool, tdi: bool) -> Result<bool>
	{
		self.inner.tap_next(tms, tdi)
	}

	fn tap_tms_seq(&self, tms_states: u32, clock_cycles: usize) -> Result<()>
	{
		self.inner.tap_tms_seq(tms_states, clock_cycles)
	}

	fn tap_tdi_tdo_seq(
		&self,
		data_out: Option<&mut [u8]>,
		final_tms: bool,
		data_in: Option<&[u8]>,
		clock_cycles: usize,
	) -> Result<()>
	{
		self.inner.tap_tdi_tdo_seq(data_out, final_tms, data_in, clock_cycles)
	}

	fn tap_tdi_seq(&self, final_tms: bool, data_in: &[u8], clock_cycles: usize) -> Result<()>
	{
		self.inner.tap_tdi_seq(final_tms, data_in, clock_cycles)
	}

	fn tap_cycle(&self, tms: bool, tdi: bool, clock_cycles: usize) -> Result<()>
	{
		let buffer = remote_transact(&self.interface, &codec::jtag_cycle(tms, tdi, clock_cycles))?;
		RemoteResponse::parse(&buffer)?.expect_ok("JTAG clock cycles")?;
		Ok(())
	}
}
