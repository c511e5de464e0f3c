// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::cell::Cell;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::adiv5::{AdiV5AccessPort, AdiV5DebugPort, Align, BmdAdiV5Protocol, TargetAddr64};
use crate::error::Result;
use crate::serial::remote::codec::{
	self, REMOTE_ADIV5_MEM_READ_BLOCK_V4, REMOTE_ADIV5_MEM_WRITE_LENGTH_V4, REMOTE_ADIV6_MEM_WRITE_LENGTH,
	RemoteResponse, ResponseStatus, write_block_size,
};
use crate::serial::remote::protocol_v3::{
	RemoteV3, RemoteV3ADIv5, adiv5_mem_read_blocks, adiv5_mem_write_blocks, adiv5_read_register,
	adiv5_write_register,
};
use crate::serial::remote::riscv_debug::RiscvDmi;
use crate::serial::remote::{
	Acceleration, BmdJtagProtocol, BmdRemoteProtocol, BmdRiscvProtocol, BmdSpiProtocol, BmdSwdProtocol, JtagDev,
	ProtocolVersion, SharedInterface, TargetArchitecture, TargetFamily, check_remote_error, remote_transact,
};

/// Bit in the RISC-V protocols response indicating JTAG DTM support
const REMOTE_RISCV_PROTOCOL_JTAG: u64 = 1 << 0;

pub struct RemoteV4
{
	/// We're a superset of the v3 protocol, this is an instance of that version of the protocol so we
	/// can access the unchanged machinary from it such as the SWD and JTAG low-level protocol components.
	/// This version of the protocol defines new high-level protocol components and support commands only.
	inner_protocol: RemoteV3,
	/// The accelerations the probe told us it has
	accelerations: Acceleration,
	/// The RISC-V Debug Transport Module protocols the probe can accelerate
	riscv_protocols: u64,
}

/// The v4 ADIv5 relay, which is the v3 relay with 64-bit memory addressing and DP state tracking
pub struct RemoteV4ADIv5
{
	inner: RemoteV3ADIv5,
	interface: SharedInterface,

	/// Whether the probe understands being told the DP version, cleared the first time it doesn't
	have_dp_version_command: Cell<bool>,
	/// The DP version last announced to the probe
	current_dp_version: Cell<Option<u8>>,
	have_targetsel_command: Cell<bool>,
	/// The TARGETSEL value last announced to the probe
	current_targetsel: Cell<Option<u32>>,
}

/// The v4 ADIv6 relay, where APs are addressed by their base address on the DP's resource bus
pub struct RemoteV4ADIv6
{
	adiv5: RemoteV4ADIv5,
}

pub struct RemoteV4RiscvJTAG
{
	interface: SharedInterface,
}

impl RemoteV4
{
	/// Set up v4 comms, asking the probe what accelerations it has. If the probe doesn't answer
	/// that it isn't really speaking v4, and the caller should try a lower version.
	pub(crate) fn new(interface: SharedInterface) -> Result<Self>
	{
		let inner_protocol = RemoteV3::new(interface);

		let buffer = inner_protocol.transact(codec::REMOTE_HL_ACCEL)?;
		let accelerations = Acceleration::from(
			RemoteResponse::parse(&buffer)?
				.expect_ok("acceleration query")?
				.value()? as u8,
		);
		debug!("Probe accelerations: {:?}", accelerations);

		// For RISC-V we have to ask the acceleration backend what protocols it supports
		let riscv_protocols = if accelerations.contains(Acceleration::RiscV) {
			let buffer = inner_protocol.transact(codec::REMOTE_RISCV_PROTOCOLS)?;
			RemoteResponse::parse(&buffer)?
				.expect_ok("RISC-V protocols query")?
				.value()?
		} else {
			0
		};

		Ok(Self {
			inner_protocol,
			accelerations,
			riscv_protocols,
		})
	}
}

impl BmdRemoteProtocol for RemoteV4
{
	fn version(&self) -> ProtocolVersion
	{
		ProtocolVersion::V4
	}

	fn clone_interface(&self) -> SharedInterface
	{
		self.inner_protocol.clone_interface()
	}

	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>
	{
		self.inner_protocol.jtag_init()
	}

	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>
	{
		self.inner_protocol.swd_init()
	}

	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		if !self.accelerations.contains(Acceleration::ADIv5) {
			warn!("Probe does not support ADIv5 acceleration");
			return None;
		}
		Some(Arc::new(RemoteV4ADIv5::from(self.clone_interface())))
	}

	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>
	{
		if !self.accelerations.contains(Acceleration::ADIv6) {
			return None;
		}
		Some(Arc::new(RemoteV4ADIv6::from(self.clone_interface())))
	}

	fn riscv_jtag_init(&self) -> Result<Option<Arc<dyn BmdRiscvProtocol>>>
	{
		if self.riscv_protocols & REMOTE_RISCV_PROTOCOL_JTAG == 0 {
			return Ok(None);
		}
		let buffer = self.inner_protocol.transact(codec::REMOTE_RISCV_JTAG_INIT)?;
		if RemoteResponse::parse(&buffer)?.status() != ResponseStatus::Ok {
			error!("Remote RISC-V JTAG init failed");
			return Ok(None);
		}
		Ok(Some(Arc::new(RemoteV4RiscvJTAG::from(self.clone_interface()))))
	}

	fn spi_init(&self) -> Option<Box<dyn BmdSpiProtocol>>
	{
		self.inner_protocol.spi_init()
	}

	fn add_jtag_dev(&self, dev_index: u8, jtag_dev: &JtagDev) -> Result<()>
	{
		self.inner_protocol.add_jtag_dev(dev_index, jtag_dev)
	}

	fn get_comms_frequency(&self) -> Result<u32>
	{
		self.inner_protocol.get_comms_frequency()
	}

	fn set_comms_frequency(&self, freq: u32) -> Result<bool>
	{
		self.inner_protocol.set_comms_frequency(freq)
	}

	fn target_clk_output_enable(&self, enable: bool) -> Result<()>
	{
		self.inner_protocol.target_clk_output_enable(enable)
	}

	fn supported_accelerations(&self) -> Option<Acceleration>
	{
		Some(self.accelerations)
	}

	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>
	{
		let buffer = self.inner_protocol.transact(codec::REMOTE_HL_ARCHS)?;
		let response = RemoteResponse::parse(&buffer)?.expect_ok("architectures query")?;
		Ok(Some(TargetArchitecture::from(response.value()? as u8)))
	}

	fn supported_families(&self) -> Result<Option<TargetFamily>>
	{
		let buffer = self.inner_protocol.transact(codec::REMOTE_HL_FAMILIES)?;
		let response = RemoteResponse::parse(&buffer)?.expect_ok("families query")?;
		Ok(Some(TargetFamily::from(response.value()? as u32)))
	}
}

impl From<SharedInterface> for RemoteV4ADIv5
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			inner: RemoteV3ADIv5::from(interface.clone()),
			interface,
			have_dp_version_command: Cell::new(true),
			current_dp_version: Cell::new(None),
			have_targetsel_command: Cell::new(true),
			current_targetsel: Cell::new(None),
		}
	}
}

impl RemoteV4ADIv5
{
	/// Make sure the probe knows which DP version and multi-drop target the next request is for,
	/// only saying anything when that has changed since last time
	fn sync_dp(&self, dp: &AdiV5DebugPort) -> Result<()>
	{
		if self.have_dp_version_command.get() && self.current_dp_version.get() != Some(dp.version()) {
			let buffer = remote_transact(&self.interface, &codec::adiv5_dp_version(dp.version()))?;
			if RemoteResponse::parse(&buffer)?.status() == ResponseStatus::Ok {
				self.current_dp_version.set(Some(dp.version()));
			} else {
				warn!("Please upgrade your firmware to allow ADIv6 devices to work properly");
				self.have_dp_version_command.set(false);
			}
		}

		if dp.version() >= 2 &&
			self.have_targetsel_command.get() &&
			self.current_targetsel.get() != Some(dp.targetsel())
		{
			let buffer = remote_transact(&self.interface, &codec::adiv5_targetsel(dp.targetsel()))?;
			if RemoteResponse::parse(&buffer)?.status() == ResponseStatus::Ok {
				self.current_targetsel.set(Some(dp.targetsel()));
			} else {
				warn!("Probe cannot be told the multi-drop target selection, please update it");
				self.have_targetsel_command.set(false);
			}
		}
		Ok(())
	}
}

impl BmdAdiV5Protocol for RemoteV4ADIv5
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		self.sync_dp(dp)?;
		self.inner.raw_access(dp, rnw, addr, value)
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32>
	{
		self.sync_dp(dp)?;
		self.inner.dp_read(dp, addr)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort<'_>, addr: u16) -> Result<u32>
	{
		self.sync_dp(ap.dp())?;
		self.inner.ap_read(ap, addr)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort<'_>, addr: u16, value: u32) -> Result<()>
	{
		self.sync_dp(ap.dp())?;
		self.inner.ap_write(ap, addr, value)
	}

	fn mem_read(&self, ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>
	{
		if dest.is_empty() {
			return Ok(());
		}
		let dp = ap.dp();
		self.sync_dp(dp)?;
		debug!("Remote memory read @{:08x}+{:x}", src, dest.len());
		adiv5_mem_read_blocks(&self.interface, dp, dest, src, REMOTE_ADIV5_MEM_READ_BLOCK_V4, |address, count| {
			codec::adiv5_mem_read_v4(dp.dev_index(), ap.apsel(), ap.csw(), address, count)
		})
	}

	fn mem_write(&self, ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
	{
		if src.is_empty() {
			return Ok(());
		}
		let dp = ap.dp();
		self.sync_dp(dp)?;
		debug!("Remote memory write @{:08x}+{:x} alignment {}", dest, src.len(), align);
		let blocksize = write_block_size(REMOTE_ADIV5_MEM_WRITE_LENGTH_V4, align);
		adiv5_mem_write_blocks(&self.interface, dp, dest, src, blocksize, |address, data| {
			codec::adiv5_mem_write_v4(dp.dev_index(), ap.apsel(), ap.csw(), align, address, data)
		})
	}
}

impl From<SharedInterface> for RemoteV4ADIv6
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			adiv5: RemoteV4ADIv5::from(interface),
		}
	}
}

impl BmdAdiV5Protocol for RemoteV4ADIv6
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		self.adiv5.raw_access(dp, rnw, addr, value)
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32>
	{
		self.adiv5.dp_read(dp, addr)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort<'_>, addr: u16) -> Result<u32>
	{
		let dp = ap.dp();
		self.adiv5.sync_dp(dp)?;
		let request = codec::adiv6_ap_read(dp.dev_index(), ap.address(), addr);
		let value = adiv5_read_register(&self.adiv5.interface, dp, &request, "adiv6_ap_read")?;
		debug!("Remote AP read: {:016x}+{:04x} -> {:08x}", ap.address(), addr, value);
		Ok(value)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort<'_>, addr: u16, value: u32) -> Result<()>
	{
		let dp = ap.dp();
		self.adiv5.sync_dp(dp)?;
		let request = codec::adiv6_ap_write(dp.dev_index(), ap.address(), addr, value);
		if adiv5_write_register(&self.adiv5.interface, dp, &request, "adiv6_ap_write")? {
			debug!("Remote AP write: {:016x}+{:04x} <- {:08x}", ap.address(), addr, value);
		}
		Ok(())
	}

	fn mem_read(&self, ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>
	{
		if dest.is_empty() {
			return Ok(());
		}
		let dp = ap.dp();
		self.adiv5.sync_dp(dp)?;
		adiv5_mem_read_blocks(
			&self.adiv5.interface,
			dp,
			dest,
			src,
			REMOTE_ADIV5_MEM_READ_BLOCK_V4,
			|address, count| codec::adiv6_mem_read(dp.dev_index(), ap.address(), ap.csw(), address, count),
		)
	}

	fn mem_write(&self, ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
	{
		if src.is_empty() {
			return Ok(());
		}
		let dp = ap.dp();
		self.adiv5.sync_dp(dp)?;
		let blocksize = write_block_size(REMOTE_ADIV6_MEM_WRITE_LENGTH, align);
		adiv5_mem_write_blocks(&self.adiv5.interface, dp, dest, src, blocksize, |address, data| {
			codec::adiv6_mem_write(dp.dev_index(), ap.address(), ap.csw(), align, address, data)
		})
	}
}

impl From<SharedInterface> for RemoteV4RiscvJTAG
{
	fn from(interface: SharedInterface) -> Self
	{
		Self {
			interface,
		}
	}
}

impl BmdRiscvProtocol for RemoteV4RiscvJTAG
{
	fn dmi_read(&self, dmi: &RiscvDmi, address: u32) -> Result<Option<u32>>
	{
		let request = codec::riscv_dmi_read(dmi.dev_index(), dmi.idle_cycles(), dmi.address_width(), address);
		let buffer = remote_transact(&self.interface, &request)?;
		let response = RemoteResponse::parse(&buffer)?;
		if !check_remote_error("dmi_read", &response, |fault| dmi.set_fault(fault))? {
			return Ok(None);
		}
		let value = response.register()?;
		debug!("Remote DMI read: {:08x} -> {:08x}", address, value);
		Ok(Some(value))
	}

	fn dmi_write(&self, dmi: &RiscvDmi, address: u32, value: u32) -> Result<bool>
	{
		let request =
			codec::riscv_dmi_write(dmi.dev_index(), dmi.idle_cycles(), dmi.address_width(), address, value);
		let buffer = remote_transact(&self.interface, &request)?;
		let ok = check_remote_error("dmi_write", &RemoteResponse::parse(&buffer)?, |fault| dmi.set_fault(fault))?;
		if ok {
			debug!("Remote DMI write: {:08x} <- {:08x}", address, value);
		}
		Ok(ok)
	}
}
