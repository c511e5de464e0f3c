// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

pub mod codec;
pub mod protocol_v0;
pub mod protocol_v1;
pub mod protocol_v2;
pub mod protocol_v3;
pub mod protocol_v4;
pub mod responder;
pub mod riscv_debug;

use std::fmt::Display;
use std::sync::{Arc, Mutex};

use bitmask_enum::bitmask;
use log::{debug, error, warn};

use crate::adiv5::BmdAdiV5Protocol;
use crate::error::{BmdError, Result};
use crate::exception::{Exception, ExceptionType};
use crate::serial::RemoteInterface;
use crate::serial::remote::codec::{REMOTE_HL_CHECK, REMOTE_START, RemoteResponse, ResponseStatus};
use crate::serial::remote::protocol_v0::{RemoteV0, RemoteV0Plus};
use crate::serial::remote::protocol_v1::RemoteV1;
use crate::serial::remote::protocol_v2::RemoteV2;
use crate::serial::remote::protocol_v3::RemoteV3;
use crate::serial::remote::protocol_v4::RemoteV4;
use crate::serial::remote::riscv_debug::RiscvDmi;

/// This is the max possible size of a remote protocol packet which a hard limitation of the
/// firmware on the probe - 1KiB is all the buffer that could be spared.
pub const REMOTE_MAX_MSG_SIZE: usize = 1024;

pub const REMOTE_SOM: u8 = b'!';
pub const REMOTE_EOM: u8 = b'#';
pub const REMOTE_RESP: u8 = b'&';

pub const REMOTE_RESP_OK: u8 = b'K';
pub const REMOTE_RESP_PARERR: u8 = b'P';
pub const REMOTE_RESP_ERR: u8 = b'E';
pub const REMOTE_RESP_NOTSUP: u8 = b'N';

// Low byte of the code carried by an error response
pub const REMOTE_ERROR_UNRECOGNISED: u64 = 1;
pub const REMOTE_ERROR_WRONGLEN: u64 = 2;
/// The access caused a fault, the next byte up is the fault code
pub const REMOTE_ERROR_FAULT: u64 = 3;
/// The access raised an exception, the rest of the code is the exception type
pub const REMOTE_ERROR_EXCEPTION: u64 = 4;

/// The interface type all the protocol implementations share their link to the probe through
pub type SharedInterface = Arc<Mutex<dyn RemoteInterface>>;

/// Types implementing this trait implement the common portion of the BMD remote protocol
/// (this includes things like comms initialisation, and clock frequency control)
pub trait BmdRemoteProtocol
{
	fn version(&self) -> ProtocolVersion;
	fn clone_interface(&self) -> SharedInterface;

	// Comms protocol initialisation functions
	fn swd_init(&self) -> Result<Box<dyn BmdSwdProtocol>>;
	fn jtag_init(&self) -> Result<Box<dyn BmdJtagProtocol>>;
	// Higher level protocol initialisation functions
	fn adiv5_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>;
	fn adiv6_init(&self) -> Option<Arc<dyn BmdAdiV5Protocol>>;
	fn riscv_jtag_init(&self) -> Result<Option<Arc<dyn BmdRiscvProtocol>>>;
	fn spi_init(&self) -> Option<Box<dyn BmdSpiProtocol>>;

	// Probe operation control functions
	fn add_jtag_dev(&self, dev_index: u8, jtag_dev: &JtagDev) -> Result<()>;
	fn get_comms_frequency(&self) -> Result<u32>;
	fn set_comms_frequency(&self, freq: u32) -> Result<bool>;
	fn target_clk_output_enable(&self, enable: bool) -> Result<()>;

	// Probe capability queries
	fn supported_accelerations(&self) -> Option<Acceleration>;
	fn supported_architectures(&self) -> Result<Option<TargetArchitecture>>;
	fn supported_families(&self) -> Result<Option<TargetFamily>>;

	/// Read the target voltage as the probe reports it, as a human-readable string
	fn target_voltage(&self) -> Result<String>
	{
		let buffer = remote_transact(&self.clone_interface(), codec::REMOTE_VOLTAGE)?;
		let response = RemoteResponse::parse(&buffer)?.expect_ok("target voltage")?;
		Ok(response.payload().to_string())
	}

	fn get_target_power_state(&self) -> Result<bool>
	{
		let buffer = remote_transact(&self.clone_interface(), codec::REMOTE_PWR_GET)?;
		let response = RemoteResponse::parse(&buffer)?.expect_ok("target power")?;
		Ok(response.value()? != 0)
	}

	fn set_target_power(&self, power: bool) -> Result<()>
	{
		let buffer = remote_transact(&self.clone_interface(), &codec::power_set(power))?;
		RemoteResponse::parse(&buffer)?.expect_ok("target power")?;
		Ok(())
	}

	fn nrst_set(&self, assert: bool) -> Result<()>
	{
		let buffer = remote_transact(&self.clone_interface(), &codec::nrst_set(assert))?;
		RemoteResponse::parse(&buffer)?.expect_ok("nRST control")?;
		Ok(())
	}

	fn nrst_get(&self) -> Result<bool>
	{
		let buffer = remote_transact(&self.clone_interface(), codec::REMOTE_NRST_GET)?;
		let response = RemoteResponse::parse(&buffer)?.expect_ok("nRST state")?;
		Ok(response.value()? != 0)
	}
}

/// Types implementing this trait drive raw SWD bit sequences, either directly on an I/O
/// port or by asking a probe to do it on our behalf
pub trait BmdSwdProtocol
{
	fn seq_in(&self, clock_cycles: usize) -> Result<u32>;
	/// Clock in some bits followed by a parity bit, also returning whether the parity checked out
	fn seq_in_parity(&self, clock_cycles: usize) -> Result<(u32, bool)>;
	fn seq_out(&self, value: u32, clock_cycles: usize) -> Result<()>;
	fn seq_out_parity(&self, value: u32, clock_cycles: usize) -> Result<()>;
}

/// Types implementing this trait drive JTAG TAP state transitions and scan shifts
pub trait BmdJtagProtocol
{
	fn tap_reset(&self) -> Result<()>;
	fn tap_next(&self, tms: bool, tdi: bool) -> Result<bool>;
	fn tap_tms_seq(&self, tms_states: u32, clock_cycles: usize) -> Result<()>;
	fn tap_tdi_tdo_seq(
		&self,
		data_out: Option<&mut [u8]>,
		final_tms: bool,
		data_in: Option<&[u8]>,
		clock_cycles: usize,
	) -> Result<()>;
	fn tap_tdi_seq(&self, final_tms: bool, data_in: &[u8], clock_cycles: usize) -> Result<()>;
	fn tap_cycle(&self, tms: bool, tdi: bool, clock_cycles: usize) -> Result<()>;
}

/// Types implementing this trait give access to the SPI buses on a probe and the Flash devices on them
pub trait BmdSpiProtocol
{
	fn begin(&self, bus: SpiBus) -> Result<bool>;
	fn end(&self, bus: SpiBus) -> Result<bool>;
	fn chip_select(&self, device_select: u8) -> Result<bool>;
	fn xfer(&self, bus: SpiBus, value: u8) -> Result<u8>;
	fn read_chip_id(&self, bus: SpiBus, device_select: u8) -> Result<SpiFlashId>;
	fn run_command(&self, bus: SpiBus, device_select: u8, command: u16, address: u32) -> Result<bool>;
	fn read(&self, bus: SpiBus, device_select: u8, command: u16, address: u32, data: &mut [u8]) -> Result<bool>;
	fn write(&self, bus: SpiBus, device_select: u8, command: u16, address: u32, data: &[u8]) -> Result<bool>;
}

/// Types implementing this trait perform RISC-V Debug Module Interface accesses
pub trait BmdRiscvProtocol
{
	/// Read a DMI register, returning None if the access failed
	fn dmi_read(&self, dmi: &RiscvDmi, address: u32) -> Result<Option<u32>>;
	/// Write a DMI register, returning whether the access succeeded
	fn dmi_write(&self, dmi: &RiscvDmi, address: u32, value: u32) -> Result<bool>;
}

/// Structure representing a device on the JTAG scan chain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JtagDev
{
	pub idcode: u32,
	pub current_ir: u32,

	pub dr_prescan: u8,
	pub dr_postscan: u8,

	pub ir_len: u8,
	pub ir_prescan: u8,
	pub ir_postscan: u8,
}

/// SPI buses a probe may expose
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpiBus
{
	Internal = 0,
	External = 1,
}

/// The JEDEC identification of a SPI Flash device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpiFlashId
{
	pub manufacturer: u8,
	pub device_type: u8,
	pub capacity: u8,
}

/// Protocol acceleration capabilities a v4+ probe may advertise
#[bitmask(u8)]
pub enum Acceleration
{
	ADIv5 = 1 << 0,
	CortexAR = 1 << 1,
	RiscV = 1 << 2,
	ADIv6 = 1 << 3,
}

/// Target architectures a probe's firmware may have support for
#[bitmask(u8)]
pub enum TargetArchitecture
{
	CortexM = 1 << 0,
	CortexAR = 1 << 1,
	RiscV32 = 1 << 2,
	RiscV64 = 1 << 3,
}

/// Target families a probe's firmware may have support for
#[bitmask(u32)]
pub enum TargetFamily
{
	AT32 = 1 << 0,
	Apollo3 = 1 << 1,
	CH32 = 1 << 2,
	CH579 = 1 << 3,
	EFM = 1 << 4,
	GD32 = 1 << 5,
	HC32 = 1 << 6,
	LPC = 1 << 7,
	MM32 = 1 << 8,
	NRF = 1 << 9,
	NXPKinetis = 1 << 10,
	Puya = 1 << 11,
	RenesasRZ = 1 << 12,
	RenesasRA = 1 << 13,
	RP = 1 << 14,
	SAM = 1 << 15,
	STM = 1 << 16,
	TI = 1 << 17,
	Xilinx = 1 << 18,
	NXPiMXRT = 1 << 19,
}

/// Write out a comma separated list of the names whose flag is set, or "none"
fn write_names<T: Copy>(
	fmt: &mut std::fmt::Formatter<'_>,
	names: &[(T, &str)],
	contains: impl Fn(T) -> bool,
) -> std::fmt::Result
{
	let mut set = names.iter().filter(|(flag, _)| contains(*flag)).map(|(_, name)| name);
	match set.next() {
		Some(name) => write!(fmt, "{}", name)?,
		None => return write!(fmt, "none"),
	}
	for name in set {
		write!(fmt, ", {}", name)?;
	}
	Ok(())
}

impl Display for Acceleration
{
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
	{
		let names = [
			(Self::ADIv5, "ADIv5"),
			(Self::CortexAR, "Cortex-A/R"),
			(Self::RiscV, "RISC-V"),
			(Self::ADIv6, "ADIv6"),
		];
		write_names(fmt, &names, |flag| self.contains(flag))
	}
}

impl Display for TargetArchitecture
{
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
	{
		let names = [
			(Self::CortexM, "ARM Cortex-M"),
			(Self::CortexAR, "ARM Cortex-A/R"),
			(Self::RiscV32, "RISC-V 32-bit"),
			(Self::RiscV64, "RISC-V 64-bit"),
		];
		write_names(fmt, &names, |flag| self.contains(flag))
	}
}

impl Display for TargetFamily
{
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
	{
		let names = [
			(Self::AT32, "AteryTek AT32"),
			(Self::Apollo3, "Ambiq Apollo3"),
			(Self::CH32, "WinChipHead CH32"),
			(Self::CH579, "WinChipHead CH579"),
			(Self::EFM, "Energy Micro EFM32"),
			(Self::GD32, "GigaDevice GD32"),
			(Self::HC32, "HDSC HC32"),
			(Self::LPC, "NXP LPC"),
			(Self::MM32, "MindMotion MM32"),
			(Self::NRF, "Nordic nRF"),
			(Self::NXPKinetis, "NXP Kinetis"),
			(Self::Puya, "Puya PY32"),
			(Self::RenesasRZ, "Renesas RZ"),
			(Self::RenesasRA, "Renesas RA"),
			(Self::RP, "Raspberry Pi RP2040/RP2350"),
			(Self::SAM, "Microchip ATSAM"),
			(Self::STM, "ST STM32"),
			(Self::TI, "TI MSP432/LM3S/TM4C"),
			(Self::Xilinx, "Xilinx Zynq"),
			(Self::NXPiMXRT, "NXP i.MXRT"),
		];
		write_names(fmt, &names, |flag| self.contains(flag))
	}
}

/// The remote protocol versions we know how to speak
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion
{
	/// Firmware that predates the version query entirely
	V0,
	/// Firmware that answers the version query with 0, which speaks the v0 vocabulary
	V0Plus,
	V1,
	V2,
	V3,
	V4,
}

impl ProtocolVersion
{
	/// The newest version this crate implements
	pub const LATEST: Self = Self::V4;

	/// Interpret the number a probe answered the version query with
	pub fn from_wire(version: u64) -> Self
	{
		match version {
			0 => Self::V0Plus,
			1 => Self::V1,
			2 => Self::V2,
			3 => Self::V3,
			4 => Self::V4,
			_ => {
				warn!("Probe speaks remote protocol v{}, newer than we support, treating it as v4", version);
				Self::LATEST
			},
		}
	}

	/// The number this version is identified by on the wire, if it has one
	pub fn to_wire(self) -> Option<u64>
	{
		match self {
			Self::V0 => None,
			Self::V0Plus => Some(0),
			Self::V1 => Some(1),
			Self::V2 => Some(2),
			Self::V3 => Some(3),
			Self::V4 => Some(4),
		}
	}

	/// The next version down from this one
	pub fn step_down(self) -> Option<Self>
	{
		match self {
			Self::V0 => None,
			Self::V0Plus => Some(Self::V0),
			Self::V1 => Some(Self::V0Plus),
			Self::V2 => Some(Self::V1),
			Self::V3 => Some(Self::V2),
			Self::V4 => Some(Self::V3),
		}
	}

	/// Build the implementation of this version of the protocol on top of an interface
	pub fn protocol_impl(self, interface: SharedInterface) -> Result<Box<dyn BmdRemoteProtocol>>
	{
		Ok(match self {
			Self::V0 => Box::new(RemoteV0::from(interface)),
			Self::V0Plus => Box::new(RemoteV0Plus::from(interface)),
			Self::V1 => Box::new(RemoteV1::from(interface)),
			Self::V2 => Box::new(RemoteV2::from(interface)),
			Self::V3 => Box::new(RemoteV3::from(interface)),
			Self::V4 => Box::new(RemoteV4::new(interface)?),
		})
	}
}

impl Display for ProtocolVersion
{
	fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
	{
		match self {
			Self::V0 => write!(fmt, "v0"),
			Self::V0Plus => write!(fmt, "v0+"),
			Self::V1 => write!(fmt, "v1"),
			Self::V2 => write!(fmt, "v2"),
			Self::V3 => write!(fmt, "v3"),
			Self::V4 => write!(fmt, "v4"),
		}
	}
}

/// Send a request and wait for the response to it
pub(crate) fn remote_transact(interface: &Mutex<dyn RemoteInterface>, request: &str) -> Result<String>
{
	let mut interface = interface.lock()?;
	interface.buffer_write(request)?;
	interface.buffer_read()
}

/// Start remote protocol communications with a probe, returning its firmware identity string
pub fn handshake(interface: &Mutex<dyn RemoteInterface>) -> Result<String>
{
	let buffer = remote_transact(interface, REMOTE_START)?;
	let response = RemoteResponse::parse(&buffer)?;
	if response.status() != ResponseStatus::Ok {
		return Err(BmdError::comms(format!("remote protocol handshake failed, got '{}'", buffer)));
	}
	debug!("Remote is {}", response.payload());
	Ok(response.payload().to_string())
}

/// Ask the probe which protocol version it speaks. Anything other than a well-formed OK response
/// means the firmware predates the question.
pub fn query_version(interface: &Mutex<dyn RemoteInterface>) -> Result<ProtocolVersion>
{
	let buffer = match remote_transact(interface, REMOTE_HL_CHECK) {
		Ok(buffer) => buffer,
		Err(BmdError::Comms(message)) => {
			warn!("No usable response to the protocol version query ({}), assuming v0", message);
			return Ok(ProtocolVersion::V0);
		},
		Err(error) => return Err(error),
	};
	let version = RemoteResponse::parse(&buffer)
		.ok()
		.filter(|response| response.status() == ResponseStatus::Ok)
		.and_then(|response| response.value().ok());
	match version {
		Some(version) => Ok(ProtocolVersion::from_wire(version)),
		None => {
			warn!("Probe firmware is too old to report its protocol version, please update it");
			Ok(ProtocolVersion::V0)
		},
	}
}

/// Work out what protocol version the probe speaks and build the implementation for it. If
/// setting up that version fails, we step down a version at a time until one works.
pub fn negotiate(interface: &SharedInterface) -> Result<Box<dyn BmdRemoteProtocol>>
{
	let mut version = query_version(interface)?;
	loop {
		debug!("Trying remote protocol {}", version);
		match version.protocol_impl(interface.clone()) {
			Ok(protocol) => return Ok(protocol),
			Err(error) => match version.step_down() {
				// An I/O error means the link itself is gone, so there's nothing to fall back to
				Some(lower) if !matches!(error, BmdError::Io(_)) => {
					warn!("Remote protocol {} init failed ({}), falling back to {}", version, error, lower);
					version = lower;
				},
				_ => return Err(error),
			},
		}
	}
}

/// Interpret the response to a v3+ target access, bridging faults and exceptions the remote saw
/// back into this side. Faults are handed to `set_fault`, exceptions are raised again here with the
/// same type. Returns whether the access succeeded.
pub(crate) fn check_remote_error(function: &str, response: &RemoteResponse<'_>, set_fault: impl FnOnce(u8))
	-> Result<bool>
{
	match response.status() {
		ResponseStatus::Ok => Ok(true),
		ResponseStatus::Error => {
			let code = response.value()?;
			match code & 0xff {
				REMOTE_ERROR_FAULT => set_fault((code >> 8) as u8),
				REMOTE_ERROR_EXCEPTION => {
					let kind = ExceptionType::from((code >> 8) as u32);
					return Err(Exception::new(kind, "Remote protocol exception").into());
				},
				error => error!("{}: Unexpected error {}", function, error),
			}
			Ok(false)
		},
		ResponseStatus::ParameterError => {
			error!("!BUG! Firmware reported a parameter error in {}", function);
			Ok(false)
		},
		ResponseStatus::NotSupported => Ok(false),
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn wire_versions()
	{
		assert_eq!(ProtocolVersion::from_wire(0), ProtocolVersion::V0Plus);
		assert_eq!(ProtocolVersion::from_wire(3), ProtocolVersion::V3);
		assert_eq!(ProtocolVersion::from_wire(9), ProtocolVersion::V4);
		assert_eq!(ProtocolVersion::V0.to_wire(), None);
		assert_eq!(ProtocolVersion::V0.step_down(), None);
		assert_eq!(ProtocolVersion::V4.step_down(), Some(ProtocolVersion::V3));
	}

	#[test]
	fn capability_names()
	{
		assert_eq!((Acceleration::ADIv5 | Acceleration::RiscV).to_string(), "ADIv5, RISC-V");
		assert_eq!(TargetArchitecture::none().to_string(), "none");
		assert_eq!(
			(TargetFamily::STM | TargetFamily::NRF).to_string(),
			"Nordic nRF, ST STM32"
		);
	}
}
