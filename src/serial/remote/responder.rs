// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The probe side of the remote protocol. [`RemoteResponder`] takes request packets as the host
//! sends them and serves them with a local SWD engine (and, when given one, a JTAG scan chain),
//! producing the response packets a probe's firmware would. Every request is handled under its own exception handler so that nothing a
//! target does can take the responder down: exceptions and DP faults are turned into error
//! responses the host side knows how to turn back into the same conditions.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::adiv5::swd::SwdEngine;
use crate::adiv5::{AdiV5AccessPort, AdiV5DebugPort, Align, TargetAddr64};
use crate::error::{BmdError, Result};
use crate::exception::{ExceptionType, catch};
use crate::serial::remote::codec::{
	self, PacketReader, REMOTE_ADIV5_MEM_READ_BLOCK, REMOTE_ADIV5_MEM_READ_BLOCK_V4,
};
use crate::serial::remote::{
	Acceleration, BmdJtagProtocol, JtagDev, ProtocolVersion, REMOTE_ERROR_EXCEPTION, REMOTE_ERROR_FAULT,
	REMOTE_ERROR_UNRECOGNISED, REMOTE_ERROR_WRONGLEN, REMOTE_RESP_ERR, REMOTE_RESP_NOTSUP, REMOTE_RESP_OK, REMOTE_RESP_PARERR, TargetArchitecture, TargetFamily,
};

const DEFAULT_IDENTITY: &str = "Black Magic Probe (Simulated) v2.0.0";
const TARGET_VOLTAGE: &str = "3.3V";
const DEFAULT_FREQUENCY: u32 = 4_000_000;

/// Answers remote protocol requests the way a probe running a given protocol version would
pub struct RemoteResponder
{
	swd: Arc<SwdEngine>,
	jtag: Option<Box<dyn BmdJtagProtocol>>,
	version: ProtocolVersion,
	identity: String,

	/// The DP requests are performed against, re-pointed at whichever device each request names
	dp: AdiV5DebugPort,

	nrst: bool,
	power: bool,
	frequency: u32,
	clock_output: bool,
}

impl RemoteResponder
{
	pub fn new(swd: Arc<SwdEngine>, version: ProtocolVersion) -> Self
	{
		let dp = AdiV5DebugPort::new(swd.clone());
		Self {
			swd,
			jtag: None,
			version,
			identity: DEFAULT_IDENTITY.into(),
			dp,
			nrst: false,
			power: false,
			frequency: DEFAULT_FREQUENCY,
			clock_output: true,
		}
	}

	pub fn with_identity(mut self, identity: impl Into<String>) -> Self
	{
		self.identity = identity.into();
		self
	}

	/// Serve JTAG requests by driving the given scan chain
	pub fn with_jtag(mut self, jtag: impl BmdJtagProtocol + 'static) -> Self
	{
		self.jtag = Some(Box::new(jtag));
		self
	}

	pub fn version(&self) -> ProtocolVersion
	{
		self.version
	}

	pub fn accelerations(&self) -> Acceleration
	{
		Acceleration::ADIv5
	}

	pub fn architectures(&self) -> TargetArchitecture
	{
		TargetArchitecture::CortexM
	}

	pub fn families(&self) -> TargetFamily
	{
		TargetFamily::STM | TargetFamily::RP | TargetFamily::NRF
	}

	/// Handle one request packet (with or without its `!` and `#` markers), returning the response packet
	pub fn process(&mut self, packet: &str) -> String
	{
		debug!("Remote request: {}", packet);
		let mut reader = PacketReader::new(packet.as_bytes());
		let result = self.dispatch(&mut reader);
		let response = match catch(ExceptionType::all_types(), result) {
			Ok(Ok(response)) => response,
			Ok(Err(exception)) => {
				error!("Exception while handling '{}': {}", packet, exception);
				self.recover_dp();
				if self.version >= ProtocolVersion::V3 {
					codec::respond(
						REMOTE_RESP_ERR,
						REMOTE_ERROR_EXCEPTION | (u64::from(exception.kind().bits()) << 8),
					)
				} else {
					codec::respond(REMOTE_RESP_ERR, 0)
				}
			},
			Err(BmdError::Parameter | BmdError::Overflow(_)) => codec::respond(REMOTE_RESP_PARERR, 0),
			Err(BmdError::NotSupported(what)) => {
				debug!("Request for unsupported {}", what);
				codec::respond(REMOTE_RESP_NOTSUP, 0)
			},
			Err(error) => {
				error!("Failed to handle '{}': {}", packet, error);
				codec::respond(REMOTE_RESP_ERR, 0)
			},
		};
		debug!("Remote response: {}", response);
		response
	}

	fn dispatch(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let Ok(class) = reader.byte() else {
			return Ok(unrecognised());
		};
		match class {
			b'G' => self.process_general(reader),
			b'S' => self.process_swd(reader),
			b'H' if self.version >= ProtocolVersion::V0Plus => self.process_high_level(reader),
			b'A' if self.version >= ProtocolVersion::V3 => self.process_adiv5(reader),
			b'J' => self.process_jtag(reader),
			// There are no SPI or RISC-V drivers behind this responder
			b's' => Err(BmdError::NotSupported("SPI")),
			b'R' => Err(BmdError::NotSupported("RISC-V")),
			_ => Ok(unrecognised()),
		}
	}

	fn process_general(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let has_clock_control = self.version >= ProtocolVersion::V2;
		Ok(match reader.byte()? {
			b'A' => codec::respond_str(REMOTE_RESP_OK, &self.identity),
			b'V' => codec::respond_str(REMOTE_RESP_OK, TARGET_VOLTAGE),
			b'Z' => {
				self.nrst = reader.byte()? == b'1';
				debug!("nRST {}", if self.nrst { "asserted" } else { "released" });
				ok()
			},
			b'z' => codec::respond(REMOTE_RESP_OK, u64::from(self.nrst)),
			b'P' => {
				self.power = reader.byte()? == b'1';
				ok()
			},
			b'p' => codec::respond(REMOTE_RESP_OK, u64::from(self.power)),
			b'F' if has_clock_control => {
				self.frequency = reader.u32()?;
				debug!("Interface frequency set to {}Hz", self.frequency);
				ok()
			},
			b'f' if has_clock_control => codec::respond(REMOTE_RESP_OK, u64::from(self.frequency)),
			b'E' if has_clock_control => {
				self.clock_output = reader.byte()? == b'1';
				ok()
			},
			_ => unrecognised(),
		})
	}

	fn process_swd(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let swd = self.swd.sequencer();
		Ok(match reader.byte()? {
			b'S' => ok(),
			b'i' => {
				let ticks = reader.u8()?;
				codec::respond(REMOTE_RESP_OK, u64::from(swd.seq_in(ticks.into())?))
			},
			b'I' => {
				let ticks = reader.u8()?;
				let (value, parity_ok) = swd.seq_in_parity(ticks.into())?;
				codec::respond(if parity_ok { REMOTE_RESP_OK } else { REMOTE_RESP_PARERR }, u64::from(value))
			},
			b'o' => {
				let ticks = reader.u8()?;
				swd.seq_out(reader.remainder_value()? as u32, ticks.into())?;
				ok()
			},
			b'O' => {
				let ticks = reader.u8()?;
				swd.seq_out_parity(reader.remainder_value()? as u32, ticks.into())?;
				ok()
			},
			_ => unrecognised(),
		})
	}

	fn process_jtag(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let Some(jtag) = self.jtag.as_deref() else {
			return Err(BmdError::NotSupported("JTAG"));
		};
		// Requests that stop short of their fields are a length problem as far as JTAG goes
		match Self::jtag_request(jtag, self.version, reader) {
			Err(BmdError::Parameter) => Ok(codec::respond(REMOTE_RESP_ERR, REMOTE_ERROR_WRONGLEN)),
			result => result,
		}
	}

	fn jtag_request(jtag: &dyn BmdJtagProtocol, version: ProtocolVersion, reader: &mut PacketReader<'_>)
		-> Result<String>
	{
		let op = reader.byte()?;
		match op {
			b'S' => {
				debug!("JTAG init");
				jtag.tap_reset()?;
				Ok(ok())
			},
			b'R' => {
				jtag.tap_reset()?;
				Ok(ok())
			},
			b'T' => Self::jtag_tms_seq(jtag, reader),
			b'd' | b'D' => Self::jtag_shift(jtag, reader, op == b'D'),
			b'N' => {
				let tms = reader.byte()? == b'1';
				let tdi = reader.byte()? == b'1';
				let tdo = jtag.tap_next(tms, tdi)?;
				Ok(codec::respond(REMOTE_RESP_OK, u64::from(tdo)))
			},
			b'c' if version >= ProtocolVersion::V2 => {
				let tms = reader.byte()? == b'1';
				let tdi = reader.byte()? == b'1';
				let cycles = reader.u32()? as usize;
				jtag.tap_cycle(tms, tdi, cycles)?;
				Ok(ok())
			},
			_ => Ok(unrecognised()),
		}
	}

	fn jtag_tms_seq(jtag: &dyn BmdJtagProtocol, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let ticks = usize::from(reader.u8()?);
		let tms_states = reader.remainder_value()?;
		if ticks > 32 {
			return Err(BmdError::Parameter);
		}
		jtag.tap_tms_seq(tms_states as u32, ticks)?;
		Ok(ok())
	}

	fn jtag_shift(jtag: &dyn BmdJtagProtocol, reader: &mut PacketReader<'_>, final_tms: bool) -> Result<String>
	{
		let ticks = usize::from(reader.u8()?);
		let data_in = reader.remainder_value()?;
		if ticks == 0 || ticks > 64 {
			return Err(BmdError::Parameter);
		}
		let length = ticks.div_ceil(8);
		let mut data_out = [0u8; 8];
		jtag.tap_tdi_tdo_seq(
			Some(&mut data_out[..length]),
			final_tms,
			Some(&data_in.to_le_bytes()[..length]),
			ticks,
		)?;
		let mask = u64::MAX >> (64 - ticks);
		Ok(codec::respond(REMOTE_RESP_OK, u64::from_le_bytes(data_out) & mask))
	}

	fn process_high_level(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let op = reader.byte()?;
		// v0+ firmware only knows how to say what version it is
		if self.version == ProtocolVersion::V0Plus && op != b'C' {
			return Ok(unrecognised());
		}
		let relay = matches!(self.version, ProtocolVersion::V1 | ProtocolVersion::V2);
		let v4 = self.version >= ProtocolVersion::V4;
		match op {
			b'C' => Ok(codec::respond(REMOTE_RESP_OK, self.version.to_wire().unwrap_or(0))),
			b'J' => self.add_jtag_dev(reader),
			// v4 reuses the v1 relay's AP IDs for its capability queries
			b'A' if v4 => Ok(codec::respond(REMOTE_RESP_OK, u64::from(self.accelerations().bits()))),
			b'a' if v4 => Ok(codec::respond(REMOTE_RESP_OK, u64::from(self.architectures().bits()))),
			b'F' if v4 => Ok(codec::respond(REMOTE_RESP_OK, u64::from(self.families().bits()))),
			b'L' if relay => self.raw_access(reader),
			b'd' if relay => self.dp_read(reader),
			b'a' if relay => self.ap_read(reader),
			b'A' if relay => self.ap_write(reader),
			b'M' if relay => self.mem_read(reader, false),
			b'm' if relay => self.mem_write(reader, false),
			_ => Ok(unrecognised()),
		}
	}

	fn process_adiv5(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let v4 = self.version >= ProtocolVersion::V4;
		match reader.byte()? {
			b'V' if v4 => {
				let version = reader.u8()?;
				debug!("DP version now {}", version);
				self.dp.set_version(version);
				Ok(ok())
			},
			b'T' if v4 => {
				let targetsel = reader.u32()?;
				debug!("TARGETSEL now {:08x}", targetsel);
				let changed = self.dp.targetsel() != targetsel;
				self.dp.set_targetsel(targetsel);
				// Only a line reset followed by a TARGETSEL write moves the selection on a multi-drop bus
				if changed && self.dp.version() >= 2 {
					self.dp.error(true)?;
				}
				Ok(ok())
			},
			b'6' if v4 => Err(BmdError::NotSupported("ADIv6")),
			b'R' => self.raw_access(reader),
			b'd' => self.dp_read(reader),
			b'a' => self.ap_read(reader),
			b'A' => self.ap_write(reader),
			b'm' => self.mem_read(reader, v4),
			b'M' => self.mem_write(reader, v4),
			_ => Ok(unrecognised()),
		}
	}

	fn add_jtag_dev(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		let dev_index = reader.u8()?;
		let jtag_dev = JtagDev {
			dr_prescan: reader.u8()?,
			dr_postscan: reader.u8()?,
			ir_len: reader.u8()?,
			ir_prescan: reader.u8()?,
			ir_postscan: reader.u8()?,
			current_ir: reader.u32()?,
			..JtagDev::default()
		};
		debug!("JTAG device {}: {:?}", dev_index, jtag_dev);
		Ok(ok())
	}

	fn raw_access(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		self.dp.set_dev_index(reader.u8()?);
		let rnw = reader.u8()?;
		let addr = reader.u16()?;
		let value = reader.u32()?;
		let result = self.dp.low_access(rnw, addr, value)?;
		self.target_response(codec::respond_register(result))
	}

	fn dp_read(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		self.dp.set_dev_index(reader.u8()?);
		// The APSEL field is unused for DP reads
		reader.u8()?;
		let addr = reader.u16()?;
		let value = self.dp.dp_read(addr)?;
		self.target_response(codec::respond_register(value))
	}

	fn ap_read(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		self.dp.set_dev_index(reader.u8()?);
		let apsel = reader.u8()?;
		let addr = reader.u16()?;
		let value = AdiV5AccessPort::new(&self.dp, apsel).read(addr)?;
		self.target_response(codec::respond_register(value))
	}

	fn ap_write(&mut self, reader: &mut PacketReader<'_>) -> Result<String>
	{
		self.dp.set_dev_index(reader.u8()?);
		let apsel = reader.u8()?;
		let addr = reader.u16()?;
		let value = reader.u32()?;
		AdiV5AccessPort::new(&self.dp, apsel).write(addr, value)?;
		self.target_response(ok())
	}

	/// Read an address field, 64-bit for v4 memory requests and 32-bit before that
	fn address(reader: &mut PacketReader<'_>, wide: bool) -> Result<TargetAddr64>
	{
		if wide { reader.u64() } else { reader.u32().map(u64::from) }
	}

	fn mem_read(&mut self, reader: &mut PacketReader<'_>, wide: bool) -> Result<String>
	{
		self.dp.set_dev_index(reader.u8()?);
		let apsel = reader.u8()?;
		let csw = reader.u32()?;
		let src = Self::address(reader, wide)?;
		let count = reader.u32()? as usize;
		let limit = if wide { REMOTE_ADIV5_MEM_READ_BLOCK_V4 } else { REMOTE_ADIV5_MEM_READ_BLOCK };
		if count > limit {
			warn!("Memory read of {} bytes will not fit in a response", count);
			return Err(BmdError::Parameter);
		}

		let mut ap = AdiV5AccessPort::new(&self.dp, apsel);
		ap.set_csw(csw);
		let mut data = vec![0u8; count];
		ap.mem_read(&mut data, src)?;
		self.target_response(codec::respond_buf(REMOTE_RESP_OK, &data))
	}

	fn mem_write(&mut self, reader: &mut PacketReader<'_>, wide: bool) -> Result<String>
	{
		self.dp.set_dev_index(reader.u8()?);
		let apsel = reader.u8()?;
		let csw = reader.u32()?;
		let align = Align::try_from(reader.u8()?).map_err(|_| BmdError::Parameter)?;
		let dest = Self::address(reader, wide)?;
		let length = reader.u32()? as usize;
		if length & (align.bytes() - 1) != 0 {
			error!("Memory write of {} bytes does not fit {} alignment", length, align);
			return Ok(codec::respond(REMOTE_RESP_ERR, 0));
		}
		let mut data = vec![0u8; length];
		reader.remainder_data(&mut data)?;

		let mut ap = AdiV5AccessPort::new(&self.dp, apsel);
		ap.set_csw(csw);
		ap.mem_write(dest, &data, align)?;
		self.target_response(ok())
	}

	/// If the request left the DP faulted, report the fault in place of `response` and recover the
	/// DP so the next request starts clean
	fn target_response(&self, response: String) -> Result<String>
	{
		let fault = self.dp.fault();
		if fault == 0 {
			return Ok(response);
		}
		debug!("Request faulted with {}", fault);
		self.dp.error(false)?;
		if self.version >= ProtocolVersion::V3 {
			Ok(codec::respond(REMOTE_RESP_ERR, REMOTE_ERROR_FAULT | (u64::from(fault) << 8)))
		} else {
			Ok(codec::respond(REMOTE_RESP_ERR, 0))
		}
	}

	/// Get the DP back out of whatever state an exception left it in
	fn recover_dp(&self)
	{
		if self.dp.fault() == 0 {
			return;
		}
		if let Err(error) = self.dp.error(false) {
			warn!("Failed to recover DP after exception: {}", error);
		}
	}
}

fn ok() -> String
{
	codec::respond(REMOTE_RESP_OK, 0)
}

fn unrecognised() -> String
{
	codec::respond(REMOTE_RESP_ERR, REMOTE_ERROR_UNRECOGNISED)
}

#[cfg(test)]
mod tests
{
	use std::time::Duration;

	use super::*;
	use crate::fake_target::{FakeJtagChain, FakeSwdBus, FakeTap, FakeTarget, SimulatedFault, TapState};

	fn responder_for(bus: &FakeSwdBus, version: ProtocolVersion) -> RemoteResponder
	{
		let engine = SwdEngine::new(Box::new(bus.clone())).with_wait_timeout(Duration::from_millis(10));
		RemoteResponder::new(Arc::new(engine), version)
	}

	#[test]
	fn version_and_identity()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V3).with_identity("Test probe");
		assert_eq!(responder.process("!GA#"), "&KTest probe#");
		assert_eq!(responder.process("!HC#"), "&K3#");
		assert_eq!(responder.process("!GV#"), "&K3.3V#");
	}

	#[test]
	fn old_firmware_emulation()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut v0 = responder_for(&bus, ProtocolVersion::V0);
		assert_eq!(v0.process("!HC#"), "&E1#");
		let mut v0_plus = responder_for(&bus, ProtocolVersion::V0Plus);
		assert_eq!(v0_plus.process("!HC#"), "&K0#");
		assert_eq!(v0_plus.process("!Hd00ff0000#"), "&E1#");
		let mut v2 = responder_for(&bus, ProtocolVersion::V2);
		assert_eq!(v2.process("!HA#"), "&P0#");
		assert_eq!(v2.process("!Ad00ff0000#"), "&E1#");
		assert_eq!(v2.process("!GF003d0900#"), "&K0#");
		assert_eq!(v2.process("!Gf#"), "&K3d0900#");
	}

	#[test]
	fn capability_queries()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V4);
		assert_eq!(responder.process("!HA#"), "&K1#");
		assert_eq!(responder.process("!Ha#"), "&K1#");
		assert_eq!(responder.process("!HF#"), "&K14200#");
	}

	#[test]
	fn unknown_and_unsupported_requests()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V4);
		assert_eq!(responder.process("!Q#"), "&E1#");
		assert_eq!(responder.process("!Gq#"), "&E1#");
		assert_eq!(responder.process("#"), "&E1#");
		assert_eq!(responder.process("!JS#"), "&N0#");
		assert_eq!(responder.process("!RSJ#"), "&N0#");
		assert_eq!(responder.process("!Ad00ff#"), "&P0#");
	}

	#[test]
	fn dp_read_relay()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V3);
		assert_eq!(responder.process("!Ad00ff0000#"), "&K7714a02b#");
		let mut v1 = responder_for(&bus, ProtocolVersion::V1);
		assert_eq!(v1.process("!Hd00ff0000#"), "&K7714a02b#");
	}

	#[test]
	fn fault_is_reported_and_cleared()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V3);
		bus.inject_fault(SimulatedFault::WaitForever);
		// WAIT timeout leaves fault 2, carried above REMOTE_ERROR_FAULT
		assert_eq!(responder.process("!Ad00ff0004#"), "&E203#");
		bus.clear_fault();
		assert_eq!(responder.process("!Ad00ff0000#"), "&K7714a02b#");
	}

	#[test]
	fn old_relay_faults_are_opaque()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V2);
		bus.inject_fault(SimulatedFault::WaitForever);
		assert_eq!(responder.process("!Hd00ff0004#"), "&E0#");
	}

	#[test]
	fn exception_becomes_error_response()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V3);
		bus.inject_fault(SimulatedFault::BadParity);
		assert_eq!(responder.process("!Ad00ff0000#"), "&E104#");
		// The responder carries on afterwards
		assert_eq!(responder.process("!Ad00ff0000#"), "&K7714a02b#");
	}

	#[test]
	fn misaligned_write_length_is_refused()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let mut responder = responder_for(&bus, ProtocolVersion::V3);
		assert_eq!(responder.process("!AM0000230000400220000000000000030a0b0c#"), "&E0#");
	}

	#[test]
	fn jtag_requests_drive_the_scan_chain()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let chain = FakeJtagChain::new([FakeTap::new(0x4ba00477, 4), FakeTap::new(0x06413041, 5)]);
		let mut responder = responder_for(&bus, ProtocolVersion::V2).with_jtag(chain.clone());
		assert_eq!(responder.process("!JS#"), "&K0#");
		assert_eq!(chain.tap_state(), TapState::TestLogicReset);
		assert_eq!(responder.process("!JT042#"), "&K0#");
		assert_eq!(chain.tap_state(), TapState::ShiftDR);
		// The first TAP's IDCODE, then the second's with TMS raised on its last bit
		assert_eq!(responder.process("!Jd20ffffffff#"), "&K4ba00477#");
		assert_eq!(responder.process("!JD20ffffffff#"), "&K6413041#");
		assert_eq!(chain.tap_state(), TapState::Exit1DR);
		assert_eq!(responder.process("!JN10#"), "&K0#");
		assert_eq!(chain.tap_state(), TapState::UpdateDR);
		assert_eq!(responder.process("!Jc0000000003#"), "&K0#");
		assert_eq!(chain.tap_state(), TapState::RunTestIdle);
		assert_eq!(chain.clocks(), 5 + 4 + 64 + 1 + 3);
	}

	#[test]
	fn malformed_jtag_requests()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let chain = FakeJtagChain::new([FakeTap::new(0x4ba00477, 4)]);
		let mut v0 = responder_for(&bus, ProtocolVersion::V0).with_jtag(chain.clone());
		assert_eq!(v0.process("!Jd#"), "&E2#");
		assert_eq!(v0.process("!JN1#"), "&E2#");
		assert_eq!(v0.process("!Jd41ff#"), "&E2#");
		// Clock cycle runs only arrived with v2
		assert_eq!(v0.process("!Jc0000000003#"), "&E1#");
		assert_eq!(v0.process("!Jq#"), "&E1#");
		assert_eq!(v0.process("!J#"), "&E2#");
		assert_eq!(chain.clocks(), 0);
	}
}
