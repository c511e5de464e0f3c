// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Wire format encoders and decoders for the remote protocol. Every request the host side can
//! send is built by one of the functions here, and every response is picked apart by
//! [`RemoteResponse`]. The responder side gets [`PacketReader`] and the `respond` family.

use std::fmt::Write;

use const_format::concatcp;

use crate::adiv5::{Align, TargetAddr32, TargetAddr64};
use crate::error::{BmdError, Result};
use crate::hex::{decode_response, hexify, unhexify, unhexify_u32};
use crate::serial::remote::{
	JtagDev, REMOTE_EOM, REMOTE_MAX_MSG_SIZE, REMOTE_RESP, REMOTE_RESP_ERR, REMOTE_RESP_NOTSUP, REMOTE_RESP_OK,
	REMOTE_RESP_PARERR, REMOTE_SOM, SpiBus,
};

const SOM: char = REMOTE_SOM as char;
const EOM: char = REMOTE_EOM as char;
const RESP: char = REMOTE_RESP as char;

// Packet classes
const REMOTE_GEN_PACKET: char = 'G';
const REMOTE_HL_PACKET: char = 'H';
const REMOTE_SWD_PACKET: char = 'S';
const REMOTE_JTAG_PACKET: char = 'J';
const REMOTE_ADIV5_PACKET: char = 'A';
const REMOTE_ADIV6_PACKET: char = '6';
const REMOTE_SPI_PACKET: char = 's';
const REMOTE_RISCV_PACKET: char = 'R';

/// Start the remote protocol, the leading `+#` flushes any half-sent GDB packet out of the way
pub const REMOTE_START: &str = concatcp!('+', EOM, SOM, REMOTE_GEN_PACKET, 'A', EOM);
pub const REMOTE_VOLTAGE: &str = concatcp!(SOM, REMOTE_GEN_PACKET, 'V', EOM);
pub const REMOTE_NRST_GET: &str = concatcp!(SOM, REMOTE_GEN_PACKET, 'z', EOM);
pub const REMOTE_PWR_GET: &str = concatcp!(SOM, REMOTE_GEN_PACKET, 'p', EOM);
pub const REMOTE_FREQ_GET: &str = concatcp!(SOM, REMOTE_GEN_PACKET, 'f', EOM);

pub const REMOTE_HL_CHECK: &str = concatcp!(SOM, REMOTE_HL_PACKET, 'C', EOM);
pub const REMOTE_HL_ACCEL: &str = concatcp!(SOM, REMOTE_HL_PACKET, 'A', EOM);
pub const REMOTE_HL_ARCHS: &str = concatcp!(SOM, REMOTE_HL_PACKET, 'a', EOM);
pub const REMOTE_HL_FAMILIES: &str = concatcp!(SOM, REMOTE_HL_PACKET, 'F', EOM);

pub const REMOTE_SWD_INIT: &str = concatcp!(SOM, REMOTE_SWD_PACKET, 'S', EOM);
pub const REMOTE_JTAG_INIT: &str = concatcp!('+', EOM, SOM, REMOTE_JTAG_PACKET, 'S', EOM);
pub const REMOTE_JTAG_RESET: &str = concatcp!('+', EOM, SOM, REMOTE_JTAG_PACKET, 'R', EOM);

pub const REMOTE_RISCV_PROTOCOLS: &str = concatcp!(SOM, REMOTE_RISCV_PACKET, 'P', EOM);
pub const REMOTE_RISCV_JTAG_INIT: &str = concatcp!(SOM, REMOTE_RISCV_PACKET, 'S', 'J', EOM);

/// Length of a v1/v2/v3 memory write request ahead of its data, including the trailing EOM
pub const REMOTE_ADIV5_MEM_WRITE_LENGTH: usize = 34;
/// Length of a v4 memory write request ahead of its data, the address having grown to 64 bits
pub const REMOTE_ADIV5_MEM_WRITE_LENGTH_V4: usize = 42;
pub const REMOTE_ADIV6_MEM_WRITE_LENGTH: usize = 57;
const REMOTE_SPI_WRITE_LENGTH: usize = 22;

/// How many bytes one read response can carry, allowing for the status byte and 2 hex digits a byte
pub const REMOTE_ADIV5_MEM_READ_BLOCK: usize = (REMOTE_MAX_MSG_SIZE - 2) / 2;
pub const REMOTE_ADIV5_MEM_READ_BLOCK_V4: usize = (REMOTE_MAX_MSG_SIZE - 3) / 2;

/// How many bytes of data fit into one write request with the given header, rounded down to the alignment
pub fn write_block_size(header_length: usize, align: Align) -> usize
{
	((REMOTE_MAX_MSG_SIZE - header_length) / 2) & align.mask()
}

pub fn spi_write_block_size() -> usize
{
	(REMOTE_MAX_MSG_SIZE - REMOTE_SPI_WRITE_LENGTH) / 2
}

fn bool_digit(value: bool) -> char
{
	if value { '1' } else { '0' }
}

/// Finish off a request that carries a data payload after its fixed fields
fn finish_with_data(mut request: String, data: &[u8]) -> Result<String>
{
	hexify(&mut request, data);
	request.push(EOM);
	if request.len() > REMOTE_MAX_MSG_SIZE {
		return Err(BmdError::Overflow(request.len()));
	}
	Ok(request)
}

pub fn power_set(power: bool) -> String
{
	format!("{SOM}{REMOTE_GEN_PACKET}P{}{EOM}", bool_digit(power))
}

pub fn nrst_set(assert: bool) -> String
{
	format!("{SOM}{REMOTE_GEN_PACKET}Z{}{EOM}", bool_digit(assert))
}

pub fn freq_set(frequency: u32) -> String
{
	format!("{SOM}{REMOTE_GEN_PACKET}F{frequency:08x}{EOM}")
}

pub fn clk_output_enable(enable: bool) -> String
{
	format!("{SOM}{REMOTE_GEN_PACKET}E{}{EOM}", bool_digit(enable))
}

pub fn swd_seq_in(clock_cycles: usize) -> String
{
	format!("{SOM}{REMOTE_SWD_PACKET}i{clock_cycles:02x}{EOM}")
}

pub fn swd_seq_in_parity(clock_cycles: usize) -> String
{
	format!("{SOM}{REMOTE_SWD_PACKET}I{clock_cycles:02x}{EOM}")
}

pub fn swd_seq_out(value: u32, clock_cycles: usize) -> String
{
	format!("{SOM}{REMOTE_SWD_PACKET}o{clock_cycles:02x}{value:x}{EOM}")
}

pub fn swd_seq_out_parity(value: u32, clock_cycles: usize) -> String
{
	format!("{SOM}{REMOTE_SWD_PACKET}O{clock_cycles:02x}{value:x}{EOM}")
}

pub fn jtag_tms_seq(tms_states: u32, clock_cycles: usize) -> String
{
	format!("{SOM}{REMOTE_JTAG_PACKET}T{clock_cycles:02x}{tms_states:x}{EOM}")
}

/// Shift up to 64 bits through the scan chain, `D` variant setting TMS on the final bit
pub fn jtag_tdi_tdo(final_tms: bool, data: u64, clock_cycles: usize) -> String
{
	let op = if final_tms { 'D' } else { 'd' };
	format!("{SOM}{REMOTE_JTAG_PACKET}{op}{clock_cycles:02x}{data:x}{EOM}")
}

pub fn jtag_next(tms: bool, tdi: bool) -> String
{
	format!("{SOM}{REMOTE_JTAG_PACKET}N{}{}{EOM}", bool_digit(tms), bool_digit(tdi))
}

pub fn jtag_cycle(tms: bool, tdi: bool, clock_cycles: usize) -> String
{
	format!("{SOM}{REMOTE_JTAG_PACKET}c{}{}{clock_cycles:08x}{EOM}", bool_digit(tms), bool_digit(tdi))
}

pub fn add_jtag_dev(dev_index: u8, jtag_dev: &JtagDev) -> String
{
	format!(
		"{SOM}{REMOTE_HL_PACKET}J{dev_index:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:08x}{EOM}",
		jtag_dev.dr_prescan,
		jtag_dev.dr_postscan,
		jtag_dev.ir_len,
		jtag_dev.ir_prescan,
		jtag_dev.ir_postscan,
		jtag_dev.current_ir,
	)
}

/// The packet class and operation IDs an ADIv5 relay uses. The v1 and v3 relays carry the same
/// fields but v3 reassigned every ID when it introduced structured error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdiV5Relay
{
	pub class: char,
	pub raw_access: char,
	pub mem_read: char,
	pub mem_write: char,
}

pub const ADIV5_RELAY_V1: AdiV5Relay = AdiV5Relay {
	class: REMOTE_HL_PACKET,
	raw_access: 'L',
	mem_read: 'M',
	mem_write: 'm',
};

pub const ADIV5_RELAY_V3: AdiV5Relay = AdiV5Relay {
	class: REMOTE_ADIV5_PACKET,
	raw_access: 'R',
	mem_read: 'm',
	mem_write: 'M',
};

impl AdiV5Relay
{
	pub fn raw_access(&self, dev_index: u8, rnw: u8, addr: u16, value: u32) -> String
	{
		format!("{SOM}{}{}{dev_index:02x}{rnw:02x}{addr:04x}{value:08x}{EOM}", self.class, self.raw_access)
	}

	pub fn dp_read(&self, dev_index: u8, addr: u16) -> String
	{
		format!("{SOM}{}d{dev_index:02x}ff{addr:04x}{EOM}", self.class)
	}

	pub fn ap_read(&self, dev_index: u8, apsel: u8, addr: u16) -> String
	{
		format!("{SOM}{}a{dev_index:02x}{apsel:02x}{addr:04x}{EOM}", self.class)
	}

	pub fn ap_write(&self, dev_index: u8, apsel: u8, addr: u16, value: u32) -> String
	{
		format!("{SOM}{}A{dev_index:02x}{apsel:02x}{addr:04x}{value:08x}{EOM}", self.class)
	}

	pub fn mem_read(&self, dev_index: u8, apsel: u8, csw: u32, src: TargetAddr32, count: usize) -> String
	{
		format!(
			"{SOM}{}{}{dev_index:02x}{apsel:02x}{csw:08x}{src:08x}{count:08x}{EOM}",
			self.class, self.mem_read
		)
	}

	pub fn mem_write(
		&self,
		dev_index: u8,
		apsel: u8,
		csw: u32,
		align: Align,
		dest: TargetAddr32,
		data: &[u8],
	) -> Result<String>
	{
		let request = format!(
			"{SOM}{}{}{dev_index:02x}{apsel:02x}{csw:08x}{:02x}{dest:08x}{:08x}",
			self.class,
			self.mem_write,
			align as u8,
			data.len()
		);
		finish_with_data(request, data)
	}
}

pub fn adiv5_mem_read_v4(dev_index: u8, apsel: u8, csw: u32, src: TargetAddr64, count: usize) -> String
{
	format!("{SOM}{REMOTE_ADIV5_PACKET}m{dev_index:02x}{apsel:02x}{csw:08x}{src:016x}{count:08x}{EOM}")
}

pub fn adiv5_mem_write_v4(
	dev_index: u8,
	apsel: u8,
	csw: u32,
	align: Align,
	dest: TargetAddr64,
	data: &[u8],
) -> Result<String>
{
	let request = format!(
		"{SOM}{REMOTE_ADIV5_PACKET}M{dev_index:02x}{apsel:02x}{csw:08x}{:02x}{dest:016x}{:08x}",
		align as u8,
		data.len()
	);
	finish_with_data(request, data)
}

/// Tell the probe the version of the DP that following requests address
pub fn adiv5_dp_version(version: u8) -> String
{
	format!("{SOM}{REMOTE_ADIV5_PACKET}V{version:02x}{EOM}")
}

pub fn adiv5_targetsel(targetsel: u32) -> String
{
	format!("{SOM}{REMOTE_ADIV5_PACKET}T{targetsel:08x}{EOM}")
}

pub fn adiv6_ap_read(dev_index: u8, base: TargetAddr64, addr: u16) -> String
{
	format!("{SOM}{REMOTE_ADIV5_PACKET}{REMOTE_ADIV6_PACKET}a{dev_index:02x}{base:016x}{addr:04x}{EOM}")
}

pub fn adiv6_ap_write(dev_index: u8, base: TargetAddr64, addr: u16, value: u32) -> String
{
	format!("{SOM}{REMOTE_ADIV5_PACKET}{REMOTE_ADIV6_PACKET}A{dev_index:02x}{base:016x}{addr:04x}{value:08x}{EOM}")
}

pub fn adiv6_mem_read(dev_index: u8, base: TargetAddr64, csw: u32, src: TargetAddr64, count: usize) -> String
{
	format!(
		"{SOM}{REMOTE_ADIV5_PACKET}{REMOTE_ADIV6_PACKET}m{dev_index:02x}{base:016x}{csw:08x}{src:016x}{count:08x}{EOM}"
	)
}

pub fn adiv6_mem_write(
	dev_index: u8,
	base: TargetAddr64,
	csw: u32,
	align: Align,
	dest: TargetAddr64,
	data: &[u8],
) -> Result<String>
{
	let request = format!(
		"{SOM}{REMOTE_ADIV5_PACKET}{REMOTE_ADIV6_PACKET}M{dev_index:02x}{base:016x}{csw:08x}{:02x}{dest:016x}{:08x}",
		align as u8,
		data.len()
	);
	finish_with_data(request, data)
}

pub fn riscv_dmi_read(dev_index: u8, idle_cycles: u8, address_width: u8, address: u32) -> String
{
	format!("{SOM}{REMOTE_RISCV_PACKET}d{dev_index:02x}{idle_cycles:02x}{address_width:02x}{address:08x}{EOM}")
}

pub fn riscv_dmi_write(dev_index: u8, idle_cycles: u8, address_width: u8, address: u32, value: u32) -> String
{
	format!(
		"{SOM}{REMOTE_RISCV_PACKET}D{dev_index:02x}{idle_cycles:02x}{address_width:02x}{address:08x}{value:08x}{EOM}"
	)
}

pub fn spi_begin(bus: SpiBus) -> String
{
	format!("+{EOM}{SOM}{REMOTE_SPI_PACKET}B{:02x}{EOM}", bus as u8)
}

pub fn spi_end(bus: SpiBus) -> String
{
	format!("{SOM}{REMOTE_SPI_PACKET}E{:02x}{EOM}", bus as u8)
}

pub fn spi_chip_select(device_select: u8) -> String
{
	format!("{SOM}{REMOTE_SPI_PACKET}C{device_select:02x}{EOM}")
}

pub fn spi_xfer(bus: SpiBus, value: u8) -> String
{
	format!("{SOM}{REMOTE_SPI_PACKET}X{:02x}{value:02x}{EOM}", bus as u8)
}

pub fn spi_chip_id(bus: SpiBus, device_select: u8) -> String
{
	format!("{SOM}{REMOTE_SPI_PACKET}I{:02x}{device_select:02x}{EOM}", bus as u8)
}

pub fn spi_run_command(bus: SpiBus, device_select: u8, command: u16, address: u32) -> String
{
	format!(
		"{SOM}{REMOTE_SPI_PACKET}c{:02x}{device_select:02x}{command:04x}{:06x}{EOM}",
		bus as u8,
		address & 0x00ff_ffff
	)
}

pub fn spi_read(bus: SpiBus, device_select: u8, command: u16, address: u32, length: usize) -> String
{
	format!(
		"{SOM}{REMOTE_SPI_PACKET}r{:02x}{device_select:02x}{command:04x}{:06x}{length:04x}{EOM}",
		bus as u8,
		address & 0x00ff_ffff
	)
}

pub fn spi_write(bus: SpiBus, device_select: u8, command: u16, address: u32, data: &[u8]) -> Result<String>
{
	let request = format!(
		"{SOM}{REMOTE_SPI_PACKET}w{:02x}{device_select:02x}{command:04x}{:06x}{:04x}",
		bus as u8,
		address & 0x00ff_ffff,
		data.len()
	);
	finish_with_data(request, data)
}

/// The status a remote response starts with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseStatus
{
	Ok,
	Error,
	NotSupported,
	ParameterError,
}

/// A response from the remote, split into its status and whatever data followed it
#[derive(Clone, Copy, Debug)]
pub struct RemoteResponse<'a>
{
	status: ResponseStatus,
	payload: &'a str,
}

impl<'a> RemoteResponse<'a>
{
	/// Pick apart a response as handed back by [`crate::serial::RemoteInterface::buffer_read`]
	pub fn parse(buffer: &'a str) -> Result<Self>
	{
		let Some(&status) = buffer.as_bytes().first() else {
			return Err(BmdError::comms("empty response from the probe"));
		};
		let status = match status {
			REMOTE_RESP_OK => ResponseStatus::Ok,
			REMOTE_RESP_ERR => ResponseStatus::Error,
			REMOTE_RESP_NOTSUP => ResponseStatus::NotSupported,
			REMOTE_RESP_PARERR => ResponseStatus::ParameterError,
			_ => return Err(BmdError::comms(format!("garbled response from the probe '{}'", buffer))),
		};
		Ok(Self {
			status,
			payload: &buffer[1..],
		})
	}

	pub fn status(&self) -> ResponseStatus
	{
		self.status
	}

	pub fn payload(&self) -> &'a str
	{
		self.payload
	}

	/// Decode the payload as a number sent most significant digit first
	pub fn value(&self) -> Result<u64>
	{
		decode_response(self.payload.as_bytes())
	}

	/// Decode the payload as a 32-bit register value sent as target-order bytes
	pub fn register(&self) -> Result<u32>
	{
		unhexify_u32(self.payload.as_bytes())
	}

	/// Decode the payload as a run of bytes, filling all of `data`
	pub fn data(&self, data: &mut [u8]) -> Result<()>
	{
		unhexify(data, self.payload.as_bytes())
	}

	/// Turn anything but an OK response into the matching error
	pub fn expect_ok(self, operation: &'static str) -> Result<Self>
	{
		match self.status {
			ResponseStatus::Ok => Ok(self),
			ResponseStatus::NotSupported => Err(BmdError::NotSupported(operation)),
			ResponseStatus::ParameterError => Err(BmdError::Parameter),
			ResponseStatus::Error => Err(BmdError::Remote(self.value().unwrap_or(0))),
		}
	}
}

/// Cursor over a request packet for the responder, reading off the fixed-width hex fields in turn
pub struct PacketReader<'a>
{
	packet: &'a [u8],
	offset: usize,
}

impl<'a> PacketReader<'a>
{
	/// Wrap a request, which may or may not still have its SOM and EOM markers on it
	pub fn new(packet: &'a [u8]) -> Self
	{
		let packet = packet.strip_prefix(&[REMOTE_SOM]).unwrap_or(packet);
		let packet = packet.strip_suffix(&[REMOTE_EOM]).unwrap_or(packet);
		Self {
			packet,
			offset: 0,
		}
	}

	pub fn byte(&mut self) -> Result<u8>
	{
		let byte = *self.packet.get(self.offset).ok_or(BmdError::Parameter)?;
		self.offset += 1;
		Ok(byte)
	}

	fn field(&mut self, digits: usize) -> Result<u64>
	{
		let end = self.offset + digits;
		let field = self.packet.get(self.offset..end).ok_or(BmdError::Parameter)?;
		self.offset = end;
		decode_response(field).map_err(|_| BmdError::Parameter)
	}

	pub fn u8(&mut self) -> Result<u8>
	{
		Ok(self.field(2)? as u8)
	}

	pub fn u16(&mut self) -> Result<u16>
	{
		Ok(self.field(4)? as u16)
	}

	pub fn u24(&mut self) -> Result<u32>
	{
		Ok(self.field(6)? as u32)
	}

	pub fn u32(&mut self) -> Result<u32>
	{
		Ok(self.field(8)? as u32)
	}

	pub fn u64(&mut self) -> Result<u64>
	{
		self.field(16)
	}

	/// Read a variable-width number that runs to the end of the packet
	pub fn remainder_value(&mut self) -> Result<u64>
	{
		let value = decode_response(&self.packet[self.offset..]).map_err(|_| BmdError::Parameter)?;
		self.offset = self.packet.len();
		Ok(value)
	}

	/// Decode the hex data that runs to the end of the packet into bytes
	pub fn remainder_data(&mut self, data: &mut [u8]) -> Result<()>
	{
		let hex = &self.packet[self.offset..];
		if hex.len() != data.len() * 2 {
			return Err(BmdError::Parameter);
		}
		unhexify(data, hex).map_err(|_| BmdError::Parameter)?;
		self.offset = self.packet.len();
		Ok(())
	}

	pub fn is_empty(&self) -> bool
	{
		self.offset >= self.packet.len()
	}
}

/// Build a response carrying a number, most significant digit first with no padding
pub fn respond(status: u8, value: u64) -> String
{
	format!("{RESP}{}{value:x}{EOM}", status as char)
}

/// Build an OK response carrying a register value as target-order bytes
pub fn respond_register(value: u32) -> String
{
	respond_buf(REMOTE_RESP_OK, &value.to_le_bytes())
}

pub fn respond_buf(status: u8, data: &[u8]) -> String
{
	let mut response = String::with_capacity(data.len() * 2 + 3);
	response.push(RESP);
	response.push(status as char);
	hexify(&mut response, data);
	response.push(EOM);
	response
}

/// Build a response carrying a string. Characters that would break the framing are blanked out.
pub fn respond_str(status: u8, message: &str) -> String
{
	let mut response = String::with_capacity(message.len() + 3);
	let _ = write!(response, "{RESP}{}", status as char);
	response.extend(
		message
			.chars()
			.map(|c| if matches!(c, '$' | '!' | '#') { ' ' } else { c }),
	);
	response.push(EOM);
	response
}
