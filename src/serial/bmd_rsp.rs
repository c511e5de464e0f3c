// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::error::{BmdError, Result};
use crate::serial::RemoteInterface;
use crate::serial::remote::{REMOTE_EOM, REMOTE_MAX_MSG_SIZE, REMOTE_RESP};
use crate::timeout::PlatformTimeout;

/// How long to wait for a complete response to arrive from the probe
const REMOTE_READ_TIMEOUT: Duration = Duration::from_millis(2000);

/// The remote protocol spoken over a probe's GDB serial interface
pub struct BmdRspInterface
{
	handle: File,

	read_buffer: [u8; REMOTE_MAX_MSG_SIZE],
	read_buffer_fullness: usize,
	read_buffer_offset: usize,
}

impl BmdRspInterface
{
	pub fn from_path(serial_port: &Path) -> Result<Self>
	{
		// Get the serial interface to the probe open
		debug!("Opening remote protocol interface {}", serial_port.display());
		let handle = File::options().read(true).write(true).open(serial_port)?;

		let result = Self {
			handle,
			read_buffer: [0; REMOTE_MAX_MSG_SIZE],
			read_buffer_fullness: 0,
			read_buffer_offset: 0,
		};

		// Call the OS-specific handle configuration function to ready
		// the interface handle for use with the remote serial protocol
		result.init_handle()?;

		Ok(result)
	}

	fn read_byte(&mut self, timeout: &PlatformTimeout) -> Result<u8>
	{
		// Refill the buffer if we've used up everything in it
		while self.read_buffer_offset == self.read_buffer_fullness {
			if timeout.is_expired() {
				return Err(BmdError::comms("timed out waiting for a response from the probe"));
			}
			// With the port set up with VMIN = 0, this returns 0 bytes when the read times out
			self.read_buffer_fullness = self.handle.read(&mut self.read_buffer)?;
			self.read_buffer_offset = 0;
		}
		let byte = self.read_buffer[self.read_buffer_offset];
		self.read_buffer_offset += 1;
		Ok(byte)
	}
}

impl RemoteInterface for BmdRspInterface
{
	fn buffer_write(&mut self, message: &str) -> Result<()>
	{
		debug!("Remote write: {}", message);
		if message.len() > REMOTE_MAX_MSG_SIZE {
			return Err(BmdError::Overflow(message.len()));
		}
		self.handle.write_all(message.as_bytes())?;
		Ok(())
	}

	fn buffer_read(&mut self) -> Result<String>
	{
		let timeout = PlatformTimeout::new(REMOTE_READ_TIMEOUT);
		// Skip over anything that isn't part of a response, such as left over GDB traffic
		while self.read_byte(&timeout)? != REMOTE_RESP {}

		let mut response = Vec::new();
		loop {
			let byte = self.read_byte(&timeout)?;
			if byte == REMOTE_EOM {
				break;
			}
			if response.len() == REMOTE_MAX_MSG_SIZE {
				return Err(BmdError::comms("response from the probe is too long"));
			}
			response.push(byte);
		}

		let response = String::from_utf8(response)
			.map_err(|_| BmdError::comms("response from the probe is not valid ASCII"))?;
		debug!("Remote read: {}", response);
		Ok(response)
	}
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
impl BmdRspInterface
{
	fn init_handle(&self) -> Result<()>
	{
		use std::os::fd::AsRawFd;

		#[cfg(any(target_os = "linux", target_os = "android"))]
		use termios::os::linux::CRTSCTS;
		#[cfg(target_os = "macos")]
		use termios::os::macos::CRTSCTS;
		use termios::*;

		// Extract the current termios config for the handle
		let fd = self.handle.as_raw_fd();
		let mut attrs = Termios::from_fd(fd)?;

		// Reconfigure the attributes for 8-bit characters, no CTS/RTS hardware control flow,
		// w/ no model control signalling
		attrs.c_cflag &= !(CSIZE | CSTOPB | CRTSCTS);
		attrs.c_cflag |= CS8 | CLOCAL | CREAD;
		// Disable break character handling and turn off XON/XOFF based control flow
		attrs.c_iflag &= !(IGNBRK | IXON | IXOFF | IXANY);
		// Disable all signaling, echo, remapping and delays
		attrs.c_lflag = 0;
		attrs.c_oflag = 0;
		// Make reads not block, and set 0.5s for read timeout
		attrs.c_cc[VMIN] = 0;
		attrs.c_cc[VTIME] = 5;

		// Reconfigure the handle with the new termios config
		tcsetattr(fd, TCSANOW, &attrs)?;

		// Let the caller know that we successfully got done
		Ok(())
	}
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
impl BmdRspInterface
{
	fn init_handle(&self) -> Result<()>
	{
		// The platform's defaults for a CDC-ACM port are already raw 8N1
		Ok(())
	}
}
