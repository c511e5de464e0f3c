// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::{BmdError, Result};
use crate::serial::RemoteInterface;
use crate::serial::remote::REMOTE_MAX_MSG_SIZE;
use crate::serial::remote::responder::RemoteResponder;

/// An in-process link to a [`RemoteResponder`], standing in for a probe on the end of a serial port.
/// Every request packet that goes through it is kept so tests can check exactly what was sent.
pub struct LoopbackInterface
{
	responder: RemoteResponder,
	responses: VecDeque<String>,
	requests: Vec<String>,
}

impl LoopbackInterface
{
	pub fn new(responder: RemoteResponder) -> Self
	{
		Self {
			responder,
			responses: VecDeque::new(),
			requests: Vec::new(),
		}
	}

	/// Build the interface ready to be handed to the protocol layer. The result coerces to a
	/// [`crate::serial::remote::SharedInterface`] while still letting the caller inspect the traffic.
	pub fn shared(responder: RemoteResponder) -> Arc<Mutex<Self>>
	{
		Arc::new(Mutex::new(Self::new(responder)))
	}

	pub fn responder(&self) -> &RemoteResponder
	{
		&self.responder
	}

	/// Every request packet seen so far, oldest first
	pub fn requests(&self) -> &[String]
	{
		&self.requests
	}

	pub fn request_count(&self) -> usize
	{
		self.requests.len()
	}

	pub fn clear_requests(&mut self)
	{
		self.requests.clear();
	}
}

impl RemoteInterface for LoopbackInterface
{
	fn buffer_write(&mut self, message: &str) -> Result<()>
	{
		debug!("Remote write: {}", message);
		if message.len() > REMOTE_MAX_MSG_SIZE {
			return Err(BmdError::Overflow(message.len()));
		}
		// A message may carry more than one packet, and anything between packets (such as
		// the `+#` that flushes GDB traffic) is not for us
		let mut remaining = message;
		while let Some(start) = remaining.find('!') {
			let Some(length) = remaining[start..].find('#') else {
				return Err(BmdError::comms(format!("unterminated request '{}'", &remaining[start..])));
			};
			let (packet, rest) = remaining[start..].split_at(length + 1);
			self.requests.push(packet.to_string());
			let response = self.responder.process(packet);
			self.responses.push_back(response);
			remaining = rest;
		}
		Ok(())
	}

	fn buffer_read(&mut self) -> Result<String>
	{
		let response = self
			.responses
			.pop_front()
			.ok_or_else(|| BmdError::comms("timed out waiting for a response from the probe"))?;
		let response = response
			.strip_prefix('&')
			.and_then(|response| response.strip_suffix('#'))
			.ok_or_else(|| BmdError::comms(format!("garbled response '{}'", response)))?;
		debug!("Remote read: {}", response);
		Ok(response.to_string())
	}
}

#[cfg(test)]
mod tests
{
	use color_eyre::eyre::Result;

	use super::*;
	use crate::adiv5::swd::SwdEngine;
	use crate::fake_target::{FakeSwdBus, FakeTarget};
	use crate::serial::remote::ProtocolVersion;

	fn loopback(version: ProtocolVersion) -> LoopbackInterface
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = Arc::new(SwdEngine::new(Box::new(bus)));
		LoopbackInterface::new(RemoteResponder::new(engine, version))
	}

	#[test]
	fn flush_prefix_is_skipped() -> Result<()>
	{
		let mut interface = loopback(ProtocolVersion::V4);
		interface.buffer_write("+#!HC#")?;
		assert_eq!(interface.requests(), ["!HC#"]);
		assert_eq!(interface.buffer_read()?, "K4");
		assert_eq!(interface.responder().version(), ProtocolVersion::V4);
		Ok(())
	}

	#[test]
	fn no_pending_response_is_a_comms_failure()
	{
		let mut interface = loopback(ProtocolVersion::V4);
		assert!(matches!(interface.buffer_read(), Err(BmdError::Comms(_))));
	}

	#[test]
	fn unterminated_request_is_refused()
	{
		let mut interface = loopback(ProtocolVersion::V4);
		assert!(interface.buffer_write("!HC").is_err());
		assert_eq!(interface.request_count(), 0);
	}
}
