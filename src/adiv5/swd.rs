// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! The SWD-DP transaction engine. This turns DP and AP register accesses into SWD request
//! headers, acknowledgements and data phases on top of a bit-sequence driver, handling the
//! WAIT/FAULT retry state machine, line resets, dormant state wake-up and multi-drop selection.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::adiv5::{
	ADIV5_APNDP, ADIV5_DP_ABORT, ADIV5_DP_ABORT_DAPABORT, ADIV5_DP_ABORT_ORUNERRCLR, ADIV5_DP_ABORT_STKCMPCLR,
	ADIV5_DP_ABORT_STKERRCLR, ADIV5_DP_ABORT_WDERRCLR, ADIV5_DP_BANK0, ADIV5_DP_BANK2, ADIV5_DP_CTRLSTAT,
	ADIV5_DP_CTRLSTAT_CDBGPWRUPACK, ADIV5_DP_CTRLSTAT_CDBGPWRUPREQ, ADIV5_DP_CTRLSTAT_CSYSPWRUPACK,
	ADIV5_DP_CTRLSTAT_CSYSPWRUPREQ, ADIV5_DP_DPIDR, ADIV5_DP_RDBUFF, ADIV5_DP_SELECT,
	ADIV5_DP_TARGETID, ADIV5_DP_TARGETID_TDESIGNER_MASK, ADIV5_DP_TARGETID_TPARTNO_MASK, ADIV5_DP_TARGETSEL,
	ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET, ADIV5_LOW_READ, ADIV5_LOW_WRITE, AdiV5AccessPort, AdiV5DebugPort, Align,
	BmdAdiV5Protocol, TargetAddr64, mem_read_via_ap, mem_write_via_ap, sticky_errors,
};
use crate::error::Result;
use crate::exception::{Exception, ExceptionType, catch};
use crate::log_and_return;
use crate::serial::remote::BmdSwdProtocol;
use crate::timeout::PlatformTimeout;

pub const SWDP_ACK_OK: u8 = 0x01;
pub const SWDP_ACK_WAIT: u8 = 0x02;
pub const SWDP_ACK_FAULT: u8 = 0x04;
/// What an undriven (pulled-up) line reads as during the ACK phase
pub const SWDP_ACK_NO_RESPONSE: u8 = 0x07;

/// How long a target may keep answering WAIT before we give up on the access
pub const SWD_WAIT_TIMEOUT: Duration = Duration::from_millis(250);
/// How long to wait for the debug and system power domains to acknowledge power-up
const SWD_POWERUP_TIMEOUT: Duration = Duration::from_millis(250);

pub const ADIV5_SELECTION_ALERT_SEQUENCE: [u32; 4] = [0x6209f392, 0x86852d95, 0xe3ddafe9, 0x19bc0ea2];
pub const ADIV5_ACTIVATION_CODE_ARM_SWD_DP: u32 = 0x1a;
pub const ADIV5_JTAG_TO_SWD_SELECT_SEQUENCE: u32 = 0xe79e;

const ADIV5_DP_ABORT_ALL_STICKY: u32 =
	ADIV5_DP_ABORT_ORUNERRCLR | ADIV5_DP_ABORT_WDERRCLR | ADIV5_DP_ABORT_STKERRCLR | ADIV5_DP_ABORT_STKCMPCLR;

/// Build the 8-bit SWD request header for an access: start and park bits, APnDP, RnW,
/// A[3:2] and the even parity over those four bits
pub fn make_packet_request(rnw: u8, addr: u16) -> u8
{
	let ap_not_dp = addr & ADIV5_APNDP != 0;
	let addr = (addr & 0xc) as u8;
	// Park and start bits
	let mut request = 0x81u8;
	// Each field bit that gets set also flips the parity bit
	if ap_not_dp {
		request ^= 0x22;
	}
	if rnw != 0 {
		request ^= 0x24;
	}
	request |= (addr << 1) & 0x18;
	if addr == 4 || addr == 8 {
		request ^= 0x20;
	}
	request
}

/// The TARGETSEL value that selects a given multi-drop instance of a target
pub fn multidrop_targetsel(instance: u8, targetid: u32) -> u32
{
	(u32::from(instance) << ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET) |
		(targetid & (ADIV5_DP_TARGETID_TDESIGNER_MASK | ADIV5_DP_TARGETID_TPARTNO_MASK)) |
		1
}

pub struct SwdEngine
{
	swd: Box<dyn BmdSwdProtocol>,
	wait_timeout: Duration,
}

impl SwdEngine
{
	pub fn new(swd: Box<dyn BmdSwdProtocol>) -> Self
	{
		Self {
			swd,
			wait_timeout: SWD_WAIT_TIMEOUT,
		}
	}

	pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self
	{
		self.wait_timeout = wait_timeout;
		self
	}

	pub fn wait_timeout(&self) -> Duration
	{
		self.wait_timeout
	}

	/// Access to the underlying bit-sequence driver, as needed to relay raw sequences
	pub fn sequencer(&self) -> &dyn BmdSwdProtocol
	{
		self.swd.as_ref()
	}

	/// Hold SWDIO high for 60 cycles, then optionally drive 4 idle cycles.
	/// The ADIv5 minimum is 50 cycles high, but some STM32 parts need more than that.
	pub fn line_reset(&self, idle_cycles: bool) -> Result<()>
	{
		self.swd.seq_out(0xffffffff, 32)?;
		self.swd.seq_out(0x0fffffff, if idle_cycles { 32 } else { 28 })
	}

	/// Bring an SWJ-DP out of dormant state and into SWD
	pub fn dormant_to_swd(&self) -> Result<()>
	{
		info!("Switching out of dormant state into SWD");
		// At least 8 cycles with SWDIO high
		self.line_reset(false)?;
		for word in ADIV5_SELECTION_ALERT_SEQUENCE {
			self.swd.seq_out(word, 32)?;
		}
		// 4 cycles low followed by the 8-bit activation code, combined into one 12 cycle sequence
		self.swd.seq_out(ADIV5_ACTIVATION_CODE_ARM_SWD_DP << 4, 12)?;
		// The target is in the protocol error state after selecting SWD, reset the line to get out of it
		self.line_reset(true)
	}

	/// The deprecated JTAG-to-SWD switch sequence, for parts that predate dormant state
	pub fn jtag_to_swd(&self) -> Result<()>
	{
		warn!("Deprecated JTAG-to-SWD sequence");
		self.line_reset(false)?;
		self.swd.seq_out(ADIV5_JTAG_TO_SWD_SELECT_SEQUENCE, 16)?;
		// If the SWJ-DP was already in SWD mode, this puts the interface back into the reset state
		self.line_reset(true)
	}

	/// Perform a DP write without any of the retry machinery, returning the ACK seen
	pub fn dp_low_write(&self, addr: u16, value: u32) -> Result<u8>
	{
		let request = make_packet_request(ADIV5_LOW_WRITE, addr);
		self.swd.seq_out(u32::from(request), 8)?;
		let ack = self.swd.seq_in(3)? as u8;
		self.swd.seq_out_parity(value, 32)?;
		self.swd.seq_out(0, 8)?;
		Ok(ack)
	}

	/// Perform a DP read without any of the retry machinery, returning 0 if the target didn't ACK
	pub fn dp_low_read(&self, addr: u16) -> Result<u32>
	{
		let request = make_packet_request(ADIV5_LOW_READ, addr);
		self.swd.seq_out(u32::from(request), 8)?;
		let ack = self.swd.seq_in(3)? as u8;
		let (value, _) = self.swd.seq_in_parity(32)?;
		Ok(if ack == SWDP_ACK_OK { value } else { 0 })
	}

	/// Perform one access, and if the target failed to respond, recover the link and try once more
	fn recoverable_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		let result = self.raw_access(dp, rnw, addr, value)?;
		if dp.fault() != SWDP_ACK_NO_RESPONSE {
			return Ok(result);
		}
		// Let the response period elapse before trying to bring the link back
		self.swd.seq_in_parity(32)?;
		warn!("Recovering and re-trying access");
		self.error(dp, true)?;
		self.raw_access(dp, rnw, addr, value)
	}

	/// Point SELECT at the AP and register bank an AP access is for. This goes through the
	/// recovery path so a multi-drop DP that got deselected by talking to another is re-selected first.
	fn select_ap_bank(&self, dp: &AdiV5DebugPort, apsel: u8, addr: u16) -> Result<()>
	{
		let select = (u32::from(apsel) << 24) | u32::from(addr & 0xf0);
		self.recoverable_access(dp, ADIV5_LOW_WRITE, ADIV5_DP_SELECT, select)?;
		Ok(())
	}

	/// Read DPIDR, treating any exception on the way as there being nothing there
	pub fn read_dpidr(&self, dp: &AdiV5DebugPort) -> Result<u32>
	{
		match catch(ExceptionType::all_types(), dp.dp_read(ADIV5_DP_DPIDR))? {
			Ok(dpidr) => Ok(dpidr),
			Err(exception) => {
				debug!("DPIDR read failed: {}", exception);
				Ok(0)
			},
		}
	}

	/// Scan the SWD bus for debug ports. If `targetid` is non-zero, or the first DP found is DPv2+,
	/// a multi-drop scan is done and every instance that answers yields its own DP.
	pub fn scan(self: &Arc<Self>, targetid: u32) -> Result<Vec<AdiV5DebugPort>>
	{
		self.dormant_to_swd()?;

		let mut dp = AdiV5DebugPort::new(self.clone());
		let mut dp_targetid = targetid;
		if dp_targetid == 0 {
			// Read DPIDR, and if that fails try the JTAG-to-SWD sequence once before giving up
			let mut tried_jtag_to_swd = false;
			let dpidr = loop {
				let dpidr = self.read_dpidr(&dp)?;
				if dpidr != 0 {
					break dpidr;
				}
				if tried_jtag_to_swd {
					error!("No usable DP found");
					return Ok(Vec::new());
				}
				self.jtag_to_swd()?;
				dp = AdiV5DebugPort::new(self.clone());
				tried_jtag_to_swd = true;
			};
			// The version has to be known before any further reads so protocol recovery works right
			dp.decode_dpidr(dpidr);
			if dp.version() >= 2 {
				// TARGETID is in bank 2 and can be read even with the device asleep or in reset
				dp.dp_write(ADIV5_DP_SELECT, ADIV5_DP_BANK2)?;
				dp_targetid = dp.dp_read(ADIV5_DP_TARGETID)?;
				dp.dp_write(ADIV5_DP_SELECT, ADIV5_DP_BANK0)?;
			}
		}

		if targetid != 0 || dp.version() >= 2 {
			self.scan_multidrop(&dp, dp_targetid)
		} else {
			dp.abort(ADIV5_DP_ABORT_STKERRCLR)?;
			self.init_dp(&mut dp)?;
			Ok(vec![dp])
		}
	}

	/// Probe all 16 multi-drop instances for a target with the given TARGETID
	pub fn scan_multidrop(&self, dp: &AdiV5DebugPort, targetid: u32) -> Result<Vec<AdiV5DebugPort>>
	{
		info!("Handling SWD multi-drop, TARGETID {:#010x}", targetid);
		let mut debug_ports = Vec::new();
		for instance in 0..16 {
			// A TARGETSEL write directly after a line reset selects the target whose instance ID and
			// TARGETID match, and deselects all others. The target does not drive the ACK phase.
			self.line_reset(true)?;
			let mut candidate = dp.for_instance(instance);
			candidate.set_targetsel(multidrop_targetsel(instance, targetid));
			// Multi-drop implies DPv2, and recovery has to re-send TARGETSEL rather than talk to the whole bus
			candidate.set_version(candidate.version().max(2));
			self.dp_low_write(ADIV5_DP_TARGETSEL, candidate.targetsel())?;

			let dpidr = self.read_dpidr(&candidate)?;
			if dpidr == 0 || candidate.fault() != 0 {
				continue;
			}
			debug!("Found DP instance {} with DPIDR {:08x}", instance, dpidr);
			candidate.decode_dpidr(dpidr);
			candidate.abort(ADIV5_DP_ABORT_STKERRCLR)?;
			self.init_dp(&mut candidate)?;
			debug_ports.push(candidate);
		}
		Ok(debug_ports)
	}

	/// Read out the identity of a freshly found DP and power up its debug and system domains
	fn init_dp(&self, dp: &mut AdiV5DebugPort) -> Result<()>
	{
		let dpidr = self.read_dpidr(dp)?;
		dp.decode_dpidr(dpidr);
		if dp.version() >= 2 {
			dp.dp_write(ADIV5_DP_SELECT, ADIV5_DP_BANK2)?;
			let targetid = dp.dp_read(ADIV5_DP_TARGETID)?;
			dp.dp_write(ADIV5_DP_SELECT, ADIV5_DP_BANK0)?;
			dp.decode_targetid(targetid);
		}

		let acks = ADIV5_DP_CTRLSTAT_CDBGPWRUPACK | ADIV5_DP_CTRLSTAT_CSYSPWRUPACK;
		dp.dp_write(ADIV5_DP_CTRLSTAT, ADIV5_DP_CTRLSTAT_CDBGPWRUPREQ | ADIV5_DP_CTRLSTAT_CSYSPWRUPREQ)?;
		let timeout = PlatformTimeout::new(SWD_POWERUP_TIMEOUT);
		while dp.dp_read(ADIV5_DP_CTRLSTAT)? & acks != acks {
			if timeout.is_expired() {
				warn!("Timed out waiting for debug power-up acknowledgement on DP {}", dp.instance());
				break;
			}
		}
		Ok(())
	}
}

impl BmdAdiV5Protocol for SwdEngine
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		// A faulted DP must be recovered before any AP is touched again
		if addr & ADIV5_APNDP != 0 && dp.fault() != 0 {
			return Ok(0);
		}

		let request = make_packet_request(rnw, addr);
		let timeout = PlatformTimeout::new(self.wait_timeout);
		let mut fault_retried = false;
		let ack = loop {
			self.swd.seq_out(u32::from(request), 8)?;
			let ack = self.swd.seq_in(3)? as u8;
			trace!("SWD request {:02x} ACK {}", request, ack);
			match ack {
				SWDP_ACK_WAIT if !timeout.is_expired() => continue,
				SWDP_ACK_FAULT if !fault_retried => {
					error!("SWD access resulted in fault, retrying");
					fault_retried = true;
					self.dp_low_write(ADIV5_DP_ABORT, ADIV5_DP_ABORT_ALL_STICKY)?;
				},
				ack => break ack,
			}
		};

		match ack {
			SWDP_ACK_OK => (),
			SWDP_ACK_WAIT => {
				error!("SWD access resulted in wait, aborting");
				self.dp_low_write(ADIV5_DP_ABORT, ADIV5_DP_ABORT_DAPABORT)?;
				dp.set_fault(ack);
				return Ok(0);
			},
			SWDP_ACK_FAULT => {
				error!("SWD access resulted in fault");
				dp.set_fault(ack);
				return Ok(0);
			},
			SWDP_ACK_NO_RESPONSE => {
				error!("SWD access resulted in no response");
				dp.set_fault(ack);
				return Ok(0);
			},
			_ => {
				error!("SWD access has invalid ack {:x}", ack);
				log_and_return!(Exception::error("SWD invalid ACK"));
			},
		}

		if rnw != 0 {
			let (response, parity_ok) = self.swd.seq_in_parity(32)?;
			if !parity_ok {
				dp.set_fault(1);
				log_and_return!(Exception::error("SWD parity error"));
			}
			Ok(response)
		} else {
			self.swd.seq_out_parity(value, 32)?;
			// Clock the data through the SW-DP with 8 idle cycles rather than relying on the
			// next transaction to do it
			self.swd.seq_out(0, 8)?;
			Ok(0)
		}
	}

	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32>
	{
		if addr & ADIV5_APNDP != 0 {
			// AP reads are posted, the data turns up in RDBUFF
			self.recoverable_access(dp, ADIV5_LOW_READ, addr, 0)?;
			return self.raw_access(dp, ADIV5_LOW_READ, ADIV5_DP_RDBUFF, 0);
		}
		self.recoverable_access(dp, ADIV5_LOW_READ, addr, 0)
	}

	fn ap_read(&self, ap: &AdiV5AccessPort<'_>, addr: u16) -> Result<u32>
	{
		let dp = ap.dp();
		self.select_ap_bank(dp, ap.apsel(), addr)?;
		self.dp_read(dp, addr)
	}

	fn ap_write(&self, ap: &AdiV5AccessPort<'_>, addr: u16, value: u32) -> Result<()>
	{
		let dp = ap.dp();
		self.select_ap_bank(dp, ap.apsel(), addr)?;
		self.recoverable_access(dp, ADIV5_LOW_WRITE, addr, value)?;
		Ok(())
	}

	fn mem_read(&self, ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>
	{
		mem_read_via_ap(ap, dest, src)
	}

	fn mem_write(&self, ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
	{
		mem_write_via_ap(ap, dest, src, align)
	}

	fn abort(&self, dp: &AdiV5DebugPort, abort: u32) -> Result<()>
	{
		dp.dp_write(ADIV5_DP_ABORT, abort)
	}

	fn error(&self, dp: &AdiV5DebugPort, protocol_recovery: bool) -> Result<u32>
	{
		// DPv2+ parts deselect themselves on a protocol error, so a line reset and
		// re-selection is needed before they will talk to us again
		if (dp.version() >= 2 && dp.fault() != 0) || protocol_recovery {
			self.line_reset(true)?;
			if dp.version() >= 2 {
				self.dp_low_write(ADIV5_DP_TARGETSEL, dp.targetsel())?;
			}
			self.dp_low_read(ADIV5_DP_DPIDR)?;
		}

		let (err, clear) = sticky_errors(self.dp_low_read(ADIV5_DP_CTRLSTAT)?);
		if clear != 0 {
			self.dp_low_write(ADIV5_DP_ABORT, clear)?;
		}
		dp.clear_fault();
		Ok(err)
	}
}

#[cfg(test)]
mod tests
{
	use std::collections::BTreeSet;
	use std::time::Instant;

	use color_eyre::eyre::Result;

	use super::*;
	use crate::adiv5::{ADIV5_AP_CSW, ADIV5_AP_IDR};
	use crate::error::BmdError;
	use crate::fake_target::{FakeSwdBus, FakeTarget, SimulatedFault};

	fn engine_for(bus: &FakeSwdBus) -> Arc<SwdEngine>
	{
		Arc::new(SwdEngine::new(Box::new(bus.clone())))
	}

	#[test]
	fn request_headers()
	{
		// DPIDR read, the first thing any debugger sends
		assert_eq!(make_packet_request(ADIV5_LOW_READ, ADIV5_DP_DPIDR), 0xa5);
		// ABORT write
		assert_eq!(make_packet_request(ADIV5_LOW_WRITE, ADIV5_DP_ABORT), 0x81);
		// CTRLSTAT read and write
		assert_eq!(make_packet_request(ADIV5_LOW_READ, ADIV5_DP_CTRLSTAT), 0x8d);
		assert_eq!(make_packet_request(ADIV5_LOW_WRITE, ADIV5_DP_CTRLSTAT), 0xa9);
		// SELECT write, RDBUFF read and TARGETSEL write
		assert_eq!(make_packet_request(ADIV5_LOW_WRITE, ADIV5_DP_SELECT), 0xb1);
		assert_eq!(make_packet_request(ADIV5_LOW_READ, ADIV5_DP_RDBUFF), 0xbd);
		assert_eq!(make_packet_request(ADIV5_LOW_WRITE, ADIV5_DP_TARGETSEL), 0x99);
		// AP DRW read and CSW write
		assert_eq!(make_packet_request(ADIV5_LOW_READ, ADIV5_APNDP | 0xc), 0x9f);
		assert_eq!(make_packet_request(ADIV5_LOW_WRITE, ADIV5_AP_CSW), 0xa3);
	}

	#[test]
	fn request_header_parity_is_even()
	{
		for rnw in [ADIV5_LOW_READ, ADIV5_LOW_WRITE] {
			for addr in [0x0, 0x4, 0x8, 0xc, 0x100, 0x104, 0x108, 0x10c] {
				let request = make_packet_request(rnw, addr);
				assert_eq!(request & 0xc1, 0x81, "start/stop/park bits wrong for {addr:#x}");
				assert_eq!(((request >> 1) & 0x1f).count_ones() % 2, 0, "parity wrong for {addr:#x}");
			}
		}
	}

	#[test]
	fn wait_then_ok_costs_two_attempts() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dp = AdiV5DebugPort::new(engine.clone());

		bus.script_acks([SWDP_ACK_WAIT, SWDP_ACK_WAIT]);
		let requests_before = bus.request_count();
		let dpidr = dp.low_access(ADIV5_LOW_READ, ADIV5_DP_DPIDR, 0)?;

		assert_eq!(dpidr, 0x2ba01477);
		assert_eq!(bus.request_count() - requests_before, 3);
		assert_eq!(dp.fault(), 0);
		Ok(())
	}

	#[test]
	fn wait_forever_times_out() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let timeout = Duration::from_millis(50);
		let engine = Arc::new(SwdEngine::new(Box::new(bus.clone())).with_wait_timeout(timeout));
		let dp = AdiV5DebugPort::new(engine);

		bus.inject_fault(SimulatedFault::WaitForever);
		let start = Instant::now();
		let value = dp.low_access(ADIV5_LOW_READ, ADIV5_DP_CTRLSTAT, 0)?;
		let elapsed = start.elapsed();

		assert_eq!(value, 0);
		assert_eq!(dp.fault(), SWDP_ACK_WAIT);
		assert!(elapsed >= timeout);
		assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?} to time out");
		// The timeout must end with a DAPABORT
		assert!(bus.aborts_seen().contains(&ADIV5_DP_ABORT_DAPABORT));
		Ok(())
	}

	#[test]
	fn single_fault_is_retried() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dp = AdiV5DebugPort::new(engine);

		bus.script_acks([SWDP_ACK_FAULT]);
		let dpidr = dp.low_access(ADIV5_LOW_READ, ADIV5_DP_DPIDR, 0)?;

		assert_eq!(dpidr, 0x2ba01477);
		assert_eq!(dp.fault(), 0);
		assert_eq!(bus.aborts_seen(), vec![ADIV5_DP_ABORT_ALL_STICKY]);
		Ok(())
	}

	#[test]
	fn repeated_fault_is_sticky_until_error_recovery() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dp = AdiV5DebugPort::new(engine);

		bus.script_acks([SWDP_ACK_FAULT, SWDP_ACK_FAULT]);
		assert_eq!(dp.low_access(ADIV5_LOW_READ, ADIV5_DP_CTRLSTAT, 0)?, 0);
		assert_eq!(dp.fault(), SWDP_ACK_FAULT);

		// AP accesses are refused without touching the wire while the fault stands
		let requests_before = bus.request_count();
		assert_eq!(dp.low_access(ADIV5_LOW_READ, ADIV5_AP_IDR, 0)?, 0);
		assert_eq!(bus.request_count(), requests_before);
		assert_eq!(dp.fault(), SWDP_ACK_FAULT);

		dp.error(false)?;
		assert_eq!(dp.fault(), 0);
		Ok(())
	}

	#[test]
	fn parity_error_is_fatal() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dp = AdiV5DebugPort::new(engine);

		bus.inject_fault(SimulatedFault::BadParity);
		let result = dp.low_access(ADIV5_LOW_READ, ADIV5_DP_DPIDR, 0);
		let exception = result.as_ref().err().and_then(|error| error.exception());
		assert_eq!(exception.map(|exception| exception.message()), Some("SWD parity error"));
		assert_eq!(dp.fault(), 1);
		Ok(())
	}

	#[test]
	fn invalid_ack_is_fatal()
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dp = AdiV5DebugPort::new(engine);

		bus.script_acks([0x03]);
		let result = dp.low_access(ADIV5_LOW_READ, ADIV5_DP_DPIDR, 0);
		let exception = result.as_ref().err().and_then(|error| error.exception());
		assert_eq!(exception.map(|exception| exception.kind()), Some(ExceptionType::Error));
	}

	#[test]
	fn writes_clock_idle_cycles() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dp = AdiV5DebugPort::new(engine);

		dp.dp_write(ADIV5_DP_SELECT, 0x0f00_00f0)?;
		assert_eq!(bus.idle_cycles_after_last_write(), 8);
		Ok(())
	}

	#[test]
	fn single_drop_scan() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);

		let dps = engine.scan(0)?;
		assert_eq!(dps.len(), 1);
		assert_eq!(dps[0].version(), 1);
		assert_eq!(dps[0].designer_code(), 0x23b);
		Ok(())
	}

	#[test]
	fn scan_falls_back_to_jtag_to_swd() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477).requiring_jtag_to_swd());
		let engine = engine_for(&bus);

		let dps = engine.scan(0)?;
		assert_eq!(dps.len(), 1);
		Ok(())
	}

	#[test]
	fn multidrop_scan_finds_each_instance() -> Result<()>
	{
		const TARGETID: u32 = 0x01002927;
		for count in 0..=16u8 {
			let targets = (0..count).map(|instance| FakeTarget::multidrop(0x0bc12477, TARGETID, instance));
			let bus = FakeSwdBus::new(targets);
			let engine = engine_for(&bus);

			let dps = engine.scan(TARGETID)?;
			assert_eq!(dps.len(), usize::from(count));
			let instances: BTreeSet<u8> = dps.iter().map(AdiV5DebugPort::instance).collect();
			assert_eq!(instances, (0..count).collect::<BTreeSet<u8>>(), "instances not distinct");
			for dp in &dps {
				assert_eq!(dp.version(), 2);
				assert_eq!(dp.targetsel(), multidrop_targetsel(dp.instance(), TARGETID));
			}
		}
		Ok(())
	}

	#[test]
	fn absent_multidrop_instances_are_not_found() -> Result<()>
	{
		const TARGETID: u32 = 0x01002927;
		// Instances 3 and 9 only, so every other instance's TARGETSEL leaves nothing selected
		let bus = FakeSwdBus::new([3, 9].map(|instance| FakeTarget::multidrop(0x0bc12477, TARGETID, instance)));
		let engine = engine_for(&bus);

		let dps = engine.scan(TARGETID)?;
		let instances: Vec<u8> = dps.iter().map(AdiV5DebugPort::instance).collect();
		assert_eq!(instances, [3, 9]);
		assert!(dps.iter().all(|dp| dp.fault() == 0));
		Ok(())
	}

	#[test]
	fn multidrop_dps_reselect_on_use() -> Result<()>
	{
		const TARGETID: u32 = 0x01002927;
		let bus = FakeSwdBus::new((0..3).map(|instance| FakeTarget::multidrop(0x0bc12477, TARGETID, instance)));
		let engine = engine_for(&bus);

		let dps = engine.scan(0)?;
		assert_eq!(dps.len(), 3);
		// The last instance scanned is the one selected, so talking to the first needs recovery
		let ap = AdiV5AccessPort::new(&dps[0], 0);
		assert_eq!(ap.read(ADIV5_AP_IDR)?, crate::fake_target::FAKE_AP_IDR);
		assert_eq!(dps[0].fault(), 0);
		Ok(())
	}

	#[test]
	fn memory_round_trip() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dps = engine.scan(0)?;
		let ap = AdiV5AccessPort::probe(&dps[0], 0)?.ok_or_else(|| color_eyre::eyre::eyre!("no AP"))?;

		let data: Vec<u8> = (0..64u8).collect();
		ap.mem_write(0x2000_0000, &data, Align::U32)?;
		let mut readback = vec![0u8; 64];
		ap.mem_read(&mut readback, 0x2000_0000)?;
		assert_eq!(readback, data);

		// Unaligned byte access lands in the right lanes
		ap.mem_write(0x2000_0101, &[0xaa, 0xbb, 0xcc], Align::U8)?;
		let mut readback = [0u8; 5];
		ap.mem_read(&mut readback, 0x2000_0100)?;
		assert_eq!(readback, [0x00, 0xaa, 0xbb, 0xcc, 0x00]);
		Ok(())
	}

	#[test]
	fn memory_past_4gib_is_refused_before_touching_the_bus() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(0x2ba01477));
		let engine = engine_for(&bus);
		let dps = engine.scan(0)?;
		let ap = AdiV5AccessPort::probe(&dps[0], 0)?.ok_or_else(|| color_eyre::eyre::eyre!("no AP"))?;
		let requests = bus.request_count();

		let mut data = [0u8; 4];
		assert!(matches!(ap.mem_read(&mut data, 0x1_0000_0000), Err(BmdError::NotSupported(_))));
		assert!(matches!(ap.mem_write(0xffff_fffe, &data, Align::U8), Err(BmdError::NotSupported(_))));
		assert_eq!(bus.request_count(), requests);
		Ok(())
	}
}
