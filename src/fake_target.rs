// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! A simulated SWD bus for driving the transaction engine without hardware attached, along with a
//! simulated JTAG scan chain for the JTAG passthrough.
//!
//! The bus decodes the bit sequences clocked at it back into line resets, request headers and data
//! phases, and routes each request to whichever of its targets are currently selected. Each target
//! has a DP (DPv1, or DPv2 with multi-drop) and a single MEM-AP with sparse byte-addressed memory
//! behind it. Tests can script the ACKs the next requests receive, or make the bus misbehave.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::adiv5::swd::{SWDP_ACK_NO_RESPONSE, SWDP_ACK_OK, SWDP_ACK_WAIT};
use crate::adiv5::{
	ADIV5_AP_CSW_ADDRINC_MASK, ADIV5_AP_CSW_ADDRINC_SINGLE, ADIV5_AP_CSW_SIZE_MASK, ADIV5_DP_ABORT_ORUNERRCLR,
	ADIV5_DP_ABORT_STKCMPCLR, ADIV5_DP_ABORT_STKERRCLR, ADIV5_DP_ABORT_WDERRCLR, ADIV5_DP_BANK2,
	ADIV5_DP_CTRLSTAT_CDBGPWRUPREQ, ADIV5_DP_CTRLSTAT_CSYSPWRUPREQ, ADIV5_DP_CTRLSTAT_STICKYCMP,
	ADIV5_DP_CTRLSTAT_STICKYERR, ADIV5_DP_CTRLSTAT_STICKYORUN, ADIV5_DP_CTRLSTAT_WDATAERR,
	ADIV5_DP_TARGETID_TDESIGNER_MASK, ADIV5_DP_TARGETID_TPARTNO_MASK, ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET,
};
use crate::error::{BmdError, Result};
use crate::serial::remote::{BmdJtagProtocol, BmdSwdProtocol};

/// IDR of the simulated MEM-AP, an AHB-AP
pub const FAKE_AP_IDR: u32 = 0x24770011;
/// ROM table base reported by the simulated MEM-AP
pub const FAKE_AP_BASE: u32 = 0xe00ff003;
const FAKE_AP_CSW_RESET: u32 = 0x23000040;

/// Number of consecutive high cycles that constitutes a line reset
const LINE_RESET_CYCLES: usize = 50;
const JTAG_TO_SWD_SEQUENCE: u32 = 0xe79e;

/// Ways the bus can be made to misbehave
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulatedFault
{
	/// Every request other than an ABORT write is answered with WAIT
	WaitForever,
	/// The next read data phase comes back with bad parity
	BadParity,
}

/// A single target hanging off the simulated bus
#[derive(Clone, Debug)]
pub struct FakeTarget
{
	dpidr: u32,
	targetid: u32,
	instance: u8,
	multidrop: bool,
	/// False while the target still needs the JTAG-to-SWD sequence before it will talk SWD
	swd_active: bool,
	selected: bool,

	select: u32,
	ctrlstat: u32,
	rdbuff: u32,

	csw: u32,
	tar: u32,
	memory: BTreeMap<u32, u8>,
}

impl FakeTarget
{
	/// A single-drop target with the given DPIDR
	pub fn new(dpidr: u32) -> Self
	{
		Self {
			dpidr,
			targetid: 0,
			instance: 0,
			multidrop: false,
			swd_active: true,
			selected: true,
			select: 0,
			ctrlstat: 0,
			rdbuff: 0,
			csw: FAKE_AP_CSW_RESET,
			tar: 0,
			memory: BTreeMap::new(),
		}
	}

	/// A DPv2 target that only answers once selected by a TARGETSEL write naming its TARGETID and instance
	pub fn multidrop(dpidr: u32, targetid: u32, instance: u8) -> Self
	{
		Self {
			targetid,
			instance,
			multidrop: true,
			..Self::new(dpidr)
		}
	}

	/// Make this a pre-dormant-state part that only switches to SWD on the JTAG-to-SWD sequence
	pub fn requiring_jtag_to_swd(mut self) -> Self
	{
		self.swd_active = false;
		self
	}

	/// Preload some memory contents
	pub fn with_memory(mut self, address: u32, data: &[u8]) -> Self
	{
		for (offset, byte) in data.iter().enumerate() {
			self.memory.insert(address.wrapping_add(offset as u32), *byte);
		}
		self
	}

	pub fn instance(&self) -> u8
	{
		self.instance
	}

	pub fn memory(&self, address: u32, length: usize) -> Vec<u8>
	{
		(0..length)
			.map(|offset| self.read_byte(address.wrapping_add(offset as u32)))
			.collect()
	}

	fn matches_targetsel(&self, targetsel: u32) -> bool
	{
		let id_mask = ADIV5_DP_TARGETID_TDESIGNER_MASK | ADIV5_DP_TARGETID_TPARTNO_MASK;
		(targetsel >> ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET) as u8 == self.instance &&
			targetsel & id_mask == self.targetid & id_mask
	}

	fn read_byte(&self, address: u32) -> u8
	{
		self.memory.get(&address).copied().unwrap_or(0)
	}

	fn dp_read(&self, addr: u8) -> u32
	{
		match addr {
			0x0 => self.dpidr,
			0x4 if self.select & 0xf == ADIV5_DP_BANK2 => self.targetid,
			0x4 => self.ctrlstat,
			0xc => self.rdbuff,
			_ => 0,
		}
	}

	fn dp_write(&mut self, addr: u8, value: u32)
	{
		match addr {
			0x0 => {
				if value & ADIV5_DP_ABORT_ORUNERRCLR != 0 {
					self.ctrlstat &= !ADIV5_DP_CTRLSTAT_STICKYORUN;
				}
				if value & ADIV5_DP_ABORT_STKCMPCLR != 0 {
					self.ctrlstat &= !ADIV5_DP_CTRLSTAT_STICKYCMP;
				}
				if value & ADIV5_DP_ABORT_STKERRCLR != 0 {
					self.ctrlstat &= !ADIV5_DP_CTRLSTAT_STICKYERR;
				}
				if value & ADIV5_DP_ABORT_WDERRCLR != 0 {
					self.ctrlstat &= !ADIV5_DP_CTRLSTAT_WDATAERR;
				}
			},
			0x4 if self.select & 0xf == 0 => {
				// Power-up requests are acknowledged immediately, each ACK bit sits just above its request
				let requests = value & (ADIV5_DP_CTRLSTAT_CDBGPWRUPREQ | ADIV5_DP_CTRLSTAT_CSYSPWRUPREQ);
				let sticky = self.ctrlstat &
					(ADIV5_DP_CTRLSTAT_STICKYORUN |
						ADIV5_DP_CTRLSTAT_STICKYCMP |
						ADIV5_DP_CTRLSTAT_STICKYERR |
						ADIV5_DP_CTRLSTAT_WDATAERR);
				self.ctrlstat = requests | (requests << 1) | sticky;
			},
			0x8 => self.select = value,
			_ => (),
		}
	}

	fn ap_register(&self, addr: u8) -> Option<u8>
	{
		// Only AP 0 exists
		if self.select >> 24 != 0 {
			return None;
		}
		Some((self.select & 0xf0) as u8 | addr)
	}

	fn transfer_size(&self) -> u32
	{
		1 << (self.csw & ADIV5_AP_CSW_SIZE_MASK).min(2)
	}

	fn advance_tar(&mut self)
	{
		if self.csw & ADIV5_AP_CSW_ADDRINC_MASK == ADIV5_AP_CSW_ADDRINC_SINGLE {
			// Auto-increment only covers the bottom 10 bits of TAR
			let size = self.transfer_size();
			self.tar = (self.tar & !0x3ff) | (self.tar.wrapping_add(size) & 0x3ff);
		}
	}

	fn ap_read(&mut self, addr: u8) -> u32
	{
		let value = match self.ap_register(addr) {
			Some(0x00) => self.csw,
			Some(0x04) => self.tar,
			Some(0x0c) => {
				// The whole word is presented with the data on the lanes the address selects
				let base = self.tar & !3;
				let word = u32::from_le_bytes([
					self.read_byte(base),
					self.read_byte(base + 1),
					self.read_byte(base + 2),
					self.read_byte(base + 3),
				]);
				self.advance_tar();
				word
			},
			Some(0xf8) => FAKE_AP_BASE,
			Some(0xfc) => FAKE_AP_IDR,
			_ => 0,
		};
		// AP reads are posted: this read returns the last one's result
		std::mem::replace(&mut self.rdbuff, value)
	}

	fn ap_write(&mut self, addr: u8, value: u32)
	{
		match self.ap_register(addr) {
			Some(0x00) => self.csw = value,
			Some(0x04) => self.tar = value,
			Some(0x0c) => {
				let lane = self.tar & 3;
				for byte in 0..self.transfer_size() {
					let lane = (lane + byte) & 3;
					self.memory.insert(self.tar + byte, (value >> (lane * 8)) as u8);
				}
				self.advance_tar();
			},
			_ => (),
		}
	}
}

#[derive(Clone, Copy, Debug)]
struct Request
{
	ap: bool,
	rnw: bool,
	addr: u8,
}

impl Request
{
	fn decode(header: u8) -> Option<Self>
	{
		// Start, stop and park bits
		if header & 0xc1 != 0x81 {
			return None;
		}
		if ((header >> 1) & 0x1f).count_ones() % 2 != 0 {
			return None;
		}
		Some(Self {
			ap: header & 0x02 != 0,
			rnw: header & 0x04 != 0,
			addr: (header >> 1) & 0x0c,
		})
	}

	fn is_abort(&self) -> bool
	{
		!self.ap && !self.rnw && self.addr == 0x0
	}

	fn is_targetsel(&self) -> bool
	{
		!self.ap && !self.rnw && self.addr == 0xc
	}
}

enum Phase
{
	Idle,
	Ack { request: Request, ack: u8 },
	ReadData { value: u32, parity_ok: bool },
	WriteData { request: Request },
	TargetSelect,
}

struct BusState
{
	targets: Vec<FakeTarget>,
	phase: Phase,
	high_cycles: usize,
	awaiting_idle: bool,

	scripted_acks: VecDeque<u8>,
	fault: Option<SimulatedFault>,

	requests: usize,
	aborts: Vec<u32>,
	idle_after_write: usize,
}

impl BusState
{
	/// Track the line level across the cycles clocked out, applying a line reset on the first low
	/// cycle following a long enough run of high ones
	fn clock_out(&mut self, value: u32, cycles: usize)
	{
		for bit in 0..cycles {
			if bit < 32 && (value >> bit) & 1 != 0 {
				self.high_cycles += 1;
			} else {
				if self.high_cycles >= LINE_RESET_CYCLES {
					self.line_reset();
				}
				self.high_cycles = 0;
			}
		}
	}

	fn line_reset(&mut self)
	{
		trace!("Fake SWD bus saw a line reset");
		self.phase = Phase::Idle;
		for target in &mut self.targets {
			target.selected = true;
		}
	}

	fn responders(&mut self) -> impl Iterator<Item = &mut FakeTarget>
	{
		self.targets
			.iter_mut()
			.filter(|target| target.swd_active && target.selected)
	}

	fn start_request(&mut self, request: Request)
	{
		self.requests += 1;
		let scripted = if request.is_abort() {
			None
		} else {
			self.scripted_acks.pop_front()
		};
		let ack = match (scripted, self.fault) {
			(Some(ack), _) => ack,
			(None, Some(SimulatedFault::WaitForever)) if !request.is_abort() => SWDP_ACK_WAIT,
			_ => {
				if self.responders().next().is_some() {
					SWDP_ACK_OK
				} else {
					SWDP_ACK_NO_RESPONSE
				}
			},
		};
		self.phase = Phase::Ack {
			request,
			ack,
		};
	}

	fn finish_ack(&mut self, request: Request, ack: u8)
	{
		self.phase = if request.is_targetsel() {
			// Selection happens whatever the ACK, the addressed target never drives it
			Phase::TargetSelect
		} else if ack != SWDP_ACK_OK {
			Phase::Idle
		} else if request.rnw {
			let value = self.read(request);
			let parity_ok = if self.fault == Some(SimulatedFault::BadParity) {
				self.fault = None;
				false
			} else {
				true
			};
			Phase::ReadData {
				value,
				parity_ok,
			}
		} else {
			Phase::WriteData {
				request,
			}
		};
	}

	fn read(&mut self, request: Request) -> u32
	{
		match self.responders().next() {
			Some(target) if request.ap => target.ap_read(request.addr),
			Some(target) => target.dp_read(request.addr),
			None => 0,
		}
	}

	fn write(&mut self, request: Request, value: u32)
	{
		if request.is_abort() {
			self.aborts.push(value);
		}
		for target in self.responders() {
			if request.ap {
				target.ap_write(request.addr, value);
			} else {
				target.dp_write(request.addr, value);
			}
		}
	}

	fn target_select(&mut self, targetsel: u32)
	{
		for target in &mut self.targets {
			if target.multidrop {
				target.selected = target.matches_targetsel(targetsel);
				if target.selected {
					debug!("Fake multi-drop target instance {} selected", target.instance);
				}
			}
		}
	}
}

/// The simulated bus. Clones share the same bus, so a test can keep one to inspect while the
/// engine owns another.
#[derive(Clone)]
pub struct FakeSwdBus
{
	state: Arc<Mutex<BusState>>,
}

impl FakeSwdBus
{
	pub fn new(targets: impl IntoIterator<Item = FakeTarget>) -> Self
	{
		Self {
			state: Arc::new(Mutex::new(BusState {
				targets: targets.into_iter().collect(),
				phase: Phase::Idle,
				high_cycles: 0,
				awaiting_idle: false,
				scripted_acks: VecDeque::new(),
				fault: None,
				requests: 0,
				aborts: Vec::new(),
				idle_after_write: 0,
			})),
		}
	}

	pub fn single(target: FakeTarget) -> Self
	{
		Self::new([target])
	}

	fn state(&self) -> MutexGuard<'_, BusState>
	{
		// The bus state stays consistent even if a test panicked holding the lock
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Queue up ACKs for the next requests (ABORT writes excepted) to receive
	pub fn script_acks(&self, acks: impl IntoIterator<Item = u8>)
	{
		self.state().scripted_acks.extend(acks);
	}

	pub fn inject_fault(&self, fault: SimulatedFault)
	{
		self.state().fault = Some(fault);
	}

	pub fn clear_fault(&self)
	{
		self.state().fault = None;
	}

	/// How many request headers have been seen on the bus
	pub fn request_count(&self) -> usize
	{
		self.state().requests
	}

	/// Values of every ABORT write seen on the bus, oldest first
	pub fn aborts_seen(&self) -> Vec<u32>
	{
		self.state().aborts.clone()
	}

	/// How many idle cycles were clocked after the last write data phase
	pub fn idle_cycles_after_last_write(&self) -> usize
	{
		self.state().idle_after_write
	}

	/// Snapshot of the memory of the target with the given multi-drop instance
	pub fn target_memory(&self, instance: u8, address: u32, length: usize) -> Option<Vec<u8>>
	{
		self.state()
			.targets
			.iter()
			.find(|target| target.instance == instance)
			.map(|target| target.memory(address, length))
	}
}

impl BmdSwdProtocol for FakeSwdBus
{
	fn seq_in(&self, clock_cycles: usize) -> Result<u32>
	{
		let mut state = self.state();
		state.high_cycles = 0;
		let mask = cycle_mask(clock_cycles);
		let phase = std::mem::replace(&mut state.phase, Phase::Idle);
		Ok(match phase {
			Phase::Ack {
				request,
				ack,
			} => {
				state.finish_ack(request, ack);
				u32::from(ack) & mask
			},
			Phase::ReadData {
				value, ..
			} => value & mask,
			// Nothing is driving the line, the pull-up wins
			_ => mask,
		})
	}

	fn seq_in_parity(&self, clock_cycles: usize) -> Result<(u32, bool)>
	{
		let mut state = self.state();
		state.high_cycles = 0;
		let phase = std::mem::replace(&mut state.phase, Phase::Idle);
		Ok(match phase {
			Phase::ReadData {
				value,
				parity_ok,
			} => (value & cycle_mask(clock_cycles), parity_ok),
			_ => (cycle_mask(clock_cycles), false),
		})
	}

	fn seq_out(&self, value: u32, clock_cycles: usize) -> Result<()>
	{
		let mut state = self.state();
		state.clock_out(value, clock_cycles);

		if state.awaiting_idle {
			state.awaiting_idle = false;
			if value == 0 {
				state.idle_after_write = clock_cycles;
			}
		}

		if clock_cycles == 16 && value & 0xffff == JTAG_TO_SWD_SEQUENCE {
			for target in &mut state.targets {
				target.swd_active = true;
			}
		}

		if clock_cycles == 8 && matches!(state.phase, Phase::Idle) {
			if let Some(request) = Request::decode(value as u8) {
				state.start_request(request);
			}
		}
		Ok(())
	}

	fn seq_out_parity(&self, value: u32, clock_cycles: usize) -> Result<()>
	{
		let mut state = self.state();
		let parity = value.count_ones() & 1;
		state.clock_out(value, clock_cycles);
		state.clock_out(parity, 1);

		let phase = std::mem::replace(&mut state.phase, Phase::Idle);
		match phase {
			Phase::WriteData {
				request,
			} => {
				state.write(request, value);
				state.awaiting_idle = true;
			},
			Phase::TargetSelect => {
				state.target_select(value);
				state.awaiting_idle = true;
			},
			_ => (),
		}
		Ok(())
	}
}

fn cycle_mask(clock_cycles: usize) -> u32
{
	if clock_cycles >= 32 {
		u32::MAX
	} else {
		(1 << clock_cycles) - 1
	}
}

/// The 16 states of the IEEE 1149.1 TAP controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapState
{
	TestLogicReset,
	RunTestIdle,
	SelectDR,
	CaptureDR,
	ShiftDR,
	Exit1DR,
	PauseDR,
	Exit2DR,
	UpdateDR,
	SelectIR,
	CaptureIR,
	ShiftIR,
	Exit1IR,
	PauseIR,
	Exit2IR,
	UpdateIR,
}

impl TapState
{
	fn next(self, tms: bool) -> Self
	{
		use TapState::*;
		match (self, tms) {
			(TestLogicReset, true) => TestLogicReset,
			(TestLogicReset, false) => RunTestIdle,
			(RunTestIdle, true) => SelectDR,
			(RunTestIdle, false) => RunTestIdle,
			(SelectDR, true) => SelectIR,
			(SelectDR, false) => CaptureDR,
			(CaptureDR, true) => Exit1DR,
			(CaptureDR, false) => ShiftDR,
			(ShiftDR, true) => Exit1DR,
			(ShiftDR, false) => ShiftDR,
			(Exit1DR, true) => UpdateDR,
			(Exit1DR, false) => PauseDR,
			(PauseDR, true) => Exit2DR,
			(PauseDR, false) => PauseDR,
			(Exit2DR, true) => UpdateDR,
			(Exit2DR, false) => ShiftDR,
			(UpdateDR, true) => SelectDR,
			(UpdateDR, false) => RunTestIdle,
			(SelectIR, true) => TestLogicReset,
			(SelectIR, false) => CaptureIR,
			(CaptureIR, true) => Exit1IR,
			(CaptureIR, false) => ShiftIR,
			(ShiftIR, true) => Exit1IR,
			(ShiftIR, false) => ShiftIR,
			(Exit1IR, true) => UpdateIR,
			(Exit1IR, false) => PauseIR,
			(PauseIR, true) => Exit2IR,
			(PauseIR, false) => PauseIR,
			(Exit2IR, true) => UpdateIR,
			(Exit2IR, false) => ShiftIR,
			(UpdateIR, true) => SelectDR,
			(UpdateIR, false) => RunTestIdle,
		}
	}
}

/// A single TAP on the simulated scan chain. The all-ones instruction selects BYPASS, anything
/// else selects the 32-bit IDCODE register.
#[derive(Clone, Copy, Debug)]
pub struct FakeTap
{
	idcode: u32,
	ir_len: u8,
	ir: u32,
}

impl FakeTap
{
	pub fn new(idcode: u32, ir_len: u8) -> Self
	{
		Self {
			idcode,
			ir_len,
			ir: 1,
		}
	}

	fn bypassed(&self) -> bool
	{
		let all_ones = (1u32 << self.ir_len) - 1;
		self.ir & all_ones == all_ones
	}
}

struct ChainState
{
	/// TAPs in scan order, the first being the one nearest TDO
	taps: Vec<FakeTap>,
	state: TapState,
	/// The shift path currently between TDI and TDO, front bit next out on TDO
	shift: VecDeque<bool>,
	clocks: usize,
}

impl ChainState
{
	fn clock(&mut self, tms: bool, tdi: bool) -> bool
	{
		self.clocks += 1;
		let tdo = if matches!(self.state, TapState::ShiftDR | TapState::ShiftIR) {
			self.shift.push_back(tdi);
			self.shift.pop_front().unwrap_or(tdi)
		} else {
			false
		};

		self.state = self.state.next(tms);
		match self.state {
			TapState::TestLogicReset => {
				for tap in &mut self.taps {
					tap.ir = 1;
				}
			},
			TapState::CaptureDR => {
				self.shift.clear();
				for tap in &self.taps {
					if tap.bypassed() {
						self.shift.push_back(false);
					} else {
						self.shift.extend((0..32).map(|bit| (tap.idcode >> bit) & 1 != 0));
					}
				}
			},
			TapState::CaptureIR => {
				// IR captures always read back as 0b..01
				self.shift.clear();
				for tap in &self.taps {
					self.shift.extend((0..tap.ir_len).map(|bit| bit == 0));
				}
			},
			TapState::UpdateIR => {
				let mut bits = self.shift.iter();
				for tap in &mut self.taps {
					tap.ir = (0..tap.ir_len)
						.zip(bits.by_ref())
						.fold(0, |ir, (bit, &set)| ir | (u32::from(set) << bit));
				}
			},
			_ => (),
		}
		trace!("Fake JTAG TMS {} TDI {} TDO {} now {:?}", tms as u8, tdi as u8, tdo as u8, self.state);
		tdo
	}
}

/// The simulated JTAG scan chain. As with [`FakeSwdBus`], clones share the same chain.
#[derive(Clone)]
pub struct FakeJtagChain
{
	state: Arc<Mutex<ChainState>>,
}

impl FakeJtagChain
{
	pub fn new(taps: impl IntoIterator<Item = FakeTap>) -> Self
	{
		Self {
			state: Arc::new(Mutex::new(ChainState {
				taps: taps.into_iter().collect(),
				state: TapState::TestLogicReset,
				shift: VecDeque::new(),
				clocks: 0,
			})),
		}
	}

	fn state(&self) -> MutexGuard<'_, ChainState>
	{
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn tap_state(&self) -> TapState
	{
		self.state().state
	}

	/// How many TCK cycles have been run on the chain
	pub fn clocks(&self) -> usize
	{
		self.state().clocks
	}

	/// The instruction currently loaded into the TAP at the given position on the chain
	pub fn instruction(&self, tap: usize) -> Option<u32>
	{
		self.state().taps.get(tap).map(|tap| tap.ir)
	}
}

impl BmdJtagProtocol for FakeJtagChain
{
	fn tap_reset(&self) -> Result<()>
	{
		self.tap_tms_seq(0x1f, 5)
	}

	fn tap_next(&self, tms: bool, tdi: bool) -> Result<bool>
	{
		Ok(self.state().clock(tms, tdi))
	}

	fn tap_tms_seq(&self, tms_states: u32, clock_cycles: usize) -> Result<()>
	{
		let mut state = self.state();
		for cycle in 0..clock_cycles.min(32) {
			state.clock((tms_states >> cycle) & 1 != 0, true);
		}
		Ok(())
	}

	fn tap_tdi_tdo_seq(
		&self,
		mut data_out: Option<&mut [u8]>,
		final_tms: bool,
		data_in: Option<&[u8]>,
		clock_cycles: usize,
	) -> Result<()>
	{
		let length = clock_cycles.div_ceil(8);
		if data_in.is_some_and(|data| data.len() < length) ||
			data_out.as_deref().is_some_and(|data| data.len() < length)
		{
			return Err(BmdError::Parameter);
		}
		if let Some(data_out) = data_out.as_deref_mut() {
			data_out[..length].fill(0);
		}

		let mut state = self.state();
		for cycle in 0..clock_cycles {
			let (byte, bit) = (cycle / 8, cycle % 8);
			let tdi = data_in.is_some_and(|data| (data[byte] >> bit) & 1 != 0);
			let tdo = state.clock(final_tms && cycle + 1 == clock_cycles, tdi);
			if let Some(data_out) = data_out.as_deref_mut() {
				data_out[byte] |= u8::from(tdo) << bit;
			}
		}
		Ok(())
	}

	fn tap_tdi_seq(&self, final_tms: bool, data_in: &[u8], clock_cycles: usize) -> Result<()>
	{
		self.tap_tdi_tdo_seq(None, final_tms, Some(data_in), clock_cycles)
	}

	fn tap_cycle(&self, tms: bool, tdi: bool, clock_cycles: usize) -> Result<()>
	{
		let mut state = self.state();
		for _ in 0..clock_cycles {
			state.clock(tms, tdi);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn line_reset_needs_fifty_high_cycles() -> color_eyre::eyre::Result<()>
	{
		let bus = FakeSwdBus::new([FakeTarget::multidrop(0x0bc12477, 0x01002927, 1)]);
		// Deselect everything by naming an instance that isn't there
		bus.seq_out(0xffffffff, 32)?;
		bus.seq_out(0x0fffffff, 32)?;
		bus.seq_out(0x99, 8)?;
		bus.seq_in(3)?;
		bus.seq_out_parity(0x0000_0001, 32)?;
		bus.seq_out(0, 8)?;
		assert!(!bus.state().targets[0].selected);

		// 49 high cycles is not a reset
		bus.seq_out(0xffffffff, 32)?;
		bus.seq_out(0x0001ffff, 18)?;
		assert!(!bus.state().targets[0].selected);

		bus.seq_out(0xffffffff, 32)?;
		bus.seq_out(0x0fffffff, 32)?;
		assert!(bus.state().targets[0].selected);
		Ok(())
	}

	#[test]
	fn posted_ap_reads() -> color_eyre::eyre::Result<()>
	{
		let mut target = FakeTarget::new(0x2ba01477);
		target.dp_write(0x8, 0xf0);
		assert_eq!(target.ap_read(0xc), 0);
		assert_eq!(target.dp_read(0xc), FAKE_AP_IDR);
		Ok(())
	}

	#[test]
	fn tar_increment_wraps_at_1k()
	{
		let mut target = FakeTarget::new(0x2ba01477);
		target.ap_write(0x00, FAKE_AP_CSW_RESET | ADIV5_AP_CSW_ADDRINC_SINGLE | 2);
		target.ap_write(0x04, 0x2000_03fc);
		target.ap_write(0x0c, 0x11223344);
		assert_eq!(target.tar, 0x2000_0000);
		assert_eq!(target.memory(0x2000_03fc, 4), vec![0x44, 0x33, 0x22, 0x11]);
	}

	#[test]
	fn jtag_chain_shifts_idcodes_then_bypasses() -> color_eyre::eyre::Result<()>
	{
		let chain = FakeJtagChain::new([FakeTap::new(0x4ba00477, 4), FakeTap::new(0x06413041, 5)]);
		chain.tap_reset()?;
		// Run-Test/Idle, Select-DR, Capture-DR, Shift-DR
		chain.tap_tms_seq(0b0010, 4)?;
		assert_eq!(chain.tap_state(), TapState::ShiftDR);

		let mut idcodes = [0u8; 8];
		chain.tap_tdi_tdo_seq(Some(&mut idcodes), true, Some(&[0xff; 8]), 64)?;
		assert_eq!(&idcodes[..4], &0x4ba00477u32.to_le_bytes());
		assert_eq!(&idcodes[4..], &0x06413041u32.to_le_bytes());
		assert_eq!(chain.tap_state(), TapState::Exit1DR);

		// Update-DR, Select-DR, Select-IR, Capture-IR, Shift-IR, then load BYPASS into both TAPs
		chain.tap_tms_seq(0b00111, 5)?;
		assert_eq!(chain.tap_state(), TapState::ShiftIR);
		let mut captured = [0u8; 2];
		chain.tap_tdi_tdo_seq(Some(&mut captured), true, Some(&[0xff, 0x01]), 9)?;
		assert_eq!(captured, [0x11, 0x00]);
		// Update-IR, Select-DR, Capture-DR, Shift-DR
		chain.tap_tms_seq(0b0011, 4)?;
		assert_eq!(chain.instruction(0), Some(0xf));
		assert_eq!(chain.instruction(1), Some(0x1f));

		// Two bypass bits ahead of whatever goes in
		let mut out = [0u8; 1];
		chain.tap_tdi_tdo_seq(Some(&mut out), false, Some(&[0b1011]), 4)?;
		assert_eq!(out, [0b1100]);
		Ok(())
	}

	#[test]
	fn jtag_buffers_must_cover_the_sequence()
	{
		let chain = FakeJtagChain::new([FakeTap::new(0x4ba00477, 4)]);
		let result = chain.tap_tdi_tdo_seq(None, false, Some(&[0xff]), 9);
		assert!(matches!(result, Err(BmdError::Parameter)));
		assert_eq!(chain.clocks(), 0);
	}
}
