// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

pub mod swd;

use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{BmdError, Result};

pub type TargetAddr32 = u32;
pub type TargetAddr64 = u64;

pub const ADIV5_LOW_WRITE: u8 = 0;
pub const ADIV5_LOW_READ: u8 = 1;

/// Flag on a register address marking it as belonging to the currently selected AP rather than the DP
pub const ADIV5_APNDP: u16 = 0x100;

// DP registers
pub const ADIV5_DP_DPIDR: u16 = 0x0;
pub const ADIV5_DP_ABORT: u16 = 0x0;
pub const ADIV5_DP_CTRLSTAT: u16 = 0x4;
/// TARGETID lives at CTRLSTAT's address in DP bank 2
pub const ADIV5_DP_TARGETID: u16 = 0x4;
pub const ADIV5_DP_SELECT: u16 = 0x8;
pub const ADIV5_DP_RDBUFF: u16 = 0xc;
pub const ADIV5_DP_TARGETSEL: u16 = 0xc;

pub const ADIV5_DP_BANK0: u32 = 0;
pub const ADIV5_DP_BANK2: u32 = 2;

pub const ADIV5_DP_DPIDR_VERSION_OFFSET: u32 = 12;
pub const ADIV5_DP_DPIDR_VERSION_MASK: u32 = 0xf << ADIV5_DP_DPIDR_VERSION_OFFSET;
pub const ADIV5_DP_DPIDR_PARTNO_OFFSET: u32 = 20;
pub const ADIV5_DP_DPIDR_PARTNO_MASK: u32 = 0xff << ADIV5_DP_DPIDR_PARTNO_OFFSET;
pub const ADIV5_DP_DPIDR_DESIGNER_OFFSET: u32 = 1;
pub const ADIV5_DP_DPIDR_DESIGNER_MASK: u32 = 0x7ff << ADIV5_DP_DPIDR_DESIGNER_OFFSET;

pub const ADIV5_DP_TARGETID_TPARTNO_OFFSET: u32 = 12;
pub const ADIV5_DP_TARGETID_TPARTNO_MASK: u32 = 0xffff << ADIV5_DP_TARGETID_TPARTNO_OFFSET;
pub const ADIV5_DP_TARGETID_TDESIGNER_OFFSET: u32 = 1;
pub const ADIV5_DP_TARGETID_TDESIGNER_MASK: u32 = 0x7ff << ADIV5_DP_TARGETID_TDESIGNER_OFFSET;

pub const ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET: u32 = 28;
pub const ADIV5_DP_TARGETSEL_TINSTANCE_MASK: u32 = 0xf << ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET;

pub const ADIV5_DP_ABORT_DAPABORT: u32 = 1 << 0;
pub const ADIV5_DP_ABORT_STKCMPCLR: u32 = 1 << 1;
pub const ADIV5_DP_ABORT_STKERRCLR: u32 = 1 << 2;
pub const ADIV5_DP_ABORT_WDERRCLR: u32 = 1 << 3;
pub const ADIV5_DP_ABORT_ORUNERRCLR: u32 = 1 << 4;

pub const ADIV5_DP_CTRLSTAT_CSYSPWRUPACK: u32 = 1 << 31;
pub const ADIV5_DP_CTRLSTAT_CSYSPWRUPREQ: u32 = 1 << 30;
pub const ADIV5_DP_CTRLSTAT_CDBGPWRUPACK: u32 = 1 << 29;
pub const ADIV5_DP_CTRLSTAT_CDBGPWRUPREQ: u32 = 1 << 28;
pub const ADIV5_DP_CTRLSTAT_WDATAERR: u32 = 1 << 7;
pub const ADIV5_DP_CTRLSTAT_STICKYERR: u32 = 1 << 5;
pub const ADIV5_DP_CTRLSTAT_STICKYCMP: u32 = 1 << 4;
pub const ADIV5_DP_CTRLSTAT_STICKYORUN: u32 = 1 << 1;

// MEM-AP registers
pub const ADIV5_AP_CSW: u16 = ADIV5_APNDP | 0x00;
pub const ADIV5_AP_TAR: u16 = ADIV5_APNDP | 0x04;
pub const ADIV5_AP_DRW: u16 = ADIV5_APNDP | 0x0c;
pub const ADIV5_AP_BASE: u16 = ADIV5_APNDP | 0xf8;
pub const ADIV5_AP_IDR: u16 = ADIV5_APNDP | 0xfc;

pub const ADIV5_AP_CSW_DBGSWENABLE: u32 = 1 << 31;
pub const ADIV5_AP_CSW_ADDRINC_SINGLE: u32 = 1 << 4;
pub const ADIV5_AP_CSW_ADDRINC_MASK: u32 = 3 << 4;
pub const ADIV5_AP_CSW_SIZE_MASK: u32 = 7;

/// The TAR auto-increment is only guaranteed to work within a 1KiB window
const ADIV5_TAR_WRAP: u64 = 0x3ff;

/// Widths a memory access may be performed at, encoded as the log2 of the byte count
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Align
{
	U8 = 0,
	U16 = 1,
	U32 = 2,
	U64 = 3,
}

impl Align
{
	/// The widest alignment that both an address and a length satisfy
	pub fn common(address: TargetAddr64, length: usize) -> Self
	{
		let bits = address | length as u64;
		if bits & 1 != 0 {
			Self::U8
		} else if bits & 2 != 0 {
			Self::U16
		} else if bits & 4 != 0 {
			Self::U32
		} else {
			Self::U64
		}
	}

	pub fn bytes(self) -> usize
	{
		1 << self as usize
	}

	/// Mask that rounds a byte count down onto this alignment
	pub fn mask(self) -> usize
	{
		!(self.bytes() - 1)
	}

	/// The CSW transfer size field value for accesses of this width
	pub fn csw_size(self) -> u32
	{
		self as u32
	}
}

impl TryFrom<u8> for Align
{
	type Error = u8;

	fn try_from(value: u8) -> Result<Self, Self::Error>
	{
		match value {
			0 => Ok(Self::U8),
			1 => Ok(Self::U16),
			2 => Ok(Self::U32),
			3 => Ok(Self::U64),
			_ => Err(value),
		}
	}
}

impl Display for Align
{
	fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result
	{
		write!(fmt, "{}-bit", self.bytes() * 8)
	}
}

/// Types implementing this trait perform ADIv5 DP and AP transactions, either directly on an SWD
/// bus or by relaying them to a probe. Every DP carries one of these, so callers talk to a target
/// the same way regardless of where the transaction physically happens.
pub trait BmdAdiV5Protocol
{
	fn raw_access(&self, dp: &AdiV5DebugPort, rnw: u8, addr: u16, value: u32) -> Result<u32>;
	fn dp_read(&self, dp: &AdiV5DebugPort, addr: u16) -> Result<u32>;
	fn ap_read(&self, ap: &AdiV5AccessPort<'_>, addr: u16) -> Result<u32>;
	fn ap_write(&self, ap: &AdiV5AccessPort<'_>, addr: u16, value: u32) -> Result<()>;
	fn mem_read(&self, ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>;
	fn mem_write(&self, ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>;

	fn abort(&self, dp: &AdiV5DebugPort, abort: u32) -> Result<()>
	{
		self.raw_access(dp, ADIV5_LOW_WRITE, ADIV5_DP_ABORT, abort)?;
		Ok(())
	}

	/// Read the sticky error state of the DP, clear whatever is set with an ABORT write and
	/// return the error bits that were found
	fn error(&self, dp: &AdiV5DebugPort, _protocol_recovery: bool) -> Result<u32>
	{
		let status = self.dp_read(dp, ADIV5_DP_CTRLSTAT)?;
		let err = clear_sticky_errors(dp, status)?;
		dp.clear_fault();
		Ok(err)
	}
}

/// Split a CTRLSTAT value into the sticky error bits that are set and the ABORT bits that clear them
pub(crate) fn sticky_errors(status: u32) -> (u32, u32)
{
	let err = status &
		(ADIV5_DP_CTRLSTAT_STICKYORUN |
			ADIV5_DP_CTRLSTAT_STICKYCMP |
			ADIV5_DP_CTRLSTAT_STICKYERR |
			ADIV5_DP_CTRLSTAT_WDATAERR);
	let mut clear = 0;
	if err & ADIV5_DP_CTRLSTAT_STICKYORUN != 0 {
		clear |= ADIV5_DP_ABORT_ORUNERRCLR;
	}
	if err & ADIV5_DP_CTRLSTAT_STICKYCMP != 0 {
		clear |= ADIV5_DP_ABORT_STKCMPCLR;
	}
	if err & ADIV5_DP_CTRLSTAT_STICKYERR != 0 {
		clear |= ADIV5_DP_ABORT_STKERRCLR;
	}
	if err & ADIV5_DP_CTRLSTAT_WDATAERR != 0 {
		clear |= ADIV5_DP_ABORT_WDERRCLR;
	}
	(err, clear)
}

/// Clear whatever sticky errors a CTRLSTAT value shows with an ABORT write. Returns the sticky bits found.
pub(crate) fn clear_sticky_errors(dp: &AdiV5DebugPort, status: u32) -> Result<u32>
{
	let (err, clear) = sticky_errors(status);
	if clear != 0 {
		debug!("Clearing sticky DP errors {:#04x}", err);
		dp.low_access(ADIV5_LOW_WRITE, ADIV5_DP_ABORT, clear)?;
	}
	Ok(err)
}

/// The ADIv5 debug port associated with a JTAG TAP or a SWD interface drop of an ARM debug based device
pub struct AdiV5DebugPort
{
	/// The index of the device on the JTAG chain or DP index on SWD
	dev_index: u8,
	/// TARGETSEL instance number of this DP on a multidrop bus
	instance: u8,
	/// DP version
	version: u8,
	/// Whether a fault has occured, and which one. Only ever cleared by an ABORT write cycle.
	fault: Cell<u8>,

	/// DPv2+ specific target selection value
	targetsel: u32,

	/// DP designer (not implementer!)
	designer_code: u16,
	/// DP partno
	partno: u16,

	/// TARGETID designer, present on DPv2+
	target_designer_code: u16,
	/// TARGETID partno, present on DPv2+
	target_partno: u16,

	/// The protocol implementation to talk to the DP with
	remote: Arc<dyn BmdAdiV5Protocol>,
}

impl AdiV5DebugPort
{
	pub fn new(remote: Arc<dyn BmdAdiV5Protocol>) -> Self
	{
		Self {
			dev_index: 0,
			instance: 0,
			version: 0,
			fault: Cell::new(0),
			targetsel: 0,
			designer_code: 0,
			partno: 0,
			target_designer_code: 0,
			target_partno: 0,
			remote,
		}
	}

	/// Make a copy of this DP addressing a different multidrop instance. The copy starts fault-free.
	pub fn for_instance(&self, instance: u8) -> Self
	{
		Self {
			dev_index: instance,
			instance,
			version: self.version,
			fault: Cell::new(0),
			targetsel: (u32::from(instance) << ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET) |
				(self.targetsel & !ADIV5_DP_TARGETSEL_TINSTANCE_MASK),
			designer_code: self.designer_code,
			partno: self.partno,
			target_designer_code: self.target_designer_code,
			target_partno: self.target_partno,
			remote: self.remote.clone(),
		}
	}

	pub fn dev_index(&self) -> u8
	{
		self.dev_index
	}

	pub fn set_dev_index(&mut self, dev_index: u8)
	{
		self.dev_index = dev_index;
	}

	pub fn instance(&self) -> u8
	{
		self.instance
	}

	pub fn version(&self) -> u8
	{
		self.version
	}

	pub fn set_version(&mut self, version: u8)
	{
		self.version = version;
	}

	pub fn targetsel(&self) -> u32
	{
		self.targetsel
	}

	pub fn set_targetsel(&mut self, targetsel: u32)
	{
		self.targetsel = targetsel;
	}

	pub fn fault(&self) -> u8
	{
		self.fault.get()
	}

	pub(crate) fn set_fault(&self, fault: u8)
	{
		self.fault.set(fault);
	}

	pub(crate) fn clear_fault(&self)
	{
		self.fault.set(0);
	}

	pub fn designer_code(&self) -> u16
	{
		self.designer_code
	}

	pub fn partno(&self) -> u16
	{
		self.partno
	}

	pub fn target_designer_code(&self) -> u16
	{
		self.target_designer_code
	}

	pub fn target_partno(&self) -> u16
	{
		self.target_partno
	}

	/// Fill in the version and identity fields from a DPIDR value
	pub fn decode_dpidr(&mut self, dpidr: u32)
	{
		self.version = ((dpidr & ADIV5_DP_DPIDR_VERSION_MASK) >> ADIV5_DP_DPIDR_VERSION_OFFSET) as u8;
		self.designer_code = ((dpidr & ADIV5_DP_DPIDR_DESIGNER_MASK) >> ADIV5_DP_DPIDR_DESIGNER_OFFSET) as u16;
		self.partno = ((dpidr & ADIV5_DP_DPIDR_PARTNO_MASK) >> ADIV5_DP_DPIDR_PARTNO_OFFSET) as u16;
	}

	/// Fill in the target identity from a TARGETID value and derive the TARGETSEL value from it
	pub fn decode_targetid(&mut self, targetid: u32)
	{
		self.target_designer_code =
			((targetid & ADIV5_DP_TARGETID_TDESIGNER_MASK) >> ADIV5_DP_TARGETID_TDESIGNER_OFFSET) as u16;
		self.target_partno = ((targetid & ADIV5_DP_TARGETID_TPARTNO_MASK) >> ADIV5_DP_TARGETID_TPARTNO_OFFSET) as u16;
		self.targetsel = (u32::from(self.instance) << ADIV5_DP_TARGETSEL_TINSTANCE_OFFSET) |
			(targetid & (ADIV5_DP_TARGETID_TDESIGNER_MASK | ADIV5_DP_TARGETID_TPARTNO_MASK)) |
			1;
	}

	pub fn protocol(&self) -> &Arc<dyn BmdAdiV5Protocol>
	{
		&self.remote
	}

	/// Switch which protocol implementation carries this DP's transactions, such as moving a DP
	/// found by a host-side scan over onto a probe's accelerated relay
	pub fn set_protocol(&mut self, remote: Arc<dyn BmdAdiV5Protocol>)
	{
		self.remote = remote;
	}

	/// Perform a single DP or AP register access. AP accesses are refused without touching the
	/// wire while the DP is faulted.
	pub fn low_access(&self, rnw: u8, addr: u16, value: u32) -> Result<u32>
	{
		if addr & ADIV5_APNDP != 0 && self.fault() != 0 {
			debug!("Refusing AP access to {:04x} while the DP is faulted", addr);
			return Ok(0);
		}
		self.remote.raw_access(self, rnw, addr, value)
	}

	pub fn dp_read(&self, addr: u16) -> Result<u32>
	{
		if addr & ADIV5_APNDP != 0 && self.fault() != 0 {
			debug!("Refusing AP read of {:04x} while the DP is faulted", addr);
			return Ok(0);
		}
		self.remote.dp_read(self, addr)
	}

	pub fn dp_write(&self, addr: u16, value: u32) -> Result<()>
	{
		self.low_access(ADIV5_LOW_WRITE, addr, value)?;
		Ok(())
	}

	pub fn abort(&self, abort: u32) -> Result<()>
	{
		self.remote.abort(self, abort)
	}

	/// Recover the DP from any sticky error state, returning the error bits that were set
	pub fn error(&self, protocol_recovery: bool) -> Result<u32>
	{
		self.remote.error(self, protocol_recovery)
	}
}

/// An ADIv5 access port associated with an ADIv5 debug port on a device
pub struct AdiV5AccessPort<'dp>
{
	/// The debug port this AP is asociated with
	dp: &'dp AdiV5DebugPort,
	/// The AP's index on the DP
	apsel: u8,
	/// For ADIv6 the AP is found by its address on the DP's resource bus instead of an index
	address: TargetAddr64,

	/// The value read out from the ID register for this AP
	idr: u32,
	/// The base address of the ROM tables associated with this AP
	base: TargetAddr64,
	/// The Control and Status Word value associated with accessing this AP
	csw: u32,
}

impl<'dp> AdiV5AccessPort<'dp>
{
	pub fn new(dp: &'dp AdiV5DebugPort, apsel: u8) -> Self
	{
		Self {
			dp,
			apsel,
			address: 0,
			idr: 0,
			base: 0,
			csw: 0,
		}
	}

	/// Build an AP handle for an ADIv6 DP, where APs are addressed on the DP's resource bus
	pub fn with_address(dp: &'dp AdiV5DebugPort, address: TargetAddr64) -> Self
	{
		Self {
			address,
			..Self::new(dp, 0)
		}
	}

	/// Try to find an AP at the given index, reading out its identification and default CSW.
	/// Returns `None` if nothing answers there.
	pub fn probe(dp: &'dp AdiV5DebugPort, apsel: u8) -> Result<Option<Self>>
	{
		let mut ap = Self::new(dp, apsel);
		ap.idr = ap.read(ADIV5_AP_IDR)?;
		if ap.idr == 0 || dp.fault() != 0 {
			return Ok(None);
		}
		ap.base = u64::from(ap.read(ADIV5_AP_BASE)?);
		// Keep the AP's configured protection bits but take ownership of the size and increment fields
		ap.csw = ap.read(ADIV5_AP_CSW)? & !(ADIV5_AP_CSW_SIZE_MASK | ADIV5_AP_CSW_ADDRINC_MASK);
		debug!("AP {}: IDR={:08x} CSW={:08x} BASE={:08x}", apsel, ap.idr, ap.csw, ap.base);
		Ok(Some(ap))
	}

	pub fn dp(&self) -> &'dp AdiV5DebugPort
	{
		self.dp
	}

	pub fn apsel(&self) -> u8
	{
		self.apsel
	}

	pub fn address(&self) -> TargetAddr64
	{
		self.address
	}

	pub fn idr(&self) -> u32
	{
		self.idr
	}

	pub fn base(&self) -> TargetAddr64
	{
		self.base
	}

	pub fn csw(&self) -> u32
	{
		self.csw
	}

	pub fn set_csw(&mut self, csw: u32)
	{
		self.csw = csw;
	}

	pub fn read(&self, addr: u16) -> Result<u32>
	{
		// A faulted DP must be recovered before any AP is touched again
		if self.dp.fault() != 0 {
			return Ok(0);
		}
		self.dp.remote.ap_read(self, addr)
	}

	pub fn write(&self, addr: u16, value: u32) -> Result<()>
	{
		if self.dp.fault() != 0 {
			return Ok(());
		}
		self.dp.remote.ap_write(self, addr, value)
	}

	pub fn mem_read(&self, dest: &mut [u8], src: TargetAddr64) -> Result<()>
	{
		if self.dp.fault() != 0 {
			warn!("Refusing memory read at {:#010x} while the DP is faulted", src);
			return Ok(());
		}
		self.dp.remote.mem_read(self, dest, src)
	}

	pub fn mem_write(&self, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
	{
		if self.dp.fault() != 0 {
			warn!("Refusing memory write at {:#010x} while the DP is faulted", dest);
			return Ok(());
		}
		self.dp.remote.mem_write(self, dest, src, align)
	}
}

/// TAR only holds 32 bits without the large physical address extension, so refuse any access
/// that would run past 4GiB
pub(crate) fn check_address_range(address: TargetAddr64, length: usize) -> Result<()>
{
	if address.saturating_add(length as u64) > u64::from(u32::MAX) + 1 {
		return Err(BmdError::NotSupported("64-bit target addresses"));
	}
	Ok(())
}

/// Read target memory through a MEM-AP's CSW, TAR and DRW registers
pub(crate) fn mem_read_via_ap(ap: &AdiV5AccessPort<'_>, dest: &mut [u8], src: TargetAddr64) -> Result<()>
{
	if dest.is_empty() {
		return Ok(());
	}
	check_address_range(src, dest.len())?;
	// MEM-APs without the large data extension top out at 32-bit transfers
	let align = Align::common(src, dest.len()).min(Align::U32);
	ap.write(ADIV5_AP_CSW, ap.csw() | ADIV5_AP_CSW_ADDRINC_SINGLE | align.csw_size())?;

	let mut address = src;
	for chunk in dest.chunks_mut(align.bytes()) {
		if address == src || address & ADIV5_TAR_WRAP == 0 {
			ap.write(ADIV5_AP_TAR, address as u32)?;
		}
		let value = ap.read(ADIV5_AP_DRW)?;
		if ap.dp().fault() != 0 {
			debug!("Memory read faulted at {:#010x}", address);
			return Ok(());
		}
		// Sub-word data comes back on the byte lanes selected by the address
		let value = value >> ((address & 3) * 8);
		chunk.copy_from_slice(&value.to_le_bytes()[..chunk.len()]);
		address += chunk.len() as u64;
	}
	Ok(())
}

/// Write target memory through a MEM-AP's CSW, TAR and DRW registers
pub(crate) fn mem_write_via_ap(ap: &AdiV5AccessPort<'_>, dest: TargetAddr64, src: &[u8], align: Align) -> Result<()>
{
	if src.is_empty() {
		return Ok(());
	}
	check_address_range(dest, src.len())?;
	let align = align.min(Align::U32);
	ap.write(ADIV5_AP_CSW, ap.csw() | ADIV5_AP_CSW_ADDRINC_SINGLE | align.csw_size())?;

	let mut address = dest;
	for chunk in src.chunks(align.bytes()) {
		if address == dest || address & ADIV5_TAR_WRAP == 0 {
			ap.write(ADIV5_AP_TAR, address as u32)?;
		}
		let mut bytes = [0u8; 4];
		bytes[..chunk.len()].copy_from_slice(chunk);
		let value = u32::from_le_bytes(bytes) << ((address & 3) * 8);
		ap.write(ADIV5_AP_DRW, value)?;
		if ap.dp().fault() != 0 {
			debug!("Memory write faulted at {:#010x}", address);
			return Ok(());
		}
		address += chunk.len() as u64;
	}
	Ok(())
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn common_alignment()
	{
		assert_eq!(Align::common(0x2000_0000, 4), Align::U32);
		assert_eq!(Align::common(0x2000_0000, 16), Align::U64);
		assert_eq!(Align::common(0x2000_0002, 4), Align::U16);
		assert_eq!(Align::common(0x2000_0000, 3), Align::U8);
	}

	#[test]
	fn alignment_mask()
	{
		assert_eq!(495 & Align::U32.mask(), 492);
		assert_eq!(495 & Align::U8.mask(), 495);
		assert_eq!(Align::U64.bytes(), 8);
	}

	#[test]
	fn sticky_error_clears()
	{
		let (err, clear) = sticky_errors(ADIV5_DP_CTRLSTAT_STICKYERR | ADIV5_DP_CTRLSTAT_WDATAERR | 0xf000_0000);
		assert_eq!(err, ADIV5_DP_CTRLSTAT_STICKYERR | ADIV5_DP_CTRLSTAT_WDATAERR);
		assert_eq!(clear, ADIV5_DP_ABORT_STKERRCLR | ADIV5_DP_ABORT_WDERRCLR);
		assert_eq!(sticky_errors(0xf000_0000), (0, 0));
	}

	#[test]
	fn address_range()
	{
		assert!(check_address_range(0xffff_fffc, 4).is_ok());
		assert!(matches!(check_address_range(0xffff_fffc, 8), Err(BmdError::NotSupported(_))));
		assert!(matches!(check_address_range(0x1_0000_0000, 1), Err(BmdError::NotSupported(_))));
	}

	#[test]
	fn alignment_from_wire()
	{
		assert_eq!(Align::try_from(2), Ok(Align::U32));
		assert_eq!(Align::try_from(4), Err(4));
	}
}
