// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

#[cfg(test)]
mod tests
{
	use std::collections::VecDeque;
	use std::sync::{Arc, Mutex};

	use bmdremote::adiv5::{ADIV5_AP_IDR, ADIV5_DP_DPIDR, ADIV5_LOW_READ, AdiV5AccessPort, AdiV5DebugPort};
	use bmdremote::error::{BmdError, Result as BmdResult};
	use bmdremote::exception::ExceptionType;
	use bmdremote::serial::RemoteInterface;
	use bmdremote::serial::remote::riscv_debug::RiscvDmi;
	use bmdremote::serial::remote::{Acceleration, BmdRemoteProtocol, ProtocolVersion, SharedInterface, SpiBus, SpiFlashId};
	use color_eyre::eyre::{OptionExt, Result};

	/// A probe that answers each request with the next canned response, recording what it was sent
	struct ScriptedInterface
	{
		responses: VecDeque<String>,
		requests: Vec<String>,
	}

	impl ScriptedInterface
	{
		fn new(responses: &[&str]) -> Arc<Mutex<Self>>
		{
			Self::with_responses(responses.iter().map(|response| response.to_string()))
		}

		fn with_responses(responses: impl IntoIterator<Item = String>) -> Arc<Mutex<Self>>
		{
			Arc::new(Mutex::new(Self {
				responses: responses.into_iter().collect(),
				requests: Vec::new(),
			}))
		}
	}

	impl RemoteInterface for ScriptedInterface
	{
		fn buffer_write(&mut self, message: &str) -> BmdResult<()>
		{
			self.requests.push(message.to_string());
			Ok(())
		}

		fn buffer_read(&mut self) -> BmdResult<String>
		{
			let response = self
				.responses
				.pop_front()
				.ok_or_else(|| BmdError::comms("script exhausted"))?;
			Ok(response.trim_start_matches('&').trim_end_matches('#').to_string())
		}
	}

	fn requests(interface: &Arc<Mutex<ScriptedInterface>>) -> Vec<String>
	{
		interface.lock().map(|interface| interface.requests.clone()).unwrap_or_default()
	}

	fn remote_for(interface: &Arc<Mutex<ScriptedInterface>>, version: ProtocolVersion)
		-> Result<Box<dyn BmdRemoteProtocol>>
	{
		let shared: SharedInterface = interface.clone();
		Ok(version.protocol_impl(shared)?)
	}

	fn hex(data: &[u8]) -> String
	{
		data.iter().map(|byte| format!("{byte:02x}")).collect()
	}

	fn v3_debug_port(interface: &Arc<Mutex<ScriptedInterface>>) -> Result<AdiV5DebugPort>
	{
		let shared: SharedInterface = interface.clone();
		let remote = ProtocolVersion::V3.protocol_impl(shared)?;
		let relay = remote.adiv5_init().ok_or_eyre("v3 should always offer ADIv5 acceleration")?;
		Ok(AdiV5DebugPort::new(relay))
	}

	#[test]
	fn v3_memory_read_wire_format() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K0000000a#"]);
		let dp = v3_debug_port(&interface)?;
		let mut ap = AdiV5AccessPort::new(&dp, 0);
		ap.set_csw(0xa2000002);

		let mut data = [0u8; 4];
		ap.mem_read(&mut data, 0x2000_0000)?;

		assert_eq!(requests(&interface), ["!Am0000a20000022000000000000004#"]);
		assert_eq!(u32::from_be_bytes(data), 0x0000000a);
		assert_eq!(dp.fault(), 0);
		Ok(())
	}

	#[test]
	fn v3_register_values_are_little_endian() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K7714a02b#"]);
		let dp = v3_debug_port(&interface)?;

		assert_eq!(dp.dp_read(ADIV5_DP_DPIDR)?, 0x2ba01477);
		assert_eq!(requests(&interface), ["!Ad00ff0000#"]);
		Ok(())
	}

	#[test]
	fn v3_fault_lands_on_the_dp() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&E203#"]);
		let dp = v3_debug_port(&interface)?;
		let ap = AdiV5AccessPort::new(&dp, 0);

		assert_eq!(ap.read(ADIV5_AP_IDR)?, 0);
		assert_eq!(dp.fault(), 2);
		assert_eq!(requests(&interface), ["!Aa000001fc#"]);
		Ok(())
	}

	#[test]
	fn v3_exception_is_raised_again_with_its_type() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&E204#"]);
		let dp = v3_debug_port(&interface)?;
		let ap = AdiV5AccessPort::new(&dp, 0);

		match ap.read(ADIV5_AP_IDR) {
			Err(BmdError::Exception(exception)) => assert_eq!(exception.kind(), ExceptionType::Timeout),
			other => panic!("expected a timeout exception, got {:?}", other),
		}
		Ok(())
	}

	#[test]
	fn v3_refuses_addresses_past_4gib() -> Result<()>
	{
		let interface = ScriptedInterface::new(&[]);
		let dp = v3_debug_port(&interface)?;
		let ap = AdiV5AccessPort::new(&dp, 0);

		let mut data = [0u8; 8];
		assert!(matches!(ap.mem_read(&mut data, 0xffff_fffc), Err(BmdError::NotSupported(_))));
		assert!(requests(&interface).is_empty());
		Ok(())
	}

	#[test]
	fn v4_init_queries_accelerations() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K1#"]);
		let shared: SharedInterface = interface.clone();
		let remote = ProtocolVersion::V4.protocol_impl(shared)?;

		assert_eq!(requests(&interface), ["!HA#"]);
		assert_eq!(remote.supported_accelerations(), Some(Acceleration::ADIv5));
		assert!(remote.adiv5_init().is_some());
		assert!(remote.adiv6_init().is_none());
		assert!(remote.riscv_jtag_init()?.is_none());
		Ok(())
	}

	#[test]
	fn v4_riscv_dmi_access() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K4#", "&K1#", "&K0#", "&K78563412#", "&K#", "&E303#"]);
		let shared: SharedInterface = interface.clone();
		let remote = ProtocolVersion::V4.protocol_impl(shared)?;
		let protocol = remote.riscv_jtag_init()?.ok_or_eyre("RISC-V JTAG should be available")?;
		let dmi = RiscvDmi::new(protocol, 0, 5, 7);

		assert_eq!(dmi.read(0x11)?, Some(0x12345678));
		assert!(dmi.write(0x10, 0x80000001)?);
		assert_eq!(dmi.read(0x11)?, None);
		assert_eq!(dmi.fault(), 3);

		assert_eq!(requests(&interface), [
			"!HA#",
			"!RP#",
			"!RSJ#",
			"!Rd00050700000011#",
			"!RD0005070000001080000001#",
			"!Rd00050700000011#",
		]);
		Ok(())
	}

	#[test]
	fn failed_v4_init_steps_down_to_v3() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K4#", "&E1#"]);
		let shared: SharedInterface = interface.clone();
		let remote = bmdremote::serial::remote::negotiate(&shared)?;

		assert_eq!(remote.version(), ProtocolVersion::V3);
		assert_eq!(requests(&interface), ["!HC#", "!HA#"]);
		Ok(())
	}

	#[test]
	fn protocol_versions_past_v4_are_capped() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K7#", "&K1#"]);
		let shared: SharedInterface = interface.clone();
		let remote = bmdremote::serial::remote::negotiate(&shared)?;

		assert_eq!(remote.version(), ProtocolVersion::V4);
		Ok(())
	}

	#[test]
	fn faulted_dp_skips_ap_accesses() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&E203#"]);
		let dp = v3_debug_port(&interface)?;
		let ap = AdiV5AccessPort::new(&dp, 0);

		assert_eq!(ap.read(ADIV5_AP_IDR)?, 0);
		assert_eq!(dp.fault(), 2);
		// Nothing more goes out for the AP until the fault is dealt with
		assert_eq!(dp.low_access(ADIV5_LOW_READ, ADIV5_AP_IDR, 0)?, 0);
		assert_eq!(requests(&interface).len(), 1);
		Ok(())
	}

	#[test]
	fn v3_spi_wire_format() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K0#", "&Kef4018#", "&K0#"]);
		let remote = remote_for(&interface, ProtocolVersion::V3)?;
		let spi = remote.spi_init().ok_or_eyre("v3 should offer SPI")?;

		assert!(spi.begin(SpiBus::Internal)?);
		assert_eq!(spi.read_chip_id(SpiBus::Internal, 1)?, SpiFlashId {
			manufacturer: 0xef,
			device_type: 0x40,
			capacity: 0x18,
		});
		assert!(spi.run_command(SpiBus::External, 2, 0x0006, 0)?);
		assert_eq!(requests(&interface), ["+#!sB00#", "!sI0001#", "!sc01020006000000#"]);
		Ok(())
	}

	#[test]
	fn v3_spi_transfers_are_chunked() -> Result<()>
	{
		let data: Vec<u8> = (0..600u32).map(|index| (index * 3) as u8).collect();
		let interface = ScriptedInterface::with_responses([
			format!("&K{}#", hex(&data[..511])),
			format!("&K{}#", hex(&data[511..])),
			"&K0#".to_string(),
			"&K0#".to_string(),
		]);
		let remote = remote_for(&interface, ProtocolVersion::V3)?;
		let spi = remote.spi_init().ok_or_eyre("v3 should offer SPI")?;

		let mut readback = vec![0u8; data.len()];
		assert!(spi.read(SpiBus::Internal, 1, 0x000b, 0x1000, &mut readback)?);
		assert_eq!(readback, data);
		assert!(spi.write(SpiBus::Internal, 1, 0x0002, 0x1000, &data)?);

		let requests = requests(&interface);
		assert_eq!(requests.len(), 4);
		assert_eq!(requests[0], "!sr0001000b0010000001ff#");
		assert_eq!(requests[1], "!sr0001000b0011ff0059#");
		// A write request fills a whole message, 501 bytes a go
		assert_eq!(requests[2].len(), 1024);
		assert!(requests[2].starts_with("!sw0001000200100001f5"));
		assert_eq!(requests[3], format!("!sw000100020011f50063{}#", hex(&data[501..])));
		Ok(())
	}

	#[test]
	fn v3_spi_failure_is_reported_not_raised() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&E3#", "&N#"]);
		let remote = remote_for(&interface, ProtocolVersion::V3)?;
		let spi = remote.spi_init().ok_or_eyre("v3 should offer SPI")?;

		assert!(!spi.begin(SpiBus::External)?);
		assert_eq!(spi.xfer(SpiBus::External, 0x9f)?, 0xff);
		Ok(())
	}

	#[test]
	fn v0_jtag_shifts_32_bits_at_a_time() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K0#", "&K87654321#", "&Kcd#"]);
		let remote = remote_for(&interface, ProtocolVersion::V0)?;
		let jtag = remote.jtag_init()?;

		let mut data_out = [0u8; 5];
		jtag.tap_tdi_tdo_seq(Some(&mut data_out), true, Some(&[0x78, 0x56, 0x34, 0x12, 0xab]), 40)?;
		assert_eq!(data_out, [0x21, 0x43, 0x65, 0x87, 0xcd]);
		// Only the last chunk carries the TMS transition
		assert_eq!(requests(&interface), ["+#!JS#", "!Jd2012345678#", "!JD08ab#"]);
		Ok(())
	}

	#[test]
	fn v0_jtag_refuses_short_buffers() -> Result<()>
	{
		let interface = ScriptedInterface::new(&["&K0#"]);
		let remote = remote_for(&interface, ProtocolVersion::V0)?;
		let jtag = remote.jtag_init()?;

		let mut data_out = [0u8; 2];
		let result = jtag.tap_tdi_tdo_seq(Some(&mut data_out), false, Some(&[0u8; 4]), 32);
		assert!(matches!(result, Err(BmdError::Parameter)));
		assert!(matches!(jtag.tap_tdi_seq(false, &[0u8; 1], 9), Err(BmdError::Parameter)));
		assert_eq!(requests(&interface), ["+#!JS#"]);
		Ok(())
	}

	#[test]
	fn jtag_clock_cycles_by_version() -> Result<()>
	{
		// v0 has to step the TAP one cycle at a time
		let interface = ScriptedInterface::new(&["&K0#", "&K0#", "&K0#", "&K0#"]);
		let jtag = remote_for(&interface, ProtocolVersion::V0)?.jtag_init()?;
		jtag.tap_cycle(false, false, 3)?;
		assert_eq!(requests(&interface), ["+#!JS#", "!JN00#", "!JN00#", "!JN00#"]);

		let interface = ScriptedInterface::new(&["&K0#", "&K0#"]);
		let jtag = remote_for(&interface, ProtocolVersion::V2)?.jtag_init()?;
		jtag.tap_cycle(true, false, 3)?;
		assert_eq!(requests(&interface), ["+#!JS#", "!Jc1000000003#"]);
		Ok(())
	}
}
