// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

#[cfg(test)]
mod tests
{
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	use bmdremote::adiv5::swd::SwdEngine;
	use bmdremote::adiv5::{ADIV5_AP_IDR, AdiV5AccessPort, AdiV5DebugPort, Align};
	use bmdremote::exception::{ExceptionType, catch};
	use bmdremote::fake_target::{FAKE_AP_IDR, FakeJtagChain, FakeSwdBus, FakeTap, FakeTarget, SimulatedFault, TapState};
	use bmdremote::serial::loopback::LoopbackInterface;
	use bmdremote::serial::remote::codec::{self, REMOTE_ADIV5_MEM_WRITE_LENGTH};
	use bmdremote::serial::remote::responder::RemoteResponder;
	use bmdremote::serial::remote::{
		BmdJtagProtocol, BmdRemoteProtocol, ProtocolVersion, SharedInterface, handshake, negotiate,
	};
	use color_eyre::eyre::{OptionExt, Result, eyre};

	const DPIDR_V1: u32 = 0x2ba01477;
	const DPIDR_V2: u32 = 0x0bc12477;
	const TARGETID: u32 = 0x01002927;
	const RAM: u32 = 0x2000_0000;

	/// A host talking to a simulated probe, with the debug ports found by scanning through it
	struct Session
	{
		loopback: Arc<Mutex<LoopbackInterface>>,
		remote: Box<dyn BmdRemoteProtocol>,
		debug_ports: Vec<AdiV5DebugPort>,
	}

	impl Session
	{
		fn attach(bus: &FakeSwdBus, version: ProtocolVersion) -> Result<Self>
		{
			let engine = SwdEngine::new(Box::new(bus.clone())).with_wait_timeout(Duration::from_millis(10));
			let loopback = LoopbackInterface::shared(RemoteResponder::new(Arc::new(engine), version));
			let interface: SharedInterface = loopback.clone();

			handshake(&interface)?;
			let remote = negotiate(&interface)?;
			let host_engine = Arc::new(SwdEngine::new(remote.swd_init()?));
			let mut debug_ports = host_engine.scan(0)?;
			if let Some(relay) = remote.adiv5_init() {
				for dp in &mut debug_ports {
					dp.set_protocol(relay.clone());
				}
			}
			let session = Self {
				loopback,
				remote,
				debug_ports,
			};
			session.clear_requests()?;
			Ok(session)
		}

		fn requests(&self) -> Result<Vec<String>>
		{
			let loopback = self.loopback.lock().map_err(|_| eyre!("loopback lock poisoned"))?;
			Ok(loopback.requests().to_vec())
		}

		fn clear_requests(&self) -> Result<()>
		{
			self.loopback
				.lock()
				.map_err(|_| eyre!("loopback lock poisoned"))?
				.clear_requests();
			Ok(())
		}
	}

	/// Bring up a host session against a simulated probe serving JTAG from `chain`
	fn jtag_session(
		chain: &FakeJtagChain,
		version: ProtocolVersion,
	) -> Result<(Arc<Mutex<LoopbackInterface>>, Box<dyn BmdRemoteProtocol>)>
	{
		let bus = FakeSwdBus::new([]);
		let engine = SwdEngine::new(Box::new(bus)).with_wait_timeout(Duration::from_millis(10));
		let responder = RemoteResponder::new(Arc::new(engine), version).with_jtag(chain.clone());
		let loopback = LoopbackInterface::shared(responder);
		let interface: SharedInterface = loopback.clone();
		handshake(&interface)?;
		let remote = negotiate(&interface)?;
		Ok((loopback, remote))
	}

	fn memory_ap(dp: &AdiV5DebugPort) -> Result<AdiV5AccessPort<'_>>
	{
		AdiV5AccessPort::probe(dp, 0)?.ok_or_eyre("no MEM-AP found")
	}

	#[test]
	fn v2_firmware_settles_on_v2() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(DPIDR_V1).with_memory(RAM, b"v2 relay"));
		let session = Session::attach(&bus, ProtocolVersion::V2)?;

		assert_eq!(session.remote.version(), ProtocolVersion::V2);
		assert!(session.remote.spi_init().is_none());
		assert_eq!(session.remote.supported_accelerations(), None);
		assert_eq!(session.remote.supported_architectures()?, None);
		assert_eq!(session.remote.supported_families()?, None);

		// The v1 style relay still works, and nothing from v3 onwards is ever sent
		let dp = &session.debug_ports[0];
		let ap = memory_ap(dp)?;
		let mut data = [0u8; 8];
		ap.mem_read(&mut data, u64::from(RAM))?;
		assert_eq!(&data, b"v2 relay");
		assert!(session.requests()?.iter().all(|request| !request.starts_with("!A")));
		Ok(())
	}

	#[test]
	fn memory_write_is_split_into_whole_messages() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(DPIDR_V1));
		let session = Session::attach(&bus, ProtocolVersion::V3)?;
		let dp = &session.debug_ports[0];
		let ap = memory_ap(dp)?;
		session.clear_requests()?;

		let data: Vec<u8> = (0..2000u32).map(|index| (index * 7) as u8).collect();
		ap.mem_write(u64::from(RAM), &data, Align::U32)?;

		let chunk_size = codec::write_block_size(REMOTE_ADIV5_MEM_WRITE_LENGTH, Align::U32);
		let writes = session
			.requests()?
			.iter()
			.filter(|request| request.starts_with("!AM"))
			.count();
		assert!(writes > 1);
		assert_eq!(writes, data.len().div_ceil(chunk_size));
		assert_eq!(dp.fault(), 0);
		assert_eq!(bus.target_memory(0, RAM, data.len()), Some(data));
		Ok(())
	}

	#[test]
	fn exception_type_survives_the_round_trip() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(DPIDR_V1));
		let session = Session::attach(&bus, ProtocolVersion::V3)?;
		let dp = &session.debug_ports[0];
		let ap = memory_ap(dp)?;

		bus.inject_fault(SimulatedFault::BadParity);
		let exception = catch(ExceptionType::all_types(), ap.read(ADIV5_AP_IDR))?
			.err()
			.ok_or_eyre("bad parity should have raised an exception")?;
		assert_eq!(exception.kind(), ExceptionType::Error);

		// Both ends carry on afterwards
		bus.clear_fault();
		assert_eq!(ap.read(ADIV5_AP_IDR)?, FAKE_AP_IDR);
		Ok(())
	}

	#[test]
	fn wait_timeout_comes_back_as_a_fault() -> Result<()>
	{
		let bus = FakeSwdBus::single(FakeTarget::new(DPIDR_V1));
		let session = Session::attach(&bus, ProtocolVersion::V3)?;
		let dp = &session.debug_ports[0];
		let ap = memory_ap(dp)?;

		bus.inject_fault(SimulatedFault::WaitForever);
		assert_eq!(ap.read(ADIV5_AP_IDR)?, 0);
		assert_eq!(dp.fault(), 2);

		bus.clear_fault();
		dp.error(false)?;
		assert_eq!(dp.fault(), 0);
		assert_eq!(ap.read(ADIV5_AP_IDR)?, FAKE_AP_IDR);
		Ok(())
	}

	#[test]
	fn v4_multidrop_targets_are_kept_apart() -> Result<()>
	{
		let bus = FakeSwdBus::new((0..3).map(|instance| {
			FakeTarget::multidrop(DPIDR_V2, TARGETID, instance).with_memory(RAM, &[instance; 4])
		}));
		let session = Session::attach(&bus, ProtocolVersion::V4)?;
		assert_eq!(session.debug_ports.len(), 3);

		// Going back and forth between the targets has to reselect each time
		for dp in session.debug_ports.iter().chain(session.debug_ports.iter().rev()) {
			let ap = memory_ap(dp)?;
			let mut data = [0xffu8; 4];
			ap.mem_read(&mut data, u64::from(RAM))?;
			assert_eq!(data, [dp.instance(); 4]);
		}

		let requests = session.requests()?;
		assert!(requests.iter().any(|request| request == "!AV02#"));
		assert!(requests.iter().any(|request| request.starts_with("!AT")));
		Ok(())
	}

	#[test]
	fn old_firmware_uses_the_swd_passthrough() -> Result<()>
	{
		for version in [ProtocolVersion::V0, ProtocolVersion::V0Plus] {
			let bus = FakeSwdBus::single(FakeTarget::new(DPIDR_V1).with_memory(RAM, b"bitbang!"));
			let session = Session::attach(&bus, version)?;
			assert_eq!(session.remote.version(), version);
			assert!(session.remote.adiv5_init().is_none());
			assert!(session.remote.spi_init().is_none());

			let dp = &session.debug_ports[0];
			let ap = memory_ap(dp)?;
			let mut data = [0u8; 8];
			ap.mem_read(&mut data, u64::from(RAM))?;
			assert_eq!(&data, b"bitbang!");
			// Every access is done as raw SWD sequences
			assert!(session.requests()?.iter().all(|request| request.starts_with("!S")));
		}
		Ok(())
	}

	#[test]
	fn jtag_idcode_scan_through_the_responder() -> Result<()>
	{
		for version in [ProtocolVersion::V0, ProtocolVersion::V2, ProtocolVersion::V4] {
			let chain = FakeJtagChain::new([FakeTap::new(0x4ba00477, 4), FakeTap::new(0x06413041, 5)]);
			let (loopback, remote) = jtag_session(&chain, version)?;
			assert_eq!(remote.version(), version);

			let jtag: Box<dyn BmdJtagProtocol> = remote.jtag_init()?;
			jtag.tap_reset()?;
			jtag.tap_tms_seq(0b0010, 4)?;
			let mut idcodes = [0u8; 8];
			jtag.tap_tdi_tdo_seq(Some(&mut idcodes), true, Some(&[0xff; 8]), 64)?;
			assert_eq!(&idcodes[..4], &0x4ba00477u32.to_le_bytes());
			assert_eq!(&idcodes[4..], &0x06413041u32.to_le_bytes());
			assert_eq!(chain.tap_state(), TapState::Exit1DR);

			let before = chain.clocks();
			jtag.tap_cycle(false, false, 2)?;
			assert_eq!(chain.clocks(), before + 2);
			assert_eq!(chain.tap_state(), TapState::PauseDR);

			let loopback = loopback.lock().map_err(|_| eyre!("loopback lock poisoned"))?;
			let requests = loopback.requests();
			let shifts = requests.iter().filter(|request| request.starts_with("!Jd") || request.starts_with("!JD"));
			assert_eq!(shifts.count(), 2);
			if version >= ProtocolVersion::V2 {
				assert!(requests.ends_with(&["!Jc0000000002#".to_string()]));
			} else {
				assert!(requests.ends_with(&["!JN00#".to_string(), "!JN00#".to_string()]));
			}
		}
		Ok(())
	}
}
