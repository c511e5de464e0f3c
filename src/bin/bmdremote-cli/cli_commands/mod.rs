// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::sync::{Arc, Mutex};

use bmdremote::adiv5::swd::SwdEngine;
use bmdremote::error::BmdError;
use bmdremote::fake_target::{FakeSwdBus, FakeTarget};
use bmdremote::serial::bmd_rsp::BmdRspInterface;
use bmdremote::serial::loopback::LoopbackInterface;
use bmdremote::serial::remote::responder::RemoteResponder;
use bmdremote::serial::remote::{BmdRemoteProtocol, SharedInterface, handshake, negotiate};
use clap::Subcommand;
use color_eyre::eyre::{Context, OptionExt, Report, Result};
use log::{debug, info};

use crate::cli_commands::probe::ProbeArguments;
use crate::cli_commands::target::TargetArguments;
use crate::{CliArguments, CompletionArguments};

pub mod probe;
pub mod target;

/// A DPv1 part, as found on most single-core Cortex-M devices
const SIMULATED_DPIDR_V1: u32 = 0x2ba01477;
/// A DPv2 multi-drop part
const SIMULATED_DPIDR_V2: u32 = 0x0bc12477;
const SIMULATED_TARGETID: u32 = 0x01002927;
const SIMULATED_RAM: u32 = 0x2000_0000;
const SIMULATED_RAM_CONTENTS: &[u8] = b"Hello from the simulated target!";

#[derive(Subcommand)]
pub enum ToplevelCommands
{
	/// Actions to be performed against a probe
	Probe(ProbeArguments),
	/// Actions to be performed against a target connected to a probe
	Target(TargetArguments),
	/// Generate completions data for the shell
	Complete(CompletionArguments),
}

/// Parse a number given either in decimal or, with a `0x` prefix, in hex
pub fn parse_number(value: &str) -> Result<u64, String>
{
	let result = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
		Some(hex) => u64::from_str_radix(hex, 16),
		None => value.parse(),
	};
	result.map_err(|error| format!("'{}' is not a valid number: {}", value, error))
}

/// Parse a number the same way as [`parse_number`], refusing anything that needs more than 32 bits
pub fn parse_u32(value: &str) -> Result<u32, String>
{
	let number = parse_number(value)?;
	u32::try_from(number).map_err(|_| format!("'{}' does not fit in 32 bits", value))
}

/// Label a library error as a fault with the target or with the link to the probe, so the two
/// can be told apart by whoever reads the report
pub fn classify(error: BmdError) -> Report
{
	let kind = if error.is_comms_fault() {
		"Communication fault with the probe"
	} else if error.is_target_fault() {
		"Target fault"
	} else {
		"Remote protocol error"
	};
	Report::new(error).wrap_err(kind)
}

/// Open the link to the probe the invocation names, or build a simulated one
fn open_interface(cli_args: &CliArguments) -> Result<SharedInterface>
{
	if let Some(targets) = cli_args.simulate {
		return Ok(simulated_interface(cli_args, targets));
	}
	let port = cli_args
		.port
		.as_deref()
		.ok_or_eyre("No probe given, please use --port or --simulate")?;
	let interface = BmdRspInterface::from_path(port).wrap_err_with(|| format!("opening {}", port.display()))?;
	Ok(Arc::new(Mutex::new(interface)))
}

fn simulated_interface(cli_args: &CliArguments, targets: u8) -> SharedInterface
{
	info!("Using a simulated probe with {} target(s)", targets);
	let bus = if targets == 1 {
		FakeSwdBus::single(FakeTarget::new(SIMULATED_DPIDR_V1).with_memory(SIMULATED_RAM, SIMULATED_RAM_CONTENTS))
	} else {
		FakeSwdBus::new((0..targets).map(|instance| {
			FakeTarget::multidrop(SIMULATED_DPIDR_V2, SIMULATED_TARGETID, instance)
				.with_memory(SIMULATED_RAM, SIMULATED_RAM_CONTENTS)
		}))
	};
	let engine = SwdEngine::new(Box::new(bus)).with_wait_timeout(cli_args.wait_timeout());
	let responder = RemoteResponder::new(Arc::new(engine), cli_args.protocol_version.into());
	let interface: SharedInterface = LoopbackInterface::shared(responder);
	interface
}

/// Bring up remote protocol communications, returning the probe's identity and the protocol
/// implementation for the version it speaks
fn connect(cli_args: &CliArguments) -> Result<(String, Box<dyn BmdRemoteProtocol>)>
{
	let interface = open_interface(cli_args)?;
	let identity = handshake(&interface).map_err(classify)?;
	let remote = negotiate(&interface).map_err(classify)?;
	debug!("Talking to {} with remote protocol {}", identity, remote.version());
	Ok((identity, remote))
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn numbers()
	{
		assert_eq!(parse_number("0x20000000"), Ok(0x2000_0000));
		assert_eq!(parse_number("64"), Ok(64));
		assert!(parse_number("0xzz").is_err());
		assert_eq!(parse_u32("0x01002927"), Ok(0x0100_2927));
		assert!(parse_u32("0x101002927").is_err());
	}
}
