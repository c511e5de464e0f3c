// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::sync::Arc;

use bmdremote::adiv5::swd::SwdEngine;
use bmdremote::adiv5::{AdiV5AccessPort, AdiV5DebugPort, Align};
use bmdremote::hex::unhexify;
use clap::{Args, Subcommand, ValueEnum};
use color_eyre::eyre::{OptionExt, Result, bail, eyre};
use log::{debug, info};

use crate::CliArguments;
use crate::cli_commands::{classify, connect, parse_number};

/// How much target memory a read command pulls across per request, a multiple of the hexdump line length
const READ_BLOCK_SIZE: usize = 4096;

#[derive(Args)]
pub struct TargetArguments
{
	#[arg(global = true, long = "dp", default_value_t = 0)]
	/// Which of the debug ports found on the bus to talk to
	dp: usize,

	#[command(subcommand)]
	subcommand: TargetCommands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help(true))]
pub enum TargetCommands
{
	/// Scan the SWD bus and list the debug ports found on it
	Scan,
	/// Read target memory and print it as a hex dump
	Read(ReadArguments),
	/// Write bytes, given as a hex string, into target memory
	Write(WriteArguments),
	/// Display or change the power the probe supplies to the target
	Power(PowerArguments),
}

#[derive(Args)]
pub struct ReadArguments
{
	#[arg(value_parser = parse_number)]
	/// Address to start reading from
	address: u64,
	#[arg(value_parser = parse_number)]
	/// How many bytes to read
	length: u64,
}

#[derive(Args)]
pub struct WriteArguments
{
	#[arg(value_parser = parse_number)]
	/// Address to start writing at
	address: u64,
	/// The data to write, as pairs of hex digits
	data: String,
}

#[derive(Args)]
pub struct PowerArguments
{
	#[arg(value_enum)]
	/// Turn power to the target on or off, or leave out to see its current state
	state: Option<PowerState>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PowerState
{
	On,
	Off,
}

impl TargetArguments
{
	pub fn subcommand(&self, cli_args: &CliArguments) -> Result<()>
	{
		match &self.subcommand {
			TargetCommands::Scan => scan_command(cli_args),
			TargetCommands::Read(read_args) => read_command(cli_args, self.dp, read_args),
			TargetCommands::Write(write_args) => write_command(cli_args, self.dp, write_args),
			TargetCommands::Power(power_args) => power_command(cli_args, power_args),
		}
	}
}

/// Talk to the probe, scan its SWD bus through the raw sequence passthrough, then hand the debug
/// ports found over to whatever ADIv5 acceleration the probe offers
fn attach(cli_args: &CliArguments) -> Result<Vec<AdiV5DebugPort>>
{
	let (_, remote) = connect(cli_args)?;
	let swd = remote.swd_init().map_err(classify)?;
	let engine = Arc::new(SwdEngine::new(swd).with_wait_timeout(cli_args.wait_timeout()));
	let mut debug_ports = engine.scan(cli_args.target_id()).map_err(classify)?;
	match remote.adiv5_init() {
		Some(acceleration) => {
			debug!("Using remote protocol {} ADIv5 acceleration", remote.version());
			for dp in &mut debug_ports {
				dp.set_protocol(acceleration.clone());
			}
		},
		None => info!("Probe has no ADIv5 acceleration, target accesses will be slow"),
	}
	Ok(debug_ports)
}

fn select_dp(debug_ports: &[AdiV5DebugPort], index: usize) -> Result<&AdiV5DebugPort>
{
	debug_ports
		.get(index)
		.ok_or_else(|| eyre!("Debug port {} asked for but only {} found", index, debug_ports.len()))
}

fn memory_ap(dp: &AdiV5DebugPort) -> Result<AdiV5AccessPort<'_>>
{
	AdiV5AccessPort::probe(dp, 0)
		.map_err(classify)?
		.ok_or_eyre("No access port found on the debug port")
}

fn check_fault(dp: &AdiV5DebugPort, operation: &str) -> Result<()>
{
	match dp.fault() {
		0 => Ok(()),
		fault => bail!("Target fault {} during memory {}", fault, operation),
	}
}

fn scan_command(cli_args: &CliArguments) -> Result<()>
{
	let debug_ports = attach(cli_args)?;
	if debug_ports.is_empty() {
		bail!("No debug ports found on the SWD bus");
	}
	for (index, dp) in debug_ports.iter().enumerate() {
		print!(
			"DP {}: designer {:03x} partno {:02x} DPv{}",
			index,
			dp.designer_code(),
			dp.partno(),
			dp.version()
		);
		if dp.version() >= 2 {
			print!(
				", target designer {:03x} partno {:04x} instance {}",
				dp.target_designer_code(),
				dp.target_partno(),
				dp.instance()
			);
		}
		println!();
	}
	Ok(())
}

fn read_command(cli_args: &CliArguments, dp_index: usize, read_args: &ReadArguments) -> Result<()>
{
	let debug_ports = attach(cli_args)?;
	let dp = select_dp(&debug_ports, dp_index)?;
	let ap = memory_ap(dp)?;

	let end = read_args
		.address
		.checked_add(read_args.length)
		.ok_or_eyre("Read runs off the end of the address space")?;
	// Read a block at a time so the length asked for never turns into one huge allocation
	let mut data = [0u8; READ_BLOCK_SIZE];
	let mut address = read_args.address;
	while address < end {
		let block = &mut data[..(end - address).min(READ_BLOCK_SIZE as u64) as usize];
		ap.mem_read(block, address).map_err(classify)?;
		check_fault(dp, "read")?;
		for (line, chunk) in block.chunks(16).enumerate() {
			print_hexdump_line(address + (line as u64 * 16), chunk);
		}
		address += block.len() as u64;
	}
	Ok(())
}

fn print_hexdump_line(address: u64, chunk: &[u8])
{
	let bytes: Vec<String> = chunk.iter().map(|byte| format!("{:02x}", byte)).collect();
	let text: String = chunk
		.iter()
		.map(|&byte| if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' })
		.collect();
	println!("{:08x}: {:<47}  {}", address, bytes.join(" "), text);
}

fn write_command(cli_args: &CliArguments, dp_index: usize, write_args: &WriteArguments) -> Result<()>
{
	if write_args.data.len() % 2 != 0 {
		bail!("Data to write must be whole bytes, got {} hex digits", write_args.data.len());
	}
	let mut data = vec![0; write_args.data.len() / 2];
	unhexify(&mut data, write_args.data.as_bytes()).map_err(classify)?;

	let debug_ports = attach(cli_args)?;
	let dp = select_dp(&debug_ports, dp_index)?;
	let ap = memory_ap(dp)?;

	let align = Align::common(write_args.address, data.len());
	ap.mem_write(write_args.address, &data, align).map_err(classify)?;
	check_fault(dp, "write")?;
	info!("Wrote {} bytes to {:#010x}", data.len(), write_args.address);
	Ok(())
}

fn power_command(cli_args: &CliArguments, power_args: &PowerArguments) -> Result<()>
{
	let (_, remote) = connect(cli_args)?;
	if let Some(state) = power_args.state {
		remote
			.set_target_power(matches!(state, PowerState::On))
			.map_err(classify)?;
	}
	let powered = remote.get_target_power_state().map_err(classify)?;
	info!("Target power is {}", if powered { "on" } else { "off" });
	Ok(())
}

#[cfg(test)]
mod tests
{
	use clap::Parser;

	use super::*;
	use crate::cli_commands::ToplevelCommands;

	fn run(args: &[&str]) -> Result<()>
	{
		let cli_args = CliArguments::try_parse_from(args)?;
		let ToplevelCommands::Target(target_args) = &cli_args.subcommand else {
			bail!("not a target command");
		};
		target_args.subcommand(&cli_args)
	}

	#[test]
	fn read_spanning_several_blocks() -> Result<()>
	{
		run(&["bmdremote-cli", "--simulate", "1", "target", "read", "0x20000000", "0x2010"])
	}

	#[test]
	fn read_off_the_end_of_memory_is_refused()
	{
		let result = run(&["bmdremote-cli", "--simulate", "1", "target", "read", "0xfffffffffffffff0", "0x20"]);
		assert!(result.is_err());
	}
}
