// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use clap::{Args, Subcommand};
use color_eyre::eyre::Result;
use log::{info, warn};

use crate::CliArguments;
use crate::cli_commands::{classify, connect};

#[derive(Args)]
pub struct ProbeArguments
{
	#[command(subcommand)]
	subcommand: ProbeCommands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help(true))]
pub enum ProbeCommands
{
	/// Print information about the probe and what its firmware can do
	Info,
}

impl ProbeArguments
{
	pub fn subcommand(&self, cli_args: &CliArguments) -> Result<()>
	{
		match &self.subcommand {
			ProbeCommands::Info => info_command(cli_args),
		}
	}
}

fn info_command(cli_args: &CliArguments) -> Result<()>
{
	let (identity, remote) = connect(cli_args)?;
	println!("Found: {}", identity);
	println!("  Remote protocol: {}", remote.version());

	match remote.supported_accelerations() {
		Some(accelerations) => println!("  Accelerations: {}", accelerations),
		None => info!("Probe firmware does not report which accelerations it has, please upgrade your firmware"),
	}
	match remote.supported_architectures().map_err(classify)? {
		Some(architectures) => println!("  Target architectures: {}", architectures),
		None => info!(
			"Probe firmware does not support reporting supported architectures, please upgrade your firmware"
		),
	}
	match remote.supported_families().map_err(classify)? {
		Some(families) => println!("  Target families: {}", families),
		None => info!("Probe firmware does not support reporting supported families, please upgrade your firmware"),
	}
	match remote.target_voltage() {
		Ok(voltage) => println!("  Target voltage: {}", voltage),
		Err(error) => warn!("Could not read the target voltage: {}", error),
	}
	Ok(())
}
