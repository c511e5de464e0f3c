// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

mod cli_commands;

use std::io::stdout;
use std::path::PathBuf;
use std::time::Duration;

use bmdremote::serial::remote::ProtocolVersion;
use clap::builder::styling::Styles;
use clap::{Args, CommandFactory, Parser, ValueEnum, crate_description, crate_version};
use clap_complete::{Shell, generate};
use color_eyre::config::HookBuilder;
use color_eyre::eyre::{EyreHandler, InstallError, Result};
use owo_colors::OwoColorize;

use crate::cli_commands::{ToplevelCommands, parse_u32};

#[derive(Parser)]
#[command(
	version,
	about = format!("{} v{}", crate_description!(), crate_version!()),
	styles(style()),
	disable_colored_help(false),
	arg_required_else_help(true)
)]
struct CliArguments
{
	#[arg(global = true, short = 'p', long = "port", conflicts_with = "simulate")]
	/// Use the probe whose GDB serial interface is the given port
	port: Option<PathBuf>,
	#[arg(global = true, long = "simulate", value_parser = clap::value_parser!(u8).range(1..=16))]
	/// Talk to an in-process simulated probe with this many multi-drop targets on its SWD bus
	simulate: Option<u8>,
	#[arg(global = true, long = "protocol-version", value_enum, default_value_t = SimulatedVersion::V4)]
	/// Remote protocol version the simulated probe should speak
	protocol_version: SimulatedVersion,
	#[arg(global = true, long = "wait-timeout-ms", default_value_t = 250)]
	/// How long a target may answer WAIT for before an access is given up on
	wait_timeout_ms: u64,
	#[arg(global = true, long = "target-id", value_parser = parse_u32)]
	/// TARGETID to select with when scanning a multi-drop bus
	target_id: Option<u32>,

	#[command(subcommand)]
	pub subcommand: ToplevelCommands,
}

impl CliArguments
{
	fn wait_timeout(&self) -> Duration
	{
		Duration::from_millis(self.wait_timeout_ms)
	}

	fn target_id(&self) -> u32
	{
		self.target_id.unwrap_or(0)
	}
}

#[derive(Clone, Copy, ValueEnum)]
enum SimulatedVersion
{
	V0,
	V0Plus,
	V1,
	V2,
	V3,
	V4,
}

impl From<SimulatedVersion> for ProtocolVersion
{
	fn from(version: SimulatedVersion) -> Self
	{
		match version {
			SimulatedVersion::V0 => Self::V0,
			SimulatedVersion::V0Plus => Self::V0Plus,
			SimulatedVersion::V1 => Self::V1,
			SimulatedVersion::V2 => Self::V2,
			SimulatedVersion::V3 => Self::V3,
			SimulatedVersion::V4 => Self::V4,
		}
	}
}

#[derive(Args)]
struct CompletionArguments
{
	shell: Shell,
}

type EyreHookFunc = Box<dyn Fn(&(dyn std::error::Error + 'static)) -> Box<dyn EyreHandler> + Send + Sync + 'static>;
type PanicHookFunc = Box<dyn Fn(&std::panic::PanicHookInfo<'_>) + Send + Sync + 'static>;

struct BmdremoteHook
{
	inner_hook: EyreHookFunc,
}

struct BmdremotePanic
{
	inner_hook: PanicHookFunc,
}

struct BmdremoteHandler
{
	inner_handler: Box<dyn EyreHandler>,
}

impl BmdremoteHook
{
	fn build_handler(&self, error: &(dyn std::error::Error + 'static)) -> BmdremoteHandler
	{
		BmdremoteHandler {
			inner_handler: (*self.inner_hook)(error),
		}
	}

	pub fn install(self) -> Result<(), InstallError>
	{
		color_eyre::eyre::set_hook(self.into_eyre_hook())
	}

	pub fn into_eyre_hook(self) -> EyreHookFunc
	{
		Box::new(move |err| Box::new(self.build_handler(err)))
	}
}

impl BmdremotePanic
{
	pub fn install(self)
	{
		std::panic::set_hook(self.into_panic_hook());
	}

	pub fn into_panic_hook(self) -> PanicHookFunc
	{
		Box::new(move |panic_info| {
			self.print_header();
			(*self.inner_hook)(panic_info);
			self.print_footer();
		})
	}

	fn print_header(&self)
	{
		eprintln!("------------[ ✂ cut here ✂ ]------------");
		eprintln!("Unhandled crash in bmdremote-cli v{}", crate_version!());
		eprintln!();
	}

	fn print_footer(&self)
	{
		eprintln!();
		eprintln!("{}", "Please include all lines down to this one from the cut here".yellow());
		eprintln!("{}", "marker, and report this issue to our issue tracker at".yellow());
		eprintln!("https://github.com/blackmagic-debug/bmdremote/issues");
	}
}

impl EyreHandler for BmdremoteHandler
{
	fn debug(&self, error: &(dyn std::error::Error + 'static), fmt: &mut core::fmt::Formatter<'_>)
	-> core::fmt::Result
	{
		writeln!(fmt, "------------[ ✂ cut here ✂ ]------------")?;
		write!(fmt, "Unhandled crash in bmdremote-cli v{}", crate_version!())?;
		self.inner_handler.debug(error, fmt)?;
		writeln!(fmt)?;
		writeln!(fmt)?;
		writeln!(
			fmt,
			"{}",
			"Please include all lines down to this one from the cut here".yellow()
		)?;
		writeln!(fmt, "{}", " marker, and report this issue to our issue tracker at".yellow())?;
		write!(fmt, "https://github.com/blackmagic-debug/bmdremote/issues")
	}

	fn track_caller(&mut self, location: &'static std::panic::Location<'static>)
	{
		self.inner_handler.track_caller(location);
	}
}

fn install_error_handler() -> Result<()>
{
	// Grab us a new default handler and turn it into a pair of hooks, one for panics and the other for errors
	let default_handler = HookBuilder::default();
	let (panic_hook, eyre_hook) = default_handler.try_into_hooks()?;

	// Wrap both in our own handlers so we only have to deal with our additions
	BmdremotePanic {
		inner_hook: panic_hook.into_panic_hook(),
	}
	.install();
	BmdremoteHook {
		inner_hook: eyre_hook.into_eyre_hook(),
	}
	.install()?;
	Ok(())
}

/// Clap v3 style (approximate)
/// See https://stackoverflow.com/a/75343828
fn style() -> clap::builder::Styles
{
	Styles::styled()
		.usage(
			anstyle::Style::new()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)))
				.bold(),
		)
		.header(
			anstyle::Style::new()
				.bold()
				.fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
		)
		.literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
}

fn main() -> Result<()>
{
	install_error_handler()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();

	match &cli_args.subcommand {
		ToplevelCommands::Probe(probe_args) => probe_args.subcommand(&cli_args),
		ToplevelCommands::Target(target_args) => target_args.subcommand(&cli_args),
		ToplevelCommands::Complete(comp_args) => {
			let mut cmd = CliArguments::command();
			generate(comp_args.shell, &mut cmd, "bmdremote-cli", &mut stdout());
			Ok(())
		},
	}
}
