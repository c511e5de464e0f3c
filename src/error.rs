// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Module for error handling code.

use std::sync::PoisonError;

use thiserror::Error;

use crate::exception::Exception;

#[derive(Debug, Error)]
pub enum BmdError
{
	/// A protocol violation or a condition the remote end raised as an exception.
	/// These unwind to the nearest `catch` boundary.
	#[error(transparent)]
	Exception(#[from] Exception),

	/// The probe's response was short, garbled or never arrived
	#[error("Communications with the probe failed: {0}")]
	Comms(String),

	/// The remote reported an error without any further structure to it (v1/v2 firmware,
	/// or an error code we don't know how to interpret)
	#[error("Remote reported an error (code {0:#x})")]
	Remote(u64),

	#[error("Operation not supported by the remote: {0}")]
	NotSupported(&'static str),

	#[error("Remote reported a parameter error, this is a bug")]
	Parameter,

	#[error("Request of {0} bytes does not fit in a remote protocol message")]
	Overflow(usize),

	#[error("I/O error talking to the probe")]
	Io(#[from] std::io::Error),
}

pub type Result<T, E = BmdError> = std::result::Result<T, E>;

impl BmdError
{
	pub fn comms(message: impl Into<String>) -> Self
	{
		Self::Comms(message.into())
	}

	/// Whether this error originated with the target (bus protocol violation or an exception
	/// bridged from a remote target access) rather than the link to the probe
	pub fn is_target_fault(&self) -> bool
	{
		matches!(self, Self::Exception(_) | Self::Remote(_))
	}

	/// Whether this error is a failure of the link to the probe itself
	pub fn is_comms_fault(&self) -> bool
	{
		matches!(self, Self::Comms(_) | Self::Io(_))
	}

	/// If this error carries an exception record, return it
	pub fn exception(&self) -> Option<&Exception>
	{
		match self {
			Self::Exception(exception) => Some(exception),
			_ => None,
		}
	}
}

impl<T> From<PoisonError<T>> for BmdError
{
	fn from(_: PoisonError<T>) -> Self
	{
		Self::comms("probe interface lock poisoned")
	}
}

#[macro_export]
macro_rules! log_and_return
{
	($err:expr) => {
		let err = $err;
		log::error!("{}", err);
		return Err(err.into());
	};
}
