// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Exceptions are the fatal side of the fault model: a parity error or an ACK the bus should never
//! produce can't be handled where it happens, so it travels back up the call stack as a
//! [`BmdError::Exception`] until something installs a handler for it with [`catch`]. The remote
//! responder does this once per command, turning the exception into an error response, and the
//! host side turns that response back into the same exception.

use std::borrow::Cow;

use bitmask_enum::bitmask;
use thiserror::Error;

use crate::error::{BmdError, Result};

/// The kinds of exception that may be raised, as a mask so that handlers can select a subset
#[bitmask(u32)]
pub enum ExceptionType
{
	Error = 1 << 0,
	Timeout = 1 << 1,
}

impl ExceptionType
{
	/// Mask matching every exception type, including ones only the remote end knows about
	pub fn all_types() -> Self
	{
		Self::from(u32::MAX)
	}
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Exception
{
	kind: ExceptionType,
	message: Cow<'static, str>,
}

impl Exception
{
	pub fn new(kind: ExceptionType, message: impl Into<Cow<'static, str>>) -> Self
	{
		Self {
			kind,
			message: message.into(),
		}
	}

	pub fn error(message: impl Into<Cow<'static, str>>) -> Self
	{
		Self::new(ExceptionType::Error, message)
	}

	pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self
	{
		Self::new(ExceptionType::Timeout, message)
	}

	pub fn kind(&self) -> ExceptionType
	{
		self.kind
	}

	pub fn message(&self) -> &str
	{
		&self.message
	}
}

/// Raise an exception of the given type, unwinding to the nearest [`catch`] for it
pub fn raise<T>(kind: ExceptionType, message: impl Into<Cow<'static, str>>) -> Result<T>
{
	Err(Exception::new(kind, message).into())
}

/// Install a handler for the exception types in `mask` around the result of some operation.
///
/// Exceptions matching the mask are handed back as the inner `Err`, everything else (including
/// comms failures, which are never exceptions) keeps propagating as the outer error.
pub fn catch<T>(mask: ExceptionType, result: Result<T>) -> Result<Result<T, Exception>>
{
	match result {
		Ok(value) => Ok(Ok(value)),
		Err(BmdError::Exception(exception)) if exception.kind.intersects(mask) => Ok(Err(exception)),
		Err(error) => Err(error),
	}
}

#[cfg(test)]
mod tests
{
	use super::*;

	fn failing_operation(kind: ExceptionType) -> Result<u32>
	{
		raise(kind, "operation failed")
	}

	#[test]
	fn catch_matching_type()
	{
		let result = catch(ExceptionType::Timeout, failing_operation(ExceptionType::Timeout));
		let exception = result.ok().and_then(|inner| inner.err());
		assert_eq!(exception.map(|exception| exception.kind()), Some(ExceptionType::Timeout));
	}

	#[test]
	fn catch_passes_other_types_through()
	{
		let result = catch(ExceptionType::Timeout, failing_operation(ExceptionType::Error));
		match result {
			Err(BmdError::Exception(exception)) => assert_eq!(exception.kind(), ExceptionType::Error),
			_ => panic!("exception should not have been caught"),
		}
	}

	#[test]
	fn catch_ignores_comms_failures()
	{
		let result: Result<Result<u32, Exception>> = catch(ExceptionType::all_types(), Err(BmdError::comms("short read")));
		assert!(matches!(result, Err(BmdError::Comms(_))));
	}

	#[test]
	fn catch_success()
	{
		let result = catch(ExceptionType::all_types(), Ok(42));
		assert!(matches!(result, Ok(Ok(42))));
	}
}
