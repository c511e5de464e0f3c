// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::fmt::Write;

use crate::error::{BmdError, Result};

fn hex_value(digit: u8) -> Option<u8>
{
	match digit {
		b'0'..=b'9' => Some(digit - b'0'),
		b'a'..=b'f' => Some(digit - b'a' + 10),
		b'A'..=b'F' => Some(digit - b'A' + 10),
		_ => None,
	}
}

/// Append the hex encoding of each byte in `data` to `buffer`, two lower-case digits per byte
pub fn hexify(buffer: &mut String, data: &[u8])
{
	for byte in data {
		// Writing into a String cannot fail
		let _ = write!(buffer, "{byte:02x}");
	}
}

/// Decode pairs of hex digits from `hex` into `data`, which must be filled completely
pub fn unhexify(data: &mut [u8], hex: &[u8]) -> Result<()>
{
	if hex.len() < data.len() * 2 {
		return Err(BmdError::comms(format!(
			"expected {} hex digits, got {}",
			data.len() * 2,
			hex.len()
		)));
	}
	for (byte, digits) in data.iter_mut().zip(hex.chunks_exact(2)) {
		match (hex_value(digits[0]), hex_value(digits[1])) {
			(Some(high), Some(low)) => *byte = (high << 4) | low,
			_ => return Err(BmdError::comms(format!("invalid hex digits '{}'", digits.escape_ascii()))),
		}
	}
	Ok(())
}

/// Decode a 32-bit register value sent as four hex-encoded bytes in target (little endian) order
pub fn unhexify_u32(hex: &[u8]) -> Result<u32>
{
	let mut value = [0u8; 4];
	unhexify(&mut value, hex)?;
	Ok(u32::from_le_bytes(value))
}

/// Decode a variable-length hex number, most significant digit first, of up to 64 bits
pub fn decode_response(hex: &[u8]) -> Result<u64>
{
	if hex.is_empty() || hex.len() > 16 {
		return Err(BmdError::comms(format!("cannot decode '{}' as a number", hex.escape_ascii())));
	}
	hex.iter().try_fold(0u64, |value, &digit| {
		hex_value(digit)
			.map(|nibble| (value << 4) | u64::from(nibble))
			.ok_or_else(|| BmdError::comms(format!("invalid hex digit '{}'", digit.escape_ascii())))
	})
}

#[cfg(test)]
mod tests
{
	use super::*;

	#[test]
	fn register_values_are_little_endian() -> color_eyre::eyre::Result<()>
	{
		assert_eq!(unhexify_u32(b"0a000000")?, 0x0000000a);
		assert_eq!(unhexify_u32(b"78563412")?, 0x12345678);
		Ok(())
	}

	#[test]
	fn numbers_are_big_endian() -> color_eyre::eyre::Result<()>
	{
		assert_eq!(decode_response(b"304")?, 0x304);
		assert_eq!(decode_response(b"FFFFFFFFFFFFFFFF")?, u64::MAX);
		assert!(decode_response(b"").is_err());
		assert!(decode_response(b"12g4").is_err());
		Ok(())
	}

	#[test]
	fn short_payload_rejected()
	{
		let mut data = [0u8; 4];
		assert!(unhexify(&mut data, b"abcdef").is_err());
	}

	#[test]
	fn hexify_pads_each_byte()
	{
		let mut buffer = String::from("!x");
		hexify(&mut buffer, &[0x00, 0x0f, 0xa5]);
		assert_eq!(buffer, "!x000fa5");
	}
}
