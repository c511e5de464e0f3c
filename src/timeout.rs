// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

use std::time::{Duration, Instant};

/// A deadline some fixed amount of time from when it was set
pub struct PlatformTimeout
{
	deadline: Instant,
}

impl PlatformTimeout
{
	pub fn new(duration: Duration) -> Self
	{
		Self {
			deadline: Instant::now() + duration,
		}
	}

	pub fn is_expired(&self) -> bool
	{
		Instant::now() >= self.deadline
	}

	/// How long is left before the deadline passes, zero once it has
	pub fn remaining(&self) -> Duration
	{
		self.deadline.saturating_duration_since(Instant::now())
	}
}
