// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

pub mod adiv5;
pub mod error;
pub mod exception;
pub mod fake_target;
pub mod hex;
pub mod serial;
pub mod timeout;
