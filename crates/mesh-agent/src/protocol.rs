// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The closed set of controller commands.

use std::collections::HashSet;
use std::fmt;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
	GetInfo,
	WgInfo,
	WgConf,
	ConfigInfo,
	AutoPing,
	IperfServer,
	IperfTest,
}

impl Command {
	pub const ALL: [Command; 7] = [
		Command::GetInfo,
		Command::WgInfo,
		Command::WgConf,
		Command::ConfigInfo,
		Command::AutoPing,
		Command::IperfServer,
		Command::IperfTest,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Command::GetInfo => "GET_INFO",
			Command::WgInfo => "WG_INFO",
			Command::WgConf => "WG_CONF",
			Command::ConfigInfo => "CONFIG_INFO",
			Command::AutoPing => "AUTO_PING",
			Command::IperfServer => "IPERF_SERVER",
			Command::IperfTest => "IPERF_TEST",
		}
	}

	/// Exact, case-sensitive lookup.
	pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
		Command::ALL
			.into_iter()
			.find(|c| c.as_str() == name)
			.ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Checks that every command name is distinct and resolves back to its
/// command. Run once when the dispatcher is built.
pub fn verify_registry() -> Result<(), ProtocolError> {
	let mut seen = HashSet::new();
	for command in Command::ALL {
		if !seen.insert(command.as_str()) || Command::from_name(command.as_str()) != Ok(command) {
			return Err(ProtocolError::Unhandled(command.as_str()));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registry_is_complete() {
		verify_registry().unwrap();
	}

	#[test]
	fn lookup_is_case_sensitive() {
		assert_eq!(Command::from_name("WG_INFO"), Ok(Command::WgInfo));
		assert_eq!(
			Command::from_name("wg_info"),
			Err(ProtocolError::UnknownCommand("wg_info".into()))
		);
	}
}
