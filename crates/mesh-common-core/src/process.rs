// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{trace, warn};

use crate::error::CommandError;

/// Runs `program args...` and returns trimmed stdout on success.
pub async fn run_command(program: &str, args: &[&str]) -> Result<String, CommandError> {
	trace!(cmd = %format!("{} {}", program, args.join(" ")), "running command");

	let output = Command::new(program)
		.args(args)
		.kill_on_drop(true)
		.output()
		.await
		.map_err(|e| not_installed_or_io(program, e))?;

	finish(program, args, output)
}

/// Like [`run_command`], feeding `input` on stdin. Used for secrets that must
/// not appear in the process table.
pub async fn run_command_with_stdin(
	program: &str,
	args: &[&str],
	input: &str,
) -> Result<String, CommandError> {
	trace!(cmd = %format!("{} {}", program, args.join(" ")), "running command with stdin");

	let mut child = Command::new(program)
		.args(args)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.map_err(|e| not_installed_or_io(program, e))?;

	if let Some(mut stdin) = child.stdin.take() {
		stdin.write_all(input.as_bytes()).await?;
		stdin.shutdown().await?;
	}

	let output = child.wait_with_output().await?;
	finish(program, args, output)
}

fn not_installed_or_io(program: &str, e: std::io::Error) -> CommandError {
	if e.kind() == std::io::ErrorKind::NotFound {
		warn!(program, "command not found in PATH");
		CommandError::NotInstalled(program.to_string())
	} else {
		CommandError::Io(e)
	}
}

fn finish(
	program: &str,
	args: &[&str],
	output: std::process::Output,
) -> Result<String, CommandError> {
	if output.status.success() {
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	} else {
		Err(CommandError::Failed {
			program: program.to_string(),
			args: args.join(" "),
			stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn missing_program_is_reported_as_not_installed() {
		let err = run_command("definitely-not-a-real-binary-xyz", &[])
			.await
			.unwrap_err();
		assert!(matches!(err, CommandError::NotInstalled(p) if p == "definitely-not-a-real-binary-xyz"));
	}
}
