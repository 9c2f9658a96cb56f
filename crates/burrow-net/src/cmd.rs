//! Thin wrappers around the `ip` and `iptables` binaries.

use std::io;
use std::process::Command;

use burrow_common::{BurrowError, BurrowResult};

fn run(binary: &str, args: &[&str]) -> BurrowResult<String> {
    let output = Command::new(binary)
        .args(args)
        .output()
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BurrowError::CommandNotFound {
                command: binary.to_string(),
            },
            _ => BurrowError::Io(e),
        })?;

    if !output.status.success() {
        let command = std::iter::once(binary)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        return Err(BurrowError::CommandFailed {
            command,
            output: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run `ip` with the given arguments and return its stdout.
pub(crate) fn run_ip(args: &[&str]) -> BurrowResult<String> {
    run("ip", args)
}

/// Run `iptables` with the given arguments, discarding stdout.
pub(crate) fn run_iptables(args: &[&str]) -> BurrowResult<()> {
    run("iptables", args).map(|_| ())
}
