//! Command-line interface definitions for the `cloudkit` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `cloudkit` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cloudkit",
    about = "Build servers and wait for them to settle on an IaaS cloud",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Poll a server until it reaches a power state.
    #[command(name = "wait", about = "Poll a server until it reaches a power state")]
    Wait(WaitCommand),
    /// Build a server with a boot disk.
    #[command(name = "build", about = "Build a server with a boot disk")]
    Build(BuildCommand),
}

/// Power state accepted by `cloudkit wait --status`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum WaitStatus {
    /// Running.
    #[default]
    Up,
    /// Powered off.
    Down,
}

/// Arguments for the `cloudkit wait` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct WaitCommand {
    /// Identifier of the server to poll.
    #[arg(value_name = "SERVER_ID")]
    pub(crate) server_id: u64,
    /// Power state to wait for.
    #[arg(long, value_enum, default_value_t = WaitStatus::Up)]
    pub(crate) status: WaitStatus,
    /// Override the configured wait timeout, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub(crate) timeout_secs: Option<u64>,
}

/// Arguments for the `cloudkit build` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BuildCommand {
    /// Server name.
    #[arg(long)]
    pub(crate) name: String,
    /// Virtual CPU count.
    #[arg(long, default_value_t = 1)]
    pub(crate) cpu: u32,
    /// Memory in GiB.
    #[arg(long = "memory", value_name = "GIB", default_value_t = 1)]
    pub(crate) memory_gb: u32,
    /// Boot disk size in GiB.
    #[arg(long = "disk-size", value_name = "GIB", default_value_t = 20)]
    pub(crate) disk_size_gb: u32,
    /// Operating system of the boot disk (for example `ubuntu` or
    /// `rocky-linux`).
    #[arg(long, value_name = "OS", default_value = "ubuntu")]
    pub(crate) os: String,
    /// Install the public key in this file on the boot disk. Without it a
    /// key pair is generated and the private half is printed.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_key_file: Option<String>,
    /// Connect the primary NIC to this switch instead of the shared segment.
    #[arg(long = "switch", value_name = "SWITCH_ID")]
    pub(crate) switch_id: Option<u64>,
    /// Power the server on once its disks are ready.
    #[arg(long)]
    pub(crate) boot: bool,
}
