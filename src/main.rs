//! Binary entry point for the cloudkit CLI.

mod cli;

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;

use cloudkit::builder::{
    BuildFailure, BuildPlan, BuildResult, DiskEditSpec, DiskSpec, GenerateSshKey, NicSpec,
    ServerBuilder,
};
use cloudkit::client::BuildClient;
use cloudkit::{
    ClientConfig, FakeCloud, HttpBuildClient, HttpCaller, OsType, ResourceId, WaitContext,
    WaitError, WaitSettings, Zone, wait_until_down, wait_until_up,
};

use cli::{BuildCommand, Cli, WaitCommand, WaitStatus};

/// Poll interval used against the in-memory provider, whose transitions are
/// driven by read counts rather than wall time.
const FAKE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to read SSH public key from {path}: {message}")]
    KeyFile { path: String, message: String },
    #[error("wait failed: {0}")]
    Wait(#[from] WaitError),
    #[error(transparent)]
    Build(Box<BuildFailure>),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli, &mut io::stdout()).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli, out: &mut (impl Write + Send)) -> Result<(), CliError> {
    let config =
        ClientConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let zone = config.zone();

    if config.fake_mode {
        let settings = WaitSettings {
            polling_interval: FAKE_POLL_INTERVAL,
            ..config.wait_settings()
        };
        return execute(&FakeCloud::new(), &zone, settings, cli, out).await;
    }

    let caller =
        HttpCaller::new(config.http_settings()).map_err(|err| CliError::Backend(err.to_string()))?;
    execute(
        &HttpBuildClient::new(caller),
        &zone,
        config.wait_settings(),
        cli,
        out,
    )
    .await
}

async fn execute<C: BuildClient>(
    client: &C,
    zone: &Zone,
    settings: WaitSettings,
    cli: Cli,
    out: &mut (impl Write + Send),
) -> Result<(), CliError> {
    let ctx = WaitContext::background();
    match cli {
        Cli::Wait(args) => run_wait(client, &ctx, zone, settings, &args, out).await,
        Cli::Build(args) => run_build(client, &ctx, zone, settings, &args, out).await,
    }
}

async fn run_wait<C: BuildClient>(
    client: &C,
    ctx: &WaitContext,
    zone: &Zone,
    base: WaitSettings,
    args: &WaitCommand,
    out: &mut (impl Write + Send),
) -> Result<(), CliError> {
    let settings = WaitSettings {
        timeout: args
            .timeout_secs
            .map_or(base.timeout, Duration::from_secs),
        ..base
    };
    let id = ResourceId::new(args.server_id);
    let server = match args.status {
        WaitStatus::Up => wait_until_up(ctx, client.servers(), zone, id, settings).await?,
        WaitStatus::Down => wait_until_down(ctx, client.servers(), zone, id, settings).await?,
    };
    writeln!(out, "server {} is {}", server.id, server.instance_status)?;
    Ok(())
}

async fn run_build<C: BuildClient>(
    client: &C,
    ctx: &WaitContext,
    zone: &Zone,
    settings: WaitSettings,
    args: &BuildCommand,
    out: &mut (impl Write + Send),
) -> Result<(), CliError> {
    let plan = build_plan(args)?;
    let result = ServerBuilder::new(client, plan)
        .with_wait_settings(settings)
        .build(ctx, zone)
        .await
        .map_err(|failure| CliError::Build(Box::new(failure)))?;
    write_build_result(out, &result)?;
    Ok(())
}

fn build_plan(args: &BuildCommand) -> Result<BuildPlan, CliError> {
    let os_type: OsType = args.os.parse().map_err(CliError::InvalidArgument)?;
    let nic = args
        .switch_id
        .map_or_else(NicSpec::shared, |id| NicSpec::switch(ResourceId::new(id)));
    let disk_name = format!("{}-disk", args.name.trim());

    let disk = if os_type.is_windows() {
        DiskSpec::from_windows_archive(disk_name, os_type, args.disk_size_gb)
    } else {
        let mut edit = DiskEditSpec {
            host_name: Some(args.name.trim().to_owned()),
            ..DiskEditSpec::default()
        };
        match args.ssh_key_file.as_deref() {
            Some(path) => edit.ssh_keys.push(read_public_key(path)?),
            None => edit.generate_ssh_key = Some(GenerateSshKey::default()),
        }
        DiskSpec::from_unix_archive(disk_name, os_type, args.disk_size_gb).with_edit(edit)
    };

    Ok(BuildPlan::new(args.name.as_str())
        .cpu(args.cpu)
        .memory_gb(args.memory_gb)
        .nic(nic)
        .disk(disk)
        .boot_after_create(args.boot))
}

fn read_public_key(path: &str) -> Result<String, CliError> {
    let key_error = |message: String| CliError::KeyFile {
        path: path.to_owned(),
        message,
    };
    let file_path = Utf8Path::new(path);
    let (dir_path, file_name) = match (file_path.parent(), file_path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(key_error(String::from("path has no file name"))),
    };

    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| key_error(err.to_string()))?;
    let content = dir
        .read_to_string(file_name)
        .map_err(|err| key_error(err.to_string()))?;
    let key = content.trim();
    if key.is_empty() {
        return Err(key_error(String::from("file is empty")));
    }
    Ok(key.to_owned())
}

fn write_build_result(mut out: impl Write, result: &BuildResult) -> io::Result<()> {
    let server_id = result
        .server_id
        .map_or_else(String::new, |id| id.to_string());
    writeln!(out, "server {server_id} built")?;
    for id in result.disk_ids() {
        writeln!(out, "disk {id}")?;
    }
    if let Some(key) = result.generated_private_key() {
        writeln!(out, "generated private key:")?;
        writeln!(out, "{key}")?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
    if let CliError::Build(failure) = err
        && let Some(id) = failure.partial.server_id
    {
        writeln!(target, "partially built server {id} was left in place").ok();
    }
}
