//! Renders man pages for the `cloudkit` CLI into `OUT_DIR`.
//!
//! `cloudkit.1` covers the top-level command. Each subcommand (`wait` and
//! `build`) also gets its own `cloudkit-<name>.1` page.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(page: Man, target: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    page.render(&mut buffer)?;
    fs::write(target, buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    for sub in command.get_subcommands() {
        let name = format!("cloudkit-{}", sub.get_name());
        let page = Man::new(sub.clone()).title(name.to_uppercase());
        render(page, &out_dir.join(format!("{name}.1")))?;
    }
    render(Man::new(command), &out_dir.join("cloudkit.1"))?;

    Ok(())
}
