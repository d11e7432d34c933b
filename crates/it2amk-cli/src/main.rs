//! it2amk - converts Impulse Tracker modules to AddmusicK MML sources.
//!
//! Usage: `it2amk <module> [flag value]*`. Flags may also be embedded in
//! the module's song message between backtick pairs; command-line flags
//! are applied after them and win.

mod cli_args;

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;

use cli_args::Cli;
use it2amk_it::ItModule;
use it2amk_mml::{convert_module, ExternalSampleConverter, Options};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(path) => {
            println!("Wrote {}", path);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {:#}", "error".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let module = ItModule::open(&cli.module)
        .with_context(|| format!("failed to load {}", cli.module.display()))?;

    let mut options = Options::default();
    options.apply_message_flags(&module.message)?;
    options.apply_pairs(&cli.flags)?;

    let converter = ExternalSampleConverter::new(options.nosmpl);
    let mml = convert_module(&module, &options, &cli.module, &converter)?;

    let stem = cli
        .module
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out_dir = Path::new("music");
    fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("{}.mml", stem));
    fs::write(&out_path, mml)
        .with_context(|| format!("failed to write {}", out_path.display()))?;

    Ok(out_path.display().to_string())
}
