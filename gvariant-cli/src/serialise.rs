// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use gvariant_core::typeinfo;
use log::LevelFilter;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

/// Parse a textual gvariant value and write its byte-exact frame.
#[derive(Parser)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times.
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Concrete type signature of the value being built.
    signature: String,

    /// Textual rendering of the value. Read from `--text-file` instead
    /// if omitted.
    text: Option<String>,

    /// Read the textual rendering from a file instead of the argument.
    #[arg(long)]
    text_file: Option<PathBuf>,

    /// Write the frame here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Cli {
    fn run(&self) -> Result<()> {
        let text = match (&self.text, &self.text_file) {
            (Some(t), None) => t.clone(),
            (None, Some(path)) => fs::read_to_string(path)?,
            (Some(_), Some(_)) => {
                return Err(anyhow!("pass either a textual value or --text-file, not both"))
            }
            (None, None) => return Err(anyhow!("no textual value given")),
        };

        typeinfo::get(&self.signature)
            .map_err(|e| anyhow!("invalid type signature {:?}: {e}", self.signature))?;

        let value = gvariant_core::text::parse(&self.signature, text.trim())?;
        let bytes = value.to_bytes()?;

        match &self.output {
            Some(path) => {
                File::create(path)?.write_all(&bytes)?;
            }
            None => {
                std::io::stdout().write_all(&bytes)?;
            }
        }

        Ok(())
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()))
        .init();

    let exit_code = match cli.run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    };

    std::process::exit(exit_code)
}
