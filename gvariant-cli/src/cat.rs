// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser};
use gvariant_core::typeinfo;
use gvariant_core::value::{LoadFlags, Value};
use log::LevelFilter;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Load a gvariant byte frame and print its textual rendering.
#[derive(Parser)]
struct Cli {
    /// Increase logging verbosity. Can be specified multiple times.
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Concrete type signature of the frame's top-level value.
    signature: String,

    /// Path to the byte frame. Reads stdin if omitted or "-".
    input: Option<PathBuf>,

    /// Skip normal-form validation; the input is assumed well-formed.
    #[arg(long)]
    trusted: bool,

    /// The input is big-endian; swap to host order immediately.
    #[arg(long)]
    byteswap: bool,

    /// Fail if the input is not in normal form.
    #[arg(long)]
    normalise: bool,

    /// Treat the input as a `v` frame and print its unwrapped payload.
    #[arg(long)]
    embed_signature: bool,
}

impl Cli {
    fn run(&self) -> Result<()> {
        let mut bytes = Vec::new();
        match &self.input {
            Some(path) if path.as_os_str() != "-" => {
                File::open(path)?.read_to_end(&mut bytes)?;
            }
            _ => {
                std::io::stdin().read_to_end(&mut bytes)?;
            }
        }

        let mut flags = LoadFlags::empty();
        if self.trusted {
            flags |= LoadFlags::TRUSTED;
        }
        if self.byteswap {
            flags |= LoadFlags::BYTESWAP_NOW;
        }
        if self.normalise {
            flags |= LoadFlags::NORMALISE;
        }
        if self.embed_signature {
            flags |= LoadFlags::EMBED_SIGNATURE;
        }

        let ti = typeinfo::get(&self.signature)
            .map_err(|e| anyhow!("invalid type signature {:?}: {e}", self.signature))?;
        let value = Value::from_bytes(ti, bytes::Bytes::from(bytes), flags)?;

        let text = gvariant_core::text::print(&value)?;
        writeln!(std::io::stdout(), "{text}")?;

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
