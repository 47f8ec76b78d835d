// nrbf-parser - A high-performance MS-NRBF binary parser.
// Copyright (C) 2026  driedpampas@proton.me
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Thin command-line driver: reads an NRBF file, runs it through the
//! decoder and the optional backfill/crunch passes, and writes a JSON
//! rendering of the result. All decode logic lives in the library; this
//! binary is the "external collaborator" spec.md section 1 describes.

use clap::Parser;
use env_logger::Env;
use nrbf_parser::{to_json, DecodeOptions, Decoder};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Decode a .NET Binary Format (MS-NRBF) stream into a structured tree.
#[derive(Parser, Debug)]
#[command(name = "nrbf", author, version, about)]
struct Cli {
    /// Input NRBF file to decode.
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,

    /// Output file for the rendered JSON (defaults to stdout).
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Inline referenced class metadata into ClassWithId records.
    #[arg(short = 'x', long = "expand", default_value_t = false)]
    expand: bool,

    /// Resolve MemberReference placeholders and prune their targets.
    #[arg(short = 'b', long = "backfill", default_value_t = false)]
    backfill: bool,

    /// Minify the (optionally backfilled) tree to its root object graph.
    #[arg(short = 'c', long = "crunch", default_value_t = false)]
    crunch: bool,

    /// Print the rendered representation to stdout in addition to `--output`.
    #[arg(short = 'p', long = "print", default_value_t = false)]
    print: bool,

    /// Stop cleanly on a decode error instead of aborting.
    #[arg(short = 'E', long = "best-effort", default_value_t = false)]
    best_effort: bool,

    /// Increase log verbosity; repeat for more detail (-v, -vv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let file = File::open(&cli.input)?;
    let options = DecodeOptions { best_effort: cli.best_effort, expand: cli.expand };

    let mut decoded = Decoder::new(BufReader::new(file), options).parse()?;

    let rendered = if cli.crunch {
        if cli.backfill {
            decoded.backfill(true);
        }
        to_json(&decoded.crunch())
    } else if cli.backfill {
        decoded.backfill(true);
        serde_json::Value::Array(decoded.records.iter().map(to_json).collect())
    } else {
        serde_json::Value::Array(decoded.records.iter().map(to_json).collect())
    };

    let text = serde_json::to_string_pretty(&rendered)?;

    if let Some(path) = &cli.output {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(text.as_bytes())?;
        out.write_all(b"\n")?;
    }
    if cli.print || cli.output.is_none() {
        let stdout = io::stdout();
        let mut lock = stdout.lock();
        lock.write_all(text.as_bytes())?;
        lock.write_all(b"\n")?;
    }

    Ok(())
}
