//! Binary entry point for the `mriinfo` inspector.
//!
//! Opens each dataset read-only and prints its header keys and a chunk
//! geometry table. Exit status is non-zero if any dataset fails to open.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use pghmri::{set_error_handling, set_notification_level, Dataset, ErrorMode, OpenMode};

#[derive(Parser)]
#[command(name = "mriinfo", version, about = "Inspect Pittsburgh MRI datasets")]
struct Args {
    /// Print only the header keys
    #[arg(long)]
    keys: bool,

    /// Print only the chunk table
    #[arg(long)]
    chunks: bool,

    /// Increase diagnostic verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Datasets to inspect (.mri extension optional)
    #[arg(required = true)]
    datasets: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    set_notification_level(args.verbose as i32);
    // Failures are surfaced through the Results below; no stderr
    // double-reporting from the library.
    set_error_handling(ErrorMode::Ignore);

    let mut failures = 0u32;
    for (i, name) in args.datasets.iter().enumerate() {
        if i > 0 {
            println!();
        }
        if let Err(e) = inspect(name, &args) {
            eprintln!("mriinfo: {:#}", e);
            failures += 1;
        }
    }
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn inspect(name: &str, args: &Args) -> anyhow::Result<()> {
    let ds = Dataset::open(name, OpenMode::Read)
        .with_context(|| format!("cannot open dataset {}", name))?;

    let show_keys = args.keys || !args.chunks;
    let show_chunks = args.chunks || !args.keys;

    println!("{}:", ds.name());

    if show_keys {
        for key in ds.iterate_keys() {
            match ds.get_string(&key) {
                Ok(value) => println!("  {} = {}", key, value),
                Err(_) => println!("  {} = ?", key),
            }
        }
    }

    if show_chunks {
        let mut names = ds.chunk_names();
        names.sort();
        if !names.is_empty() {
            if show_keys {
                println!();
            }
            println!(
                "  {:<16} {:>8} {:<20} {:>12} {:>12}  {}",
                "chunk", "type", "shape", "offset", "bytes", "file"
            );
            for name in names {
                let ch = ds
                    .chunk_info(&name)
                    .context("chunk table out of sync with keys")?;
                let shape: Vec<String> = ch
                    .dimensions()
                    .chars()
                    .zip(ch.extents())
                    .map(|(axis, extent)| format!("{}:{}", axis, extent))
                    .collect();
                println!(
                    "  {:<16} {:>8} {:<20} {:>12} {:>12}  {} ({}, {})",
                    ch.name(),
                    ch.datatype().token(),
                    shape.join(" "),
                    ch.offset(),
                    ch.size(),
                    ds.file_path(ch.file()),
                    if ch.little_endian() { "little-endian" } else { "big-endian" },
                    ch.order(),
                );
            }
        }
    }

    ds.close()
        .with_context(|| format!("error closing dataset {}", name))?;
    Ok(())
}
