// Command-line interface for jpegdelta.
//
// Three subcommands:
//
//   jpegdelta diff   BASE MODIFIED OUTPUT
//   jpegdelta merge  BASE DIFF OUTPUT
//   jpegdelta render ARCHIVE ID OUTPUT

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, Subcommand, ValueHint};
use log::LevelFilter;

use crate::io;
use crate::jpeg::CodecOptions;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Block-level JPEG diffs in the DCT coefficient domain.
#[derive(Parser, Debug)]
#[command(
    name = "jpegdelta",
    version,
    about = "Block-level JPEG diff/merge on DCT coefficients",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use twice for per-component detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Cmd {
    /// Write a JPEG holding only the blocks of MODIFIED that differ from BASE.
    Diff {
        #[arg(value_hint = ValueHint::FilePath)]
        base: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        modified: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
    /// Rebuild the modified JPEG from BASE and a DIFF written by `diff`.
    Merge {
        #[arg(value_hint = ValueHint::FilePath)]
        base: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        diff: PathBuf,
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
    /// Rebuild image ID of an archive by merging its chain of diffs.
    ///
    /// ARCHIVE is a directory holding optimization_map.json, or the map itself.
    Render {
        #[arg(value_hint = ValueHint::AnyPath)]
        archive: PathBuf,
        id: String,
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
}

/// Log level selected by `-q` / `-v`; `RUST_LOG` still wins.
fn level_filter(cli: &Cli) -> LevelFilter {
    if cli.quiet {
        return LevelFilter::Error;
    }
    match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_diff(base: &Path, modified: &Path, output: &Path) -> i32 {
    match io::diff_file(base, modified, output, CodecOptions::default()) {
        Ok(stats) => {
            if let Some(sha) = stats.diff_sha256 {
                log::info!("{}: sha256 {}", output.display(), io::hex(&sha));
            }
            0
        }
        Err(e) => {
            eprintln!("jpegdelta: diff: {e}");
            1
        }
    }
}

fn cmd_merge(base: &Path, diff: &Path, output: &Path) -> i32 {
    match io::merge_file(base, diff, output, CodecOptions::default()) {
        Ok(stats) => {
            if let Some(sha) = stats.output_sha256 {
                log::info!("{}: sha256 {}", output.display(), io::hex(&sha));
            }
            0
        }
        Err(e) => {
            eprintln!("jpegdelta: merge: {e}");
            1
        }
    }
}

fn cmd_render(archive: &Path, id: &str, output: &Path) -> i32 {
    match io::merge_chain_file(archive, id, output, CodecOptions::default()) {
        Ok(stats) => {
            log::info!("{id}: chain {}", stats.chain.join(" -> "));
            if let Some(sha) = stats.output_sha256 {
                log::info!("{}: sha256 {}", output.display(), io::hex(&sha));
            }
            0
        }
        Err(e) => {
            eprintln!("jpegdelta: render: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(level_filter(&cli))
        .parse_env(env_logger::Env::default())
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match &cli.command {
        Cmd::Diff {
            base,
            modified,
            output,
        } => cmd_diff(base, modified, output),
        Cmd::Merge { base, diff, output } => cmd_merge(base, diff, output),
        Cmd::Render {
            archive,
            id,
            output,
        } => cmd_render(archive, id, output),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
