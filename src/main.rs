//! CLI for dylib-bundle.

use anyhow::Result;
use clap::Parser;
use dylib_bundle::{bundle, default_prefixes, BundleConfig, Traversal, DEFAULT_LINK_PATH};
use log::{error, info, LevelFilter};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "dylib-bundle",
    version,
    about = "Copy third-party dylibs next to a binary and make it load them via @loader_path",
    override_usage = "dylib-bundle [-r] [-id] <LIB> [PREFIX]..."
)]
struct Cli {
    /// Follow dependencies of dependencies.
    #[arg(short = 'r', long = "recurse")]
    recurse: bool,

    /// Set each copied library's install name to its file name (also `-id`).
    #[arg(short = 'i', long = "update-ids", visible_aliases = ["updateIDs", "updateids"])]
    update_ids: bool,

    /// Directory the libraries are copied into.
    #[arg(short = 'd', long = "dest", value_name = "DIR", default_value = ".")]
    dest: PathBuf,

    /// Replacement prefix for rewritten references.
    #[arg(long = "link-path", value_name = "TOKEN", default_value = DEFAULT_LINK_PATH)]
    link_path: PathBuf,

    /// otool executable.
    #[arg(long, value_name = "PROGRAM", default_value = "otool")]
    otool: PathBuf,

    /// install_name_tool executable.
    #[arg(long = "install-name-tool", value_name = "PROGRAM", default_value = "install_name_tool")]
    install_name_tool: PathBuf,

    /// More log output (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// Initial library or executable.
    #[arg(value_name = "LIB")]
    lib: PathBuf,

    /// Install prefixes to bundle from [default: /opt/local/lib].
    #[arg(value_name = "PREFIX")]
    prefixes: Vec<PathBuf>,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Warn;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn into_config(self) -> BundleConfig {
        let prefixes = if self.prefixes.is_empty() {
            default_prefixes()
        } else {
            self.prefixes
        };
        BundleConfig {
            root: self.lib,
            prefixes,
            dest: self.dest,
            link_path: self.link_path,
            traversal: Traversal::from_recurse_flag(self.recurse),
            update_ids: self.update_ids,
            otool: self.otool,
            install_name_tool: self.install_name_tool,
        }
    }
}

/// `-id` is a single-dash long flag, which clap reads as `-i -d`.
///
/// Arguments after `--` are positional and left alone.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut positional = false;
    args.into_iter()
        .map(|arg| {
            if positional {
                arg
            } else if arg == "--" {
                positional = true;
                arg
            } else if arg == "-id" {
                OsString::from("--update-ids")
            } else {
                arg
            }
        })
        .collect()
}

fn run(cli: Cli) -> Result<bool> {
    let summary = bundle(&cli.into_config())?;

    info!(
        "Inspected {} libraries, relocated {}, applied {} patches",
        summary.libraries.len(),
        summary.moves.len(),
        summary.references.applied + summary.ids.as_ref().map_or(0, |r| r.applied)
    );
    if !summary.is_success() {
        error!("{} patches failed", summary.failure_count());
    }
    Ok(summary.is_success())
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level().as_str()),
    )
    .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("dylib-bundle: {e:#}");
            ExitCode::FAILURE
        }
    }
}
