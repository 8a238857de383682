//! `warpgate` runs extraction requests through a connector budget and a
//! health-checked pool of WARP proxy endpoints.
//!
//! The binary is a thin host around warpgate-lib: it builds the admission
//! controller and the proxy pool from the command line and an optional
//! `warpgate.toml`, drives requests through them and prints the outcome.
//!
//! Extract a few targets through the pool defined in `./warp-configs`:
//! ```sh
//! warpgate extract https://www.youtube.com/watch?v=dQw4w9WgXcQ
//! ```
//!
//! Skip the proxies and print the final admission status as JSON:
//! ```sh
//! warpgate --format json extract --no-proxy --status https://example.com
//! ```
//!
//! Probe every endpoint once:
//! ```sh
//! warpgate --config-dir /etc/warp probe
//! ```
//!
//! Show the connector limits of each account tier:
//! ```sh
//! warpgate tiers
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, ErrorKind};
use std::path::PathBuf;

use anyhow::{Error, Result, bail};
use clap::{Parser, crate_version};
use log::error;

use formatters::log::init_logging;
use options::{Command, Config, WARPGATE_CONFIG_FILE, WarpgateOptions};

mod commands;
mod formatters;
mod options;
mod report;
mod verbosity;

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator, including a pool directory that cannot be read.
    #[allow(unused)]
    UnexpectedFailure = 1,
    /// At least one request was rejected or failed, or no endpoint passed
    /// its probe
    ExtractionFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<WarpgateOptions> {
    let mut opts = WarpgateOptions::parse();

    init_logging(&opts.config.verbose);

    // Load a potentially existing config file and merge it into the config from
    // the CLI
    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit file, fall back to `warpgate.toml` in the
        // current directory if there is one. An invalid default file is
        // still an error.
        let default_config = PathBuf::from(WARPGATE_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Set up runtime and call the warpgate entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!(
                "Error while loading config: {e}\n\
                warpgate v{} expects the keys listed by `warpgate --help`",
                crate_version!()
            );
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = match opts.config.threads {
        Some(threads) => tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_all()
            .build()?,
        None => tokio::runtime::Runtime::new()?,
    };

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Run the selected command
async fn run(opts: &WarpgateOptions) -> Result<i32> {
    let exit_code = match &opts.command {
        Command::Extract(args) => commands::extract(&opts.config, args).await?,
        Command::Probe => commands::probe(&opts.config).await?,
        Command::Tiers => commands::tiers(&opts.config)?,
    };

    Ok(exit_code as i32)
}
