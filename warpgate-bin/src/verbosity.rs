//! `-v` / `-q` count flags controlling how much warpgate logs.
//!
//! The default level is `info`:
//! - `-q` only shows warnings, `-qq` only errors
//! - `-v` adds debug output (queue positions, endpoint choices)
//! - `-vv` adds trace output
//!
//! In `warpgate.toml` the level is given by name, e.g. `verbose = "debug"`.

use log::Level;
use log::LevelFilter;
use serde::Deserialize;
use std::fmt;

#[derive(clap::Args, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Verbosity {
    /// Pass many times for more log output
    ///
    /// By default, warpgate reports admissions and endpoint health at info
    /// level. `-v` adds debug output and `-vv` trace output.
    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = "More output per occurrence",
        conflicts_with = "quiet",
    )]
    verbose: u8,

    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        help = "Less output per occurrence",
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

impl Verbosity {
    /// Get the log level.
    pub(crate) const fn log_level(&self) -> Level {
        level_enum(self.verbosity())
    }

    /// Get the log level filter.
    pub(crate) fn log_level_filter(&self) -> LevelFilter {
        self.log_level().to_level_filter()
    }

    #[allow(clippy::cast_possible_wrap)]
    const fn verbosity(&self) -> i8 {
        level_value(Level::Info) - (self.quiet as i8) + (self.verbose as i8)
    }
}

// Deserialized from a level name like "warn", "warning" or "Warning",
// relative to the default level
impl<'de> Deserialize<'de> for Verbosity {
    #[allow(clippy::cast_sign_loss)]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let level = match s.to_lowercase().as_str() {
            "error" => Level::Error,
            "warn" | "warning" => Level::Warn,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            level => {
                return Err(serde::de::Error::custom(format!(
                    "invalid log level `{level}`"
                )));
            }
        };
        let offset = level_value(level) - level_value(Level::Info);
        Ok(Verbosity {
            verbose: offset.max(0) as u8,
            quiet: (-offset).max(0) as u8,
        })
    }
}

const fn level_value(level: Level) -> i8 {
    match level {
        Level::Error => 0,
        Level::Warn => 1,
        Level::Info => 2,
        Level::Debug => 3,
        Level::Trace => 4,
    }
}

const fn level_enum(verbosity: i8) -> Level {
    match verbosity {
        i8::MIN..=0 => Level::Error,
        1 => Level::Warn,
        2 => Level::Info,
        3 => Level::Debug,
        _ => Level::Trace,
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.log_level())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, clap::Parser)]
    struct Cli {
        #[clap(flatten)]
        verbose: Verbosity,
    }

    #[derive(Debug, Deserialize)]
    struct File {
        verbose: Verbosity,
    }

    #[test]
    fn verify_app() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_log_level() {
        assert_eq!(Verbosity::default().log_level(), Level::Info);
    }

    #[test]
    fn test_count_flags() {
        use clap::Parser;
        let level = |args: &[&str]| {
            Cli::parse_from(std::iter::once("warpgate").chain(args.iter().copied()))
                .verbose
                .log_level()
        };
        assert_eq!(level(&["-v"]), Level::Debug);
        assert_eq!(level(&["-vvvv"]), Level::Trace);
        assert_eq!(level(&["-q"]), Level::Warn);
        assert_eq!(level(&["-qqqq"]), Level::Error);
    }

    #[test]
    fn test_level_names_from_file() {
        let level = |name: &str| {
            toml::from_str::<File>(&format!("verbose = \"{name}\""))
                .unwrap()
                .verbose
                .log_level()
        };
        assert_eq!(level("Warning"), Level::Warn);
        assert_eq!(level("debug"), Level::Debug);
        assert_eq!(level("error"), Level::Error);
        assert!(toml::from_str::<File>("verbose = \"loud\"").is_err());
    }
}
