use anyhow::Result;

use crate::ExitCode;
use crate::formatters::get_report_formatter;
use crate::options::Config;
use crate::report::TierPreset;

/// Print the limits of every account tier
pub(crate) fn tiers(cfg: &Config) -> Result<ExitCode> {
    println!("{}", get_report_formatter(cfg.format).tiers(&TierPreset::all())?);
    Ok(ExitCode::Success)
}
