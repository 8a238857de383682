pub(crate) mod color;
pub(crate) mod log;

mod compact;
mod json;

use anyhow::Result;

use crate::options::OutputFormat;
use crate::report::{ProbeSummary, RunReport, TierPreset};

/// Renders command reports for stdout
pub(crate) trait ReportFormatter {
    /// Results of `warpgate extract`
    fn run(&self, report: &RunReport) -> Result<String>;

    /// Outcome of `warpgate probe`
    fn probe(&self, summary: &ProbeSummary) -> Result<String>;

    /// Table of `warpgate tiers`
    fn tiers(&self, tiers: &[TierPreset]) -> Result<String>;
}

pub(crate) fn get_report_formatter(format: OutputFormat) -> Box<dyn ReportFormatter> {
    match format {
        OutputFormat::Compact => Box::new(compact::Compact),
        OutputFormat::Json => Box::new(json::Json),
    }
}
