use anyhow::{Context, Result};

use super::ReportFormatter;
use crate::report::{ProbeSummary, RunReport, TierPreset};

pub(crate) struct Json;

impl ReportFormatter for Json {
    fn run(&self, report: &RunReport) -> Result<String> {
        serde_json::to_string_pretty(report).context("Cannot format results as JSON")
    }

    fn probe(&self, summary: &ProbeSummary) -> Result<String> {
        serde_json::to_string_pretty(summary).context("Cannot format pool stats as JSON")
    }

    fn tiers(&self, tiers: &[TierPreset]) -> Result<String> {
        serde_json::to_string_pretty(tiers).context("Cannot format tiers as JSON")
    }
}
