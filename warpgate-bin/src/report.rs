//! What the commands print, independent of the output format.

use serde::Serialize;
use std::time::Duration;
use strum::IntoEnumIterator;
use url::Url;
use warpgate_lib::proxy::ProbeReport;
use warpgate_lib::{
    AccountTier, AdmissionStatus, ErrorKind, Extraction, PoolStats, Result, TierLimits,
};

/// Outcome of one target of `warpgate extract`
#[derive(Debug, Serialize)]
pub(crate) struct ExtractionReport {
    pub(crate) target: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) extraction: Option<Extraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<ErrorReport>,
}

impl ExtractionReport {
    pub(crate) fn new(target: Url, result: Result<Extraction>) -> Self {
        match result {
            Ok(extraction) => Self {
                target,
                extraction: Some(extraction),
                error: None,
            },
            Err(e) => Self {
                target,
                extraction: None,
                error: Some(ErrorReport::from(&e)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ErrorReport {
    pub(crate) code: &'static str,
    pub(crate) message: String,
    /// Turned away for lack of capacity rather than failed
    pub(crate) rejected: bool,
}

impl From<&ErrorKind> for ErrorReport {
    fn from(e: &ErrorKind) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            rejected: e.is_exhaustion(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct ExtractionSummary {
    pub(crate) total: usize,
    pub(crate) successful: usize,
    /// Rejected by admission control or for lack of a healthy proxy
    pub(crate) rejected: usize,
    /// Admitted, but the extraction itself failed
    pub(crate) failed: usize,
    pub(crate) queued: usize,
    pub(crate) duration_secs: u64,
}

impl ExtractionSummary {
    fn new(results: &[ExtractionReport], duration: Duration) -> Self {
        let mut summary = Self {
            total: results.len(),
            duration_secs: duration.as_secs(),
            ..Self::default()
        };
        for result in results {
            match (&result.extraction, &result.error) {
                (Some(extraction), _) => {
                    summary.successful += 1;
                    if extraction.queued {
                        summary.queued += 1;
                    }
                }
                (None, Some(error)) if error.rejected => summary.rejected += 1,
                _ => summary.failed += 1,
            }
        }
        summary
    }

    pub(crate) const fn is_success(&self) -> bool {
        self.successful == self.total
    }
}

/// Admission status and, when proxying, pool statistics
#[derive(Debug, Serialize)]
pub(crate) struct StatusReport {
    pub(crate) admission: AdmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) pool: Option<PoolStats>,
}

/// Everything `warpgate extract` prints
#[derive(Debug, Serialize)]
pub(crate) struct RunReport {
    pub(crate) results: Vec<ExtractionReport>,
    pub(crate) summary: ExtractionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<StatusReport>,
}

impl RunReport {
    pub(crate) fn new(
        results: Vec<ExtractionReport>,
        status: Option<StatusReport>,
        duration: Duration,
    ) -> Self {
        Self {
            summary: ExtractionSummary::new(&results, duration),
            results,
            status,
        }
    }
}

/// Everything `warpgate probe` prints
#[derive(Debug, Serialize)]
pub(crate) struct ProbeSummary {
    pub(crate) checked: usize,
    pub(crate) passed: usize,
    pub(crate) pool: PoolStats,
}

impl ProbeSummary {
    pub(crate) fn new(report: ProbeReport, pool: PoolStats) -> Self {
        Self {
            checked: report.checked,
            passed: report.passed,
            pool,
        }
    }
}

/// One row of `warpgate tiers`
#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct TierPreset {
    pub(crate) tier: AccountTier,
    pub(crate) max_concurrent: usize,
    #[serde(flatten)]
    pub(crate) limits: TierLimits,
}

impl TierPreset {
    pub(crate) fn all() -> Vec<Self> {
        AccountTier::iter()
            .map(|tier| {
                let limits = tier.limits();
                Self {
                    tier,
                    max_concurrent: limits.total_permits(),
                    limits,
                }
            })
            .collect()
    }
}
