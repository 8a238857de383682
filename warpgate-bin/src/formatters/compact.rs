use anyhow::Result;
use std::fmt::{self, Display, Write};
use std::time::Duration;
use warpgate_lib::{AdmissionStatus, PoolStats};

use super::ReportFormatter;
use crate::formatters::color::{BOLD_GREEN, BOLD_PINK, BOLD_YELLOW, DIM, PINK, YELLOW, color};
use crate::report::{ExtractionReport, ProbeSummary, RunReport, StatusReport, TierPreset};

pub(crate) struct Compact;

impl ReportFormatter for Compact {
    fn run(&self, report: &RunReport) -> Result<String> {
        Ok(CompactRun(report).to_string())
    }

    fn probe(&self, summary: &ProbeSummary) -> Result<String> {
        let mut out = String::new();
        write!(
            out,
            "Probed {} endpoint{}: {} passed\n\n{}",
            summary.checked,
            plural(summary.checked),
            summary.passed,
            CompactPool(&summary.pool)
        )?;
        Ok(out)
    }

    fn tiers(&self, tiers: &[TierPreset]) -> Result<String> {
        let mut out = String::new();
        for preset in tiers {
            let limits = &preset.limits;
            writeln!(
                out,
                "{:<12}{:>3} connectors x {:<3}= {:>4} concurrent, {}/s (burst {}), connect timeout {}",
                preset.tier.to_string(),
                limits.connectors,
                limits.per_connector_limit,
                preset.max_concurrent,
                limits.rate_per_second,
                limits.burst_limit,
                humantime::format_duration(limits.connection_timeout)
            )?;
        }
        Ok(out.trim_end().to_string())
    }
}

struct CompactRun<'a>(&'a RunReport);

impl Display for CompactRun<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        for result in &report.results {
            writeln!(f, "{}", CompactResult(result))?;
        }

        let summary = &report.summary;
        write!(f, "\n{} Total", summary.total)?;
        let duration = Duration::from_secs(summary.duration_secs);
        color!(f, DIM, " (in {})", humantime::format_duration(duration))?;
        color!(f, BOLD_GREEN, " {} OK", summary.successful)?;
        if summary.queued > 0 {
            color!(f, DIM, " ({} queued)", summary.queued)?;
        }
        if summary.rejected > 0 {
            color!(f, BOLD_YELLOW, " {} Rejected", summary.rejected)?;
        }
        let err_str = if summary.failed == 1 { "Error" } else { "Errors" };
        color!(f, BOLD_PINK, " {} {}", summary.failed, err_str)?;

        if let Some(status) = &report.status {
            write!(f, "\n\n{}", CompactStatus(status))?;
        }
        Ok(())
    }
}

struct CompactResult<'a>(&'a ExtractionReport);

impl Display for CompactResult<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.0;
        match (&result.extraction, &result.error) {
            (Some(extraction), _) => {
                color!(f, BOLD_GREEN, "[{}]", extraction.info.status)?;
                write!(f, " {}", result.target)?;
                if let Some(title) = &extraction.info.title {
                    write!(f, " \"{title}\"")?;
                }
                if let Some(endpoint) = &extraction.endpoint {
                    color!(f, DIM, " via {}", endpoint)?;
                }
                if extraction.queued {
                    color!(f, DIM, " (queued as {})", extraction.ticket)?;
                }
                Ok(())
            }
            (None, Some(error)) => {
                let label = if error.rejected { "REJECTED" } else { "ERROR" };
                if error.rejected {
                    color!(f, YELLOW, "[{}]", label)?;
                } else {
                    color!(f, PINK, "[{}]", label)?;
                }
                write!(f, " {} | {}", result.target, error.message)
            }
            (None, None) => write!(f, "[?] {}", result.target),
        }
    }
}

struct CompactStatus<'a>(&'a StatusReport);

impl Display for CompactStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", CompactAdmission(&self.0.admission))?;
        if let Some(pool) = &self.0.pool {
            write!(f, "\n\n{}", CompactPool(pool))?;
        }
        Ok(())
    }
}

struct CompactAdmission<'a>(&'a AdmissionStatus);

impl Display for CompactAdmission<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let AdmissionStatus {
            limits,
            current,
            statistics,
            queue_details,
            recommendations,
        } = self.0;

        color!(f, BOLD_YELLOW, "Admission ({} tier)\n", limits.account_tier)?;
        writeln!(
            f,
            "  {}/{} running, {}/{} queued, {} tokens (burst {}, {}/s)",
            current.active_requests,
            limits.max_concurrent,
            current.queued_requests,
            limits.max_queue_size,
            current.available_tokens,
            limits.burst_limit,
            limits.rate_limit_per_second,
        )?;
        writeln!(
            f,
            "  {} admitted, {} succeeded, {} failed, {} timed out",
            statistics.total_requests,
            statistics.successful_requests,
            statistics.failed_requests,
            statistics.timeout_requests,
        )?;
        write!(
            f,
            "  {} rejected ({} rate limited, {} queue full), peak {} running, {} queued",
            statistics.rejected_requests,
            statistics.rate_limited_requests,
            statistics.queue_full_requests,
            statistics.peak_concurrent,
            statistics.peak_queue_size,
        )?;
        for ticket in queue_details {
            write!(
                f,
                "\n  waiting {} (priority {}) for {:.1}s",
                ticket.id, ticket.priority, ticket.wait_secs
            )?;
        }
        for note in recommendations {
            writeln!(f)?;
            color!(f, YELLOW, "  ! {}", note)?;
        }
        Ok(())
    }
}

struct CompactPool<'a>(&'a PoolStats);

impl Display for CompactPool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.0;
        color!(
            f,
            BOLD_YELLOW,
            "Proxy pool ({}/{} healthy)\n",
            pool.healthy,
            pool.total
        )?;
        write!(
            f,
            "  {} in flight, {}s average response, {}% average success",
            pool.in_flight, pool.average_response_time, pool.average_success_rate
        )?;
        for endpoint in &pool.endpoints {
            write!(f, "\n  ")?;
            if endpoint.healthy {
                color!(f, BOLD_GREEN, "[{}]", "UP")?;
            } else {
                color!(f, BOLD_PINK, "[{}]", "DOWN")?;
            }
            write!(
                f,
                " {} {} score {} | {} ok, {} failed | {}/{} leased",
                endpoint.id,
                endpoint.url,
                endpoint.health_score,
                endpoint.success_count,
                endpoint.error_count,
                endpoint.concurrent_requests,
                endpoint.max_concurrent,
            )?;
            if let Some(secs) = endpoint.response_time_secs {
                write!(f, " | {secs}s")?;
            }
            if let Some(error) = &endpoint.last_error {
                color!(f, DIM, " ({})", error)?;
            }
        }
        Ok(())
    }
}

const fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ExtractionReport, TierPreset};
    use url::Url;
    use warpgate_lib::ErrorKind;

    #[test]
    fn test_run_lists_failures_and_summary() {
        let target = Url::parse("https://example.com/watch?v=1").unwrap();
        let report = RunReport::new(
            vec![ExtractionReport::new(target, Err(ErrorKind::RateLimited))],
            None,
            Duration::from_secs(1),
        );
        let out = Compact.run(&report).unwrap();
        assert!(out.contains("[REJECTED] https://example.com/watch?v=1 | Request rejected"));
        assert!(out.contains("1 Total"));
        assert!(out.contains("0 OK"));
        assert!(out.contains("1 Rejected"));
    }

    #[test]
    fn test_tiers_one_line_each() {
        let out = Compact.tiers(&TierPreset::all()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("free"));
        assert!(lines[0].contains("32 concurrent"));
        assert!(lines[2].contains("200 concurrent"));
    }
}
