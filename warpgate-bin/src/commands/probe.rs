use anyhow::{Context, Result};
use log::warn;
use warpgate_lib::{ConfigDir, HttpProber, ProxyPool};

use crate::ExitCode;
use crate::formatters::get_report_formatter;
use crate::options::Config;
use crate::report::ProbeSummary;

/// Load the pool, probe every endpoint exactly once and print the pool
/// statistics. Fails unless at least one probe passed.
pub(crate) async fn probe(cfg: &Config) -> Result<ExitCode> {
    let config = cfg.pool();
    let source = ConfigDir::new(&config.config_dir);
    let prober = HttpProber::new(config.probe_url.clone(), config.probe_timeout);

    let pool = ProxyPool::load(config, &source)
        .await
        .context("Cannot load endpoint definitions")?;
    if pool.is_empty() {
        warn!("No endpoints found in `{}`", cfg.config_dir.display());
    }

    let report = pool.probe_all(&prober).await;
    let summary = ProbeSummary::new(report, pool.stats());
    println!("{}", get_report_formatter(cfg.format).probe(&summary)?);

    Ok(if report.passed > 0 {
        ExitCode::Success
    } else {
        ExitCode::ExtractionFailure
    })
}
