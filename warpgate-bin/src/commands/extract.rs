use anyhow::{Context, Result};
use futures::future::join_all;
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;
use warpgate_lib::{ConfigDir, HttpProber, InMemorySource, RequestMeta, Services};

use crate::ExitCode;
use crate::formatters::get_report_formatter;
use crate::options::{Config, ExtractArgs};
use crate::report::{ExtractionReport, RunReport, StatusReport};

/// Run every URL of `args` through the gateway at once and print the
/// outcome of each.
///
/// Targets beyond the token bucket burst are rejected rather than queued,
/// the same as for any other caller.
pub(crate) async fn extract(cfg: &Config, args: &ExtractArgs) -> Result<ExitCode> {
    let start = Instant::now();
    let pool = cfg.pool();

    let services = if args.no_proxy {
        Services::start_idle(cfg.admission(), pool, &InMemorySource::default()).await
    } else {
        let source = ConfigDir::new(&pool.config_dir);
        let prober = Arc::new(HttpProber::new(pool.probe_url.clone(), pool.probe_timeout));
        Services::start(cfg.admission(), pool, &source, prober).await
    }
    .context("Cannot set up the proxy pool")?;

    if !args.no_proxy && services.pool().is_empty() {
        warn!(
            "No endpoints found in `{}`; every request will fail. Use `--no-proxy` to connect directly.",
            cfg.config_dir.display()
        );
    }

    let extractor = cfg
        .extractor()
        .extractor()
        .context("Cannot create the HTTP client")?;
    let gateway = services.gateway(Arc::new(extractor), !args.no_proxy);

    info!("Extracting {} target(s)", args.urls.len());
    let results = join_all(args.urls.iter().map(|url| {
        let gateway = &gateway;
        async move {
            let meta = RequestMeta::for_target(url.as_str());
            let result = gateway.extract(url, args.priority, meta).await;
            ExtractionReport::new(url.clone(), result)
        }
    }))
    .await;

    let status = args.status.then(|| StatusReport {
        admission: services.admission().status(),
        pool: gateway.pool().map(|pool| pool.stats()),
    });
    services.shutdown().await;

    let report = RunReport::new(results, status, start.elapsed());
    println!("{}", get_report_formatter(cfg.format).run(&report)?);

    Ok(if report.summary.is_success() {
        ExitCode::Success
    } else {
        ExitCode::ExtractionFailure
    })
}
