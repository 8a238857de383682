#[cfg(test)]
mod cli {
    use assert_cmd::cargo::cargo_bin_cmd;
    use http::StatusCode;
    use predicates::str::contains;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::{error::Error, fs};
    use test_utils::{config_dir, mock_server, wg_config};

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    /// An HTML page with the given title
    macro_rules! mock_page {
        ($title:expr) => {
            mock_server!(
                StatusCode::OK,
                set_body_raw(
                    format!("<html><head><title>{}</title></head></html>", $title),
                    "text/html"
                )
            )
        };
    }

    /// Run the binary and parse its stdout as JSON
    fn json_output(cmd: &mut assert_cmd::Command) -> Result<Value> {
        let output = cmd.output()?;
        Ok(serde_json::from_slice::<Value>(&output.stdout)?)
    }

    #[test]
    fn test_tiers() {
        cargo_bin_cmd!()
            .arg("tiers")
            .assert()
            .success()
            .stdout(contains("free"))
            .stdout(contains("32 concurrent"))
            .stdout(contains("enterprise"));
    }

    #[test]
    fn test_tiers_json() -> Result<()> {
        let tiers = json_output(cargo_bin_cmd!().args(["--format", "json", "tiers"]))?;
        let tiers = tiers.as_array().ok_or("expected an array")?;

        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[1]["tier"], "standard");
        assert_eq!(tiers[1]["max_concurrent"], 60);
        assert_eq!(tiers[1]["burst_limit"], 15);
        Ok(())
    }

    #[tokio::test]
    async fn test_extract_direct() {
        let mock_server = mock_page!("Never Gonna Give You Up");

        cargo_bin_cmd!()
            .args(["extract", "--no-proxy"])
            .arg(mock_server.uri())
            .assert()
            .success()
            .stdout(contains("[200]"))
            .stdout(contains("\"Never Gonna Give You Up\""))
            .stdout(contains("1 OK"));
    }

    #[tokio::test]
    async fn test_extract_failure_exit_code() {
        let mock_server = mock_server!(StatusCode::NOT_FOUND);

        cargo_bin_cmd!()
            .args(["extract", "--no-proxy"])
            .arg(mock_server.uri())
            .assert()
            .failure()
            .code(2)
            .stdout(contains("[ERROR]"))
            .stdout(contains("404"))
            .stdout(contains("1 Error"));
    }

    #[tokio::test]
    async fn test_extract_through_pooled_endpoint() -> Result<()> {
        // The mock answers absolute-form requests, so it acts as the proxy
        let proxy = mock_page!("Proxied");
        let dir = config_dir! { "wg0" => wg_config!(proxy.address()) };

        let output = json_output(
            cargo_bin_cmd!()
                .args(["--format", "json", "--protocol", "http"])
                .arg("--config-dir")
                .arg(dir.path())
                .arg("--probe-url")
                .arg(proxy.uri())
                .args(["extract", "--status", "http://www.youtube.com/watch?v=dQw4w9WgXcQ"]),
        )?;

        let result = &output["results"][0];
        assert_eq!(result["extraction"]["endpoint"], "warp_wg0");
        assert_eq!(
            result["extraction"]["info"]["proxy"],
            format!("http://{}", proxy.address())
        );
        assert_eq!(result["extraction"]["info"]["title"], "Proxied");

        let pool = &output["status"]["pool"];
        assert_eq!(pool["total"], 1);
        assert_eq!(pool["in_flight"], 0);
        assert_eq!(output["status"]["admission"]["statistics"]["successful_requests"], 1);
        Ok(())
    }

    #[test]
    fn test_extract_without_endpoints_is_rejected() {
        let dir = config_dir! {};

        cargo_bin_cmd!()
            .arg("--config-dir")
            .arg(dir.path())
            .args(["extract", "http://www.youtube.com/watch?v=dQw4w9WgXcQ"])
            .assert()
            .failure()
            .code(2)
            .stdout(contains("[REJECTED]"))
            .stdout(contains("No healthy proxy"))
            .stderr(contains("No endpoints found"));
    }

    #[tokio::test]
    async fn test_burst_beyond_bucket_is_rate_limited() -> Result<()> {
        let mock_server = mock_page!("ok");
        let dir = tempfile::tempdir()?;
        let config = dir.path().join("limits.toml");
        fs::write(
            &config,
            r#"
            [limits]
            connectors = 1
            per_connector_limit = 4
            rate_per_second = 0.0
            burst_limit = 2
            connection_timeout = "5s"
            "#,
        )?;

        let output = json_output(
            cargo_bin_cmd!()
                .arg("--config")
                .arg(&config)
                .args(["--format", "json", "extract", "--no-proxy", "--status"])
                .args([mock_server.uri(), mock_server.uri(), mock_server.uri()]),
        )?;

        assert_eq!(output["summary"]["successful"], 2);
        assert_eq!(output["summary"]["rejected"], 1);
        let statistics = &output["status"]["admission"]["statistics"];
        assert_eq!(statistics["rate_limited_requests"], 1);
        assert_eq!(statistics["total_requests"], 2);
        assert!(output["status"].get("pool").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_probe() {
        let proxy = mock_server!(StatusCode::OK);
        let dir = config_dir! {
            "wg0" => wg_config!(proxy.address()),
            "wg1" => wg_config!("127.0.0.1:1"),
        };

        cargo_bin_cmd!()
            .args(["--protocol", "http", "--probe-timeout", "3s"])
            .arg("--config-dir")
            .arg(dir.path())
            .arg("--probe-url")
            .arg(proxy.uri())
            .arg("probe")
            .assert()
            .success()
            .stdout(contains("Probed 2 endpoints: 1 passed"))
            .stdout(contains("warp_wg0"))
            .stdout(contains("warp_wg1"));
    }

    #[test]
    fn test_probe_without_passing_endpoint_fails() {
        let dir = config_dir! { "wg0" => wg_config!("127.0.0.1:1") };

        cargo_bin_cmd!()
            .args(["--protocol", "http", "--probe-timeout", "3s"])
            .arg("--config-dir")
            .arg(dir.path())
            .arg("probe")
            .assert()
            .failure()
            .code(2)
            .stdout(contains("0 passed"));
    }

    #[tokio::test]
    async fn test_default_config_file_is_picked_up() -> Result<()> {
        let mock_server = mock_page!("ok");
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("warpgate.toml"),
            "tier = \"enterprise\"\nmax_queue_size = 5\n",
        )?;

        let output = json_output(
            cargo_bin_cmd!()
                .current_dir(dir.path())
                .args(["--format", "json", "extract", "--no-proxy", "--status"])
                .arg(mock_server.uri()),
        )?;

        let limits = &output["status"]["admission"]["limits"];
        assert_eq!(limits["account_tier"], "enterprise");
        assert_eq!(limits["max_concurrent"], 200);
        assert_eq!(limits["max_queue_size"], 5);
        Ok(())
    }

    #[test]
    fn test_config_file_fills_in_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = dir.path().join("warpgate.toml");
        fs::write(&config, "format = \"json\"\n")?;

        let tiers = json_output(cargo_bin_cmd!().arg("--config").arg(&config).arg("tiers"))?;
        assert_eq!(tiers[0]["tier"], "free");
        Ok(())
    }

    #[test]
    fn test_config_invalid_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = dir.path().join("invalid-key.toml");
        fs::write(&config, "this_is_invalid = 1\n")?;

        cargo_bin_cmd!()
            .arg("--config")
            .arg(&config)
            .arg("tiers")
            .env_clear()
            .assert()
            .failure()
            .code(3)
            .stderr(contains("unknown field `this_is_invalid`, expected one of"));
        Ok(())
    }

    #[test]
    fn test_missing_config_error() {
        cargo_bin_cmd!()
            .arg("--config")
            .arg("no_such_config.toml")
            .arg("tiers")
            .assert()
            .failure()
            .code(3)
            .stderr(contains("Cannot load configuration file"));
    }

    #[test]
    fn test_extract_requires_urls() {
        cargo_bin_cmd!()
            .arg("extract")
            .assert()
            .failure()
            .stderr(contains("<URLS>"));
    }
}
