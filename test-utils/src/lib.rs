//! `test-utils` is used for testing in both `warpgate-lib` and `warpgate`.
//! This crate does not depend on either of them, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
///
/// Any absolute-form request is answered as well, so the server doubles as
/// a plain HTTP proxy endpoint.
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Contents of a WireGuard configuration as written by `wgcf`, with the
/// peer reachable at `$endpoint` (`host:port`)
#[macro_export]
macro_rules! wg_config {
    ($endpoint:expr) => {
        format!(
            "[Interface]\n\
             PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=\n\
             Address = 172.16.0.2/32\n\
             DNS = 1.1.1.1\n\
             MTU = 1280\n\
             \n\
             [Peer]\n\
             PublicKey = bmXOC+F1FxEMF9dyiK2H5/1SUtzH0JuVo51h2wPfgyo=\n\
             AllowedIPs = 0.0.0.0/0\n\
             Endpoint = {}\n",
            $endpoint
        )
    };
}

/// Create a temporary directory holding one `<name>.conf` file per
/// `name => contents` pair
///
/// # Panic
///
/// This panics if the directory or a file cannot be written, so it should
/// only be used for testing
#[macro_export]
macro_rules! config_dir {
    ($($name:expr => $contents:expr),* $(,)?) => {{
        let dir = tempfile::tempdir().expect("Expected a temporary directory");
        $(
            std::fs::write(dir.path().join(format!("{}.conf", $name)), $contents)
                .expect("Expected a writable config file");
        )*
        dir
    }};
}
