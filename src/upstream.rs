//! Shared HTTP client for outbound calls to providers, the identity
//! service and the inference endpoint.

use std::time::Duration;

pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .pool_max_idle_per_host(16)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()?;
    Ok(client)
}
