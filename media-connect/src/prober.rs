use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use shared::protocol::{
    HEADER_CLIENT_IDENTIFIER, HEADER_DEVICE_NAME, HEADER_PRODUCT, HEADER_TOKEN, IDENTITY_PATH,
};

/// Outcome of a single reachability check. `latency` is only meaningful
/// when `success` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub success: bool,
    pub latency: Duration,
}

impl ProbeResult {
    pub fn success(latency: Duration) -> Self {
        Self { success: true, latency }
    }

    pub fn failure() -> Self {
        Self { success: false, latency: Duration::ZERO }
    }

    pub fn latency(&self) -> Option<Duration> {
        self.success.then_some(self.latency)
    }
}

/// Liveness and latency check against one server URL
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Single attempt bounded by `timeout`
    async fn probe(&self, url: &str, token: &str, timeout: Duration) -> ProbeResult;

    /// Per-attempt timeout used when the caller does not pass one
    fn default_timeout(&self) -> Duration;

    /// `attempts` sequential probes; succeeds if any did, with the mean
    /// latency of the successful ones.
    async fn probe_averaged(&self, url: &str, token: &str, attempts: u32) -> ProbeResult {
        let timeout = self.default_timeout();
        let mut total = Duration::ZERO;
        let mut successes = 0u32;

        for _ in 0..attempts {
            if let Some(latency) = self.probe(url, token, timeout).await.latency() {
                total += latency;
                successes += 1;
            }
        }

        if successes == 0 {
            ProbeResult::failure()
        } else {
            ProbeResult::success(total / successes)
        }
    }
}

/// Identity of this client as sent to servers
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_identifier: String,
    pub product: String,
}

/// Headers identifying this client, shared by the prober and the directory client
pub fn client_headers(identity: &ClientIdentity) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HEADER_CLIENT_IDENTIFIER,
        HeaderValue::from_str(&identity.client_identifier)
            .context("Invalid client identifier")?,
    );
    headers.insert(
        HEADER_PRODUCT,
        HeaderValue::from_str(&identity.product).context("Invalid product name")?,
    );

    let device = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    if let Ok(value) = HeaderValue::from_str(&device) {
        if !device.is_empty() {
            headers.insert(HEADER_DEVICE_NAME, value);
        }
    }

    Ok(headers)
}

/// Probes `GET {url}/identity` over HTTP(S)
pub struct HttpProber {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpProber {
    pub fn new(identity: &ClientIdentity, default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(client_headers(identity)?)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, default_timeout })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, token: &str, timeout: Duration) -> ProbeResult {
        let target = format!("{}{}", url.trim_end_matches('/'), IDENTITY_PATH);
        let start = Instant::now();

        let response = self
            .client
            .get(&target)
            .header(HEADER_TOKEN, token)
            .timeout(timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                let latency = start.elapsed();
                tracing::debug!("Probe {} succeeded in {:?}", url, latency);
                ProbeResult::success(latency)
            }
            Ok(resp) => {
                tracing::debug!("Probe {} returned status {}", url, resp.status());
                ProbeResult::failure()
            }
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", url, e);
                ProbeResult::failure()
            }
        }
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
