use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use async_trait::async_trait;
use shared::types::{Connection, Server};
use crate::prober::{ProbeResult, Prober};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers each URL after a fixed latency; unknown URLs hang until the
/// timeout and fail. Meant for `start_paused` tokio tests.
#[derive(Default)]
pub struct ScriptedProber {
    latencies: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Duration)>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, latency_ms: u64) -> Self {
        self.latencies
            .insert(url.to_string(), Duration::from_millis(latency_ms));
        self
    }

    pub fn calls(&self) -> Vec<(String, Duration)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with_timeout(&self, timeout: Duration) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, t)| *t == timeout)
            .map(|(url, _)| url)
            .collect()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str, _token: &str, timeout: Duration) -> ProbeResult {
        self.calls.lock().unwrap().push((url.to_string(), timeout));
        match self.latencies.get(url) {
            Some(latency) if *latency <= timeout => {
                tokio::time::sleep(*latency).await;
                ProbeResult::success(*latency)
            }
            _ => {
                tokio::time::sleep(timeout).await;
                ProbeResult::failure()
            }
        }
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }
}

pub fn connection(protocol: &str, address: &str, uri: &str, local: bool, relay: bool) -> Connection {
    Connection::new(protocol, address, 32400, uri, local, relay, false).unwrap()
}

/// Local plain http on a LAN address plus a remote https alias, as the
/// directory would hand them out (https gets its http twin).
pub fn home_server() -> Server {
    let remote = connection(
        "https",
        "203.0.113.5",
        "https://abc.plex.direct:32400",
        false,
        false,
    );
    let remote_twin = remote.http_fallback().unwrap();
    let local = connection("http", "192.168.1.10", "http://192.168.1.10:32400", true, false);
    Server::new("Home", "home-id", "token", vec![local, remote, remote_twin]).unwrap()
}
