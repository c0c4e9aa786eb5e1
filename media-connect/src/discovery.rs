use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::types::{Connection, Server};
use crate::candidates::{Candidate, CandidatePlan};
use crate::prober::{ProbeResult, Prober};
use crate::upgrade;

/// Timeouts and attempt counts for one discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub fast_path_timeout: Duration,
    pub race_timeout: Duration,
    pub upgrade_timeout: Duration,
    pub refine_attempts: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            fast_path_timeout: Duration::from_secs(2),
            race_timeout: Duration::from_secs(4),
            upgrade_timeout: Duration::from_secs(4),
            refine_attempts: 2,
        }
    }
}

/// At most one of each, always in this order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First endpoint that answered
    FirstFound(Connection),
    /// Better-ranked endpoint found by the refine pass
    Refined(Connection),
}

impl DiscoveryEvent {
    pub fn connection(&self) -> &Connection {
        match self {
            DiscoveryEvent::FirstFound(conn) | DiscoveryEvent::Refined(conn) => conn,
        }
    }
}

/// Receiving side of a running discovery
pub struct DiscoveryHandle {
    events: mpsc::Receiver<DiscoveryEvent>,
    cancel: CancellationToken,
}

impl DiscoveryHandle {
    /// Next event, or `None` once discovery has finished or was cancelled
    pub async fn next(&mut self) -> Option<DiscoveryEvent> {
        self.events.recv().await
    }

    /// Stop emitting. Probes already in flight are left to drain.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn collect(mut self) -> Vec<DiscoveryEvent> {
        let mut events = Vec::with_capacity(2);
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// Two-phase endpoint discovery: race for the first working candidate,
/// then rank every candidate by averaged latency.
#[derive(Clone)]
pub struct Discovery {
    prober: Arc<dyn Prober>,
    settings: DiscoverySettings,
}

impl Discovery {
    pub fn new(prober: Arc<dyn Prober>, settings: DiscoverySettings) -> Self {
        Self { prober, settings }
    }

    /// Run discovery for `server` on a background task
    pub fn spawn(
        &self,
        server: &Server,
        preferred: Option<String>,
        cancel: CancellationToken,
    ) -> DiscoveryHandle {
        let (tx, rx) = mpsc::channel(2);
        let discovery = self.clone();
        let server = server.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            discovery
                .run(&server, preferred.as_deref(), &task_cancel, tx)
                .await;
        });

        DiscoveryHandle { events: rx, cancel }
    }

    /// Drive one discovery run, sending up to two events into `events`
    pub async fn run(
        &self,
        server: &Server,
        preferred: Option<&str>,
        cancel: &CancellationToken,
        events: mpsc::Sender<DiscoveryEvent>,
    ) {
        let plan = CandidatePlan::build(server.connections());
        if plan.is_empty() {
            return;
        }
        let token = server.access_token();

        tracing::debug!("Discovering {} across {} candidates", server.name(), plan.len());

        let fast = match preferred.and_then(|url| plan.find(url)) {
            Some(candidate) => self.fast_path(candidate, token, cancel).await,
            None => None,
        };

        let first = match fast {
            Some(candidate) => candidate,
            None if cancel.is_cancelled() => return,
            None => match self.race(&plan, token, cancel).await {
                Some(candidate) => candidate,
                None => {
                    if !cancel.is_cancelled() {
                        tracing::warn!("No working connections for {}", server.name());
                    }
                    return;
                }
            },
        };

        tracing::info!("First connection for {}: {}", server.name(), first.url);
        if !emit(&events, cancel, DiscoveryEvent::FirstFound(first.to_connection())).await {
            return;
        }

        if cancel.is_cancelled() {
            return;
        }
        let Some(successes) = self.refine(&plan, token, cancel).await else {
            return;
        };
        let Some(winner) = select_best(&successes) else {
            return;
        };
        if winner.url == first.url {
            tracing::debug!("First connection for {} is already the best", server.name());
            return;
        }

        let refined = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            conn = upgrade::resolve(
                self.prober.as_ref(),
                winner,
                token,
                self.settings.upgrade_timeout,
            ) => conn,
        };
        if refined.uri() == first.url {
            return;
        }

        tracing::info!("Refined connection for {}: {}", server.name(), refined.uri());
        emit(&events, cancel, DiscoveryEvent::Refined(refined)).await;
    }

    async fn fast_path(
        &self,
        candidate: &Candidate,
        token: &str,
        cancel: &CancellationToken,
    ) -> Option<Candidate> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.prober.probe(&candidate.url, token, self.settings.fast_path_timeout) => result,
        };

        if result.success {
            tracing::debug!("Cached connection {} still works", candidate.url);
            Some(candidate.clone())
        } else {
            tracing::debug!("Cached connection {} failed, racing all candidates", candidate.url);
            None
        }
    }

    /// Probe every candidate at once and return the first to succeed.
    /// Losing probes keep running to completion; their results are dropped.
    async fn race(
        &self,
        plan: &CandidatePlan,
        token: &str,
        cancel: &CancellationToken,
    ) -> Option<Candidate> {
        if cancel.is_cancelled() {
            return None;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, ProbeResult)>();

        for url in &plan.urls {
            let prober = self.prober.clone();
            let url = url.clone();
            let token = token.to_string();
            let timeout = self.settings.race_timeout;
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = prober.probe(&url, &token, timeout).await;
                let _ = tx.send((url, result));
            });
        }
        drop(tx);

        let mut remaining = plan.urls.len();
        while remaining > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                msg = rx.recv() => match msg {
                    Some((url, result)) => {
                        remaining -= 1;
                        if result.success {
                            return plan.find(&url).cloned();
                        }
                    }
                    None => break,
                }
            }
        }

        None
    }

    /// Averaged probe of every candidate. `None` when cancelled.
    async fn refine(
        &self,
        plan: &CandidatePlan,
        token: &str,
        cancel: &CancellationToken,
    ) -> Option<Vec<(Candidate, Duration)>> {
        if cancel.is_cancelled() {
            return None;
        }
        let mut probes: FuturesUnordered<JoinHandle<(usize, ProbeResult)>> = plan
            .ordered
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let prober = self.prober.clone();
                let url = candidate.url.clone();
                let token = token.to_string();
                let attempts = self.settings.refine_attempts;
                tokio::spawn(async move {
                    (idx, prober.probe_averaged(&url, &token, attempts).await)
                })
            })
            .collect();

        let mut successes = Vec::new();
        loop {
            tokio::select! {
                biased;
                // dropping the JoinHandles detaches the probes
                _ = cancel.cancelled() => return None,
                joined = probes.next() => match joined {
                    Some(Ok((idx, result))) => {
                        if let Some(latency) = result.latency() {
                            successes.push((plan.ordered[idx].clone(), latency));
                        }
                    }
                    Some(Err(e)) => tracing::warn!("Refine probe task failed: {}", e),
                    None => break,
                }
            }
        }

        Some(successes)
    }
}

/// Pick the best candidate among successful probes: best connection class
/// first, then latency, then https, then alias hostnames. The URL is the
/// last key so the result never depends on input order.
pub fn select_best(successes: &[(Candidate, Duration)]) -> Option<&Candidate> {
    let class = successes.iter().map(|(c, _)| c.class()).min()?;
    successes
        .iter()
        .filter(|(c, _)| c.class() == class)
        .min_by(|(a, a_latency), (b, b_latency)| rank(a, *a_latency, b, *b_latency))
        .map(|(c, _)| c)
}

fn rank(a: &Candidate, a_latency: Duration, b: &Candidate, b_latency: Duration) -> Ordering {
    a_latency
        .cmp(&b_latency)
        .then(b.is_https.cmp(&a.is_https))
        .then(b.is_secure_alias.cmp(&a.is_secure_alias))
        .then_with(|| a.url.cmp(&b.url))
}

async fn emit(
    events: &mpsc::Sender<DiscoveryEvent>,
    cancel: &CancellationToken,
    event: DiscoveryEvent,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    events.send(event).await.is_ok()
}
