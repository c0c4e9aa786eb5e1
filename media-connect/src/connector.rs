use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use shared::types::{Connection, Server};
use crate::cache::EndpointCache;
use crate::discovery::{Discovery, DiscoveryEvent};

/// Result of connecting to one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected {
        first: Connection,
        refined: Option<Connection>,
    },
    /// Nothing answered; the caller should fall back to offline mode
    Offline,
    Cancelled,
}

impl ConnectOutcome {
    /// Connection to use from now on
    pub fn best(&self) -> Option<&Connection> {
        match self {
            ConnectOutcome::Connected { first, refined } => Some(refined.as_ref().unwrap_or(first)),
            _ => None,
        }
    }
}

/// Discovery plus last-known-good bookkeeping
pub struct ServerConnector {
    discovery: Discovery,
    cache: Arc<dyn EndpointCache>,
}

impl ServerConnector {
    pub fn new(discovery: Discovery, cache: Arc<dyn EndpointCache>) -> Self {
        Self { discovery, cache }
    }

    pub async fn connect(&self, server: &Server, cancel: CancellationToken) -> ConnectOutcome {
        let server_id = server.client_identifier();

        let preferred = match self.cache.get(server_id).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Failed to read cached endpoint for {}: {}", server.name(), e);
                None
            }
        };

        let mut handle = self.discovery.spawn(server, preferred, cancel.clone());
        let mut first = None;
        let mut refined = None;

        while let Some(event) = handle.next().await {
            if let Err(e) = self.cache.set(server_id, event.connection().uri()).await {
                tracing::warn!("Failed to store endpoint for {}: {}", server.name(), e);
            }
            match event {
                DiscoveryEvent::FirstFound(conn) => first = Some(conn),
                DiscoveryEvent::Refined(conn) => refined = Some(conn),
            }
        }

        match first {
            Some(first) => ConnectOutcome::Connected { first, refined },
            None if cancel.is_cancelled() => ConnectOutcome::Cancelled,
            None => ConnectOutcome::Offline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::cache::MemoryCache;
    use crate::discovery::DiscoverySettings;
    use crate::testing::{home_server, ScriptedProber};

    const REMOTE_ALIAS: &str = "https://abc.plex.direct:32400";
    const LOCAL: &str = "http://192.168.1.10:32400";

    fn connector(prober: &Arc<ScriptedProber>, cache: &Arc<MemoryCache>) -> ServerConnector {
        ServerConnector::new(
            Discovery::new(prober.clone(), DiscoverySettings::default()),
            cache.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_stores_best_endpoint() {
        let prober = Arc::new(ScriptedProber::new().respond(REMOTE_ALIAS, 20).respond(LOCAL, 80));
        let cache = Arc::new(MemoryCache::new());

        let outcome = connector(&prober, &cache)
            .connect(&home_server(), CancellationToken::new())
            .await;

        assert_eq!(outcome.best().map(|c| c.uri()), Some(LOCAL));
        assert_eq!(cache.get("home-id").await.unwrap().as_deref(), Some(LOCAL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_uses_cached_endpoint() {
        let prober = Arc::new(ScriptedProber::new().respond(LOCAL, 30));
        let cache = Arc::new(MemoryCache::new());
        cache.set("home-id", LOCAL).await.unwrap();

        let outcome = connector(&prober, &cache)
            .connect(&home_server(), CancellationToken::new())
            .await;

        match outcome {
            ConnectOutcome::Connected { first, refined } => {
                assert_eq!(first.uri(), LOCAL);
                assert_eq!(refined, None);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            prober.calls_with_timeout(Duration::from_secs(2)),
            vec![LOCAL.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_offline_keeps_cache() {
        let prober = Arc::new(ScriptedProber::new());
        let cache = Arc::new(MemoryCache::new());
        cache.set("home-id", LOCAL).await.unwrap();

        let outcome = connector(&prober, &cache)
            .connect(&home_server(), CancellationToken::new())
            .await;

        assert_eq!(outcome, ConnectOutcome::Offline);
        assert_eq!(outcome.best(), None);
        assert_eq!(cache.get("home-id").await.unwrap().as_deref(), Some(LOCAL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cancelled() {
        let prober = Arc::new(ScriptedProber::new().respond(LOCAL, 30));
        let cache = Arc::new(MemoryCache::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = connector(&prober, &cache).connect(&home_server(), cancel).await;
        assert_eq!(outcome, ConnectOutcome::Cancelled);
    }
}
