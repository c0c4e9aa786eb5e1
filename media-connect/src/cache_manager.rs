use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::Result;
use async_trait::async_trait;
use crate::cache::db::{CacheDb, CachedEndpoint};
use crate::cache::EndpointCache;

/// Commands sent to the cache thread
pub enum CacheCommand {
    Get(String, oneshot::Sender<Result<Option<CachedEndpoint>>>),
    Set {
        server_id: String,
        url: String,
        reply: oneshot::Sender<Result<bool>>,
    },
    GetAll(oneshot::Sender<Result<Vec<CachedEndpoint>>>),
    Remove(String, oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Handle to the endpoint database, owned by a dedicated thread
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CacheHandle {
    /// Spawn a new cache thread with the given database
    pub fn spawn(db: CacheDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<CacheCommand>(64);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    CacheCommand::Get(server_id, reply) => {
                        let _ = reply.send(db.get_endpoint(&server_id));
                    }
                    CacheCommand::Set { server_id, url, reply } => {
                        let result = db.set_endpoint(&server_id, &url);
                        if matches!(&result, Ok(true)) {
                            tracing::debug!("Stored endpoint {} for {}", url, server_id);
                        }
                        let _ = reply.send(result);
                    }
                    CacheCommand::GetAll(reply) => {
                        let _ = reply.send(db.get_all_endpoints());
                    }
                    CacheCommand::Remove(server_id, reply) => {
                        let _ = reply.send(db.remove_endpoint(&server_id));
                    }
                    CacheCommand::Shutdown => {
                        tracing::info!("Cache thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    pub async fn get_endpoint(&self, server_id: String) -> Result<Option<CachedEndpoint>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Get(server_id, reply)).await?;
        rx.await?
    }

    /// Store an endpoint. Returns true if it differs from the previous one.
    pub async fn set_endpoint(&self, server_id: String, url: String) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Set { server_id, url, reply }).await?;
        rx.await?
    }

    pub async fn get_all(&self) -> Result<Vec<CachedEndpoint>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::GetAll(reply)).await?;
        rx.await?
    }

    pub async fn remove(&self, server_id: String) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Remove(server_id, reply)).await?;
        rx.await?
    }

    /// Drop cached endpoints of servers not in `known`. Returns the removed ids.
    pub async fn prune(&self, known: &[&str]) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for entry in self.get_all().await? {
            if !known.contains(&entry.server_id.as_str()) {
                self.remove(entry.server_id.clone()).await?;
                removed.push(entry.server_id);
            }
        }
        Ok(removed)
    }

    /// Shutdown the cache thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(CacheCommand::Shutdown).await?;
        Ok(())
    }
}

#[async_trait]
impl EndpointCache for CacheHandle {
    async fn get(&self, server_id: &str) -> Result<Option<String>> {
        Ok(self.get_endpoint(server_id.to_string()).await?.map(|e| e.url))
    }

    async fn set(&self, server_id: &str, url: &str) -> Result<()> {
        self.set_endpoint(server_id.to_string(), url.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_round_trip() {
        let handle = CacheHandle::spawn(CacheDb::open(":memory:").unwrap());

        assert_eq!(handle.get("srv").await.unwrap(), None);
        handle.set("srv", "http://192.168.1.10:32400").await.unwrap();
        assert_eq!(
            handle.get("srv").await.unwrap().as_deref(),
            Some("http://192.168.1.10:32400")
        );

        assert!(!handle
            .set_endpoint("srv".to_string(), "http://192.168.1.10:32400".to_string())
            .await
            .unwrap());
        assert_eq!(handle.get_all().await.unwrap().len(), 1);

        handle.remove("srv".to_string()).await.unwrap();
        assert_eq!(handle.get("srv").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prune_drops_vanished_servers() {
        let handle = CacheHandle::spawn(CacheDb::open(":memory:").unwrap());
        handle.set("home", "http://192.168.1.10:32400").await.unwrap();
        handle.set("cabin", "https://abc.plex.direct:32400").await.unwrap();

        let removed = handle.prune(&["home"]).await.unwrap();

        assert_eq!(removed, vec!["cabin".to_string()]);
        assert_eq!(handle.get("cabin").await.unwrap(), None);
        assert_eq!(
            handle.get("home").await.unwrap().as_deref(),
            Some("http://192.168.1.10:32400")
        );
        assert!(handle.prune(&["home"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let handle = CacheHandle::spawn(CacheDb::open(":memory:").unwrap());
        handle.shutdown().await.unwrap();

        // queued commands are dropped along with the receiver
        assert!(handle.get("srv").await.is_err());
    }
}
