use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{bail, Context, Result};
use media_connect::cache::db::CacheDb;
use media_connect::cache_manager::CacheHandle;
use media_connect::config::Config;
use media_connect::connector::{ConnectOutcome, ServerConnector};
use media_connect::directory::{self, DirectoryClient};
use media_connect::discovery::Discovery;
use media_connect::prober::HttpProber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("media_connect=info"))
        )
        .init();

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/media-connect/config.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Open endpoint cache
    let db = CacheDb::open(&config.cache.db_path)?;
    tracing::info!("Opened endpoint cache at {:?}", config.cache.db_path);
    let cache_handle = CacheHandle::spawn(db);

    // Load servers from the directory or a saved response
    let identity = config.account.identity();
    let listing = match &config.account.resources_file {
        Some(path) => directory::load_resources_file(path)?,
        None => {
            DirectoryClient::new(&identity, &config.account.directory_url, &config.account.token)?
                .fetch()
                .await?
        }
    };

    // Forget endpoints of servers that left the account
    let known: Vec<&str> = listing.servers.iter().map(|s| s.client_identifier()).collect();
    match cache_handle.prune(&known).await {
        Ok(removed) => {
            for server_id in removed {
                tracing::info!("Removed cached endpoint of vanished server {}", server_id);
            }
        }
        Err(e) => tracing::error!("Failed to prune endpoint cache: {}", e),
    }

    let servers: Vec<_> = listing
        .servers
        .into_iter()
        .filter(|s| config.account.server.as_deref().map_or(true, |name| s.name() == name))
        .collect();

    if servers.is_empty() {
        cache_handle.shutdown().await?;
        bail!("No usable servers found");
    }

    // instant answer before any probing
    for server in &servers {
        println!("{}: static {}", server.name(), server.best_static_connection());
    }

    // Build prober and connector
    let prober = Arc::new(HttpProber::new(&identity, config.discovery.probe_timeout())?);
    let discovery = Discovery::new(prober, config.discovery.settings());
    let connector = Arc::new(ServerConnector::new(discovery, Arc::new(cache_handle.clone())));

    // Cancel discovery on ctrl-c
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            ctrl_c_cancel.cancel();
        }
    });

    // Connect to every server concurrently
    let tasks: Vec<_> = servers
        .into_iter()
        .map(|server| {
            let connector = connector.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = connector.connect(&server, cancel).await;
                (server, outcome)
            })
        })
        .collect();

    for task in tasks {
        let (server, outcome) = task.await.context("Connect task failed")?;
        match &outcome {
            ConnectOutcome::Connected { first, refined } => {
                println!("{}: first {}", server.name(), first);
                if let Some(refined) = refined {
                    println!("{}: refined {}", server.name(), refined);
                }
            }
            ConnectOutcome::Offline => {
                println!("{}: no working connections, offline", server.name());
            }
            ConnectOutcome::Cancelled => {
                println!("{}: cancelled", server.name());
            }
        }
    }

    // Shutdown cache thread
    if let Err(e) = cache_handle.shutdown().await {
        tracing::error!("Failed to shutdown cache: {}", e);
    }

    tracing::info!("Done");
    Ok(())
}
