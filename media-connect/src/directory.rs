use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use serde_json::Value;
use shared::error::ServerParseError;
use shared::protocol::HEADER_TOKEN;
use shared::types::Server;
use crate::prober::{client_headers, ClientIdentity};

/// Servers parsed from one directory response
#[derive(Debug, Default)]
pub struct DirectoryListing {
    pub servers: Vec<Server>,
    /// Server resources that could not be used, with the reason
    pub rejected: Vec<(String, ServerParseError)>,
}

/// Parse a resource list. Non-server resources are skipped silently.
pub fn parse_resources(resources: &[Value]) -> DirectoryListing {
    let mut listing = DirectoryListing::default();

    for resource in resources {
        match Server::from_resource(resource) {
            Ok(server) => listing.servers.push(server),
            Err(ServerParseError::NotAServer { .. }) => {}
            Err(e) => {
                let name = resource
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("<unnamed>")
                    .to_string();
                tracing::warn!("Ignoring server {}: {}", name, e);
                listing.rejected.push((name, e));
            }
        }
    }

    listing
}

/// Client for the account's resource directory
pub struct DirectoryClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl DirectoryClient {
    pub fn new(identity: &ClientIdentity, url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .default_headers(client_headers(identity)?)
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
        })
    }

    pub async fn fetch(&self) -> Result<DirectoryListing> {
        let resources: Vec<Value> = self
            .client
            .get(&self.url)
            .header(HEADER_TOKEN, &self.token)
            .send()
            .await
            .with_context(|| format!("Failed to reach directory {}", self.url))?
            .error_for_status()
            .context("Directory rejected the request")?
            .json()
            .await
            .context("Failed to decode directory response")?;

        tracing::info!("Directory returned {} resources", resources.len());
        Ok(parse_resources(&resources))
    }
}

/// Load a saved directory response from disk
pub fn load_resources_file(path: impl AsRef<Path>) -> Result<DirectoryListing> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resources file: {}", path.display()))?;
    let resources: Vec<Value> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse resources file: {}", path.display()))?;
    Ok(parse_resources(&resources))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Vec<Value> {
        vec![
            json!({
                "name": "Living Room",
                "clientIdentifier": "lr",
                "accessToken": "t1",
                "provides": "server",
                "connections": [
                    {"protocol": "http", "address": "192.168.1.10", "port": 32400,
                     "uri": "http://192.168.1.10:32400", "local": true}
                ]
            }),
            json!({
                "name": "Phone",
                "clientIdentifier": "phone",
                "provides": "client,player",
                "connections": []
            }),
            json!({
                "name": "Broken",
                "clientIdentifier": "broken",
                "accessToken": "t2",
                "provides": "server",
                "connections": [{"protocol": "http", "port": "80"}]
            }),
        ]
    }

    #[test]
    fn test_parse_resources_filters_and_rejects() {
        let listing = parse_resources(&sample());

        assert_eq!(listing.servers.len(), 1);
        assert_eq!(listing.servers[0].name(), "Living Room");

        assert_eq!(listing.rejected.len(), 1);
        assert_eq!(listing.rejected[0].0, "Broken");
        assert!(matches!(
            listing.rejected[0].1,
            ServerParseError::NoUsableConnections { count: 1, .. }
        ));
    }

    #[test]
    fn test_load_resources_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");
        std::fs::write(&path, serde_json::to_string(&sample()).unwrap()).unwrap();

        let listing = load_resources_file(&path).unwrap();
        assert_eq!(listing.servers.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_from_directory() {
        use axum::{routing::get, Json, Router};

        let body = sample();
        let router = Router::new().route("/resources", get(move || async move { Json(body) }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let identity = ClientIdentity {
            client_identifier: "test".to_string(),
            product: "media-connect".to_string(),
        };
        let client =
            DirectoryClient::new(&identity, &format!("http://{}/resources", addr), "t").unwrap();

        let listing = client.fetch().await.unwrap();
        assert_eq!(listing.servers.len(), 1);
        assert_eq!(listing.servers[0].client_identifier(), "lr");
    }
}
