use std::fmt;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use crate::error::{ServerParseError, ValidationError};
use crate::protocol::{PROVIDES_SERVER, TLS_ALIAS_SUFFIX};

/// Transport scheme of a connection or candidate URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(ValidationError::UnsupportedProtocol(value.to_string())),
        }
    }

    /// Scheme of a URL string, if it is one we probe
    pub fn of_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        Protocol::parse(scheme).ok()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network topology of a connection. Ordering is preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionClass {
    Local,
    Remote,
    Relay,
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionClass::Local => "local",
            ConnectionClass::Remote => "remote",
            ConnectionClass::Relay => "relay",
        })
    }
}

/// One advertised network endpoint of a server. Never mutated after
/// construction; see [`Connection::with_uri`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    protocol: Protocol,
    address: String,
    port: u16,
    uri: String,
    local: bool,
    relay: bool,
    ipv6: bool,
}

/// Connection entry as sent by the directory service
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionDescriptor {
    pub protocol: Option<String>,
    pub address: Option<String>,
    pub port: Option<i64>,
    pub uri: Option<String>,
    #[serde(default)]
    pub local: Option<bool>,
    #[serde(default)]
    pub relay: Option<bool>,
    #[serde(rename = "IPv6", default)]
    pub ipv6: Option<bool>,
}

impl Connection {
    pub fn new(
        protocol: &str,
        address: &str,
        port: i64,
        uri: &str,
        local: bool,
        relay: bool,
        ipv6: bool,
    ) -> Result<Self, ValidationError> {
        if protocol.is_empty() {
            return Err(ValidationError::MissingField("protocol"));
        }
        if address.is_empty() {
            return Err(ValidationError::MissingField("address"));
        }
        if uri.is_empty() {
            return Err(ValidationError::MissingField("uri"));
        }
        let protocol = Protocol::parse(protocol)?;
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ValidationError::PortOutOfRange(port))?;

        Ok(Self {
            protocol,
            address: address.to_string(),
            port,
            uri: uri.to_string(),
            local,
            relay,
            ipv6,
        })
    }

    pub fn from_descriptor(desc: &ConnectionDescriptor) -> Result<Self, ValidationError> {
        let port = desc.port.ok_or(ValidationError::MissingField("port"))?;
        Self::new(
            desc.protocol.as_deref().unwrap_or_default(),
            desc.address.as_deref().unwrap_or_default(),
            port,
            desc.uri.as_deref().unwrap_or_default(),
            desc.local.unwrap_or(false),
            desc.relay.unwrap_or(false),
            desc.ipv6.unwrap_or(false),
        )
    }

    /// Parse a raw JSON connection entry. A non-integer port is a
    /// deserialization failure and reported as `Malformed`.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let desc: ConnectionDescriptor = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_descriptor(&desc)
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn is_relay(&self) -> bool {
        self.relay
    }

    pub fn is_ipv6(&self) -> bool {
        self.ipv6
    }

    pub fn is_https(&self) -> bool {
        self.protocol == Protocol::Https
    }

    pub fn class(&self) -> ConnectionClass {
        if self.relay {
            ConnectionClass::Relay
        } else if self.local {
            ConnectionClass::Local
        } else {
            ConnectionClass::Remote
        }
    }

    /// `scheme://address:port`, bracketing IPv6 literals
    pub fn raw_address_url(&self, protocol: Protocol) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("{}://[{}]:{}", protocol, self.address, self.port)
        } else {
            format!("{}://{}:{}", protocol, self.address, self.port)
        }
    }

    /// Plaintext twin of an https connection: same address and port, uri
    /// scheme swapped to http. `None` for http connections.
    pub fn http_fallback(&self) -> Option<Connection> {
        if !self.is_https() {
            return None;
        }
        Some(Connection {
            protocol: Protocol::Http,
            uri: swap_scheme(&self.uri, Protocol::Http),
            ..self.clone()
        })
    }

    /// Same endpoint reached through a different URL. The protocol follows
    /// the URL's scheme when it has a recognised one.
    pub fn with_uri(&self, uri: &str) -> Connection {
        Connection {
            protocol: Protocol::of_url(uri).unwrap_or(self.protocol),
            uri: uri.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.class())
    }
}

/// Replace the scheme of `uri`. URIs without a recognised scheme are
/// returned unchanged.
pub fn swap_scheme(uri: &str, to: Protocol) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) if Protocol::parse(scheme).is_ok() => format!("{}://{}", to, rest),
        _ => uri.to_string(),
    }
}

/// True when the URL's host is a DNS name under the TLS-capable alias
/// domain. Raw IPv4/IPv6 hosts never qualify.
pub fn is_tls_alias_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    match parsed.host() {
        Some(url::Host::Domain(host)) => host.to_ascii_lowercase().ends_with(TLS_ALIAS_SUFFIX),
        _ => false,
    }
}

/// A media server and the endpoints it advertises
#[derive(Debug, Clone)]
pub struct Server {
    name: String,
    client_identifier: String,
    access_token: String,
    owned: bool,
    connections: Vec<Connection>,
    product: Option<String>,
    platform: Option<String>,
    last_seen_at: Option<DateTime<Utc>>,
    presence: bool,
}

/// Resource entry as sent by the directory service. `connections` stays raw
/// so that one bad entry does not reject the whole resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceDescriptor {
    name: Option<String>,
    client_identifier: Option<String>,
    access_token: Option<String>,
    provides: Option<String>,
    owned: Option<bool>,
    product: Option<String>,
    platform: Option<String>,
    last_seen_at: Option<String>,
    presence: Option<bool>,
    connections: Option<Vec<Value>>,
}

impl Server {
    /// Build a server from already-validated connections
    pub fn new(
        name: &str,
        client_identifier: &str,
        access_token: &str,
        connections: Vec<Connection>,
    ) -> Result<Self, ServerParseError> {
        if connections.is_empty() {
            return Err(ServerParseError::NoUsableConnections {
                count: 0,
                rejected: Vec::new(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            client_identifier: client_identifier.to_string(),
            access_token: access_token.to_string(),
            owned: false,
            connections,
            product: None,
            platform: None,
            last_seen_at: None,
            presence: false,
        })
    }

    /// Parse one directory resource. Invalid connection entries are dropped;
    /// every https entry gets an http twin appended right after it.
    pub fn from_resource(value: &Value) -> Result<Self, ServerParseError> {
        let desc: ResourceDescriptor = serde_json::from_value(value.clone())
            .map_err(|e| ServerParseError::Malformed(e.to_string()))?;

        let provides = desc.provides.unwrap_or_default();
        if provides != PROVIDES_SERVER {
            return Err(ServerParseError::NotAServer { provides });
        }

        let name = required(desc.name, "name")?;
        let client_identifier = required(desc.client_identifier, "clientIdentifier")?;
        let access_token = required(desc.access_token, "accessToken")?;

        let raw_connections = desc.connections.unwrap_or_default();
        let mut connections = Vec::with_capacity(raw_connections.len() * 2);
        let mut rejected = Vec::new();

        for raw in &raw_connections {
            match Connection::from_value(raw) {
                Ok(conn) => {
                    let fallback = conn.http_fallback();
                    connections.push(conn);
                    connections.extend(fallback);
                }
                Err(e) => {
                    tracing::debug!("Dropping connection of {}: {}", name, e);
                    rejected.push(raw.clone());
                }
            }
        }

        if connections.is_empty() {
            return Err(ServerParseError::NoUsableConnections {
                count: raw_connections.len(),
                rejected,
            });
        }

        let last_seen_at = desc
            .last_seen_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            name,
            client_identifier,
            access_token,
            owned: desc.owned.unwrap_or(false),
            connections,
            product: desc.product,
            platform: desc.platform,
            last_seen_at,
            presence: desc.presence.unwrap_or(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_identifier(&self) -> &str {
        &self.client_identifier
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    pub fn is_present(&self) -> bool {
        self.presence
    }

    /// Best connection without touching the network: first local non-relay,
    /// else first remote non-relay, else first relay.
    pub fn best_static_connection(&self) -> &Connection {
        let mut best = &self.connections[0];
        for conn in &self.connections[1..] {
            if conn.class() < best.class() {
                best = conn;
            }
        }
        best
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ServerParseError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerParseError::Malformed(format!("missing `{}`", field)))
}
