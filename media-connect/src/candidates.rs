use std::collections::HashSet;
use shared::types::{is_tls_alias_url, Connection, ConnectionClass, Protocol};

/// One probeable URL derived from a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub connection: Connection,
    /// Host is a DNS name under the TLS-capable alias domain
    pub is_secure_alias: bool,
    pub is_https: bool,
}

impl Candidate {
    fn new(url: String, connection: &Connection) -> Self {
        Self {
            is_secure_alias: is_tls_alias_url(&url),
            is_https: Protocol::of_url(&url) == Some(Protocol::Https),
            url,
            connection: connection.clone(),
        }
    }

    pub fn class(&self) -> ConnectionClass {
        self.connection.class()
    }

    /// The connection as reached through this candidate's URL
    pub fn to_connection(&self) -> Connection {
        if self.url == self.connection.uri() {
            self.connection.clone()
        } else {
            self.connection.with_uri(&self.url)
        }
    }

    /// Index into the fixed bucket order: https-local, https-remote,
    /// https-relay, http-local, http-remote, http-relay.
    fn bucket(&self) -> usize {
        let scheme = if self.is_https { 0 } else { 3 };
        let topology = match self.class() {
            ConnectionClass::Local => 0,
            ConnectionClass::Remote => 1,
            ConnectionClass::Relay => 2,
        };
        scheme + topology
    }
}

/// Ordered, deduplicated probe plan for one server
#[derive(Debug, Clone, Default)]
pub struct CandidatePlan {
    /// Priority order, used for ranking and lookups
    pub ordered: Vec<Candidate>,
    /// Every URL in the plan; race launch order does not matter
    pub urls: HashSet<String>,
}

impl CandidatePlan {
    pub fn build(connections: &[Connection]) -> Self {
        Self::build_excluding(connections, &[])
    }

    /// Build a plan, treating `excluded` URLs as already seen
    pub fn build_excluding(connections: &[Connection], excluded: &[&str]) -> Self {
        let mut seen: HashSet<String> = excluded.iter().map(|u| u.to_string()).collect();
        let mut buckets: [Vec<Candidate>; 6] = Default::default();

        let mut push = |url: String, conn: &Connection| {
            if seen.insert(url.clone()) {
                let candidate = Candidate::new(url, conn);
                buckets[candidate.bucket()].push(candidate);
            }
        };

        for conn in connections {
            push(conn.uri().to_string(), conn);
            // raw addresses cannot present a certificate for the alias name
            if conn.is_https() {
                push(conn.raw_address_url(Protocol::Http), conn);
            }
        }

        let ordered: Vec<Candidate> = buckets.into_iter().flatten().collect();
        let urls = ordered.iter().map(|c| c.url.clone()).collect();
        Self { ordered, urls }
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn find(&self, url: &str) -> Option<&Candidate> {
        self.ordered.iter().find(|c| c.url == url)
    }
}
