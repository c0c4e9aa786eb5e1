use thiserror::Error;

/// A connection descriptor that cannot become a `Connection`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported protocol `{0}`")]
    UnsupportedProtocol(String),

    #[error("port {0} is out of range 1-65535")]
    PortOutOfRange(i64),

    #[error("malformed connection descriptor: {0}")]
    Malformed(String),
}

/// A directory resource that cannot become a `Server`
#[derive(Debug, Clone, Error)]
pub enum ServerParseError {
    /// Resource is not a media server (`provides` is something else)
    #[error("resource provides `{provides}`, not a server")]
    NotAServer { provides: String },

    #[error("malformed server resource: {0}")]
    Malformed(String),

    /// Every connection descriptor was rejected. `rejected` holds the raw
    /// payloads for diagnostics.
    #[error("all {count} connection descriptors were invalid")]
    NoUsableConnections {
        count: usize,
        rejected: Vec<serde_json::Value>,
    },
}
