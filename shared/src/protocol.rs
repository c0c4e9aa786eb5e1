/// DNS suffix of hostnames that carry a wildcard TLS certificate for the server
pub const TLS_ALIAS_SUFFIX: &str = ".plex.direct";

/// Lightweight authenticated endpoint used for reachability checks
pub const IDENTITY_PATH: &str = "/identity";

/// Header names used when talking to a server or the directory service
pub const HEADER_TOKEN: &str = "X-Plex-Token";
pub const HEADER_CLIENT_IDENTIFIER: &str = "X-Plex-Client-Identifier";
pub const HEADER_PRODUCT: &str = "X-Plex-Product";
pub const HEADER_DEVICE_NAME: &str = "X-Plex-Device-Name";

/// Value of `provides` for resources that are media servers
pub const PROVIDES_SERVER: &str = "server";

/// Default directory endpoint listing the account's resources
pub const DEFAULT_DIRECTORY_URL: &str =
    "https://plex.tv/api/v2/resources?includeHttps=1&includeRelay=1&includeIPv6=1";
