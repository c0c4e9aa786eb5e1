use std::time::Duration;
use shared::types::{is_tls_alias_url, swap_scheme, Connection, Protocol};
use crate::candidates::Candidate;
use crate::prober::Prober;

/// The https URL worth trying for a plaintext winner, if any.
///
/// Alias hosts are retried as-is over https. Raw addresses fall back to the
/// owning connection's uri, which must itself be an alias.
pub fn upgrade_target(winner: &Candidate) -> Option<String> {
    if winner.is_https {
        return None;
    }
    if winner.is_secure_alias {
        return Some(swap_scheme(&winner.url, Protocol::Https));
    }

    let alias = winner.connection.uri();
    if !is_tls_alias_url(alias) {
        return None;
    }
    let target = swap_scheme(alias, Protocol::Https);
    (Protocol::of_url(&target) == Some(Protocol::Https)).then_some(target)
}

/// Try to replace a plaintext winner with its TLS equivalent. Returns the
/// winner's own connection when the upgrade is inapplicable or fails.
pub async fn resolve(
    prober: &dyn Prober,
    winner: &Candidate,
    token: &str,
    timeout: Duration,
) -> Connection {
    let Some(target) = upgrade_target(winner) else {
        if !winner.is_https {
            tracing::debug!("No TLS alias for {}, keeping plaintext", winner.url);
        }
        return winner.to_connection();
    };

    if prober.probe(&target, token, timeout).await.success {
        tracing::info!("Upgraded {} to {}", winner.url, target);
        winner.connection.with_uri(&target)
    } else {
        tracing::debug!("Upgrade probe to {} failed, keeping {}", target, winner.url);
        winner.to_connection()
    }
}
