//! Network reachability checks for the sync decision.

use std::env;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const ENV_OFFLINE: &str = "BOBA_OFFLINE";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether the user forced offline mode via flag or environment.
pub fn forced_offline(flag: bool) -> bool {
    flag || env::var(ENV_OFFLINE).is_ok_and(|value| offline_env_value(&value))
}

fn offline_env_value(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0"
}

/// Bounded TCP probe of the API host. Failure to parse the URL counts
/// as unreachable rather than an error.
pub fn probe(base_url: &str) -> bool {
    let Some((host, port)) = host_port(base_url) else {
        return false;
    };
    let Ok(addrs) = (host.as_str(), port).to_socket_addrs() else {
        return false;
    };
    let reachable = addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok());
    tracing::debug!(host, port, reachable, "connectivity probe");
    reachable
}

fn host_port(base_url: &str) -> Option<(String, u16)> {
    let trimmed = base_url.trim();
    let (default_port, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
        (443, rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        (80, rest)
    } else {
        return None;
    };

    let authority = rest.split(['/', '?', '#']).next()?;
    if authority.is_empty() {
        return None;
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().ok()?;
            Some((host.to_string(), port))
        }
        None => Some((authority.to_string(), default_port)),
    }
}
