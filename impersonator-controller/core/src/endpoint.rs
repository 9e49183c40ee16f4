use regex::Regex;
use std::{fmt, net::IpAddr, sync::OnceLock};

/// The port assumed when an endpoint does not name one.
pub const DEFAULT_HTTPS_PORT: u16 = 443;

const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
const DNS1123_SUBDOMAIN_REGEX: &str =
    r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$";

/// A parsed `host[:port]` endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidEndpoint {
    #[error("missing host")]
    MissingHost,

    #[error("missing ']' in address")]
    UnclosedBracket,

    #[error("unexpected characters after ']' in address")]
    TrailingCharacters,

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("host {0:?} is not a valid hostname or IP address")]
    InvalidHost(String),
}

// === impl HostPort ===

impl HostPort {
    /// Parses an endpoint of the form `host`, `host:port`, `[v6]`, `[v6]:port`
    /// or a bare IPv6 address, filling in `default_port` when none is given.
    pub fn parse(endpoint: &str, default_port: u16) -> Result<Self, InvalidEndpoint> {
        let (host, port) = split_host_port(endpoint)?;
        let port = match port {
            None => default_port,
            Some(p) => match p.parse::<u16>() {
                Ok(n) if n > 0 => n,
                _ => return Err(InvalidEndpoint::InvalidPort(p.to_string())),
            },
        };

        if host.is_empty() {
            return Err(InvalidEndpoint::MissingHost);
        }
        if host.parse::<IpAddr>().is_err() && !is_dns1123_subdomain(host) {
            return Err(InvalidEndpoint::InvalidHost(host.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The host, when it is a literal IP address.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Formats `host:port`, bracketing IPv6 hosts.
    pub fn endpoint(&self) -> String {
        self.to_string()
    }

    /// Like [`HostPort::endpoint`], but omits the port when it is the default
    /// HTTPS port.
    pub fn client_endpoint(&self) -> String {
        let endpoint = self.endpoint();
        match endpoint.strip_suffix(":443") {
            Some(trimmed) => trimmed.to_string(),
            None => endpoint,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(endpoint: &str) -> Result<(&str, Option<&str>), InvalidEndpoint> {
    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or(InvalidEndpoint::UnclosedBracket)?;
        return match after {
            "" => Ok((host, None)),
            _ => match after.strip_prefix(':') {
                Some(port) => Ok((host, Some(port))),
                None => Err(InvalidEndpoint::TrailingCharacters),
            },
        };
    }

    // More than one colon and no brackets can only be a bare IPv6 address.
    if endpoint.matches(':').count() > 1 {
        return Ok((endpoint, None));
    }
    match endpoint.split_once(':') {
        Some((host, port)) => Ok((host, Some(port))),
        None => Ok((endpoint, None)),
    }
}

pub(crate) fn is_dns1123_subdomain(host: &str) -> bool {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| Regex::new(DNS1123_SUBDOMAIN_REGEX).expect("must compile"));
    host.len() <= DNS1123_SUBDOMAIN_MAX_LEN && regex.is_match(host)
}
