//! Argument & Address Parser.
//!
//! Parses the `<transport>:<host-or-path>[:<ports>]` address syntax used
//! for both the listen and connect endpoints (see the `cli` module for
//! where these strings come from).

use crate::error::Error;
use std::fmt;

/// Transport of a parsed [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Unix,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Unix => "unix",
        })
    }
}

/// A parsed listen or connect endpoint.
///
/// For `tcp`/`udp`, `addresses` holds one `host:port` string per
/// expanded port (see [`Endpoint::parse`]); for `unix` it holds exactly
/// one path (or abstract name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub transport: Transport,
    pub abstract_socket: bool,
    pub addresses: Vec<String>,
}

impl Endpoint {
    /// Parse one address specification.
    ///
    /// Grammar:
    /// ```text
    /// tcp:<host>:<port>[,<port>|<low>-<high>]...
    /// udp:<host>:<port>[,<port>|<low>-<high>]...
    /// unix:<path>
    /// unix:@<abstract-name>
    /// ```
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let (transport, rest) = split_once(spec)
            .ok_or(Error::BadAddress(spec.to_string(), "missing transport"))?;

        match transport {
            "" => Err(Error::BadAddress(spec.to_string(), "empty transport")),
            "unix" => Self::parse_unix(rest),
            "tcp" => Self::parse_inet(Transport::Tcp, rest),
            "udp" => Self::parse_inet(Transport::Udp, rest),
            other => Err(Error::BadAddress(
                spec.to_string(),
                unknown_transport_message(other),
            )),
        }
    }

    fn parse_unix(rest: &str) -> Result<Self, Error> {
        if rest.is_empty() {
            return Err(Error::BadAddress("unix:".to_string(), "empty path"));
        }
        let abstract_socket = rest.starts_with('@');
        Ok(Endpoint {
            transport: Transport::Unix,
            abstract_socket,
            addresses: vec![rest.to_string()],
        })
    }

    fn parse_inet(transport: Transport, rest: &str) -> Result<Self, Error> {
        if rest.is_empty() {
            return Err(Error::BadAddress(rest.to_string(), "empty host"));
        }

        let (host, ports) = match split_once(rest) {
            Some((host, ports)) => (host, Some(ports)),
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(Error::BadAddress(rest.to_string(), "empty host"));
        }

        let addresses = match ports {
            None => vec![host.to_string()],
            Some(ports) => expand_ports(ports)?
                .into_iter()
                .map(|port| format!("{}:{}", host, port))
                .collect(),
        };

        Ok(Endpoint {
            transport,
            abstract_socket: false,
            addresses,
        })
    }
}

/// Split `s` on the first `:`, returning `(before, after)`.
fn split_once(s: &str) -> Option<(&str, &str)> {
    let idx = s.find(':')?;
    Some((&s[..idx], &s[idx + 1..]))
}

fn unknown_transport_message(_transport: &str) -> &'static str {
    "unknown transport, expected tcp, udp or unix"
}

/// Expand a comma-separated port spec (`a,b,c` and `low-high` ranges)
/// into an ordered, duplicate-preserving list of ports.
fn expand_ports(spec: &str) -> Result<Vec<u16>, Error> {
    let mut ports = Vec::new();
    for token in spec.split(',') {
        match token.find('-') {
            Some(idx) if idx > 0 => {
                let low: u16 = token[..idx]
                    .parse()
                    .map_err(Error::InvalidPort)?;
                let high: u16 = token[idx + 1..]
                    .parse()
                    .map_err(Error::InvalidPort)?;
                if high < low {
                    return Err(Error::BadAddress(
                        token.to_string(),
                        "inverted port range",
                    ));
                }
                ports.extend(low..=high);
            }
            _ => {
                let port: u16 = token.parse().map_err(Error::InvalidPort)?;
                ports.push(port);
            }
        }
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_tcp_address() {
        let endpoint = Endpoint::parse("tcp:127.0.0.1:9000").unwrap();
        assert_eq!(endpoint.transport, Transport::Tcp);
        assert_eq!(endpoint.addresses, vec!["127.0.0.1:9000"]);
    }

    #[test]
    fn parses_tcp_host_without_port() {
        let endpoint = Endpoint::parse("tcp:127.0.0.1").unwrap();
        assert_eq!(endpoint.addresses, vec!["127.0.0.1"]);
    }

    #[test]
    fn expands_port_list() {
        let endpoint = Endpoint::parse("tcp:0.0.0.0:8080,8081").unwrap();
        assert_eq!(endpoint.addresses, vec!["0.0.0.0:8080", "0.0.0.0:8081"]);
    }

    #[test]
    fn expands_port_range_in_ascending_order() {
        let endpoint = Endpoint::parse("tcp:10.0.0.1:7000-7002").unwrap();
        assert_eq!(
            endpoint.addresses,
            vec!["10.0.0.1:7000", "10.0.0.1:7001", "10.0.0.1:7002"]
        );
    }

    #[test]
    fn expands_mixed_list_and_ranges_left_to_right() {
        let endpoint = Endpoint::parse("udp:host:1,5-7,2").unwrap();
        assert_eq!(
            endpoint.addresses,
            vec!["host:1", "host:5", "host:6", "host:7", "host:2"]
        );
    }

    #[test]
    fn rejects_inverted_range() {
        let err = Endpoint::parse("tcp:host:9-5").unwrap_err();
        assert!(matches!(err, Error::BadAddress(_, "inverted port range")));
    }

    #[test]
    fn rejects_unknown_transport() {
        let err = Endpoint::parse("sctp:host:1").unwrap_err();
        assert!(matches!(err, Error::BadAddress(..)));
    }

    #[test]
    fn rejects_empty_transport() {
        let err = Endpoint::parse(":host:1").unwrap_err();
        assert!(matches!(err, Error::BadAddress(_, "empty transport")));
    }

    #[test]
    fn rejects_empty_host() {
        let err = Endpoint::parse("tcp:").unwrap_err();
        assert!(matches!(err, Error::BadAddress(..)));
    }

    #[test]
    fn rejects_non_integer_port() {
        let err = Endpoint::parse("tcp:host:abc").unwrap_err();
        assert!(matches!(err, Error::InvalidPort(_)));
    }

    #[test]
    fn unix_path_is_single_address_with_no_ports() {
        let endpoint = Endpoint::parse("unix:/tmp/in.sock").unwrap();
        assert_eq!(endpoint.transport, Transport::Unix);
        assert_eq!(endpoint.addresses.len(), 1);
        assert!(!endpoint.abstract_socket);
    }

    #[test]
    fn unix_abstract_socket_is_marked() {
        let endpoint = Endpoint::parse("unix:@my.sock").unwrap();
        assert!(endpoint.abstract_socket);
        assert_eq!(endpoint.addresses, vec!["@my.sock"]);
    }

    #[test]
    fn rejects_empty_unix_path() {
        let err = Endpoint::parse("unix:").unwrap_err();
        assert!(matches!(err, Error::BadAddress(..)));
    }
}
