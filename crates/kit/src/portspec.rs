//! Parsing of `--publish` port specifications.
//!
//! A spec has the form `host:guest[/protocol]`, e.g. `2222:22` or
//! `8080:80/udp`. The same parsed mapping feeds both the QEMU user-mode
//! `hostfwd` rules and the container runtime's `-p` flags.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Which side of a mapping a port belongs to, for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PortSide {
    #[strum(serialize = "hostPort")]
    Host,
    #[strum(serialize = "guestPort")]
    Guest,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortSpecError {
    #[error("Unable to parse the ports to be published from '{0}', should be in format <host>:<guest> or <host>:<guest>/<tcp|udp>")]
    Malformed(String),

    #[error("The provided {side} '{value}' can't be converted to int")]
    InvalidPort { side: PortSide, value: String },

    #[error("Provided protocol '{0}' is not valid, valid options are: udp and tcp")]
    InvalidProtocol(String),

    #[error("Invalid {side}: {port}")]
    PortOutOfRange { side: PortSide, port: i64 },
}

/// Transport protocol of a published port.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// A validated host-to-guest port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub guest_port: u16,
    pub protocol: Protocol,
}

fn parse_port(side: PortSide, value: &str) -> Result<i64, PortSpecError> {
    value.parse::<i64>().map_err(|_| PortSpecError::InvalidPort {
        side,
        value: value.to_owned(),
    })
}

fn check_range(side: PortSide, port: i64) -> Result<u16, PortSpecError> {
    match u16::try_from(port) {
        Ok(p) if p >= 1 => Ok(p),
        _ => Err(PortSpecError::PortOutOfRange { side, port }),
    }
}

impl FromStr for PortMapping {
    type Err = PortSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (host_part, right) = match (parts.next(), parts.next()) {
            (Some(host), Some(right)) => (host, right),
            _ => return Err(PortSpecError::Malformed(s.to_owned())),
        };

        let host_port = parse_port(PortSide::Host, host_part)?;

        // A protocol is only read from exactly `guest/proto`; more pieces
        // leave the default and keep the first as the guest port.
        let pieces: Vec<&str> = right.split('/').collect();
        let protocol = match pieces.as_slice() {
            [_, proto] => {
                let proto = proto.trim().to_lowercase();
                proto
                    .parse::<Protocol>()
                    .map_err(|_| PortSpecError::InvalidProtocol(proto))?
            }
            _ => Protocol::Tcp,
        };
        let guest_part = pieces[0];

        let guest_port = parse_port(PortSide::Guest, guest_part)?;

        Ok(PortMapping {
            host_port: check_range(PortSide::Host, host_port)?,
            guest_port: check_range(PortSide::Guest, guest_port)?,
            protocol,
        })
    }
}

impl fmt::Display for PortMapping {
    /// Formats the mapping the way container runtimes expect for `-p`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host_port, self.guest_port, self.protocol)
    }
}

/// Parse a single `host:guest[/protocol]` spec.
pub fn parse_port_spec(spec: &str) -> Result<PortMapping, PortSpecError> {
    spec.parse()
}

/// Parse every spec in order, stopping at the first invalid one.
pub fn parse_port_specs<S: AsRef<str>>(specs: &[S]) -> Result<Vec<PortMapping>, PortSpecError> {
    specs.iter().map(|s| parse_port_spec(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_spec_defaults_to_tcp() {
        let mapping = parse_port_spec("8080:80").unwrap();
        assert_eq!(
            mapping,
            PortMapping {
                host_port: 8080,
                guest_port: 80,
                protocol: Protocol::Tcp,
            }
        );
    }

    #[test]
    fn test_parse_port_spec_protocols() {
        assert_eq!(parse_port_spec("53:53/udp").unwrap().protocol, Protocol::Udp);
        assert_eq!(parse_port_spec("53:53/UDP").unwrap().protocol, Protocol::Udp);
        assert_eq!(parse_port_spec("22:22/tcp").unwrap().protocol, Protocol::Tcp);
        assert_eq!(parse_port_spec("22:22/ Tcp ").unwrap().protocol, Protocol::Tcp);
    }

    #[test]
    fn test_parse_port_spec_malformed() {
        for spec in ["8080", "", "8080/udp"] {
            let err = parse_port_spec(spec).unwrap_err();
            assert!(
                matches!(err, PortSpecError::Malformed(_)),
                "unexpected error for {spec:?}: {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_port_spec_extra_parts_ignored() {
        let mapping = parse_port_spec("8080:80:90").unwrap();
        assert_eq!(mapping.host_port, 8080);
        assert_eq!(mapping.guest_port, 80);
    }

    #[test]
    fn test_parse_port_spec_invalid_port() {
        let err = parse_port_spec("abc:80").unwrap_err();
        assert_eq!(
            err,
            PortSpecError::InvalidPort {
                side: PortSide::Host,
                value: "abc".into()
            }
        );
        assert!(err.to_string().contains("hostPort"));

        let err = parse_port_spec("8080:xyz").unwrap_err();
        assert!(matches!(
            err,
            PortSpecError::InvalidPort {
                side: PortSide::Guest,
                ..
            }
        ));

        let err = parse_port_spec("8080:/udp").unwrap_err();
        assert!(matches!(err, PortSpecError::InvalidPort { .. }));

        let err = parse_port_spec(" 8080:80").unwrap_err();
        assert!(matches!(err, PortSpecError::InvalidPort { .. }));
    }

    #[test]
    fn test_parse_port_spec_invalid_protocol() {
        let err = parse_port_spec("8080:80/sctp").unwrap_err();
        assert_eq!(err, PortSpecError::InvalidProtocol("sctp".into()));

        // The protocol is checked before the guest port.
        let err = parse_port_spec("8080:abc/sctp").unwrap_err();
        assert!(matches!(err, PortSpecError::InvalidProtocol(_)));

        let err = parse_port_spec("8080:80/").unwrap_err();
        assert_eq!(err, PortSpecError::InvalidProtocol("".into()));
    }

    #[test]
    fn test_parse_port_spec_extra_slashes_default_to_tcp() {
        for spec in ["8080:80/tcp/udp", "8080:80/udp/udp", "8080:80/sctp/x"] {
            assert_eq!(
                parse_port_spec(spec).unwrap(),
                PortMapping {
                    host_port: 8080,
                    guest_port: 80,
                    protocol: Protocol::Tcp,
                },
                "{spec}"
            );
        }
    }

    #[test]
    fn test_parse_port_spec_out_of_range() {
        for (spec, side, port) in [
            ("0:80", PortSide::Host, 0),
            ("65536:80", PortSide::Host, 65536),
            ("-1:80", PortSide::Host, -1),
            ("80:0", PortSide::Guest, 0),
            ("80:70000/udp", PortSide::Guest, 70000),
        ] {
            assert_eq!(
                parse_port_spec(spec).unwrap_err(),
                PortSpecError::PortOutOfRange { side, port },
                "spec {spec:?}"
            );
        }
        assert!(parse_port_spec("1:65535").is_ok());
        assert!(parse_port_spec("65535:1").is_ok());
    }

    #[test]
    fn test_parse_port_specs_stops_at_first_error() {
        let parsed = parse_port_specs(&["2222:22", "8080:80/udp"]).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].protocol, Protocol::Udp);

        let err = parse_port_specs(&["2222:22", "bogus", "1:1/sctp"]).unwrap_err();
        assert!(matches!(err, PortSpecError::Malformed(_)));
    }

    #[test]
    fn test_display_is_publish_form() {
        let mapping = parse_port_spec("8080:80/UDP").unwrap();
        assert_eq!(mapping.to_string(), "8080:80/udp");
    }
}
