//! Server instance handles and command routing targets

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 27017;

/// Opaque reference to one member of a deployment, identified by `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerInstanceHandle {
    host: String,
    port: u16,
}

impl ServerInstanceHandle {
    /// IPv6 hosts are stored without their brackets
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host.as_str())
            .to_ascii_lowercase();
        Self { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerInstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerInstanceHandle {
    type Err = Error;

    /// Parses `host`, `host:port`, `[ipv6]` or `[ipv6]:port`; the port defaults to 27017
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_argument("Server address must not be empty"));
        }
        let parse_port = |port: &str| {
            port.parse::<u16>().map_err(|e| {
                Error::invalid_argument(format!("Invalid port in server address '{s}': {e}"))
            })
        };

        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                Error::invalid_argument(format!("Unclosed '[' in server address '{s}'"))
            })?;
            if host.is_empty() {
                return Err(Error::invalid_argument(format!(
                    "Server address '{s}' is missing a host"
                )));
            }
            return match tail {
                "" => Ok(Self::new(host, DEFAULT_PORT)),
                _ => match tail.strip_prefix(':') {
                    Some(port) => Ok(Self::new(host, parse_port(port)?)),
                    None => Err(Error::invalid_argument(format!(
                        "Unexpected '{tail}' after host in server address '{s}'"
                    ))),
                },
            };
        }

        // More than one colon without brackets is a bare IPv6 address
        if s.matches(':').count() > 1 {
            return Ok(Self::new(s, DEFAULT_PORT));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => Ok(Self::new(host, parse_port(port)?)),
            Some(_) => Err(Error::invalid_argument(format!(
                "Server address '{s}' is missing a host"
            ))),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

/// Which members are eligible to receive a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreference {
    /// Whether a member in the given role may serve a command with this preference
    pub fn accepts(self, role: MemberRole) -> bool {
        match self {
            Self::Primary => matches!(role, MemberRole::Primary | MemberRole::Standalone),
            Self::Secondary => role == MemberRole::Secondary,
            Self::PrimaryPreferred | Self::SecondaryPreferred | Self::Nearest => {
                role != MemberRole::Other
            }
        }
    }
}

/// Role a member currently plays in its deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    Primary,
    Secondary,
    Standalone,
    Other,
}

/// Where a command should be routed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTarget {
    /// The primary (or the standalone server)
    Primary,
    /// Any member eligible under the read preference
    ReadPreference(ReadPreference),
    /// One specific member, which must also satisfy the read preference
    Instance {
        instance: ServerInstanceHandle,
        read_preference: ReadPreference,
    },
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::ReadPreference(pref) => write!(f, "{pref:?}"),
            Self::Instance {
                instance,
                read_preference,
            } => write!(f, "{instance} ({read_preference:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let handle: ServerInstanceHandle = "Node-1.example.com:27018".parse().expect("address");
        assert_eq!(handle.host(), "node-1.example.com");
        assert_eq!(handle.port(), 27018);
        assert_eq!(handle.to_string(), "node-1.example.com:27018");
    }

    #[test]
    fn test_parse_defaults_port() {
        let handle: ServerInstanceHandle = "localhost".parse().expect("address");
        assert_eq!(handle.port(), 27017);
    }

    #[test]
    fn test_parse_ipv6_strips_brackets() {
        let handle: ServerInstanceHandle = "[::1]:27018".parse().expect("address");
        assert_eq!(handle.host(), "::1");
        assert_eq!(handle.port(), 27018);
        assert_eq!(handle.to_string(), "[::1]:27018");

        let handle: ServerInstanceHandle = "[FE80::1]".parse().expect("address");
        assert_eq!(handle.host(), "fe80::1");
        assert_eq!(handle.port(), 27017);

        assert_eq!(ServerInstanceHandle::new("[::1]", 27017).host(), "::1");
        assert!("[::1".parse::<ServerInstanceHandle>().is_err());
        assert!("[::1]x".parse::<ServerInstanceHandle>().is_err());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<ServerInstanceHandle>().is_err());
        assert!(":27017".parse::<ServerInstanceHandle>().is_err());
        assert!("host:notaport".parse::<ServerInstanceHandle>().is_err());
    }

    #[test]
    fn test_secondary_preference_rejects_primary() {
        assert!(ReadPreference::Secondary.accepts(MemberRole::Secondary));
        assert!(!ReadPreference::Secondary.accepts(MemberRole::Primary));
        assert!(ReadPreference::Nearest.accepts(MemberRole::Primary));
        assert!(!ReadPreference::Primary.accepts(MemberRole::Secondary));
        assert!(ReadPreference::Primary.accepts(MemberRole::Standalone));
    }
}
