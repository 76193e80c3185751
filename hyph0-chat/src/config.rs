use std::fs::File;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use hyph0_proto::config::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// Parses the application-level `hyph0://host:port` address form (host non-empty, port
/// base-10 numeric). The `hyph0://` scheme is optional, accepted for convenience when
/// typing a bare `host:port` on the command line or in a config file; either way,
/// `host` may be a literal IP or a DNS name to resolve.
pub fn parse_hyph0_addr(s: &str) -> Result<SocketAddr, String> {
    let rest = s.strip_prefix("hyph0://").unwrap_or(s);
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("{s}: missing :port"))?;
    if host.is_empty() {
        return Err(format!("{s}: host must be non-empty"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| format!("{s}: port must be base-10 numeric"))?;

    if let Ok(ip) = host.parse() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("{s}: {e}"))?
        .next()
        .ok_or_else(|| format!("{s}: host did not resolve to any address"))
}

/// On-disk chat configuration, overridable field-by-field from the command line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_hyph0_addr_opt")]
    pub bind: Option<SocketAddr>,
    #[serde(deserialize_with = "deserialize_hyph0_addr_opt")]
    pub connect: Option<SocketAddr>,
    pub nick: String,
    #[serde(flatten)]
    pub connection: ConnectionConfig,
}

/// Accepts either a bare `host:port` or a `hyph0://host:port` string for `bind`/`connect`
/// in the config file, matching the CLI's `--addr` parsing.
fn deserialize_hyph0_addr_opt<'de, D>(de: D) -> Result<Option<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    match raw {
        Some(s) => parse_hyph0_addr(&s).map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: None,
            connect: None,
            nick: "anonymous".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(toml::from_slice(&buf)?)
    }
}
