//! Connection configuration.
//!
//! Grounded on `stsync-proxy/src/config.rs`'s `Srt` config struct, pared down to the
//! options Hyphen0 actually takes and without the file-loading concern (that belongs to
//! the application binary, see `hyph0-chat`'s config module).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::zt::ZtLayerKind;

/// Options accepted by a connection constructor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// How long to wait for any traffic before probing with a heartbeat.
    pub heartbeat_interval: Duration,
    /// Missed heartbeat replies tolerated before declaring the connection flatlined.
    pub max_heartbeat_misses: u32,
    /// Maximum bytes per zero-trust envelope.
    pub chunk_size: usize,
    /// Cipher names this endpoint is willing to negotiate, in preference order.
    pub cipher_modes: Vec<String>,
    /// The zero-trust obfuscation layer to use, if any.
    pub zt_layer: ZtLayerKind,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            max_heartbeat_misses: 5,
            chunk_size: 1024,
            cipher_modes: vec!["aes".to_string()],
            zt_layer: ZtLayerKind::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_ones() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cfg.max_heartbeat_misses, 5);
        assert_eq!(cfg.chunk_size, 1024);
        assert_eq!(cfg.cipher_modes, vec!["aes".to_string()]);
        assert_eq!(cfg.zt_layer, ZtLayerKind::None);
    }
}
