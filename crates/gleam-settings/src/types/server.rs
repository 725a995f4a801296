//! Listener and wire settings.

use serde::{Deserialize, Serialize};

use gleam_core::constants::DEFAULT_MAX_FRAME_SIZE;

/// TCP listener and HTTP side-port settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Framed RPC port.
    pub port: u16,
    /// `/health` and `/metrics` port. `0` disables the side-port.
    pub http_port: u16,
    /// Maximum simultaneously open client connections.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7300,
            http_port: 7301,
            max_connections: 10_000,
        }
    }
}

/// Frame codec limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireSettings {
    /// Largest accepted length prefix, in bytes.
    pub max_frame_size: usize,
}

impl Default for WireSettings {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 7300);
        assert_eq!(s.http_port, 7301);
        assert_eq!(s.max_connections, 10_000);
    }

    #[test]
    fn server_camel_case() {
        let json = serde_json::to_value(ServerSettings::default()).unwrap();
        assert!(json.get("httpPort").is_some());
        assert!(json.get("maxConnections").is_some());
    }

    #[test]
    fn wire_partial_json() {
        let w: WireSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(w.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }
}
