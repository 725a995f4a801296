//! Package-level constants shared by the wire, rpc, and server crates.

/// Current version of the gateway (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "gleam";

/// Service id reserved for gateway control traffic (handshake, heartbeat, kick).
pub const SYSTEM_SERVICE_ID: u16 = 0;

/// Message id carried by one-way messages; never allocated to a call.
pub const ONE_WAY_MESSAGE_ID: u32 = 0;

/// Bytes between the `u32` length prefix and the payload
/// (version, flags, message id, service id, method id).
pub const FRAME_HEADER_LEN: usize = 10;

/// Default upper bound on a frame's length prefix (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn header_fits_default_frame() {
        assert!(FRAME_HEADER_LEN < DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(FRAME_HEADER_LEN, 1 + 1 + 4 + 2 + 2);
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }
}
