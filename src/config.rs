//! Bridge configuration from the environment.
//!
//! | Variable                      | Default                      |
//! |-------------------------------|------------------------------|
//! | `HOSTBRIDGE_SOCKET`           | [`default_socket_path`]      |
//! | `HOSTBRIDGE_TIMEOUT_MS`       | 30000                        |
//! | `HOSTBRIDGE_IO_TIMEOUT_MS`    | 60000                        |
//! | `HOSTBRIDGE_CONNECT_ATTEMPTS` | 5                            |

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::channel::DEFAULT_TIMEOUT;

/// Default limit on a single socket exchange.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of connection attempts before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

const SOCKET_FILE: &str = "hostbridge.sock";

/// Settings for reaching a scripting host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub socket_path: PathBuf,
    /// How long a caller waits for its response.
    pub timeout: Duration,
    /// Limit on one exchange on the wire.
    pub io_timeout: Duration,
    pub connect_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

impl BridgeConfig {
    /// Read `HOSTBRIDGE_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BridgeConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("HOSTBRIDGE_SOCKET").filter(|p| !p.is_empty()) {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(ms) = lookup("HOSTBRIDGE_TIMEOUT_MS") {
            config.timeout = parse_millis("HOSTBRIDGE_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("HOSTBRIDGE_IO_TIMEOUT_MS") {
            config.io_timeout = parse_millis("HOSTBRIDGE_IO_TIMEOUT_MS", &ms)?;
        }
        if let Some(attempts) = lookup("HOSTBRIDGE_CONNECT_ATTEMPTS") {
            config.connect_attempts = attempts
                .trim()
                .parse()
                .with_context(|| format!("Invalid HOSTBRIDGE_CONNECT_ATTEMPTS: {}", attempts))?;
            if config.connect_attempts == 0 {
                bail!("HOSTBRIDGE_CONNECT_ATTEMPTS must be at least 1");
            }
        }

        Ok(config)
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    let ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}: {}", key, raw))?;
    if ms == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_millis(ms))
}

/// Resolve the default socket path of the host daemon.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/hostbridge.sock` (Linux standard)
/// 2. `~/Library/Caches/hostbridge.sock` (macOS)
/// 3. `/tmp/hostbridge.sock` (fallback)
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(SOCKET_FILE);
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join(SOCKET_FILE);
    }

    PathBuf::from("/tmp").join(SOCKET_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_attempts, 5);
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("HOSTBRIDGE_SOCKET", "/run/test.sock"),
            ("HOSTBRIDGE_TIMEOUT_MS", "250"),
            ("HOSTBRIDGE_IO_TIMEOUT_MS", " 1000 "),
            ("HOSTBRIDGE_CONNECT_ATTEMPTS", "2"),
        ]))
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/test.sock"));
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.io_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_attempts, 2);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            [("HOSTBRIDGE_TIMEOUT_MS", "soon")],
            [("HOSTBRIDGE_TIMEOUT_MS", "0")],
            [("HOSTBRIDGE_CONNECT_ATTEMPTS", "0")],
            [("HOSTBRIDGE_IO_TIMEOUT_MS", "-5")],
        ] {
            assert!(BridgeConfig::from_lookup(lookup(&vars)).is_err(), "{:?}", vars);
        }
    }

    #[test]
    fn test_default_socket_path_format() {
        let path = default_socket_path();
        assert!(path.is_absolute());
        assert_eq!(path.file_name().unwrap(), SOCKET_FILE);
    }
}
