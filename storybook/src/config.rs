//! Server configuration.

use std::path::PathBuf;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;

/// Request body limit; request JSON may carry inline images.
pub const BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Directory of browser client files served at `/`, if any.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// Read `HOST`, `PORT` and `STORYBOOK_STATIC_DIR`; unset or invalid
    /// values keep defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("HOST") {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.trim().parse().ok()) {
            config.port = port;
        }
        if let Ok(dir) = std::env::var("STORYBOOK_STATIC_DIR") {
            if !dir.trim().is_empty() {
                config.static_dir = Some(PathBuf::from(dir.trim()));
            }
        }
        config
    }

    /// The address to bind, e.g. `0.0.0.0:3000`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert!(config.static_dir.is_none());
    }
}
