//! Server configuration.

use std::str::FromStr;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames a member may fall behind before it starts skipping
    pub broadcast_capacity: usize,
    /// Document key for connections to the root path
    pub default_document_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            broadcast_capacity: 256,
            default_document_key: "default".to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `SCRIBE_*` / `PORT` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit lookup, so
    /// tests don't touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bind) = lookup("SCRIBE_BIND") {
            config.bind_addr = bind;
        } else if let Some(port) = parse_var::<u16>(&lookup, "PORT") {
            config.bind_addr = format!("0.0.0.0:{port}");
        }

        if let Some(capacity) = parse_var::<usize>(&lookup, "SCRIBE_BROADCAST_CAPACITY") {
            if capacity > 0 {
                config.broadcast_capacity = capacity;
            } else {
                log::warn!(
                    "SCRIBE_BROADCAST_CAPACITY must be positive, keeping {}",
                    config.broadcast_capacity
                );
            }
        }

        if let Some(key) = lookup("SCRIBE_DEFAULT_KEY").filter(|k| !k.is_empty()) {
            config.default_document_key = key;
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring unparseable {name}={raw:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.default_document_key, "default");
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(ServerConfig::from_lookup(lookup(&[])), ServerConfig::default());
    }

    #[test]
    fn test_port_binds_all_interfaces() {
        let config = ServerConfig::from_lookup(lookup(&[("PORT", "8080")]));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_bind_wins_over_port() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("SCRIBE_BIND", "127.0.0.1:9000"),
        ]));
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "eighty"),
            ("SCRIBE_BROADCAST_CAPACITY", "0"),
            ("SCRIBE_DEFAULT_KEY", ""),
        ]));
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SCRIBE_BROADCAST_CAPACITY", "1024"),
            ("SCRIBE_DEFAULT_KEY", "lobby"),
        ]));
        assert_eq!(config.broadcast_capacity, 1024);
        assert_eq!(config.default_document_key, "lobby");
    }
}
