//! Startup configuration, read from the environment once at boot.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub server_port: String,
}

impl Config {
    pub fn load() -> Self {
        Config {
            listen_addr: get_env("LISTEN_ADDR", "0.0.0.0"),
            server_port: get_env("SERVER_PORT", "8080"),
        }
    }

    /// Socket address the API server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.server_port)
    }
}

fn get_env(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}
