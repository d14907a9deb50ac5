use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub responder: ResponderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponderConfig {
    /// Greeting text the built-in responder replies with when no external
    /// reasoning engine is wired in.
    pub canned_reply: String,
    /// How many recent messages go into the context bundle handed to the
    /// reasoning engine.
    pub context_window: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://gbuser:@localhost:5432/storebot".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "16".to_string())
                    .parse()?,
            },
            responder: ResponderConfig {
                canned_reply: env::var("RESPONDER_CANNED_REPLY")
                    .unwrap_or_else(|_| "Thanks for your message, we'll reply shortly.".to_string()),
                context_window: env::var("RESPONDER_CONTEXT_WINDOW")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Only asserts on keys this test does not share with the environment.
        let cfg = AppConfig::from_env().expect("config from defaults");
        assert!(cfg.responder.context_window > 0);
        assert!(!cfg.responder.canned_reply.is_empty());
    }
}
