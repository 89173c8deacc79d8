use crate::error::ConfigError;
use crate::header::{DEFAULT_MIN_MATCHES, DEFAULT_SCAN_ROWS, HeaderMode, MAX_SCAN_ROWS, MIN_SCAN_ROWS};
use crate::pipeline::PipelineConfig;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub session: SessionConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Accounts must have an e-mail address in this domain.
    pub allowed_domain: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub days: i64,
    pub cookie_secure: bool,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable or `None` when unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let header_mode = match vars.parse::<usize>("HEADER_ROW")? {
            None => HeaderMode::Auto,
            Some(0) => {
                return Err(ConfigError::Invalid {
                    name: "HEADER_ROW",
                    value: "0".to_string(),
                });
            }
            Some(row) => HeaderMode::Fixed(row - 1),
        };

        let min_matches = match vars.parse::<usize>("HEADER_MIN_MATCHES")? {
            None => DEFAULT_MIN_MATCHES,
            Some(n) if n < DEFAULT_MIN_MATCHES => {
                return Err(ConfigError::Invalid {
                    name: "HEADER_MIN_MATCHES",
                    value: n.to_string(),
                });
            }
            Some(n) => n,
        };

        let scan_rows = vars
            .parse::<usize>("HEADER_SCAN_ROWS")?
            .unwrap_or(DEFAULT_SCAN_ROWS)
            .clamp(MIN_SCAN_ROWS, MAX_SCAN_ROWS);

        Ok(AppConfig {
            server: ServerConfig {
                host: vars.get("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: vars.parse("SERVER_PORT")?.unwrap_or(3000),
                max_upload_bytes: vars.parse::<usize>("MAX_UPLOAD_MB")?.unwrap_or(20) * 1024 * 1024,
            },
            oauth: OAuthConfig {
                client_id: vars.require("GOOGLE_CLIENT_ID")?,
                client_secret: vars.require("GOOGLE_CLIENT_SECRET")?,
                redirect_uri: vars.require("GOOGLE_REDIRECT_URI")?,
                allowed_domain: vars
                    .require("ALLOWED_EMAIL_DOMAIN")?
                    .trim_start_matches('@')
                    .to_string(),
                timeout: Duration::from_secs(vars.parse("OAUTH_TIMEOUT_SECS")?.unwrap_or(15)),
            },
            session: SessionConfig {
                days: vars.parse("SESSION_DAYS")?.unwrap_or(7),
                cookie_secure: vars.parse("COOKIE_SECURE")?.unwrap_or(false),
            },
            pipeline: PipelineConfig {
                header_mode,
                scan_rows,
                min_matches,
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    /// Set and non-blank values only.
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}
