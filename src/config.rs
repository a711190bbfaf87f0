use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub reset_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub default_sender: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `memory` selects the in-process user store.
    pub database_url: String,
    pub tokens: TokenConfig,
    pub upload_folder: PathBuf,
    pub app_base_url: String,
    pub session_ttl_days: i64,
    pub secure_cookies: bool,
    /// `None` when `MAIL_SERVER` is unset; reset links are then only logged.
    pub mail: Option<MailConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let tokens = TokenConfig {
            secret: std::env::var("SECRET_KEY")?,
            issuer: std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| "accounts".into()),
            audience: std::env::var("TOKEN_AUDIENCE").unwrap_or_else(|_| "accounts-users".into()),
            reset_ttl_minutes: env_parse("RESET_TOKEN_TTL_MINUTES").unwrap_or(30),
        };

        let mail = match std::env::var("MAIL_SERVER") {
            Ok(server) if !server.trim().is_empty() => Some(MailConfig {
                server,
                port: env_parse("MAIL_PORT").unwrap_or(587),
                username: std::env::var("MAIL_USERNAME").unwrap_or_default(),
                password: std::env::var("MAIL_PASSWORD").unwrap_or_default(),
                default_sender: std::env::var("MAIL_DEFAULT_SENDER")?,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            tokens,
            upload_folder: std::env::var("UPLOAD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/uploads")),
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3030".into())
                .trim_end_matches('/')
                .to_string(),
            session_ttl_days: env_parse("SESSION_TTL_DAYS").unwrap_or(30),
            secure_cookies: env_parse("SESSION_COOKIE_SECURE").unwrap_or(false),
            mail,
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
