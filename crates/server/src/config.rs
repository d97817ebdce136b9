// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The DB pool reads its own tuning variables in `db::pool`.

use std::net::SocketAddr;

const DEV_JWT_SECRET: &str = "teamdocs_local_development_jwt_secret_32_chars";
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret for session tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `teamdocs_server=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Request body cap. Markdown with embedded images gets large.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TEAMDOCS_SERVER_HOST` | `0.0.0.0` |
    /// | `TEAMDOCS_SERVER_PORT` | `8080` |
    /// | `TEAMDOCS_SERVER_JWT_SECRET` | dev-only placeholder |
    /// | `TEAMDOCS_SERVER_DATABASE_URL` | *(none)* |
    /// | `TEAMDOCS_SERVER_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `TEAMDOCS_SERVER_LOG_FILTER` | `info` |
    /// | `TEAMDOCS_SERVER_LOG_FORMAT` | `text` |
    /// | `TEAMDOCS_SERVER_MAX_BODY_BYTES` | 10 MiB |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("TEAMDOCS_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("TEAMDOCS_SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("TEAMDOCS_SERVER_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("TEAMDOCS_SERVER_DATABASE_URL").ok();
        let cors_origins = env("TEAMDOCS_SERVER_CORS_ORIGINS").ok();

        let log_filter = env("TEAMDOCS_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("TEAMDOCS_SERVER_LOG_FORMAT").as_deref() {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let max_body_bytes = env("TEAMDOCS_SERVER_MAX_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|bytes: &usize| *bytes > 0)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            max_body_bytes,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
