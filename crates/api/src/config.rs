//! Configuration for the API server.

/// API server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, e.g. `0.0.0.0:8080`
    pub bind_address: String,
    /// Database URL (pooler-compatible, used for regular queries)
    pub database_url: String,
    /// Direct database URL for migrations (bypasses PgBouncer)
    pub database_direct_url: Option<String>,
    /// Secret used to verify JWTs issued by the auth service
    pub jwt_secret: String,
    /// Comma-separated CORS origins
    pub allowed_origins: Vec<String>,
}

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let jwt_secret =
            std::env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let database_direct_url = std::env::var("DATABASE_DIRECT_URL").ok();

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            database_url,
            database_direct_url,
            jwt_secret,
            allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "DATABASE_DIRECT_URL",
            "JWT_SECRET",
            "BIND_ADDRESS",
            "ALLOWED_ORIGINS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn missing_database_url_fails() {
        clear_env();
        std::env::set_var("JWT_SECRET", "s");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    #[serial]
    fn missing_jwt_secret_fails() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ajar");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_optional_vars_absent() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ajar");
        std::env::set_var("JWT_SECRET", "s");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.database_direct_url, None);
        assert_eq!(config.allowed_origins.len(), 2);
    }

    #[test]
    #[serial]
    fn allowed_origins_are_split_and_trimmed() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/ajar");
        std::env::set_var("JWT_SECRET", "s");
        std::env::set_var(
            "ALLOWED_ORIGINS",
            "https://app.ajar.id , https://admin.ajar.id,",
        );

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.allowed_origins,
            vec!["https://app.ajar.id", "https://admin.ajar.id"]
        );
    }
}
