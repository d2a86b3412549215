//! Environment-driven configuration.

use thiserror::Error;

/// A required environment variable is absent.
#[derive(Error, Debug)]
#[error("Missing required environment variable: {0}")]
pub struct ConfigError(pub &'static str);

/// Runtime configuration, read once at startup.
///
/// `KAFKA_BROKERS` and `DATABASE_URL` are required; everything else
/// has a default suitable for local development.
#[derive(Clone, Debug)]
pub struct Config {
    /// Kafka bootstrap servers, comma-separated.
    pub brokers: String,
    /// Topic carrying registration facts.
    pub topic: String,
    /// Consumer group id for the reporting consumer.
    pub consumer_group: String,
    /// Postgres connection string for the read model.
    pub database_url: String,
    /// Cron expression driving the export job (seconds resolution).
    pub export_cron: String,
    /// Directory receiving export artifacts.
    pub export_dir: String,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError(name))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first missing required
    /// variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            brokers: required("KAFKA_BROKERS")?,
            topic: optional("KAFKA_TOPIC", "user-registrations"),
            consumer_group: optional("KAFKA_CONSUMER_GROUP", "reporting-service"),
            database_url: required("DATABASE_URL")?,
            export_cron: optional("EXPORT_CRON", "0 0 0 * * *"),
            export_dir: optional("EXPORT_DIR", "./exports"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_variable_is_named() {
        let err = required("USER_REPORTING_TEST_UNSET_VAR");
        assert!(matches!(
            err,
            Err(ConfigError("USER_REPORTING_TEST_UNSET_VAR"))
        ));
    }

    #[test]
    fn optional_falls_back_to_default() {
        assert_eq!(
            optional("USER_REPORTING_TEST_UNSET_VAR", "fallback"),
            "fallback"
        );
    }
}
