//! Configuration validation.

use super::{Config, MAX_READ_AHEAD};
use crate::error::{ExportError, Result};
use crate::postgres::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    let has_url = config.source.url.as_deref().is_some_and(|u| !u.is_empty());
    if !has_url {
        if config.source.host.is_empty() {
            return Err(ExportError::Config(
                "source.host is required when source.url is not set".into(),
            ));
        }
        if config.source.database.is_empty() {
            return Err(ExportError::Config(
                "source.database is required when source.url is not set".into(),
            ));
        }
        if config.source.user.is_empty() {
            return Err(ExportError::Config(
                "source.user is required when source.url is not set".into(),
            ));
        }
    }
    SslMode::parse(&config.source.ssl_mode)?;
    if config.source.max_connections == 0 {
        return Err(ExportError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    // Query validation
    if config.query.sql.trim().is_empty() {
        return Err(ExportError::Config("query.sql is required".into()));
    }
    if config.query.batch_size == 0 {
        return Err(ExportError::Config(
            "query.batch_size must be at least 1".into(),
        ));
    }
    if config.query.batch_size > i32::MAX as usize {
        return Err(ExportError::Config(format!(
            "query.batch_size must not exceed {}",
            i32::MAX
        )));
    }

    // Output validation
    if config.output.path.is_empty() {
        return Err(ExportError::Config("output.path is required".into()));
    }
    if config.output.high_water_mark == 0 {
        return Err(ExportError::Config(
            "output.high_water_mark must be at least 1".into(),
        ));
    }

    // Pipeline validation
    if config.pipeline.key_field.is_empty() {
        return Err(ExportError::Config(
            "pipeline.key_field must not be empty".into(),
        ));
    }
    if config.pipeline.read_ahead > MAX_READ_AHEAD {
        return Err(ExportError::Config(format!(
            "pipeline.read_ahead must be between 0 and {}, got {}",
            MAX_READ_AHEAD, config.pipeline.read_ahead
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputConfig, PipelineConfig, QueryConfig, SourceConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                url: None,
                host: "localhost".to_string(),
                port: 5432,
                database: "postgres".to_string(),
                user: "postgres".to_string(),
                password: "root".to_string(),
                ssl_mode: "disable".to_string(),
                max_connections: 4,
            },
            query: QueryConfig {
                sql: "SELECT * FROM generate_series(0, $1) num".to_string(),
                params: vec![],
                batch_size: 1000,
            },
            output: OutputConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_url_replaces_discrete_fields() {
        let mut config = valid_config();
        config.source.host = String::new();
        config.source.database = String::new();
        config.source.user = String::new();
        assert!(validate(&config).is_err());

        config.source.url = Some("postgres://postgres@localhost/postgres".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.query.batch_size = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_empty_sql() {
        let mut config = valid_config();
        config.query.sql = "   ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.source.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_read_ahead_bound() {
        let mut config = valid_config();
        config.pipeline.read_ahead = MAX_READ_AHEAD;
        assert!(validate(&config).is_ok());

        config.pipeline.read_ahead = MAX_READ_AHEAD + 1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_high_water_mark() {
        let mut config = valid_config();
        config.output.high_water_mark = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_key_field() {
        let mut config = valid_config();
        config.pipeline.key_field = String::new();
        assert!(validate(&config).is_err());
    }
}
