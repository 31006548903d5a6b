use anyhow::{bail, Context};

pub const DEFAULT_TABLE_PREFIX: &str = "mdl_";

/// The site-level course, used when no course is requested.
pub const SITE_COURSE_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub table_prefix: String,
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to the platform's Postgres instance")?;
        let prefix = std::env::var("MOODLE_TABLE_PREFIX").ok();
        Self::new(url, prefix)
    }

    pub fn new(url: String, table_prefix: Option<String>) -> anyhow::Result<Self> {
        let table_prefix = table_prefix.unwrap_or_else(|| DEFAULT_TABLE_PREFIX.to_string());

        if table_prefix.is_empty() {
            bail!("MOODLE_TABLE_PREFIX must not be empty");
        }
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            bail!("MOODLE_TABLE_PREFIX may only contain lowercase letters, digits and '_'");
        }

        Ok(Self { url, table_prefix })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_defaults_to_mdl() {
        let config = DatabaseConfig::new("postgres://localhost/moodle".to_string(), None).unwrap();
        assert_eq!(config.table_prefix, "mdl_");
    }

    #[test]
    fn custom_prefix_is_kept() {
        let config = DatabaseConfig::new(
            "postgres://localhost/moodle".to_string(),
            Some("m2_".to_string()),
        )
        .unwrap();
        assert_eq!(config.table_prefix, "m2_");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let err = DatabaseConfig::new(
            "postgres://localhost/moodle".to_string(),
            Some(String::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn prefix_with_punctuation_is_rejected() {
        let result = DatabaseConfig::new(
            "postgres://localhost/moodle".to_string(),
            Some("mdl;".to_string()),
        );
        assert!(result.is_err());
    }
}
