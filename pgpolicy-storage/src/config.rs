use serde::Deserialize;
use validator::Validate;

use pgpolicy_slo::{errors, Result};

use crate::model::{TableName, DEFAULT_SCHEMA, DEFAULT_TABLE};

/// Settings needed to open a pool and address the rule table.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StoreConfig {
    #[validate(length(min = 1))]
    pub database_url: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[validate(range(min = 1))]
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default)]
    pub min_idle: u32,
}

fn default_schema() -> String {
    String::from(DEFAULT_SCHEMA)
}

fn default_table_name() -> String {
    String::from(DEFAULT_TABLE)
}

fn default_max_size() -> u32 {
    10
}

impl StoreConfig {
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_owned(),
            schema: default_schema(),
            table_name: default_table_name(),
            max_size: default_max_size(),
            min_idle: 0,
        }
    }

    pub fn table(&self) -> Result<TableName> {
        self.validate().map_err(errors::validates)?;
        TableName::new(&self.schema, &self.table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = StoreConfig::new("postgres://localhost/authz");
        let table = config.table().unwrap();
        assert_eq!(table.schema(), "public");
        assert_eq!(table.table(), "casbin_rule");
        assert_eq!(config.max_size, 10);
    }

    #[test]
    fn empty_url_is_rejected() {
        let config = StoreConfig::new("");
        assert!(config.table().is_err());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = StoreConfig {
            max_size: 0,
            ..StoreConfig::new("postgres://localhost/authz")
        };
        assert!(config.table().is_err());
    }
}
