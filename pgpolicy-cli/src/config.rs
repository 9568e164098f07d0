use std::fs;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use pgpolicy::StoreConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "policyctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML file holding the connection settings, replaces the flags below.
    #[arg(short = 'c', long)]
    pub config: Option<String>,
    #[command(flatten)]
    pub app: AppConfig,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn app_config(&self) -> Result<AppConfig> {
        match self.config.as_deref() {
            Some(path) => load(path),
            None => Ok(self.app.clone()),
        }
    }
}

#[derive(Args, Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[clap(long, env)]
    #[serde(default)]
    pub database_url: Option<String>,
    #[clap(long, env)]
    #[arg(default_value_t = String::from("public"))]
    #[serde(default = "default_schema")]
    pub schema: String,
    #[clap(long, env)]
    #[arg(default_value_t = String::from("casbin_rule"))]
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[clap(long, env)]
    #[arg(default_value_t = 10)]
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[clap(long, env)]
    #[arg(default_value_t = 0)]
    #[serde(default)]
    pub min_idle: u32,
    #[clap(long, env)]
    #[arg(default_value_t = default_rust_log())]
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace every stored rule with the rules of a policy file
    Import { file: String },
    /// Print the stored rules as policy lines
    Export {
        /// Positional values for `p` rules, an empty value matches anything
        #[arg(long, value_delimiter = ',')]
        policy: Vec<String>,
        /// Positional values for `g` rules, an empty value matches anything
        #[arg(long, value_delimiter = ',')]
        grouping: Vec<String>,
    },
    /// Delete every stored rule
    Clear,
}

fn default_schema() -> String {
    String::from("public")
}

fn default_table_name() -> String {
    String::from("casbin_rule")
}

fn default_max_size() -> u32 {
    10
}

fn default_rust_log() -> String {
    String::from("pgpolicy_cli=info,pgpolicy=info,pgpolicy_storage=info")
}

impl AppConfig {
    pub fn store_config(&self) -> Result<StoreConfig> {
        let database_url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL is not set")?;
        Ok(StoreConfig {
            database_url: database_url.to_owned(),
            schema: self.schema.clone(),
            table_name: self.table_name.clone(),
            max_size: self.max_size,
            min_idle: self.min_idle,
        })
    }
}

pub fn load(cfg: &str) -> Result<AppConfig> {
    let content =
        fs::read_to_string(cfg).context("could not read config file")?;
    toml::from_str(&content).context("could not parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_defaults_fill_missing_keys() {
        let config: AppConfig =
            toml::from_str(r#"database_url = "postgres://localhost/authz""#)
                .unwrap();
        assert_eq!(config.schema, "public");
        assert_eq!(config.table_name, "casbin_rule");
        assert_eq!(config.max_size, 10);
        assert_eq!(config.min_idle, 0);

        let store = config.store_config().unwrap();
        assert_eq!(store.database_url, "postgres://localhost/authz");
        assert_eq!(
            store.table().unwrap().qualified(),
            r#""public"."casbin_rule""#
        );
    }

    #[test]
    fn missing_url_is_reported() {
        let config: AppConfig = toml::from_str(r#"schema = "authz""#).unwrap();
        assert!(config.store_config().is_err());
    }

    #[test]
    fn export_filters_split_on_commas() {
        let cli = Cli::try_parse_from([
            "policyctl",
            "--database-url",
            "postgres://localhost/authz",
            "--table-name",
            "rules",
            "export",
            "--policy",
            "alice,,read",
        ])
        .unwrap();
        assert_eq!(cli.app.table_name, "rules");
        assert_eq!(
            cli.command,
            Command::Export {
                policy: vec![
                    "alice".to_owned(),
                    String::new(),
                    "read".to_owned()
                ],
                grouping: vec![],
            }
        );
    }
}
