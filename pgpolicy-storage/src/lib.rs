mod config;
pub mod convert;
mod model;
mod pool;
pub mod postgres;
pub mod rule;

pub use config::StoreConfig;
pub use model::{
    check_identifier, TableName, COLUMNS, DEFAULT_SCHEMA, DEFAULT_TABLE,
};
pub use pool::connection_manager;
pub use postgres::PgRuleStore;
pub use rule::{CasbinRule, Filter, MockRuleStore, RuleStore, FIELD_COUNT};
