mod adapter;
mod model;

pub use adapter::{Adapter, PolicyAdapter};
pub use model::{load_policy_line, MemoryModel, Model};

pub mod storage {
    pub use pgpolicy_storage::*;
}

pub use pgpolicy_slo::*;
pub use pgpolicy_storage::{
    CasbinRule, Filter, PgRuleStore, RuleStore, StoreConfig, TableName,
};
