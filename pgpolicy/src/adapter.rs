use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use pgpolicy_slo::{
    errors::{self, Code, WithBacktrace},
    Result,
};
use pgpolicy_storage::{
    connection_manager, CasbinRule, Filter, PgRuleStore, RuleStore,
    StoreConfig, TableName,
};

use crate::model::Model;

/// Sections whose rules are persisted by [`PolicyAdapter::save_policy`].
const SECTIONS: [&str; 2] = ["p", "g"];

/// Persistence contract the policy engine drives.
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Replaces the rules of `m` with every stored rule.
    async fn load_policy(&mut self, m: &mut dyn Model) -> Result<()>;
    /// Replaces the rules of `m` with the stored rules matching `f`. `None`
    /// loads everything, like [`PolicyAdapter::load_policy`].
    async fn load_filtered_policy(
        &mut self,
        m: &mut dyn Model,
        f: Option<&Filter>,
    ) -> Result<()>;
    /// Overwrites the table with every rule of `m`.
    async fn save_policy(&mut self, m: &dyn Model) -> Result<()>;
    async fn clear_policy(&mut self) -> Result<()>;
    fn is_filtered(&self) -> bool;
    async fn add_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool>;
    async fn add_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool>;
    async fn remove_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool>;
    async fn remove_policies(
        &mut self,
        sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool>;
    async fn remove_filtered_policy(
        &mut self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<bool>;
}

/// Adapter between a policy engine and a [`RuleStore`].
///
/// A successful filtered load marks the adapter as filtered, and saving is
/// refused until the next full load so that rules which were never loaded
/// are not truncated away.
#[derive(Debug)]
pub struct Adapter<S = PgRuleStore> {
    store: S,
    filtered: bool,
}

impl<S: RuleStore> Adapter<S> {
    /// Bootstraps the rule table through `store`. The adapter is only
    /// returned once the table and its indexes exist.
    pub async fn new(store: S) -> Result<Self> {
        store.setup().await?;
        Ok(Self {
            store,
            filtered: false,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl Adapter<PgRuleStore> {
    pub async fn with_pool(pool: PgPool, table: TableName) -> Result<Self> {
        Self::new(PgRuleStore::new(pool, table)).await
    }

    /// Opens a pool of its own from `config`, see [`Adapter::close`].
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let table = config.table()?;
        let pool = connection_manager(
            &config.database_url,
            config.max_size,
            config.min_idle,
        )
        .await
        .map_err(|err| WithBacktrace::from(Code::Connect(err)))?;
        match Self::with_pool(pool.clone(), table).await {
            Ok(adapter) => Ok(adapter),
            Err(err) => {
                pool.close().await;
                Err(err)
            }
        }
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}

fn fill_model(m: &mut dyn Model, rules: Vec<CasbinRule>) {
    m.clear_policy();
    for rule in rules.into_iter() {
        let sec = rule.section();
        if !SECTIONS.contains(&sec) {
            warn!("skip rule of unknown type {:?}", rule.ptype);
            continue;
        }
        m.add_policy(sec, &rule.ptype, rule.values());
    }
}

fn to_rules(ptype: &str, rules: &[Vec<String>]) -> Result<Vec<CasbinRule>> {
    rules
        .iter()
        .map(|rule| CasbinRule::from_rule(ptype, rule.as_slice()))
        .collect()
}

#[async_trait]
impl<S: RuleStore> PolicyAdapter for Adapter<S> {
    async fn load_policy(&mut self, m: &mut dyn Model) -> Result<()> {
        let rules = self.store.load_all().await?;
        debug!("load {} rules", rules.len());
        fill_model(m, rules);
        self.filtered = false;
        Ok(())
    }

    async fn load_filtered_policy(
        &mut self,
        m: &mut dyn Model,
        f: Option<&Filter>,
    ) -> Result<()> {
        let Some(filter) = f else {
            return self.load_policy(m).await;
        };
        filter.validate()?;
        let rules = self.store.load_filtered(filter).await?;
        debug!("load {} filtered rules", rules.len());
        fill_model(m, rules);
        self.filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, m: &dyn Model) -> Result<()> {
        if self.filtered {
            return Err(errors::filtered_save());
        }
        let mut rules = Vec::new();
        for sec in SECTIONS.iter() {
            for ptype in m.ptypes(sec).iter() {
                rules.extend(to_rules(ptype, &m.get_policy(sec, ptype))?);
            }
        }
        debug!("save {} rules", rules.len());
        self.store.replace_all(&rules).await
    }

    async fn clear_policy(&mut self) -> Result<()> {
        self.store.clear().await
    }

    fn is_filtered(&self) -> bool {
        self.filtered
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool> {
        let rule = CasbinRule::from_rule(ptype, rule.as_slice())?;
        self.store.insert(&rule).await?;
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        let rules = to_rules(ptype, &rules)?;
        self.store.insert_many(&rules).await?;
        Ok(true)
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> Result<bool> {
        let rule = CasbinRule::from_rule(ptype, rule.as_slice())?;
        Ok(self.store.delete(&rule).await? > 0)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> Result<bool> {
        let rules = to_rules(ptype, &rules)?;
        Ok(self.store.delete_many(&rules).await? > 0)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> Result<bool> {
        let rule = CasbinRule::from_filter(
            ptype,
            field_index,
            field_values.as_slice(),
        )?;
        Ok(self.store.delete(&rule).await? > 0)
    }
}
