use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

use pgpolicy_slo::{errors, Result};

/// Number of positional value columns (`v0`..`v5`) a rule row carries.
pub const FIELD_COUNT: usize = 6;

/// One row of policy data.
///
/// Absent positional fields are stored as the empty string, an empty field is
/// treated as "unset" when the rule is used as a delete predicate.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, Deserialize, Serialize,
)]
pub struct CasbinRule {
    pub ptype: String,
    pub v0: String,
    pub v1: String,
    pub v2: String,
    pub v3: String,
    pub v4: String,
    pub v5: String,
}

impl CasbinRule {
    /// Builds a rule from the type tag and the ordered rule fields handed over
    /// by the policy engine. More than six fields are rejected.
    pub fn from_rule<S: AsRef<str>>(ptype: &str, rule: &[S]) -> Result<Self> {
        if rule.len() > FIELD_COUNT {
            return Err(errors::invalid_rule(&format!(
                "rule of type {} has {} fields, at most {} are supported",
                ptype,
                rule.len(),
                FIELD_COUNT
            )));
        }
        let mut casbin_rule = Self {
            ptype: ptype.to_owned(),
            ..Default::default()
        };
        for (index, value) in rule.iter().enumerate() {
            *casbin_rule.field_mut(index) = value.as_ref().to_owned();
        }
        Ok(casbin_rule)
    }

    /// Builds a sparse rule used as a "remove matching" predicate: `values[i]`
    /// lands on position `field_index + i`, every other position stays empty.
    pub fn from_filter<S: AsRef<str>>(
        ptype: &str,
        field_index: usize,
        values: &[S],
    ) -> Result<Self> {
        if field_index >= FIELD_COUNT
            || field_index + values.len() > FIELD_COUNT
        {
            return Err(errors::invalid_rule(&format!(
                "field index {} with {} values exceeds the {} value columns",
                field_index,
                values.len(),
                FIELD_COUNT
            )));
        }
        let mut casbin_rule = Self {
            ptype: ptype.to_owned(),
            ..Default::default()
        };
        for (offset, value) in values.iter().enumerate() {
            *casbin_rule.field_mut(field_index + offset) =
                value.as_ref().to_owned();
        }
        Ok(casbin_rule)
    }

    pub fn fields(&self) -> [&str; FIELD_COUNT] {
        [
            self.v0.as_str(),
            self.v1.as_str(),
            self.v2.as_str(),
            self.v3.as_str(),
            self.v4.as_str(),
            self.v5.as_str(),
        ]
    }

    fn field_mut(&mut self, index: usize) -> &mut String {
        match index {
            0 => &mut self.v0,
            1 => &mut self.v1,
            2 => &mut self.v2,
            3 => &mut self.v3,
            4 => &mut self.v4,
            _ => &mut self.v5,
        }
    }

    /// Section of the rule, the first character of its type tag.
    pub fn section(&self) -> &str {
        self.ptype.get(0..1).unwrap_or_default()
    }

    // number of positional fields up to and including the last non-empty one
    fn len(&self) -> usize {
        self.fields()
            .iter()
            .rposition(|v| !v.is_empty())
            .map_or(0, |index| index + 1)
    }

    /// The positional values without the type tag. Empty fields between two
    /// set fields are kept, trailing empty fields are dropped.
    pub fn values(&self) -> Vec<String> {
        self.fields()[..self.len()]
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    /// `[ptype, v0, v1, ...]` up to the last set field.
    pub fn to_field_list(&self) -> Vec<String> {
        let mut list = Vec::with_capacity(self.len() + 1);
        list.push(self.ptype.clone());
        list.extend(self.values());
        list
    }

    /// Renders the rule as a policy line, e.g. `p, alice, data1, read`.
    pub fn to_line(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&self.ptype);
        for value in self.fields()[..self.len()].iter() {
            buf.push_str(", ");
            buf.push_str(value);
        }
        buf
    }
}

/// Partial-match query over stored rules. Empty entries are wildcards.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Filter {
    #[serde(default)]
    pub p: Vec<String>,
    #[serde(default)]
    pub g: Vec<String>,
}

impl Filter {
    pub fn new<S: Into<String>>(p: Vec<S>, g: Vec<S>) -> Self {
        Self {
            p: p.into_iter().map(Into::into).collect(),
            g: g.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.p.len() > FIELD_COUNT {
            return Err(errors::invalid_filter(&format!(
                "p has {} positions, at most {} are supported",
                self.p.len(),
                FIELD_COUNT
            )));
        }
        if self.g.len() > FIELD_COUNT {
            return Err(errors::invalid_filter(&format!(
                "g has {} positions, at most {} are supported",
                self.g.len(),
                FIELD_COUNT
            )));
        }
        Ok(())
    }

    /// LIKE patterns for the permission rules, `%` where the filter is empty.
    pub fn p_patterns(&self) -> [String; FIELD_COUNT] {
        patterns(&self.p)
    }

    /// LIKE patterns for the grouping rules, `%` where the filter is empty.
    pub fn g_patterns(&self) -> [String; FIELD_COUNT] {
        patterns(&self.g)
    }
}

fn patterns(values: &[String]) -> [String; FIELD_COUNT] {
    std::array::from_fn(|index| match values.get(index) {
        Some(v) if !v.is_empty() => v.clone(),
        _ => "%".to_owned(),
    })
}

#[automock]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Creates the table and its column indexes when they do not exist yet.
    async fn setup(&self) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<CasbinRule>>;
    async fn load_filtered(&self, filter: &Filter) -> Result<Vec<CasbinRule>>;
    async fn insert(&self, rule: &CasbinRule) -> Result<()>;
    async fn insert_many(&self, rules: &[CasbinRule]) -> Result<()>;
    /// Deletes every row matching the type and the non-empty fields of
    /// `rule`, returning the number of removed rows.
    async fn delete(&self, rule: &CasbinRule) -> Result<u64>;
    async fn delete_many(&self, rules: &[CasbinRule]) -> Result<u64>;
    /// Truncates the table and stores `rules` in one transaction.
    async fn replace_all(&self, rules: &[CasbinRule]) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}
