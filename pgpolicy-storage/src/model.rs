use validator::{Validate, ValidationError};

use pgpolicy_slo::{errors, Result};

use crate::convert::{qualified, quote};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_TABLE: &str = "casbin_rule";

/// Column names of the rule table, in row order.
pub const COLUMNS: [&str; 7] = ["p_type", "v0", "v1", "v2", "v3", "v4", "v5"];

/// Schema-qualified identity of the rule table.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct TableName {
    #[validate(
        length(min = 1, max = 63),
        custom(function = "check_identifier")
    )]
    schema: String,
    // leaves room for the `idx_<table>_p_type` index names within 63 bytes
    #[validate(
        length(min = 1, max = 52),
        custom(function = "check_identifier")
    )]
    table: String,
}

impl TableName {
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        let table_name = Self {
            schema: schema.to_owned(),
            table: table.to_owned(),
        };
        table_name.validate().map_err(errors::validates)?;
        Ok(table_name)
    }

    pub fn with_table(table: &str) -> Result<Self> {
        Self::new(DEFAULT_SCHEMA, table)
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// `"schema"."table"`, ready to be placed into SQL text.
    pub fn qualified(&self) -> String {
        qualified(&self.schema, &self.table)
    }

    /// Quoted name of the single-column index on `column`.
    pub fn index_name(&self, column: &str) -> String {
        quote(&format!("idx_{}_{}", self.table, column))
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_owned(),
            table: DEFAULT_TABLE.to_owned(),
        }
    }
}

pub fn check_identifier(value: &str) -> Result<(), ValidationError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(ValidationError::new("identifier"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_renders_quoted() {
        let table_name = TableName::new("authz", "casbin").unwrap();
        assert_eq!(table_name.qualified(), r#""authz"."casbin""#);
        assert_eq!(table_name.index_name("p_type"), r#""idx_casbin_p_type""#);
        assert_eq!(
            TableName::default().qualified(),
            r#""public"."casbin_rule""#
        );
    }

    #[test]
    fn table_name_rejects_bad_identifiers() {
        assert!(TableName::new("public", "").is_err());
        assert!(TableName::new("public", "rules; DROP TABLE x").is_err());
        assert!(TableName::new("9schema", "rules").is_err());
        assert!(TableName::with_table(&"t".repeat(53)).is_err());
        assert!(TableName::with_table(&"t".repeat(52)).is_ok());
        assert!(TableName::with_table("casbin_rule_2").is_ok());
    }
}
