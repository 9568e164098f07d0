use async_trait::async_trait;
use sqlx::{
    postgres::PgRow, PgPool, Postgres, QueryBuilder, Row, Transaction,
};
use tracing::{debug, info, warn};

use pgpolicy_slo::{errors, errors::WithBacktrace, Result};

use crate::{
    convert::quote,
    model::{TableName, COLUMNS},
    rule::{CasbinRule, Filter, RuleStore, FIELD_COUNT},
};

// 7 binds per row keeps a batch far below the 65535 bind limit of Postgres
const INSERT_BATCH: usize = 1000;

#[derive(Clone, Debug)]
pub struct PgRuleStore {
    pool: PgPool,
    table: TableName,
}

impl PgRuleStore {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self { pool, table }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Closes the underlying pool, waiting for checked out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(errors::connect)
    }
}

/// Rolls `tx` back and hands `err` back to the caller. A failed rollback is
/// only logged, Postgres discards the transaction once the connection is
/// released anyway.
async fn abort(
    tx: Transaction<'static, Postgres>,
    err: WithBacktrace,
) -> WithBacktrace {
    if let Err(rollback_err) = tx.rollback().await {
        warn!("could not roll back transaction: {}", rollback_err);
    }
    err
}

fn storage_error(err: sqlx::Error) -> WithBacktrace {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => errors::connect(err),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => errors::decode(err),
        _ => errors::execute(err),
    }
}

fn column_list() -> String {
    COLUMNS.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

fn create_table_statement(table: &TableName) -> String {
    let columns = COLUMNS
        .iter()
        .map(|c| format!("{} varchar(256) NOT NULL DEFAULT ''", quote(c)))
        .collect::<Vec<_>>()
        .join(",\n    ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.qualified(),
        columns
    )
}

fn create_index_statement(table: &TableName, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        table.index_name(column),
        table.qualified(),
        quote(column)
    )
}

fn select_statement(table: &TableName) -> String {
    format!("SELECT {} FROM {}", column_list(), table.qualified())
}

/// Grouping rules bind `$1..$6`, permission rules bind `$7..$12`.
fn select_filtered_statement(table: &TableName) -> String {
    let mut wheres = String::new();
    for (branch, prefix) in ["g", "p"].iter().enumerate() {
        if branch > 0 {
            wheres.push_str(" OR ");
        }
        wheres.push_str(&format!(r#"("p_type" LIKE '{}%'"#, prefix));
        for (index, column) in COLUMNS[1..].iter().enumerate() {
            wheres.push_str(&format!(
                " AND {} LIKE ${}",
                quote(column),
                branch * FIELD_COUNT + index + 1
            ));
        }
        wheres.push(')');
    }
    format!("{} WHERE {}", select_statement(table), wheres)
}

fn filtered_args(filter: &Filter) -> Vec<String> {
    let mut args = Vec::with_capacity(FIELD_COUNT * 2);
    args.extend(filter.g_patterns());
    args.extend(filter.p_patterns());
    args
}

fn insert_statement(table: &TableName) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        table.qualified(),
        column_list()
    )
}

/// Delete predicate constraining the type and every non-empty field.
fn delete_statement(
    table: &TableName,
    rule: &CasbinRule,
) -> (String, Vec<String>) {
    let mut args = vec![rule.ptype.clone()];
    let mut sql =
        format!(r#"DELETE FROM {} WHERE "p_type" = $1"#, table.qualified());
    for (column, value) in COLUMNS[1..].iter().zip(rule.fields()) {
        if value.is_empty() {
            continue;
        }
        args.push(value.to_owned());
        sql.push_str(&format!(" AND {} = ${}", quote(column), args.len()));
    }
    (sql, args)
}

fn truncate_statement(table: &TableName) -> String {
    format!("TRUNCATE TABLE {}", table.qualified())
}

fn to_rule(row: &PgRow) -> Result<CasbinRule> {
    Ok(CasbinRule {
        ptype: row.try_get("p_type").map_err(errors::decode)?,
        v0: row.try_get("v0").map_err(errors::decode)?,
        v1: row.try_get("v1").map_err(errors::decode)?,
        v2: row.try_get("v2").map_err(errors::decode)?,
        v3: row.try_get("v3").map_err(errors::decode)?,
        v4: row.try_get("v4").map_err(errors::decode)?,
        v5: row.try_get("v5").map_err(errors::decode)?,
    })
}

async fn insert_batches(
    tx: &mut Transaction<'static, Postgres>,
    table: &TableName,
    rules: &[CasbinRule],
) -> Result<()> {
    for chunk in rules.chunks(INSERT_BATCH) {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {} ({}) ",
            table.qualified(),
            column_list()
        ));
        builder.push_values(chunk, |mut b, rule| {
            b.push_bind(rule.ptype.clone())
                .push_bind(rule.v0.clone())
                .push_bind(rule.v1.clone())
                .push_bind(rule.v2.clone())
                .push_bind(rule.v3.clone())
                .push_bind(rule.v4.clone())
                .push_bind(rule.v5.clone());
        });
        builder
            .build()
            .execute(&mut **tx)
            .await
            .map_err(storage_error)?;
    }
    Ok(())
}

async fn delete_in(
    tx: &mut Transaction<'static, Postgres>,
    table: &TableName,
    rule: &CasbinRule,
) -> Result<u64> {
    let (sql, args) = delete_statement(table, rule);
    let mut query = sqlx::query(&sql);
    for arg in args.iter() {
        query = query.bind(arg.as_str());
    }
    let result = query.execute(&mut **tx).await.map_err(storage_error)?;
    Ok(result.rows_affected())
}

#[async_trait]
impl RuleStore for PgRuleStore {
    #[tracing::instrument(skip(self), fields(table = %self.table.qualified()))]
    async fn setup(&self) -> Result<()> {
        let mut tx = self.begin().await?;
        let mut statements = vec![create_table_statement(&self.table)];
        statements.extend(
            COLUMNS
                .iter()
                .map(|column| create_index_statement(&self.table, column)),
        );
        for statement in statements.iter() {
            debug!("{}", statement);
            if let Err(err) = sqlx::query(statement).execute(&mut *tx).await {
                return Err(abort(tx, storage_error(err)).await);
            }
        }
        tx.commit().await.map_err(errors::commit)?;
        info!("rule table is ready");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<CasbinRule>> {
        let rows = sqlx::query(&select_statement(&self.table))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            result.push(to_rule(row)?);
        }
        debug!("loaded {} rules", result.len());
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    async fn load_filtered(&self, filter: &Filter) -> Result<Vec<CasbinRule>> {
        let sql = select_filtered_statement(&self.table);
        let args = filtered_args(filter);
        let mut query = sqlx::query(&sql);
        for arg in args.iter() {
            query = query.bind(arg.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.map_err(storage_error)?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            result.push(to_rule(row)?);
        }
        debug!("loaded {} filtered rules", result.len());
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    async fn insert(&self, rule: &CasbinRule) -> Result<()> {
        let sql = insert_statement(&self.table);
        let mut tx = self.begin().await?;
        if let Err(err) = sqlx::query(&sql)
            .bind(&rule.ptype)
            .bind(&rule.v0)
            .bind(&rule.v1)
            .bind(&rule.v2)
            .bind(&rule.v3)
            .bind(&rule.v4)
            .bind(&rule.v5)
            .execute(&mut *tx)
            .await
        {
            return Err(abort(tx, storage_error(err)).await);
        }
        tx.commit().await.map_err(errors::commit)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, rules), fields(count = rules.len()))]
    async fn insert_many(&self, rules: &[CasbinRule]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }
        let mut tx = self.begin().await?;
        if let Err(err) = insert_batches(&mut tx, &self.table, rules).await {
            return Err(abort(tx, err).await);
        }
        tx.commit().await.map_err(errors::commit)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, rule: &CasbinRule) -> Result<u64> {
        let mut tx = self.begin().await?;
        let affected = match delete_in(&mut tx, &self.table, rule).await {
            Ok(v) => v,
            Err(err) => return Err(abort(tx, err).await),
        };
        tx.commit().await.map_err(errors::commit)?;
        debug!("deleted {} rows", affected);
        Ok(affected)
    }

    #[tracing::instrument(skip(self, rules), fields(count = rules.len()))]
    async fn delete_many(&self, rules: &[CasbinRule]) -> Result<u64> {
        if rules.is_empty() {
            return Ok(0);
        }
        let mut tx = self.begin().await?;
        let mut affected = 0;
        for rule in rules.iter() {
            match delete_in(&mut tx, &self.table, rule).await {
                Ok(v) => affected += v,
                Err(err) => return Err(abort(tx, err).await),
            }
        }
        tx.commit().await.map_err(errors::commit)?;
        debug!("deleted {} rows", affected);
        Ok(affected)
    }

    #[tracing::instrument(skip(self, rules), fields(count = rules.len()))]
    async fn replace_all(&self, rules: &[CasbinRule]) -> Result<()> {
        let mut tx = self.begin().await?;
        if let Err(err) = sqlx::query(&truncate_statement(&self.table))
            .execute(&mut *tx)
            .await
        {
            return Err(abort(tx, storage_error(err)).await);
        }
        if let Err(err) = insert_batches(&mut tx, &self.table, rules).await {
            return Err(abort(tx, err).await);
        }
        tx.commit().await.map_err(errors::commit)?;
        info!("replaced rule table with {} rules", rules.len());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        let mut tx = self.begin().await?;
        if let Err(err) = sqlx::query(&truncate_statement(&self.table))
            .execute(&mut *tx)
            .await
        {
            return Err(abort(tx, storage_error(err)).await);
        }
        tx.commit().await.map_err(errors::commit)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableName {
        TableName::new("authz", "casbin").unwrap()
    }

    #[test]
    fn delete_binds_only_set_fields() {
        let rule = CasbinRule::from_filter("p", 0, &["bob"]).unwrap();
        let (sql, args) = delete_statement(&table(), &rule);
        assert_eq!(
            sql,
            r#"DELETE FROM "authz"."casbin" WHERE "p_type" = $1 AND "v0" = $2"#
        );
        assert_eq!(args, vec!["p", "bob"]);
    }

    #[test]
    fn delete_skips_interior_gaps() {
        let rule = CasbinRule::from_filter("g", 1, &["", "domain1"]).unwrap();
        let (sql, args) = delete_statement(&table(), &rule);
        assert_eq!(
            sql,
            r#"DELETE FROM "authz"."casbin" WHERE "p_type" = $1 AND "v2" = $2"#
        );
        assert_eq!(args, vec!["g", "domain1"]);
    }

    #[test]
    fn delete_full_rule_constrains_every_column() {
        let rule = CasbinRule::from_rule("p", &["a", "b", "c", "d", "e", "f"])
            .unwrap();
        let (sql, args) = delete_statement(&table(), &rule);
        assert!(sql.ends_with(r#""v5" = $7"#));
        assert_eq!(args.len(), 7);
    }

    #[test]
    fn filtered_select_has_two_branches() {
        let sql = select_filtered_statement(&table());
        assert_eq!(
            sql,
            concat!(
                r#"SELECT "p_type", "v0", "v1", "v2", "v3", "v4", "v5" FROM "authz"."casbin" WHERE "#,
                r#"("p_type" LIKE 'g%' AND "v0" LIKE $1 AND "v1" LIKE $2 AND "v2" LIKE $3 AND "v3" LIKE $4 AND "v4" LIKE $5 AND "v5" LIKE $6)"#,
                r#" OR "#,
                r#"("p_type" LIKE 'p%' AND "v0" LIKE $7 AND "v1" LIKE $8 AND "v2" LIKE $9 AND "v3" LIKE $10 AND "v4" LIKE $11 AND "v5" LIKE $12)"#,
            )
        );
    }

    #[test]
    fn filtered_args_put_grouping_first() {
        let filter = Filter::new(vec!["alice"], vec!["", "admin"]);
        let args = filtered_args(&filter);
        assert_eq!(
            args,
            vec![
                "%", "admin", "%", "%", "%", "%", "alice", "%", "%", "%", "%",
                "%"
            ]
        );
    }

    #[test]
    fn bootstrap_statements() {
        let create = create_table_statement(&table());
        assert!(create.starts_with(
            r#"CREATE TABLE IF NOT EXISTS "authz"."casbin" ("#
        ));
        assert_eq!(create.matches("varchar(256) NOT NULL DEFAULT ''").count(), 7);
        assert_eq!(
            create_index_statement(&table(), "v3"),
            r#"CREATE INDEX IF NOT EXISTS "idx_casbin_v3" ON "authz"."casbin" ("v3")"#
        );
    }

    #[test]
    fn insert_binds_seven_values() {
        assert_eq!(
            insert_statement(&table()),
            r#"INSERT INTO "authz"."casbin" ("p_type", "v0", "v1", "v2", "v3", "v4", "v5") VALUES ($1, $2, $3, $4, $5, $6, $7)"#
        );
        assert_eq!(truncate_statement(&table()), r#"TRUNCATE TABLE "authz"."casbin""#);
    }
}
