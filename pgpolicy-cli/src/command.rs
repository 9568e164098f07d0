use std::{fs, io::Write};

use anyhow::{Context, Result};
use tracing::{info, warn};

use pgpolicy::{load_policy_line, Filter, MemoryModel, PolicyAdapter};

use crate::config::Command;

/// Runs `command` against `adapter`, exported lines go to `out`.
pub async fn execute<A, W>(
    adapter: &mut A,
    command: &Command,
    out: &mut W,
) -> Result<()>
where
    A: PolicyAdapter + ?Sized,
    W: Write + ?Sized,
{
    match command {
        Command::Import { file } => {
            let content = fs::read_to_string(file)
                .with_context(|| format!("could not read policy file {file}"))?;
            import(adapter, &content).await
        }
        Command::Export { policy, grouping } => {
            export(adapter, policy, grouping, out).await
        }
        Command::Clear => {
            adapter
                .clear_policy()
                .await
                .context("could not clear the rule table")?;
            info!("rule table cleared");
            Ok(())
        }
    }
}

async fn import<A>(adapter: &mut A, content: &str) -> Result<()>
where
    A: PolicyAdapter + ?Sized,
{
    let mut m = MemoryModel::new();
    for line in content.lines() {
        load_policy_line(line, &mut m);
    }
    if m.is_empty() {
        warn!("policy file holds no rules, the table will be emptied");
    }
    adapter
        .save_policy(&m)
        .await
        .context("could not save the imported rules")?;
    info!("imported {} rules", m.to_lines().len());
    Ok(())
}

async fn export<A, W>(
    adapter: &mut A,
    policy: &[String],
    grouping: &[String],
    out: &mut W,
) -> Result<()>
where
    A: PolicyAdapter + ?Sized,
    W: Write + ?Sized,
{
    let mut m = MemoryModel::new();
    let filter = if policy.is_empty() && grouping.is_empty() {
        None
    } else {
        Some(Filter::new(policy.to_vec(), grouping.to_vec()))
    };
    adapter
        .load_filtered_policy(&mut m, filter.as_ref())
        .await
        .context("could not load the stored rules")?;
    for line in m.to_lines() {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pgpolicy::{storage::MockRuleStore, Adapter, CasbinRule};

    use super::*;

    fn rule(ptype: &str, values: &[&str]) -> CasbinRule {
        CasbinRule::from_rule(ptype, values).unwrap()
    }

    async fn adapter(mut store: MockRuleStore) -> Adapter<MockRuleStore> {
        store.expect_setup().times(1).returning(|| Ok(()));
        Adapter::new(store).await.unwrap()
    }

    #[tokio::test]
    async fn import_replaces_stored_rules() {
        let mut store = MockRuleStore::new();
        store
            .expect_replace_all()
            .withf(|rules| {
                rules.len() == 2
                    && rules.contains(&rule("p", &["alice", "data1", "read"]))
                    && rules.contains(&rule("g", &["alice", "admin"]))
            })
            .times(1)
            .returning(|_| Ok(()));
        let mut adapter = adapter(store).await;

        import(
            &mut adapter,
            "# rules\np, alice, data1, read\n\ng, alice, admin\n",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn export_without_values_loads_everything() {
        let mut store = MockRuleStore::new();
        store.expect_load_filtered().never();
        store.expect_load_all().times(1).returning(|| {
            Ok(vec![
                rule("p", &["alice", "data1", "read"]),
                rule("g", &["alice", "admin"]),
            ])
        });
        let mut adapter = adapter(store).await;

        let mut out = Vec::new();
        execute(
            &mut adapter,
            &Command::Export {
                policy: vec![],
                grouping: vec![],
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "g, alice, admin\np, alice, data1, read\n"
        );
    }

    #[tokio::test]
    async fn export_with_values_is_filtered() {
        let mut store = MockRuleStore::new();
        store.expect_load_all().never();
        store
            .expect_load_filtered()
            .withf(|f| f.p == vec!["alice".to_owned()] && f.g.is_empty())
            .times(1)
            .returning(|_| Ok(vec![rule("p", &["alice", "data1", "read"])]));
        let mut adapter = adapter(store).await;

        let mut out = Vec::new();
        execute(
            &mut adapter,
            &Command::Export {
                policy: vec!["alice".to_owned()],
                grouping: vec![],
            },
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "p, alice, data1, read\n");
        assert!(adapter.is_filtered());
    }

    #[tokio::test]
    async fn missing_policy_file_is_reported() {
        let mut store = MockRuleStore::new();
        store.expect_replace_all().never();
        let mut adapter = adapter(store).await;

        let mut out = Vec::new();
        let result = execute(
            &mut adapter,
            &Command::Import {
                file: "/nonexistent/policy.csv".to_owned(),
            },
            &mut out,
        )
        .await;
        assert!(result.is_err());
    }
}
