use std::collections::BTreeMap;

/// In-memory rule set of a policy engine, as seen by the adapter.
///
/// Rules are grouped by section (`"p"`, `"g"`) and then by type tag
/// (`"p"`, `"p2"`, `"g"`, ...).
pub trait Model: Send + Sync {
    fn clear_policy(&mut self);
    /// Adds a rule, returns false when the exact rule is already present.
    fn add_policy(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool;
    fn ptypes(&self, sec: &str) -> Vec<String>;
    fn get_policy(&self, sec: &str, ptype: &str) -> Vec<Vec<String>>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryModel {
    sections: BTreeMap<String, BTreeMap<String, Vec<Vec<String>>>>,
}

impl MemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sections
            .values()
            .all(|ptypes| ptypes.values().all(Vec::is_empty))
    }

    /// Every rule rendered as a policy line, sections and types in order.
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for ptypes in self.sections.values() {
            for (ptype, rules) in ptypes.iter() {
                for rule in rules.iter() {
                    let mut line = ptype.clone();
                    for value in rule.iter() {
                        line.push_str(", ");
                        line.push_str(value);
                    }
                    lines.push(line);
                }
            }
        }
        lines
    }
}

impl Model for MemoryModel {
    fn clear_policy(&mut self) {
        self.sections.clear();
    }

    fn add_policy(&mut self, sec: &str, ptype: &str, rule: Vec<String>) -> bool {
        let rules = self
            .sections
            .entry(sec.to_owned())
            .or_default()
            .entry(ptype.to_owned())
            .or_default();
        if rules.contains(&rule) {
            return false;
        }
        rules.push(rule);
        true
    }

    fn ptypes(&self, sec: &str) -> Vec<String> {
        self.sections
            .get(sec)
            .map(|ptypes| ptypes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn get_policy(&self, sec: &str, ptype: &str) -> Vec<Vec<String>> {
        self.sections
            .get(sec)
            .and_then(|ptypes| ptypes.get(ptype))
            .cloned()
            .unwrap_or_default()
    }
}

/// Parses one policy line such as `p, alice, data1, read` into `m`.
/// Blank lines and `#` comments are ignored.
pub fn load_policy_line(line: &str, m: &mut dyn Model) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    let mut tokens = line.split(',').map(|token| token.trim().to_owned());
    let Some(ptype) = tokens.next() else {
        return;
    };
    let Some(sec) = ptype.get(0..1) else {
        return;
    };
    m.add_policy(sec, &ptype, tokens.collect());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_policy_ignores_duplicates() {
        let mut m = MemoryModel::new();
        let rule = vec!["alice".to_owned(), "data1".to_owned()];
        assert!(m.add_policy("p", "p", rule.clone()));
        assert!(!m.add_policy("p", "p", rule));
        assert_eq!(m.get_policy("p", "p").len(), 1);
    }

    #[test]
    fn policy_lines_are_parsed() {
        let mut m = MemoryModel::new();
        for line in [
            "# comment",
            "p, alice, data1, read",
            "",
            "  p2,bob , data2,write ",
            "g, alice, data2_admin",
        ] {
            load_policy_line(line, &mut m);
        }
        assert_eq!(m.ptypes("p"), vec!["p", "p2"]);
        assert_eq!(m.get_policy("p", "p2"), vec![vec!["bob", "data2", "write"]]);
        assert_eq!(m.get_policy("g", "g"), vec![vec!["alice", "data2_admin"]]);
        assert_eq!(
            m.to_lines(),
            vec![
                "g, alice, data2_admin",
                "p, alice, data1, read",
                "p2, bob, data2, write",
            ]
        );
    }

    #[test]
    fn clear_policy_empties_every_section() {
        let mut m = MemoryModel::new();
        load_policy_line("p, alice, data1, read", &mut m);
        assert!(!m.is_empty());
        m.clear_policy();
        assert!(m.is_empty());
        assert!(m.ptypes("p").is_empty());
    }
}
