mod rule;

pub use rule::PgRuleStore;
