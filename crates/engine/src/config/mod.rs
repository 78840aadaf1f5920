mod loader;
mod rules;
mod schema;

pub use loader::{load_from_file, load_from_str, LoadError};
pub use rules::{
    parse_rules, ActionSpec, Comparator, Filter, FilterKey, InertRule, Limits, MatchType, Rule,
    RuleSet, RulesDocError, TriggerSpec,
};
pub use schema::{ChannelMode, EgressConfig, EngineConfig};
