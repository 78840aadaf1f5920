use vigil_common::identity::TargetProcess;

use crate::config::{Filter, FilterKey, MatchType, Rule};

/// `Exact` is case-sensitive full-string equality; `Contains` is substring
/// presence. Process ids compare against their decimal rendering.
pub fn filter_matches(filter: &Filter, process: &TargetProcess) -> bool {
    let pid_string;
    let attribute: &str = match filter.key {
        FilterKey::ProcessId => {
            pid_string = process.pid.to_string();
            &pid_string
        }
        FilterKey::ProcessName => &process.process_name,
        FilterKey::CommandLine => &process.command_line,
    };

    match filter.match_type {
        MatchType::Exact => attribute == filter.value,
        MatchType::Contains => attribute.contains(&filter.value),
    }
}

/// All filters must match; an empty filter set matches every process.
pub fn rule_matches(rule: &Rule, process: &TargetProcess) -> bool {
    rule.filters.iter().all(|f| filter_matches(f, process))
}
