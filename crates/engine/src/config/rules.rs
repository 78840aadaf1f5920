use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One generation of loaded rules. Reload builds a whole new `RuleSet` and
/// swaps it in; a live set is never mutated.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub generation: u64,
    pub rules: Vec<Arc<Rule>>,
    pub inert: Vec<InertRule>,
}

/// A rule that failed to load. Kept around so the status surface can report
/// the configuration error instead of silently dropping the rule.
#[derive(Debug, Clone, Serialize)]
pub struct InertRule {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    pub trigger: TriggerSpec,
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub limits: Limits,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub key: FilterKey,
    pub value: String,
    #[serde(default, rename = "match")]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterKey {
    ProcessId,
    ProcessName,
    CommandLine,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    Exact,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TriggerSpec {
    Startup,
    CounterThreshold {
        provider: String,
        counter: String,
        comparator: Comparator,
        value: f64,
    },
    RequestCount {
        window_ms: i64,
        threshold: u64,
    },
    RequestDuration {
        window_ms: i64,
        percentile: f64,
        threshold_ms: f64,
    },
    ResponseStatus {
        status_min: u16,
        status_max: u16,
        window_ms: i64,
        threshold: u64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Comparator {
    #[serde(rename = ">", alias = "GreaterThan")]
    GreaterThan,
    #[serde(rename = "<", alias = "LessThan")]
    LessThan,
    #[serde(rename = ">=", alias = "GreaterOrEqual")]
    GreaterOrEqual,
    #[serde(rename = "<=", alias = "LessOrEqual")]
    LessOrEqual,
    #[serde(rename = "==", alias = "Equal")]
    Equal,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ActionSpec {
    CollectDump {
        #[serde(default)]
        egress: Option<String>,
    },
    CollectTrace {
        #[serde(default = "default_trace_duration_ms")]
        duration_ms: u64,
        #[serde(default)]
        egress: Option<String>,
    },
    CollectMetrics {
        #[serde(default)]
        egress: Option<String>,
    },
    Execute {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl ActionSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CollectDump { .. } => "collect_dump",
            Self::CollectTrace { .. } => "collect_trace",
            Self::CollectMetrics { .. } => "collect_metrics",
            Self::Execute { .. } => "execute",
        }
    }

    pub fn produces_artifact(&self) -> bool {
        !matches!(self, Self::Execute { .. })
    }

    pub fn egress(&self) -> Option<&str> {
        match self {
            Self::CollectDump { egress }
            | Self::CollectTrace { egress, .. }
            | Self::CollectMetrics { egress } => egress.as_deref(),
            Self::Execute { .. } => None,
        }
    }
}

fn default_trace_duration_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Limits {
    #[serde(default = "default_action_count")]
    pub action_count: u32,
    #[serde(default)]
    pub action_count_window_ms: Option<i64>,
    #[serde(default)]
    pub rule_duration_ms: Option<i64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            action_count: default_action_count(),
            action_count_window_ms: None,
            rule_duration_ms: None,
        }
    }
}

fn default_action_count() -> u32 {
    1
}

/// The whole rules document was unreadable. Individual bad rules never raise
/// this; they load as inert instead.
#[derive(Debug)]
pub enum RulesDocError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
}

impl std::fmt::Display for RulesDocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Parse(e) => write!(f, "parse: {e}"),
        }
    }
}

impl std::error::Error for RulesDocError {}

impl From<std::io::Error> for RulesDocError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for RulesDocError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}

#[derive(Deserialize)]
struct RulesDoc {
    rules: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize)]
struct RuleBody {
    #[serde(default)]
    filters: Vec<Filter>,
    trigger: TriggerSpec,
    actions: Vec<ActionSpec>,
    #[serde(default)]
    limits: Limits,
}

impl RuleSet {
    pub fn parse(
        generation: u64,
        doc: &str,
        egress_names: &HashSet<String>,
    ) -> Result<Self, RulesDocError> {
        let (rules, inert) = parse_rules(doc, egress_names)?;
        Ok(Self {
            generation,
            rules,
            inert,
        })
    }

    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            rules: Vec::new(),
            inert: Vec::new(),
        }
    }
}

/// Parses a rules document. Each rule parses and validates independently so
/// one malformed rule (unknown trigger/action variant, unknown filter key,
/// missing egress) is reported inert without poisoning the rest.
pub fn parse_rules(
    doc: &str,
    egress_names: &HashSet<String>,
) -> Result<(Vec<Arc<Rule>>, Vec<InertRule>), RulesDocError> {
    let doc: RulesDoc = serde_yaml::from_str(doc)?;

    let mut rules = Vec::new();
    let mut inert = Vec::new();

    for (name, body) in doc.rules {
        match serde_yaml::from_value::<RuleBody>(body) {
            Ok(body) => {
                let rule = Rule {
                    name: name.clone(),
                    filters: body.filters,
                    trigger: body.trigger,
                    actions: body.actions,
                    limits: body.limits,
                };
                match validate_rule(&rule, egress_names) {
                    Ok(()) => rules.push(Arc::new(rule)),
                    Err(error) => {
                        tracing::warn!(rule = %name, %error, "rule loaded inert");
                        inert.push(InertRule { name, error });
                    }
                }
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(rule = %name, %error, "rule loaded inert");
                inert.push(InertRule { name, error });
            }
        }
    }

    Ok((rules, inert))
}

fn validate_rule(rule: &Rule, egress_names: &HashSet<String>) -> Result<(), String> {
    if rule.actions.is_empty() {
        return Err("rule has no actions".into());
    }

    match &rule.trigger {
        TriggerSpec::Startup | TriggerSpec::CounterThreshold { .. } => {}
        TriggerSpec::RequestCount { window_ms, threshold } => {
            if *window_ms <= 0 {
                return Err("request_count window_ms must be > 0".into());
            }
            if *threshold == 0 {
                return Err("request_count threshold must be > 0".into());
            }
        }
        TriggerSpec::RequestDuration {
            window_ms,
            percentile,
            ..
        } => {
            if *window_ms <= 0 {
                return Err("request_duration window_ms must be > 0".into());
            }
            if !(*percentile > 0.0 && *percentile <= 100.0) {
                return Err("request_duration percentile must be in (0, 100]".into());
            }
        }
        TriggerSpec::ResponseStatus {
            status_min,
            status_max,
            window_ms,
            threshold,
        } => {
            if status_min > status_max {
                return Err("response_status status_min must be <= status_max".into());
            }
            if *window_ms <= 0 {
                return Err("response_status window_ms must be > 0".into());
            }
            if *threshold == 0 {
                return Err("response_status threshold must be > 0".into());
            }
        }
    }

    for action in &rule.actions {
        if action.produces_artifact() {
            match action.egress() {
                None => {
                    return Err(format!(
                        "action {} produces an artifact but names no egress sink",
                        action.name()
                    ));
                }
                Some(egress) if !egress_names.contains(egress) => {
                    return Err(format!(
                        "action {} names unknown egress sink '{egress}'",
                        action.name()
                    ));
                }
                Some(_) => {}
            }
        }
    }

    if rule.limits.action_count == 0 {
        return Err("limits.action_count must be >= 1".into());
    }
    if matches!(rule.limits.action_count_window_ms, Some(w) if w <= 0) {
        return Err("limits.action_count_window_ms must be > 0".into());
    }
    if matches!(rule.limits.rule_duration_ms, Some(d) if d <= 0) {
        return Err("limits.rule_duration_ms must be > 0".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn egress_names() -> HashSet<String> {
        ["artifacts".to_string()].into_iter().collect()
    }

    #[test]
    fn full_rule_parses() {
        let doc = r#"
rules:
  high-heap:
    filters:
      - key: ProcessName
        value: worker
        match: Exact
    trigger:
      type: CounterThreshold
      provider: runtime
      counter: heap
      comparator: ">"
      value: 10
    actions:
      - type: CollectDump
        egress: artifacts
    limits:
      action_count: 2
      action_count_window_ms: 3600000
"#;
        let (rules, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert!(inert.is_empty());
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.name, "high-heap");
        assert_eq!(rule.filters.len(), 1);
        assert_eq!(rule.filters[0].match_type, MatchType::Exact);
        assert_eq!(rule.limits.action_count, 2);
        match &rule.trigger {
            TriggerSpec::CounterThreshold {
                comparator, value, ..
            } => {
                assert_eq!(*comparator, Comparator::GreaterThan);
                assert_eq!(*value, 10.0);
            }
            other => panic!("unexpected trigger: {other:?}"),
        }
    }

    #[test]
    fn unknown_trigger_variant_is_inert_not_fatal() {
        let doc = r#"
rules:
  bad:
    trigger:
      type: MoonPhase
    actions:
      - type: CollectDump
        egress: artifacts
  good:
    trigger:
      type: Startup
    actions:
      - type: Execute
        program: /bin/true
"#;
        let (rules, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "good");
        assert_eq!(inert.len(), 1);
        assert_eq!(inert[0].name, "bad");
    }

    #[test]
    fn unknown_filter_key_is_inert() {
        let doc = r#"
rules:
  bad:
    filters:
      - key: StarSign
        value: aries
    trigger:
      type: Startup
    actions:
      - type: Execute
        program: /bin/true
"#;
        let (rules, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert!(rules.is_empty());
        assert_eq!(inert.len(), 1);
    }

    #[test]
    fn artifact_action_without_egress_is_inert() {
        let doc = r#"
rules:
  no-sink:
    trigger:
      type: Startup
    actions:
      - type: CollectDump
"#;
        let (rules, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert!(rules.is_empty());
        assert!(inert[0].error.contains("egress"));
    }

    #[test]
    fn unknown_egress_name_is_inert() {
        let doc = r#"
rules:
  wrong-sink:
    trigger:
      type: Startup
    actions:
      - type: CollectDump
        egress: nowhere
"#;
        let (_, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert!(inert[0].error.contains("nowhere"));
    }

    #[test]
    fn execute_action_needs_no_egress() {
        let doc = r#"
rules:
  restart-marker:
    trigger:
      type: Startup
    actions:
      - type: Execute
        program: /usr/bin/logger
        args: ["worker restarted"]
"#;
        let (rules, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert!(inert.is_empty());
        assert_eq!(rules[0].actions[0].name(), "execute");
    }

    #[test]
    fn comparator_symbols_and_names_both_parse() {
        for (token, expected) in [
            ("\">\"", Comparator::GreaterThan),
            ("\"<=\"", Comparator::LessOrEqual),
            ("GreaterOrEqual", Comparator::GreaterOrEqual),
            ("\"==\"", Comparator::Equal),
        ] {
            let yaml = format!(
                "type: CounterThreshold\nprovider: p\ncounter: c\ncomparator: {token}\nvalue: 1\n"
            );
            let trigger: TriggerSpec = serde_yaml::from_str(&yaml).unwrap();
            match trigger {
                TriggerSpec::CounterThreshold { comparator, .. } => {
                    assert_eq!(comparator, expected)
                }
                other => panic!("unexpected trigger: {other:?}"),
            }
        }
    }

    #[test]
    fn comparator_semantics() {
        assert!(Comparator::GreaterThan.holds(10.0, 5.0));
        assert!(!Comparator::GreaterThan.holds(5.0, 5.0));
        assert!(Comparator::GreaterOrEqual.holds(5.0, 5.0));
        assert!(Comparator::LessThan.holds(1.0, 5.0));
        assert!(Comparator::LessOrEqual.holds(5.0, 5.0));
        assert!(Comparator::Equal.holds(5.0, 5.0));
        assert!(!Comparator::Equal.holds(5.1, 5.0));
    }

    #[test]
    fn limits_default_to_single_lifetime_action() {
        let limits = Limits::default();
        assert_eq!(limits.action_count, 1);
        assert!(limits.action_count_window_ms.is_none());
        assert!(limits.rule_duration_ms.is_none());
    }

    #[test]
    fn zero_action_count_is_inert() {
        let doc = r#"
rules:
  zero:
    trigger:
      type: Startup
    actions:
      - type: Execute
        program: /bin/true
    limits:
      action_count: 0
"#;
        let (_, inert) = parse_rules(doc, &egress_names()).unwrap();
        assert!(inert[0].error.contains("action_count"));
    }

    #[test]
    fn non_map_rules_document_is_fatal() {
        // The whole document being unreadable is not salvageable per rule.
        assert!(parse_rules("rules:\n  - a\n  - b\n", &egress_names()).is_err());
    }
}
