use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::runtime::MethodInfo;

/// Tunable numerics of the search. The defaults are tuned so that the
/// common scenarios (one or two locals, depth up to 3) finish quickly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Candidates per oracle probe.
    pub batch_size: usize,
    /// Wall-clock budget for one live call.
    pub call_budget_ms: u64,
    /// Argument cross-product threshold at depth 0; grows tenfold per level.
    pub arg_combination_base: usize,
    /// Members used less than this fraction of the corpus average are rare.
    pub rare_fraction: f64,
    /// Cap on syntactic variants produced per accepted expression.
    pub max_expansions: usize,
    pub seed: u64,
    pub pure_shortcut: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            batch_size: 64,
            call_budget_ms: 250,
            arg_combination_base: 25,
            rare_fraction: 0.05,
            max_expansions: 512,
            seed: 0x5eed,
            pure_shortcut: true,
        }
    }
}

impl Policy {
    pub fn call_budget(&self) -> Duration {
        Duration::from_millis(self.call_budget_ms)
    }

    /// Maximum argument combinations tried for a call built at `depth`.
    pub fn arg_threshold(&self, depth: usize, rare: bool) -> usize {
        let threshold = (0..depth).fold(self.arg_combination_base, |acc, _| acc.saturating_mul(10));

        if rare {
            threshold / 2
        } else {
            threshold
        }
    }
}

/// Session configuration. Built once and owned by the search invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub search_constructors: bool,
    pub search_operators: bool,
    /// Variable the result will be assigned to. Never offered as its own
    /// value.
    pub assigned_variable: Option<String>,
    /// `Type.member` keys that cost one extra level.
    pub blacklist: Vec<String>,
    /// Native members (`Type.member`) that may be entered.
    pub vetted_natives: Vec<String>,
    /// Types whose static members are searchable.
    pub static_types: Vec<String>,
    pub policy: Policy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_constructors: false,
            search_operators: true,
            assigned_variable: None,
            blacklist: Vec::new(),
            vetted_natives: Vec::new(),
            static_types: vec!["Math".into(), "Integer".into()],
            policy: Policy::default(),
        }
    }
}

impl SearchConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, SearchError> {
        let err = |message: String| SearchError::Config {
            path: path.to_owned(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| err(e.to_string()))
    }

    pub fn is_blacklisted(&self, member: &MethodInfo) -> bool {
        self.blacklist.iter().any(|b| *b == member.qualified())
    }

    pub fn is_blacklisted_field(&self, declaring: &str, field: &str) -> bool {
        self.blacklist.iter().any(|b| b.split_once('.') == Some((declaring, field)))
    }

    pub fn is_vetted(&self, member: &MethodInfo) -> bool {
        self.vetted_natives.iter().any(|v| *v == member.qualified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SearchConfig = serde_json::from_str(
            r#"{ "search_constructors": true, "policy": { "batch_size": 8 } }"#,
        ).unwrap();

        assert!(config.search_constructors);
        assert!(config.search_operators);
        assert_eq!(config.policy.batch_size, 8);
        assert_eq!(config.policy.call_budget_ms, 250);
    }

    #[test]
    fn threshold_grows_per_level() {
        let policy = Policy::default();

        assert_eq!(policy.arg_threshold(0, false), 25);
        assert_eq!(policy.arg_threshold(2, false), 2500);
        assert_eq!(policy.arg_threshold(2, true), 1250);
    }
}
