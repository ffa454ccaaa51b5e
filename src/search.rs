//! The search entry point: runs a synthesizer against the live program
//! and ranks what it found.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use log::{debug, info};

use crate::config::SearchConfig;
use crate::constraint::TypeConstraint;
use crate::corpus::Corpus;
use crate::error::{SearchError, Warning};
use crate::expr::Expr;
use crate::oracle::{EvalResult, Frame, Oracle, OracleStats};
use crate::runtime::Runtime;
use crate::spec::Specification;
use crate::synth::heuristic::CostModel;
use crate::synth::level_enum::LevelEnum;
use crate::synth::weighted_walk::WeightedWalk;
use crate::synth::{GenStats, Goal, Synthesizer};

/// Shared cancellation flag. Any clone may cancel; the search checks it
/// between probes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub generated: usize,
    pub evaluated: usize,
    /// Current level, or iteration for stochastic searches.
    pub level: usize,
}

/// Observer side of a running search.
#[derive(Default)]
pub struct Monitor<'a> {
    cancel: CancelToken,
    progress: Option<Box<dyn FnMut(&Progress) + 'a>>,
}

impl<'a> Monitor<'a> {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn on_progress<F: FnMut(&Progress) + 'a>(mut self, f: F) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn report(&mut self, progress: Progress) {
        debug!("Progress: {progress:?}");
        if let Some(f) = &mut self.progress {
            f(&progress);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Deterministic level-by-level enumeration up to this heuristic depth.
    Depth(usize),
    /// Weighted random extension of a growing pool.
    Stochastic { iterations: usize, pool_cap: usize },
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub frame: Frame,
    pub spec: Specification,
    /// Defaults to what the specification implies.
    pub constraint: Option<TypeConstraint>,
    pub budget: Budget,
    pub config: SearchConfig,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: String,
    /// Objects the search itself allocated are gone once it returns, so
    /// handles in here are only meaningful for pre-existing objects.
    pub result: EvalResult,
    /// The value as the running program prints it.
    pub display: String,
    pub expr: Expr,
    pub naturalness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub generation: GenStats,
    pub oracle: OracleStats,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub candidates: Vec<Candidate>,
    pub stats: SearchStats,
    pub warnings: Vec<Warning>,
}

impl SearchReport {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn sources(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.source.as_str()).collect()
    }
}

/// Most natural first, then shortest, then alphabetical.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.naturalness.partial_cmp(&a.naturalness)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.source.len().cmp(&b.source.len()))
        .then_with(|| a.source.cmp(&b.source))
}

/// Runs one search to completion. The program is left exactly as found.
///
/// Cancellation yields [`SearchError::Cancelled`], never a partial list.
pub fn search(
    runtime: &mut dyn Runtime,
    request: SearchRequest,
    corpus: &Corpus,
    monitor: &mut Monitor<'_>,
) -> Result<SearchReport, SearchError> {
    let SearchRequest { frame, spec, constraint, budget, mut config } = request;

    if config.assigned_variable.is_none() {
        config.assigned_variable = spec.assigned_variable().map(str::to_string);
    }
    let constraint = constraint.unwrap_or_else(|| spec.default_constraint(&frame, &*runtime));

    info!("Searching for {spec} with constraint {constraint} ({budget:?})");

    let mut synth: Box<dyn Synthesizer> = match budget {
        Budget::Depth(depth) => Box::new(LevelEnum::new(depth)),
        Budget::Stochastic { iterations, pool_cap } => Box::new(WeightedWalk::new(iterations, pool_cap)),
    };

    let costs_config = config.clone();
    let mut oracle = Oracle::new(runtime, frame, config).with_cancel(monitor.token().clone());
    let goal = Goal {
        spec: &spec,
        constraint: &constraint,
        corpus,
    };

    let output = synth.synthesize(&mut oracle, &goal, monitor)?;
    oracle.check_cancelled()?;

    let costs = CostModel::new(corpus, &costs_config);
    let mut candidates: Vec<Candidate> = output.found
        .into_iter()
        .map(|found| Candidate {
            source: found.expr.to_string(),
            display: oracle.display(&found.result.value),
            naturalness: costs.naturalness(&found.expr, &mut oracle),
            result: found.result,
            expr: found.expr,
        })
        .collect();
    candidates.sort_by(rank);

    info!(
        "{} found {} candidates ({} evaluated)",
        synth.name(),
        candidates.len(),
        oracle.stats().evaluated,
    );

    Ok(SearchReport {
        candidates,
        stats: SearchStats {
            generation: output.stats,
            oracle: oracle.stats().clone(),
        },
        warnings: output.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn candidate(source: &str, naturalness: f64) -> Candidate {
        Candidate {
            source: source.into(),
            result: EvalResult {
                value: Value::Int(0),
                effects: Vec::new(),
            },
            display: "0".into(),
            expr: Expr::var(source),
            naturalness,
        }
    }

    #[test]
    fn ranking_prefers_natural_then_short() {
        let mut list = vec![
            candidate("arr.length", 4.0),
            candidate("len", 4.0),
            candidate("Math.abs(len)", 1.0),
            candidate("zz", 4.0),
            candidate("aa", 4.0),
            candidate("x.size()", 6.0),
        ];
        list.sort_by(rank);

        let order: Vec<&str> = list.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(order, vec!["x.size()", "aa", "zz", "len", "arr.length", "Math.abs(len)"]);
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let monitor = Monitor::new(token.clone());

        assert!(!monitor.token().is_cancelled());
        token.cancel();
        assert!(monitor.token().is_cancelled());
    }
}
