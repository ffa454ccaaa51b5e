pub mod heuristic;
pub mod level_enum;
pub mod reach;
pub mod weighted_walk;

use crate::constraint::TypeConstraint;
use crate::corpus::Corpus;
use crate::error::{SearchError, Warning};
use crate::expr::Expr;
use crate::oracle::{EvalResult, Oracle, Verdict};
use crate::runtime::Fault;
use crate::search::Monitor;
use crate::spec::Specification;

/// What a synthesizer is asked to find.
pub struct Goal<'a> {
    pub spec: &'a Specification,
    pub constraint: &'a TypeConstraint,
    pub corpus: &'a Corpus,
}

/// An expression the oracle accepted, with its result.
#[derive(Debug, Clone)]
pub struct Found {
    pub expr: Expr,
    pub result: EvalResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenStats {
    pub generated: usize,
    pub deferred: usize,
    /// Candidates dropped by the argument combination guard.
    pub guarded: usize,
    pub classes: usize,
}

#[derive(Debug, Default)]
pub struct SynthOutput {
    pub found: Vec<Found>,
    pub warnings: Vec<Warning>,
    pub stats: GenStats,
}

impl SynthOutput {
    /// Records the verdicts the user should hear about: predicate crashes
    /// and timeouts.
    pub fn note(&mut self, e: &Expr, verdict: &Verdict) {
        match verdict {
            Verdict::PredicateCrashed(fault) => self.warnings.push(Warning::PredicateCrashed {
                candidate: e.to_string(),
                fault: fault.clone(),
            }),
            Verdict::Crashed(Fault::Timeout) => self.warnings.push(Warning::TimedOut {
                candidate: e.to_string(),
            }),
            _ => (),
        }
    }
}

/// A search strategy. Synthesizers build candidates, hand them to the
/// oracle in batches and keep those the specification accepts.
///
/// A synthesizer only returns an error when the whole search must stop:
/// on cancellation or when the running program goes away.
pub trait Synthesizer {
    fn name(&self) -> &'static str;

    fn synthesize(
        &mut self,
        oracle: &mut Oracle<'_>,
        goal: &Goal<'_>,
        monitor: &mut Monitor<'_>,
    ) -> Result<SynthOutput, SearchError>;
}
