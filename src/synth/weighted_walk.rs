//! Stochastic search: repeatedly pick a pool member by weight, extend it by
//! one random step, and keep the extension if it evaluates to something
//! new. Deterministic for a fixed seed.

use std::collections::HashSet;

use log::{debug, trace};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::expr::{BinopKind, Expr, UnopKind};
use crate::oracle::eval::assignable;
use crate::oracle::{Oracle, Verdict};
use crate::registry::{Classified, Registry};
use crate::runtime::{Introspection, Runtime};
use crate::search::{Monitor, Progress};
use crate::types::Type;

use super::heuristic::CostModel;
use super::{Found, Goal, SynthOutput, Synthesizer};

pub struct WeightedWalk {
    iterations: usize,
    pool_cap: usize,
}

impl WeightedWalk {
    pub fn new(iterations: usize, pool_cap: usize) -> Self {
        Self { iterations, pool_cap }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    expr: Expr,
    ty: Type,
    /// A type name usable only as the receiver of static members.
    is_static: bool,
    weight: f64,
}

impl Entry {
    fn is_value(&self) -> bool {
        !self.is_static
    }
}

impl Synthesizer for WeightedWalk {
    fn name(&self) -> &'static str {
        "weighted walk"
    }

    fn synthesize(
        &mut self,
        oracle: &mut Oracle<'_>,
        goal: &Goal<'_>,
        monitor: &mut Monitor<'_>,
    ) -> Result<SynthOutput, SearchError> {
        let config = oracle.config().clone();
        let mut walk = Walk {
            costs: CostModel::new(goal.corpus, &config),
            config: &config,
            goal,
            rng: StdRng::seed_from_u64(config.policy.seed),
            pool: Vec::new(),
            registry: Registry::new(),
            seen: HashSet::new(),
            out: SynthOutput::default(),
        };

        for seed in walk.seeds(oracle) {
            walk.consider(oracle, seed)?;
        }
        for name in &config.static_types {
            walk.pool.push(Entry {
                expr: Expr::static_ref(Type::class(name)),
                ty: Type::class(name),
                is_static: true,
                weight: 1.0,
            });
        }

        for iteration in 0..self.iterations {
            if walk.pool.len() >= self.pool_cap {
                debug!("Pool is full after {iteration} iterations");
                break;
            }
            oracle.check_cancelled()?;

            if let Some(candidate) = walk.step(oracle) {
                walk.consider(oracle, candidate)?;
            }

            if iteration % config.policy.batch_size.max(1) == 0 {
                monitor.report(Progress {
                    generated: walk.out.stats.generated,
                    evaluated: oracle.stats().evaluated,
                    level: iteration,
                });
            }
        }

        walk.out.stats.classes = walk.registry.len();
        Ok(walk.out)
    }
}

struct Walk<'a> {
    costs: CostModel<'a>,
    config: &'a SearchConfig,
    goal: &'a Goal<'a>,
    rng: StdRng,
    pool: Vec<Entry>,
    registry: Registry,
    seen: HashSet<Expr>,
    out: SynthOutput,
}

impl Walk<'_> {
    fn seeds(&self, oracle: &Oracle<'_>) -> Vec<Expr> {
        let frame = oracle.frame();
        let mut out: Vec<Expr> = frame.locals.keys().map(|name| Expr::var(name)).collect();

        if frame.this.is_some() {
            out.push(Expr::this());
        }
        out.push(Expr::null());
        out.extend(self.goal.spec.seed_literals().into_iter().map(Expr::literal));

        out
    }

    /// Evaluates `e`, records it when accepted and adds it to the pool when
    /// its value is new.
    fn consider(&mut self, oracle: &mut Oracle<'_>, e: Expr) -> Result<(), SearchError> {
        if !self.seen.insert(e.clone()) {
            return Ok(());
        }
        self.out.stats.generated += 1;

        let Some(ty) = oracle.type_of(&e) else { return Ok(()) };
        let wanted = self.goal.constraint.is_fulfilled_by(&ty, oracle.program());
        let spec = wanted.then_some(self.goal.spec);

        let verdict = oracle.evaluate(std::slice::from_ref(&e), spec)?
            .into_iter()
            .next();
        let Some(verdict) = verdict else { return Ok(()) };
        self.out.note(&e, &verdict);

        let result = match verdict {
            Verdict::Accepted(result) => {
                let assigned = self.config.assigned_variable.as_deref();
                if wanted && (assigned.is_none() || e.unparen().as_var() != assigned) {
                    trace!("Found {e}");
                    self.out.found.push(Found {
                        expr: e.clone(),
                        result: result.clone(),
                    });
                }
                result
            },
            Verdict::Rejected(result) => result,
            Verdict::Crashed(_) | Verdict::PredicateCrashed(_) => return Ok(()),
        };

        let depth = e.raw_depth();
        if self.registry.classify(e.clone(), &result, depth, false) == Classified::New {
            let naturalness = self.costs.naturalness(&e, oracle);
            self.pool.push(Entry {
                weight: (1.0 + naturalness.max(0.0)) / (1 + depth * depth) as f64,
                expr: e,
                ty,
                is_static: false,
            });
        }

        Ok(())
    }

    /// A pool member drawn by weight among those `keep` admits.
    fn pick<F: Fn(&Entry) -> bool>(&mut self, keep: F) -> Option<Entry> {
        let eligible: Vec<&Entry> = self.pool.iter().filter(|e| keep(e)).collect();
        let dist = WeightedIndex::new(eligible.iter().map(|e| e.weight)).ok()?;

        Some(eligible[dist.sample(&mut self.rng)].clone())
    }

    /// One random extension of one weighted pick.
    fn step(&mut self, oracle: &Oracle<'_>) -> Option<Expr> {
        let base = self.pick(|_| true)?;
        let program = oracle.program();

        match self.rng.gen_range(0..4) {
            0 if base.is_static || base.ty.is_reference() => self.member(&base, program),
            1 if base.is_value() && self.config.search_operators => self.operator(&base),
            2 if base.ty.element().is_some() && base.is_value() => {
                let index = self.pick(|e| e.is_value() && assignable(program, &e.ty, &Type::int()))?;
                Some(Expr::index(base.expr, index.expr))
            },
            _ if base.is_value() && base.ty.is_reference() && base.ty != Type::Null => {
                self.member(&base, program)
            },
            _ => None,
        }
    }

    fn member(&mut self, base: &Entry, program: &dyn Runtime) -> Option<Expr> {
        if base.ty == Type::Null {
            return None;
        }

        let fields: Vec<_> = program.fields(&base.ty)
            .into_iter()
            .filter(|f| f.is_static == base.is_static)
            .collect();
        let methods: Vec<_> = program.methods(&base.ty)
            .into_iter()
            .filter(|m| m.is_static == base.is_static && m.is_public && m.ret.is_some())
            .collect();
        let total = fields.len() + methods.len();
        if total == 0 {
            return None;
        }

        let choice = self.rng.gen_range(0..total);
        if choice < fields.len() {
            return Some(Expr::field(base.expr.clone(), &fields[choice].name));
        }

        let method = &methods[choice - fields.len()];
        let mut args = Vec::with_capacity(method.params.len());
        for param in &method.params {
            let arg = self.pick(|e| e.is_value() && assignable(program, &e.ty, param))?;
            args.push(arg.expr);
        }
        trace!("Extending {} with {}", base.expr, method.qualified());

        Some(Expr::call(base.expr.clone(), &method.name, args))
    }

    fn operator(&mut self, base: &Entry) -> Option<Expr> {
        if self.rng.gen_bool(0.2) {
            let op = if base.ty.is_boolean() { UnopKind::Not } else { UnopKind::Negate };
            op.result_type(&base.ty)?;
            return Some(Expr::unop(op, base.expr.clone()));
        }

        let op = BinopKind::ALL[self.rng.gen_range(0..BinopKind::ALL.len())];
        let other = self.pick(|e| e.is_value() && e.expr != base.expr)?;
        let (l, r) = if self.rng.gen_bool(0.5) { (base, &other) } else { (&other, base) };
        op.result_type(&l.ty, &r.ty)?;

        if matches!(op, BinopKind::Divide | BinopKind::Rem) && r.expr.as_literal().is_some_and(|lit| lit.to_value().is_zero()) {
            return None;
        }

        Some(Expr::binop(op, l.expr.clone(), r.expr.clone()))
    }
}
