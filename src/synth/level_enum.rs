//! Deterministic bottom-up enumeration, one heuristic level at a time.
//!
//! Level 0 holds the locals, `this` and a few literals. Level `d` combines
//! the components admitted so far, always using at least one component of
//! level `d - 1`. Every candidate is evaluated and filed into an
//! equivalence class; only those that open a new class (or refine the
//! static type of an existing one) are extended further.

use std::collections::{BTreeMap, HashSet};

use log::{debug, trace};

use crate::config::SearchConfig;
use crate::constraint::TypeConstraint;
use crate::error::SearchError;
use crate::expr::{BinopKind, Expr, ExprKind, UnopKind};
use crate::oracle::eval::assignable;
use crate::oracle::{EvalResult, Member, Oracle, Verdict};
use crate::registry::{Classified, ExpandEnv, Registry};
use crate::runtime::{Introspection, MethodInfo};
use crate::search::{Monitor, Progress};
use crate::types::Type;

use super::heuristic::{self, CostModel};
use super::reach::Reach;
use super::{Found, Goal, SynthOutput, Synthesizer};

pub struct LevelEnum {
    max_depth: usize,
}

impl LevelEnum {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }
}

impl Synthesizer for LevelEnum {
    fn name(&self) -> &'static str {
        "level enumeration"
    }

    fn synthesize(
        &mut self,
        oracle: &mut Oracle<'_>,
        goal: &Goal<'_>,
        monitor: &mut Monitor<'_>,
    ) -> Result<SynthOutput, SearchError> {
        let config = oracle.config().clone();

        Enumeration::new(oracle, goal, &config, self.max_depth).run(monitor)
    }
}

/// An admitted expression, extended by later levels.
#[derive(Debug, Clone)]
struct Component {
    expr: Expr,
    ty: Type,
    level: usize,
    text: String,
}

/// Something members can be looked up on: a value or a static type name.
struct Receiver {
    expr: Expr,
    ty: Type,
    is_static: bool,
    level: usize,
}

struct Enumeration<'a, 'rt> {
    oracle: &'a mut Oracle<'rt>,
    goal: &'a Goal<'a>,
    config: &'a SearchConfig,
    costs: CostModel<'a>,
    reach: Reach,
    registry: Registry,
    max_depth: usize,
    components: Vec<Component>,
    /// Candidates whose heuristic depth exceeds the level they were built
    /// at, keyed by that depth.
    deferred: BTreeMap<usize, Vec<Expr>>,
    seen: HashSet<Expr>,
    truths: [bool; 2],
    boolean_goal: bool,
    out: SynthOutput,
}

impl<'a, 'rt> Enumeration<'a, 'rt> {
    fn new(oracle: &'a mut Oracle<'rt>, goal: &'a Goal<'a>, config: &'a SearchConfig, max_depth: usize) -> Self {
        let reach = Reach::new(goal.constraint.clone(), config, oracle.program());
        let boolean_goal = heuristic::is_boolean_goal(&goal.constraint.admissible_types(oracle.program()));

        Self {
            oracle,
            goal,
            config,
            costs: CostModel::new(goal.corpus, config),
            reach,
            registry: Registry::new(),
            max_depth,
            components: Vec::new(),
            deferred: BTreeMap::new(),
            seen: HashSet::new(),
            truths: [false; 2],
            boolean_goal,
            out: SynthOutput::default(),
        }
    }

    fn run(mut self, monitor: &mut Monitor<'_>) -> Result<SynthOutput, SearchError> {
        let seeds = self.seeds();
        self.process(0, seeds, Vec::new(), monitor)?;

        for level in 1..=self.max_depth {
            self.oracle.check_cancelled()?;

            let deferred = self.deferred.remove(&level).unwrap_or_default();
            let fresh = self.build(level);
            debug!("Level {level}: {} new candidates, {} deferred", fresh.len(), deferred.len());

            self.process(level, fresh, deferred, monitor)?;
        }

        self.finish()
    }

    fn seeds(&mut self) -> Vec<Expr> {
        let frame = self.oracle.frame();
        let mut out: Vec<Expr> = frame.locals.keys().map(|name| Expr::var(name)).collect();

        if frame.this.is_some() {
            out.push(Expr::this());
        }
        out.extend(self.goal.spec.seed_literals().into_iter().map(Expr::literal));

        if self.max_depth > 0 {
            let program = self.oracle.program();
            if self.reach.helpful(&Type::int(), self.max_depth, program) {
                out.push(Expr::int(0));
            }
            if self.reach.helpful(&Type::Null, self.max_depth, program) {
                out.push(Expr::null());
            }
        }

        out
    }

    fn saturated(&self) -> bool {
        heuristic::booleans_saturated(self.boolean_goal, &self.truths)
    }

    /// Assigns heuristic depths, defers or drops, then evaluates and files
    /// what belongs to `level`.
    fn process(
        &mut self,
        level: usize,
        fresh: Vec<Expr>,
        deferred: Vec<Expr>,
        monitor: &mut Monitor<'_>,
    ) -> Result<(), SearchError> {
        let steps = self.max_depth - level;
        let mut batch = Vec::new();

        for e in fresh {
            if !self.seen.insert(e.clone()) {
                continue;
            }
            self.out.stats.generated += 1;

            if self.oracle.type_of(&e).is_none() {
                continue;
            }
            let saturated = self.saturated();
            let cost = self.costs.cost(&e, &mut *self.oracle, saturated);
            self.oracle.set_cost(&e, cost);

            if cost > self.max_depth {
                trace!("{e} costs {cost}, dropped");
            } else if cost > level {
                self.out.stats.deferred += 1;
                self.deferred.entry(cost).or_default().push(e);
            } else {
                batch.push(e);
            }
        }
        batch.extend(deferred);

        let batch: Vec<(Expr, Type)> = batch.into_iter()
            .filter_map(|e| {
                let ty = self.oracle.type_of(&e)?;
                self.reach.helpful(&ty, steps, self.oracle.program()).then_some((e, ty))
            })
            .collect();

        let chunk = self.config.policy.batch_size.max(1);
        for part in batch.chunks(chunk) {
            let exprs: Vec<Expr> = part.iter().map(|(e, _)| e.clone()).collect();
            let verdicts = self.oracle.evaluate(&exprs, None)?;

            for ((e, ty), verdict) in part.iter().zip(verdicts) {
                self.out.note(e, &verdict);
                if let Some(result) = verdict.result() {
                    self.file(level, e, ty, result);
                }
            }

            monitor.report(Progress {
                generated: self.out.stats.generated,
                evaluated: self.oracle.stats().evaluated,
                level,
            });
        }

        Ok(())
    }

    fn file(&mut self, level: usize, e: &Expr, ty: &Type, result: &EvalResult) {
        let cost = self.oracle.cost_of(e).unwrap_or(level);
        let uses_constant = heuristic::uses_constant(e, &mut *self.oracle);
        let key = result.key();

        // The representative must be read before `e` joins the class.
        let refines = match self.registry.representative(&key).cloned() {
            Some(rep) => self.oracle.type_of(&rep).is_some_and(|rep_ty| {
                rep_ty != *ty && self.oracle.program().is_subtype(ty, &rep_ty)
            }),
            None => false,
        };

        match self.registry.classify(e.clone(), result, cost, uses_constant) {
            Classified::New => {
                if let Some(idx) = heuristic::truth_index(&result.value) {
                    self.truths[idx] = true;
                }
            },
            Classified::Existing if refines => trace!("{e} refines the type of its class"),
            Classified::Existing => return,
        }

        self.components.push(Component {
            expr: e.clone(),
            ty: ty.clone(),
            level,
            text: e.to_string(),
        });
    }

    fn receivers(&self) -> Vec<Receiver> {
        let statics = self.config.static_types.iter().map(|name| Receiver {
            expr: Expr::static_ref(Type::class(name)),
            ty: Type::class(name),
            is_static: true,
            level: 0,
        });
        let values = self.components.iter()
            .filter(|c| c.ty.is_reference() && c.ty != Type::Null)
            .map(|c| Receiver {
                expr: c.expr.clone(),
                ty: c.ty.clone(),
                is_static: false,
                level: c.level,
            });

        statics.chain(values).collect()
    }

    fn build(&mut self, level: usize) -> Vec<Expr> {
        let steps = self.max_depth - level;
        let mut out = Vec::new();

        if self.config.search_operators {
            self.build_unops(level, steps, &mut out);
            self.build_binops(level, steps, &mut out);
        }
        self.build_members(level, steps, &mut out);
        self.build_indexing(level, steps, &mut out);
        if level == self.max_depth && self.config.search_constructors {
            self.build_constructors(level, &mut out);
        }

        out
    }

    fn build_unops(&mut self, level: usize, steps: usize, out: &mut Vec<Expr>) {
        let program = self.oracle.program();

        for c in self.components.iter().filter(|c| c.level + 1 == level) {
            if c.expr.is_literal() {
                continue;
            }
            let already = |op: UnopKind| matches!(c.expr.unparen().kind(), ExprKind::Unop(o, _) if *o == op);

            for op in [UnopKind::Negate, UnopKind::Not] {
                let Some(ty) = op.result_type(&c.ty) else { continue };
                if !already(op) && self.reach.helpful(&ty, steps, program) {
                    out.push(Expr::unop(op, c.expr.clone()));
                }
            }
        }
    }

    fn build_binops(&mut self, level: usize, steps: usize, out: &mut Vec<Expr>) {
        let program = self.oracle.program();

        for op in BinopKind::ALL {
            for l in &self.components {
                for r in &self.components {
                    if l.level + 1 != level && r.level + 1 != level {
                        continue;
                    }
                    let Some(ty) = op.result_type(&l.ty, &r.ty) else { continue };
                    if !worth_combining(op, l, r, &*self.oracle) || !self.reach.helpful(&ty, steps, program) {
                        continue;
                    }
                    out.push(Expr::binop(op, l.expr.clone(), r.expr.clone()));
                }
            }
        }
    }

    fn build_members(&mut self, level: usize, steps: usize, out: &mut Vec<Expr>) {
        let program = self.oracle.program();

        for recv in self.receivers() {
            let fresh_recv = recv.level + 1 == level;

            if fresh_recv {
                for f in program.fields(&recv.ty) {
                    if f.is_static == recv.is_static && self.reach.helpful(&f.ty, steps, program) {
                        out.push(Expr::field(recv.expr.clone(), &f.name));
                    }
                }
            }

            for m in program.methods(&recv.ty) {
                if m.is_static != recv.is_static || !m.is_public {
                    continue;
                }
                let Some(ret) = &m.ret else { continue };
                if !self.reach.helpful(ret, steps, program) {
                    continue;
                }

                let rare = self.costs.is_rare(&Member::Method(m.clone()));
                let Some(slots) = self.argument_slots(&m, level, rare) else {
                    self.out.stats.guarded += 1;
                    continue;
                };
                for args in cross_product(&self.components, &slots, fresh_recv, level) {
                    out.push(Expr::call(recv.expr.clone(), &m.name, args));
                }
            }
        }
    }

    fn build_indexing(&mut self, level: usize, steps: usize, out: &mut Vec<Expr>) {
        let program = self.oracle.program();
        let indices: Vec<&Component> = self.components.iter()
            .filter(|c| assignable(program, &c.ty, &Type::int()))
            .collect();

        for arr in &self.components {
            let Some(elem) = arr.ty.element() else { continue };
            if !self.reach.helpful(elem, steps, program) {
                continue;
            }
            for idx in &indices {
                if arr.level + 1 == level || idx.level + 1 == level {
                    out.push(Expr::index(arr.expr.clone(), idx.expr.clone()));
                }
            }
        }
    }

    fn build_constructors(&mut self, level: usize, out: &mut Vec<Expr>) {
        let program = self.oracle.program();

        for ty in self.goal.constraint.admissible_types(program) {
            for ctor in program.constructors(&ty) {
                if !ctor.is_public {
                    continue;
                }
                let rare = self.costs.is_rare(&Member::Method(ctor.clone()));
                let Some(slots) = self.argument_slots(&ctor, level, rare) else {
                    self.out.stats.guarded += 1;
                    continue;
                };
                for args in cross_product(&self.components, &slots, true, level) {
                    out.push(Expr::new_instance(ty.clone(), args));
                }
            }
        }
    }

    /// Indices of the candidate components for each parameter of `method`,
    /// thinned by the combination guard. `None` when some parameter has no
    /// candidate left.
    fn argument_slots(&self, method: &MethodInfo, level: usize, rare: bool) -> Option<Vec<Vec<usize>>> {
        let program = self.oracle.program();
        let components = &self.components;
        let mut slots: Vec<Vec<usize>> = method.params.iter()
            .map(|param| {
                (0..components.len())
                    .filter(|&idx| assignable(program, &components[idx].ty, param))
                    .collect()
            })
            .collect();

        let threshold = self.config.policy.arg_threshold(level, rare);
        let combinations = |slots: &[Vec<usize>]| {
            slots.iter().fold(1usize, |acc, s| acc.saturating_mul(s.len()))
        };

        while combinations(&slots) > threshold {
            let Some(deepest) = slots.iter().flatten().map(|&idx| components[idx].level).max() else { break };
            trace!("{}: too many argument combinations, dropping level {deepest}", method.name);
            for slot in &mut slots {
                slot.retain(|&idx| components[idx].level < deepest);
            }
        }

        slots.iter().all(|s| !s.is_empty()).then_some(slots)
    }

    /// Picks, for every class, the cheapest member the goal admits, or
    /// failing that a downcast of its representative. Checks the
    /// specification on those, then expands the accepted ones into every
    /// equivalent phrasing.
    fn finish(mut self) -> Result<SynthOutput, SearchError> {
        let classes: Vec<(Vec<Expr>, EvalResult)> = self.registry.classes()
            .map(|(_, class)| (class.members().cloned().collect(), class.result.clone()))
            .collect();
        let mut finalists = Vec::new();

        for (members, result) in classes {
            let mut best: Option<(usize, usize, Expr)> = None;
            for m in &members {
                let Some(ty) = self.oracle.type_of(m) else { continue };
                if !self.goal.constraint.is_fulfilled_by(&ty, self.oracle.program()) {
                    continue;
                }
                let rank = (self.oracle.cost_of(m).unwrap_or(0), m.to_string().len());
                if best.as_ref().map_or(true, |(c, l, _)| rank < (*c, *l)) {
                    best = Some((rank.0, rank.1, m.clone()));
                }
            }

            match best {
                Some((_, _, e)) => finalists.push(e),
                None => finalists.extend(self.rescue(&members, &result)),
            }
        }

        debug!("{} classes, {} finalists", self.registry.len(), finalists.len());

        let verdicts = self.oracle.evaluate(&finalists, Some(self.goal.spec))?;
        let mut accepted = Vec::new();
        for (e, verdict) in finalists.iter().zip(&verdicts) {
            self.out.note(e, verdict);
            if let Verdict::Accepted(_) = verdict {
                accepted.push(e.clone());
            }
        }

        let mut env = ExpandCtx {
            oracle: &mut *self.oracle,
            costs: &self.costs,
            constraint: self.goal.constraint,
        };
        let expanded = self.registry.expand(&accepted, self.max_depth, self.config.policy.max_expansions, &mut env);

        let assigned = self.config.assigned_variable.as_deref();
        for e in expanded {
            if assigned.is_some() && e.unparen().as_var() == assigned {
                continue;
            }
            let result = match self.oracle.outcome(&e) {
                Some(Ok(result)) => result.clone(),
                _ => match self.oracle.reevaluate(&e) {
                    Ok(result) => result,
                    Err(fault) => {
                        debug!("{e} failed on re-evaluation: {fault}");
                        continue;
                    },
                },
            };
            self.out.found.push(Found { expr: e, result });
        }

        self.out.stats.classes = self.registry.len();

        Ok(self.out)
    }

    /// A cast of the class representative to a goal type its value
    /// actually has.
    fn rescue(&mut self, members: &[Expr], result: &EvalResult) -> Option<Expr> {
        if result.value.is_null() {
            return None;
        }

        let program = self.oracle.program();
        let runtime = program.runtime_type(&result.value);

        members.iter().find_map(|m| {
            let ty = self.oracle.type_of(m)?;
            let program = self.oracle.program();
            if !self.reach.can_downcast(&ty, program) {
                return None;
            }
            let target = self.reach.downcast_target(&ty, &runtime, program)?;
            trace!("Rescuing {m} as a downcast to {target}");
            Some(Expr::cast(target, m.clone()))
        })
    }
}

/// Pruning of operator applications that are trivial or redundant.
fn worth_combining(op: BinopKind, l: &Component, r: &Component, oracle: &Oracle<'_>) -> bool {
    let (l_lit, r_lit) = (l.expr.as_literal(), r.expr.as_literal());

    if l_lit.is_some() && r_lit.is_some() {
        return false;
    }
    if op.is_commutative(&l.ty, &r.ty) {
        match (l_lit, r_lit) {
            (Some(_), None) => return false,
            (None, None) if l.text > r.text => return false,
            _ => (),
        }
    }

    let literal_zero = r_lit.is_some_and(|lit| lit.to_value().is_zero());
    let literal_one = r_lit.is_some_and(|lit| lit.to_value().as_long() == Some(1));
    let zero_divisor = literal_zero || oracle.value_of(&r.expr).is_some_and(|v| v.is_zero());
    let numeric = l.ty.is_numeric() && r.ty.is_numeric();

    match op {
        BinopKind::Plus if numeric => !literal_zero,
        BinopKind::Minus => l.expr != r.expr && !literal_zero,
        BinopKind::Times => !literal_zero && !literal_one,
        BinopKind::Divide => !zero_divisor && !literal_one && l.expr != r.expr,
        BinopKind::Rem => !zero_divisor && l.expr != r.expr,
        BinopKind::And | BinopKind::Or => l_lit.is_none() && r_lit.is_none() && l.expr != r.expr,
        BinopKind::Eq | BinopKind::Ne | BinopKind::Lt | BinopKind::Le | BinopKind::Gt | BinopKind::Ge => {
            l.expr != r.expr
        },
        BinopKind::Plus => true,
    }
}

/// Every argument tuple drawn from `slots`. Unless `has_fresh` already
/// holds, a tuple must use at least one component of `level - 1`.
fn cross_product(components: &[Component], slots: &[Vec<usize>], has_fresh: bool, level: usize) -> Vec<Vec<Expr>> {
    let mut tuples: Vec<(Vec<Expr>, bool)> = vec![(Vec::new(), has_fresh)];

    for slot in slots {
        tuples = tuples.into_iter()
            .flat_map(|(prefix, fresh)| {
                slot.iter().map(move |&idx| {
                    let c = &components[idx];
                    let mut args = prefix.clone();
                    args.push(c.expr.clone());
                    (args, fresh || c.level + 1 == level)
                })
            })
            .collect();
    }

    tuples.into_iter()
        .filter(|(_, fresh)| *fresh)
        .map(|(args, _)| args)
        .collect()
}

struct ExpandCtx<'x, 'rt> {
    oracle: &'x mut Oracle<'rt>,
    costs: &'x CostModel<'x>,
    constraint: &'x TypeConstraint,
}

impl ExpandEnv for ExpandCtx<'_, '_> {
    fn cost(&mut self, e: &Expr) -> Option<usize> {
        let ty = self.oracle.type_of(e)?;
        if !self.constraint.is_fulfilled_by(&ty, self.oracle.program()) {
            return None;
        }

        Some(self.costs.cost(e, self.oracle, false))
    }

    fn effect_free(&mut self, e: &Expr) -> bool {
        matches!(self.oracle.outcome(e), Some(Ok(result)) if result.effects.is_empty())
    }

    fn rebuilt(&mut self, original: &Expr, rebuilt: &Expr) {
        self.oracle.adopt(original, rebuilt);
    }
}
