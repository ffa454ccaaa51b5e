//! The evaluation oracle: runs candidate expressions against the live
//! program in batched probes, keeps the program state exactly as found,
//! and contains crashes, timeouts and native calls.

pub mod eval;
pub mod pure;

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, trace, warn};

use crate::config::SearchConfig;
use crate::corpus;
use crate::error::SearchError;
use crate::expr::{BinopKind, Expr, ExprId, ExprKind, Literal};
use crate::runtime::{net_effects, Effect, Fault, FieldInfo, Location, MethodInfo, Runtime};
use crate::search::CancelToken;
use crate::spec::Specification;
use crate::types::{Type, Value};

use self::eval::{assignable, Evaluator, Run};

/// The program location the search runs at: locals in scope and, for
/// instance contexts, the receiver.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub locals: IndexMap<Rc<str>, (Type, Value)>,
    pub this: Option<(Type, Value)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(mut self, name: &str, ty: Type, value: Value) -> Self {
        self.locals.insert(name.into(), (ty, value));
        self
    }

    pub fn with_this(mut self, ty: Type, value: Value) -> Self {
        self.this = Some((ty, value));
        self
    }

    pub fn local_type(&self, name: &str) -> Option<&Type> {
        self.locals.get(name).map(|(ty, _)| ty)
    }
}

/// Value of an evaluation together with the effects it performed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    pub value: Value,
    pub effects: Vec<Effect>,
}

/// Equivalence key of a result: the value and the net effect set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    pub value: Value,
    pub effects: Vec<(Location, Value)>,
}

impl EvalResult {
    pub fn key(&self) -> ResultKey {
        ResultKey {
            value: self.value.clone(),
            effects: net_effects(&self.effects),
        }
    }
}

pub type Outcome = Result<EvalResult, Fault>;

/// The program member an access, call or constructor node resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Member {
    Field(FieldInfo),
    Method(MethodInfo),
}

impl Member {
    pub fn owner(&self) -> &Type {
        match self {
            Member::Field(f) => &f.declaring,
            Member::Method(m) => &m.declaring,
        }
    }

    pub fn corpus_key(&self) -> String {
        match self {
            Member::Field(f) => corpus::field_key(f),
            Member::Method(m) => corpus::method_key(m),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.owner(), self.name())
    }

    pub fn name(&self) -> &str {
        match self {
            Member::Field(f) => &f.name,
            Member::Method(m) => &m.name,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Member::Field(f) if f.is_constant())
    }
}

/// Derived per-node data, keyed by node identity.
#[derive(Debug, Default)]
pub struct SideTable {
    types: HashMap<ExprId, Option<Type>>,
    members: HashMap<ExprId, Option<Member>>,
    outcomes: HashMap<ExprId, Outcome>,
    costs: HashMap<ExprId, usize>,
}

impl SideTable {
    pub fn outcome(&self, id: ExprId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleStats {
    pub evaluated: usize,
    pub crashed: usize,
    pub timed_out: usize,
    pub blocked: usize,
    pub predicate_crashes: usize,
    pub live_calls: usize,
    pub shortcuts: usize,
    pub probes: usize,
    pub subdivisions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(EvalResult),
    Rejected(EvalResult),
    Crashed(Fault),
    /// The candidate evaluated, but the specification's own predicate
    /// faulted on its result.
    PredicateCrashed(Fault),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }

    pub fn result(&self) -> Option<&EvalResult> {
        match self {
            Verdict::Accepted(r) | Verdict::Rejected(r) => Some(r),
            Verdict::Crashed(_) | Verdict::PredicateCrashed(_) => None,
        }
    }
}

enum Probe {
    Completed(Vec<(usize, Verdict)>),
    Aborted { fault: Fault, in_predicate: bool },
}

enum Slot {
    Done(Verdict),
    Abort { fault: Fault, in_predicate: bool },
    Disconnected,
}

/// Objects allocated while an oracle is alive are released when it drops.
pub struct Oracle<'rt> {
    runtime: &'rt mut dyn Runtime,
    mark: usize,
    frame: Frame,
    config: SearchConfig,
    table: SideTable,
    stats: OracleStats,
    cancel: Option<CancelToken>,
}

impl Drop for Oracle<'_> {
    fn drop(&mut self) {
        self.runtime.reclaim(self.mark);
    }
}

impl<'rt> Oracle<'rt> {
    pub fn new(runtime: &'rt mut dyn Runtime, frame: Frame, config: SearchConfig) -> Self {
        Self {
            mark: runtime.allocation_mark(),
            runtime,
            frame,
            config,
            table: SideTable::default(),
            stats: OracleStats::default(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn program(&self) -> &dyn Runtime {
        &*self.runtime
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn stats(&self) -> &OracleStats {
        &self.stats
    }

    pub fn display(&self, value: &Value) -> String {
        self.runtime.display(value)
    }

    pub fn check_cancelled(&self) -> Result<(), SearchError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(SearchError::Cancelled),
            _ => Ok(()),
        }
    }

    pub fn outcome(&self, e: &Expr) -> Option<&Outcome> {
        self.table.outcome(e.id())
    }

    pub fn value_of(&self, e: &Expr) -> Option<&Value> {
        match self.outcome(e)? {
            Ok(res) => Some(&res.value),
            Err(_) => None,
        }
    }

    pub fn set_cost(&mut self, e: &Expr, cost: usize) {
        self.table.costs.insert(e.id(), cost);
    }

    pub fn cost_of(&self, e: &Expr) -> Option<usize> {
        self.table.costs.get(&e.id()).copied()
    }

    /// Gives `rebuilt`, an equivalent rephrasing of `original`, the
    /// evaluation outcome already established for `original`.
    pub fn adopt(&mut self, original: &Expr, rebuilt: &Expr) {
        if let Some(outcome) = self.table.outcomes.get(&original.id()).cloned() {
            self.table.outcomes.insert(rebuilt.id(), outcome);
        }
    }

    /// Static type of `e`, or `None` if it does not typecheck.
    pub fn type_of(&mut self, e: &Expr) -> Option<Type> {
        if let Some(ty) = self.table.types.get(&e.id()) {
            return ty.clone();
        }

        let ty = self.infer(e);
        self.table.types.insert(e.id(), ty.clone());
        ty
    }

    fn infer(&mut self, e: &Expr) -> Option<Type> {
        match e.kind() {
            ExprKind::Literal(lit) => Some(lit.ty()),
            ExprKind::Var(name) => self.frame.local_type(name).cloned(),
            ExprKind::This => self.frame.this.as_ref().map(|(ty, _)| ty.clone()),
            ExprKind::StaticRef(_) => None,
            ExprKind::Paren(inner) => self.type_of(inner),
            ExprKind::Field(..) => match self.member_of(e)? {
                Member::Field(f) => Some(f.ty),
                Member::Method(_) => None,
            },
            ExprKind::Call(..) => match self.member_of(e)? {
                Member::Method(m) => m.ret,
                Member::Field(_) => None,
            },
            ExprKind::New(ty, _) => self.member_of(e).map(|_| ty.clone()),
            ExprKind::Index(arr, idx) => {
                let elem = self.type_of(arr)?.element()?.clone();
                let idx = self.type_of(idx)?;
                assignable(self.program(), &idx, &Type::int()).then_some(elem)
            },
            ExprKind::Binop(op, l, r) => {
                let l = self.type_of(l)?;
                let r = self.type_of(r)?;
                op.result_type(&l, &r)
            },
            ExprKind::Unop(op, inner) => {
                let ty = self.type_of(inner)?;
                op.result_type(&ty)
            },
            ExprKind::Cast(ty, inner) => {
                let from = self.type_of(inner)?;
                let ok = match (&from, ty) {
                    (Type::Prim(a), Type::Prim(b)) => a.is_numeric() == b.is_numeric(),
                    (Type::Prim(_), _) | (_, Type::Prim(_)) => false,
                    _ => true,
                };
                ok.then(|| ty.clone())
            },
        }
    }

    fn receiver_type(&mut self, recv: &Expr) -> Option<(Type, bool)> {
        match recv.unparen().kind() {
            ExprKind::StaticRef(ty) => Some((ty.clone(), true)),
            _ => self.type_of(recv)
                .filter(|ty| !ty.is_primitive() && *ty != Type::Null)
                .map(|ty| (ty, false)),
        }
    }

    /// The member an access, call or constructor node statically resolves to.
    pub fn member_of(&mut self, e: &Expr) -> Option<Member> {
        if let Some(member) = self.table.members.get(&e.id()) {
            return member.clone();
        }

        let member = self.resolve(e);
        self.table.members.insert(e.id(), member.clone());
        member
    }

    fn resolve(&mut self, e: &Expr) -> Option<Member> {
        match e.kind() {
            ExprKind::Field(recv, name) => {
                let (ty, is_static) = self.receiver_type(recv)?;
                self.runtime.fields(&ty)
                    .into_iter()
                    .find(|f| f.name == *name && f.is_static == is_static)
                    .map(Member::Field)
            },
            ExprKind::Call(recv, name, args) => {
                let (ty, is_static) = self.receiver_type(recv)?;
                let arg_tys = self.types_of(args)?;
                let program = self.program();
                program.methods(&ty)
                    .into_iter()
                    .find(|m| m.name == *name && m.is_static == is_static && accepts_all(program, &m.params, &arg_tys))
                    .map(Member::Method)
            },
            ExprKind::New(ty, args) => {
                let arg_tys = self.types_of(args)?;
                let program = self.program();
                program.constructors(ty)
                    .into_iter()
                    .find(|c| accepts_all(program, &c.params, &arg_tys))
                    .map(Member::Method)
            },
            _ => None,
        }
    }

    fn types_of(&mut self, args: &[Expr]) -> Option<Vec<Type>> {
        args.iter().map(|a| self.type_of(a)).collect()
    }

    /// No receiver may be null and no divisor may be zero, judging by
    /// outcomes already observed.
    fn is_statically_safe(&self, e: &Expr) -> bool {
        let mut safe = true;

        e.walk(&mut |node| {
            safe &= match node.kind() {
                ExprKind::Field(recv, _) | ExprKind::Call(recv, _, _) => self.known_non_null(recv),
                ExprKind::Index(_, _) | ExprKind::Cast(_, _) => false,
                ExprKind::Binop(BinopKind::Divide | BinopKind::Rem, _, divisor) => self.known_non_zero(divisor),
                _ => true,
            };
        });

        safe
    }

    fn known_non_null(&self, recv: &Expr) -> bool {
        match recv.unparen().kind() {
            ExprKind::StaticRef(_) | ExprKind::This => true,
            ExprKind::Literal(lit) => *lit != Literal::Null,
            _ => self.value_of(recv).is_some_and(|v| !v.is_null()),
        }
    }

    fn known_non_zero(&self, divisor: &Expr) -> bool {
        match divisor.unparen().as_literal() {
            Some(lit) => !lit.to_value().is_zero(),
            None => self.value_of(divisor).is_some_and(|v| !v.is_zero()),
        }
    }

    /// Evaluates every candidate of `batch` and, when given, checks
    /// `spec` on each result. Verdicts come back in batch order.
    ///
    /// Faulting candidates are contained to their own verdict. Only
    /// cancellation and loss of the running program abort the batch.
    pub fn evaluate(&mut self, batch: &[Expr], spec: Option<&Specification>) -> Result<Vec<Verdict>, SearchError> {
        let (safe, risky): (Vec<usize>, Vec<usize>) = (0..batch.len())
            .partition(|&idx| self.is_statically_safe(&batch[idx]));
        let size = self.config.policy.batch_size.max(1);
        let mut verdicts = Vec::with_capacity(batch.len());

        debug!("Evaluating {} candidates ({} deferred as risky)", batch.len(), risky.len());

        for chunk in safe.chunks(size) {
            verdicts.extend(self.run_probe(batch, chunk, spec)?);
        }
        for chunk in risky.chunks((size / 2).max(1)) {
            verdicts.extend(self.run_probe(batch, chunk, spec)?);
        }

        verdicts.sort_by_key(|(idx, _)| *idx);

        Ok(verdicts.into_iter().map(|(_, v)| v).collect())
    }

    /// Runs one probe, halving it until every member that aborts it is
    /// isolated.
    fn run_probe(
        &mut self,
        batch: &[Expr],
        idxs: &[usize],
        spec: Option<&Specification>,
    ) -> Result<Vec<(usize, Verdict)>, SearchError> {
        self.check_cancelled()?;

        match self.probe(batch, idxs, spec)? {
            Probe::Completed(verdicts) => Ok(verdicts),
            Probe::Aborted { fault, in_predicate } if idxs.len() == 1 => {
                let e = &batch[idxs[0]];
                warn!("`{e}` aborted its probe: {fault}");

                if fault == Fault::Timeout {
                    self.stats.timed_out += 1;
                }
                let verdict = if in_predicate {
                    self.stats.predicate_crashes += 1;
                    Verdict::PredicateCrashed(fault)
                } else {
                    self.stats.crashed += 1;
                    self.table.outcomes.insert(e.id(), Err(fault.clone()));
                    Verdict::Crashed(fault)
                };

                Ok(vec![(idxs[0], verdict)])
            },
            Probe::Aborted { fault, .. } => {
                self.stats.subdivisions += 1;
                debug!("Probe of {} aborted ({fault}), subdividing", idxs.len());

                let (l, r) = idxs.split_at(idxs.len() / 2);
                let mut out = self.run_probe(batch, l, spec)?;
                out.extend(self.run_probe(batch, r, spec)?);

                Ok(out)
            },
        }
    }

    fn probe(&mut self, batch: &[Expr], idxs: &[usize], spec: Option<&Specification>) -> Result<Probe, SearchError> {
        let mut verdicts = Vec::with_capacity(idxs.len());
        let mut observed = Vec::new();
        let mut aborted = None;
        let mut disconnected = false;

        self.runtime.begin_probe();
        self.stats.probes += 1;
        let snapshots = self.snapshot(spec);

        for &idx in idxs {
            let e = &batch[idx];
            let run = Evaluator::new(&mut *self.runtime, &self.frame, &self.config, &self.table, &mut self.stats)
                .with_snapshots(snapshots.clone())
                .run(e, spec);

            match classify(&run) {
                Slot::Done(verdict) => {
                    trace!("{e}: {verdict:?}");
                    observed.extend(run.observed);
                    verdicts.push((idx, verdict));
                },
                Slot::Abort { fault, in_predicate } => {
                    aborted = Some(Probe::Aborted { fault, in_predicate });
                    break;
                },
                Slot::Disconnected => {
                    disconnected = true;
                    break;
                },
            }
        }

        self.runtime.end_probe();

        if disconnected {
            return Err(SearchError::Disconnected);
        }
        if let Some(aborted) = aborted {
            return Ok(aborted);
        }

        for (id, outcome) in observed {
            self.table.outcomes.entry(id).or_insert(outcome);
        }
        for (_, verdict) in &verdicts {
            self.stats.evaluated += 1;
            match verdict {
                Verdict::Crashed(_) => self.stats.crashed += 1,
                Verdict::PredicateCrashed(_) => self.stats.predicate_crashes += 1,
                _ => (),
            }
        }

        Ok(Probe::Completed(verdicts))
    }

    /// Values of the specification's pre-state terms, read from the heap
    /// as the search found it.
    fn snapshot(&mut self, spec: Option<&Specification>) -> Vec<(ExprId, Result<Value, Fault>)> {
        let Some(spec) = spec else { return Vec::new() };

        spec.snapshots()
            .iter()
            .map(|term| {
                let value = Evaluator::new(&mut *self.runtime, &self.frame, &self.config, &self.table, &mut self.stats)
                    .fresh()
                    .run(term, None)
                    .outcome
                    .map(|res| res.value);
                (term.id(), value)
            })
            .collect()
    }

    /// Evaluates `e` from scratch, ignoring every cached outcome. Used to
    /// confirm that equivalent expressions really agree.
    pub fn reevaluate(&mut self, e: &Expr) -> Outcome {
        Evaluator::new(&mut *self.runtime, &self.frame, &self.config, &self.table, &mut self.stats)
            .fresh()
            .run(e, None)
            .outcome
    }
}

fn classify(run: &Run) -> Slot {
    match (&run.outcome, &run.check) {
        (Err(Fault::Disconnected), _) | (_, Some(Err(Fault::Disconnected))) => Slot::Disconnected,
        (Err(fault), _) if fault.aborts_probe() => Slot::Abort {
            fault: fault.clone(),
            in_predicate: false,
        },
        (Err(fault), _) => Slot::Done(Verdict::Crashed(fault.clone())),
        (Ok(_), Some(Err(fault))) if fault.aborts_probe() => Slot::Abort {
            fault: fault.clone(),
            in_predicate: true,
        },
        (Ok(_), Some(Err(fault))) => Slot::Done(Verdict::PredicateCrashed(fault.clone())),
        (Ok(res), None | Some(Ok(true))) => Slot::Done(Verdict::Accepted(res.clone())),
        (Ok(res), Some(Ok(false))) => Slot::Done(Verdict::Rejected(res.clone())),
    }
}

fn accepts_all(program: &dyn Runtime, params: &[Type], args: &[Type]) -> bool {
    params.len() == args.len() && args.iter().zip(params).all(|(arg, param)| assignable(program, arg, param))
}
