//! Live evaluation of one expression against the running program.
//!
//! Every mutation performed while evaluating is tracked by an
//! [`EffectScope`] and undone, in reverse order, when the scope is dropped,
//! whether evaluation finished, faulted, or unwound.

use std::rc::Rc;

use log::trace;

use crate::config::SearchConfig;
use crate::expr::{BinopKind, Expr, ExprId, ExprKind, UnopKind};
use crate::oracle::{pure, EvalResult, Frame, OracleStats, Outcome, SideTable};
use crate::runtime::{library, Effect, Fault, Introspection, MethodInfo, Runtime, Watchdog};
use crate::spec::Specification;
use crate::types::{Prim, Type, Value};

/// Redo/undo bracket around one evaluation.
pub struct EffectScope<'a> {
    runtime: &'a mut dyn Runtime,
    applied: Vec<Effect>,
}

impl<'a> EffectScope<'a> {
    pub fn new(runtime: &'a mut dyn Runtime) -> Self {
        Self {
            runtime,
            applied: Vec::new(),
        }
    }

    /// No effect has been applied since the scope was opened, so the heap
    /// is exactly as the search found it.
    pub fn is_pristine(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn applied(&self) -> &[Effect] {
        &self.applied
    }

    /// Replays previously recorded effects, in their original order.
    pub fn redo(&mut self, effects: &[Effect]) {
        for effect in effects {
            self.runtime.write(&effect.location, &effect.new);
            self.applied.push(effect.clone());
        }
    }

    /// Adopts whatever the last live call journaled.
    fn absorb(&mut self) {
        let effects = self.runtime.take_effects();
        self.applied.extend(effects);
    }
}

impl Drop for EffectScope<'_> {
    fn drop(&mut self) {
        self.absorb();
        for effect in self.applied.drain(..).rev() {
            self.runtime.write(&effect.location, &effect.old);
        }
    }
}

/// Result of running one candidate, and optionally the specification on
/// it, inside a fresh scope.
pub struct Run {
    pub outcome: Outcome,
    pub check: Option<Result<bool, Fault>>,
    /// Outcomes of every node evaluated from a pristine heap.
    pub observed: Vec<(ExprId, Outcome)>,
}

pub struct Evaluator<'a> {
    scope: EffectScope<'a>,
    frame: &'a Frame,
    config: &'a SearchConfig,
    table: &'a SideTable,
    stats: &'a mut OracleStats,
    bindings: Vec<(Rc<str>, Value)>,
    /// Nodes whose value was fixed before the candidate ran.
    snapshots: Vec<(ExprId, Result<Value, Fault>)>,
    observed: Vec<(ExprId, Outcome)>,
    reuse: bool,
    record: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        runtime: &'a mut dyn Runtime,
        frame: &'a Frame,
        config: &'a SearchConfig,
        table: &'a SideTable,
        stats: &'a mut OracleStats,
    ) -> Self {
        Self {
            scope: EffectScope::new(runtime),
            frame,
            config,
            table,
            stats,
            bindings: Vec::new(),
            snapshots: Vec::new(),
            observed: Vec::new(),
            reuse: true,
            record: true,
        }
    }

    /// Ignore cached outcomes and evaluate every node live.
    pub fn fresh(mut self) -> Self {
        self.reuse = false;
        self.record = false;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Vec<(ExprId, Result<Value, Fault>)>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn run(mut self, e: &Expr, spec: Option<&Specification>) -> Run {
        let outcome = self.eval(e).map(|value| EvalResult {
            value,
            effects: self.scope.applied().to_vec(),
        });
        let check = match (&outcome, spec) {
            (Ok(result), Some(spec)) => Some(self.check(spec, result)),
            _ => None,
        };

        Run {
            outcome,
            check,
            observed: std::mem::take(&mut self.observed),
        }
    }

    fn check(&mut self, spec: &Specification, result: &EvalResult) -> Result<bool, Fault> {
        match spec {
            Specification::Value(target) => Ok(&result.value == target),
            Specification::Type(target) => {
                if result.value.is_null() {
                    return Ok(true);
                }
                let runtime = &*self.scope.runtime;
                Ok(match runtime.runtime_type(&result.value) {
                    Type::Prim(prim) if target.is_reference() => runtime.boxes_into(prim, target),
                    ty => runtime.is_subtype(&ty, target),
                })
            },
            Specification::State { .. } | Specification::Predicate { .. } => {
                let Some((binding, predicate)) = spec.predicate_expr() else {
                    return Ok(false);
                };

                self.bindings.push((binding.into(), result.value.clone()));
                let (reuse, record) = (self.reuse, self.record);
                self.reuse = false;
                self.record = false;
                let verdict = self.eval(predicate);
                self.reuse = reuse;
                self.record = record;
                self.bindings.pop();

                match verdict? {
                    Value::Bool(b) => Ok(b),
                    _ => Err(Fault::threw("ClassCastException")),
                }
            },
        }
    }

    pub fn eval(&mut self, e: &Expr) -> Result<Value, Fault> {
        if let Some((_, snapshot)) = self.snapshots.iter().find(|(id, _)| *id == e.id()) {
            return snapshot.clone();
        }

        let table = self.table;

        if self.reuse && self.scope.is_pristine() {
            match table.outcome(e.id()) {
                Some(Ok(cached)) => {
                    self.scope.redo(&cached.effects);
                    return Ok(cached.value.clone());
                },
                Some(Err(fault)) => return Err(fault.clone()),
                None => (),
            }
        }

        let from_pristine = self.record && self.scope.is_pristine();
        let res = self.eval_node(e);

        if from_pristine && !matches!(&res, Err(f) if f.aborts_probe()) {
            let outcome = res.clone().map(|value| EvalResult {
                value,
                effects: self.scope.applied().to_vec(),
            });
            self.observed.push((e.id(), outcome));
        }

        res
    }

    fn eval_node(&mut self, e: &Expr) -> Result<Value, Fault> {
        match e.kind() {
            ExprKind::Literal(lit) => Ok(lit.to_value()),
            ExprKind::Var(name) => self.lookup(name),
            ExprKind::This => self.frame.this
                .as_ref()
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Fault::threw("NoThisInStaticContext")),
            ExprKind::StaticRef(ty) => Err(Fault::threw(&format!("{ty} is not a value"))),
            ExprKind::Paren(inner) => self.eval(inner),
            ExprKind::Field(recv, name) => self.field(recv, name),
            ExprKind::Index(arr, idx) => {
                let arr = self.eval(arr)?;
                let idx = self.eval(idx)?.as_int().ok_or_else(|| Fault::threw("ClassCastException"))?;
                if arr.is_null() {
                    return Err(Fault::npe());
                }
                self.scope.runtime.array_get(&arr, idx)
            },
            ExprKind::Binop(op, l, r) => self.binop(*op, l, r),
            ExprKind::Unop(op, inner) => {
                let v = self.eval(inner)?;
                unop(*op, &v)
            },
            ExprKind::Call(recv, name, args) => self.call(recv, name, args),
            ExprKind::New(ty, args) => {
                let values = self.eval_all(args)?;
                let ctor = self.scope.runtime.constructors(ty)
                    .into_iter()
                    .find(|c| self.applicable(c, &values))
                    .ok_or_else(|| Fault::threw("NoSuchMethodError"))?;
                let values = coerce_args(&ctor, values);

                self.live(|rt, dog| rt.construct(&ctor, &values, dog))
            },
            ExprKind::Cast(ty, inner) => {
                let v = self.eval(inner)?;
                self.cast(ty, v)
            },
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, Fault> {
        if let Some((_, v)) = self.bindings.iter().rev().find(|(n, _)| &**n == name) {
            return Ok(v.clone());
        }

        self.frame.locals
            .get(name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| Fault::threw(&format!("unbound variable {name}")))
    }

    fn eval_all(&mut self, args: &[Expr]) -> Result<Vec<Value>, Fault> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn live<T, F>(&mut self, f: F) -> Result<T, Fault>
    where
        F: FnOnce(&mut dyn Runtime, &Watchdog) -> Result<T, Fault>,
    {
        let dog = Watchdog::arm(self.config.policy.call_budget());
        self.stats.live_calls += 1;

        let res = f(&mut *self.scope.runtime, &dog);
        self.scope.absorb();

        match res {
            Ok(_) if dog.expired() => Err(Fault::Timeout),
            res => res,
        }
    }

    fn field(&mut self, recv: &Expr, name: &str) -> Result<Value, Fault> {
        if let ExprKind::StaticRef(ty) = recv.unparen().kind() {
            let field = self.scope.runtime.fields(ty)
                .into_iter()
                .find(|f| f.is_static && &*f.name == name)
                .ok_or_else(|| Fault::threw("NoSuchFieldError"))?;
            return self.live(|rt, dog| rt.get_field(None, &field, dog));
        }

        let object = self.eval(recv)?;
        if object.is_null() {
            return Err(Fault::npe());
        }

        let ty = self.scope.runtime.runtime_type(&object);
        let field = self.scope.runtime.fields(&ty)
            .into_iter()
            .find(|f| !f.is_static && &*f.name == name)
            .ok_or_else(|| Fault::threw("NoSuchFieldError"))?;

        self.live(|rt, dog| rt.get_field(Some(&object), &field, dog))
    }

    fn call(&mut self, recv: &Expr, name: &str, args: &[Expr]) -> Result<Value, Fault> {
        let (receiver, owner) = match recv.unparen().kind() {
            ExprKind::StaticRef(ty) => (None, ty.clone()),
            _ => {
                let object = self.eval(recv)?;
                let owner = self.scope.runtime.runtime_type(&object);
                (Some(object), owner)
            },
        };
        let values = self.eval_all(args)?;

        if receiver.as_ref().is_some_and(Value::is_null) {
            return Err(Fault::npe());
        }

        let is_static = receiver.is_none();
        let method = self.scope.runtime.methods(&owner)
            .into_iter()
            .find(|m| &*m.name == name && m.is_static == is_static && self.applicable(m, &values))
            .ok_or_else(|| Fault::threw("NoSuchMethodError"))?;
        let values = coerce_args(&method, values);

        self.invoke(receiver.as_ref(), &method, &values)
    }

    fn invoke(&mut self, receiver: Option<&Value>, method: &MethodInfo, args: &[Value]) -> Result<Value, Fault> {
        if method.is_native && !self.config.is_vetted(method) {
            trace!("refusing to enter {}", method.qualified());
            self.stats.blocked += 1;
            return Err(Fault::NativeBlocked(method.qualified().into()));
        }

        if self.config.policy.pure_shortcut {
            if let Some(res) = pure::shortcut(method, receiver, args) {
                self.stats.shortcuts += 1;
                return res;
            }
        }

        self.live(|rt, dog| rt.invoke(receiver, method, args, dog))
    }

    fn applicable(&self, method: &MethodInfo, args: &[Value]) -> bool {
        method.params.len() == args.len()
            && method.params.iter().zip(args).all(|(param, arg)| self.accepts(param, arg))
    }

    fn accepts(&self, param: &Type, arg: &Value) -> bool {
        match (param, arg.intrinsic_type()) {
            (Type::Prim(p), Some(Type::Prim(a))) => widens(a, *p),
            (Type::Prim(_), _) => false,
            (_, Some(Type::Prim(_))) => false,
            (_, _) if arg.is_null() => true,
            (param, _) => {
                let ty = self.scope.runtime.runtime_type(arg);
                self.scope.runtime.is_subtype(&ty, param)
            },
        }
    }

    fn binop(&mut self, op: BinopKind, l: &Expr, r: &Expr) -> Result<Value, Fault> {
        let lv = self.eval(l)?;

        match (op, &lv) {
            (BinopKind::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
            (BinopKind::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
            _ => (),
        }

        let rv = self.eval(r)?;

        if op == BinopKind::Plus && is_concat(&lv, &rv) {
            let (l, r) = (self.stringify(&lv)?, self.stringify(&rv)?);
            library::check_string_len(l.chars().count() + r.chars().count())?;
            return Ok(Value::Str(format!("{l}{r}").into()));
        }

        binop(op, &lv, &rv)
    }

    fn stringify(&mut self, v: &Value) -> Result<String, Fault> {
        match v {
            Value::Object(_) | Value::Array(_) => {
                let ty = self.scope.runtime.runtime_type(v);
                let to_string = self.scope.runtime.methods(&ty)
                    .into_iter()
                    .find(|m| &*m.name == "toString" && m.params.is_empty() && !m.is_static)
                    .ok_or_else(|| Fault::threw("NoSuchMethodError"))?;

                match self.invoke(Some(v), &to_string, &[])? {
                    Value::Str(s) => Ok(s.to_string()),
                    other => Ok(other.to_string()),
                }
            },
            other => Ok(other.to_string()),
        }
    }

    fn cast(&self, ty: &Type, v: Value) -> Result<Value, Fault> {
        if let Type::Prim(p) = ty {
            return convert(*p, &v).ok_or_else(|| Fault::threw("ClassCastException"));
        }

        match v.intrinsic_type() {
            Some(Type::Null) => Ok(v),
            Some(Type::Prim(_)) => Err(Fault::threw("ClassCastException")),
            _ => {
                let actual = self.scope.runtime.runtime_type(&v);
                if self.scope.runtime.is_subtype(&actual, ty) {
                    Ok(v)
                } else {
                    Err(Fault::threw("ClassCastException"))
                }
            },
        }
    }
}

/// Primitive widening conversion (or identity).
pub fn widens(from: Prim, to: Prim) -> bool {
    from == to || (from != Prim::Boolean && to != Prim::Char && from.promote(to) == Some(to))
}

/// Static assignability of `from` to a slot of type `to`.
pub fn assignable<P: Introspection + ?Sized>(program: &P, from: &Type, to: &Type) -> bool {
    match (from, to) {
        (Type::Prim(a), Type::Prim(b)) => widens(*a, *b),
        (Type::Prim(_), _) | (_, Type::Prim(_)) => false,
        _ => program.is_subtype(from, to),
    }
}

fn coerce_args(method: &MethodInfo, values: Vec<Value>) -> Vec<Value> {
    values.into_iter()
        .zip(&method.params)
        .map(|(v, param)| match param {
            Type::Prim(p) => convert(*p, &v).unwrap_or(v),
            _ => v,
        })
        .collect()
}

fn is_concat(l: &Value, r: &Value) -> bool {
    let numeric_or_bool = |v: &Value| matches!(v.intrinsic_type(), Some(Type::Prim(_)));

    matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) || !(numeric_or_bool(l) && numeric_or_bool(r))
}

fn prim_of(v: &Value) -> Option<Prim> {
    v.intrinsic_type().and_then(|t| t.prim())
}

/// Primitive conversion as performed by a cast.
fn convert(to: Prim, v: &Value) -> Option<Value> {
    let from = prim_of(v)?;

    if (from == Prim::Boolean) != (to == Prim::Boolean) {
        return None;
    }

    let out = match to {
        Prim::Boolean => v.clone(),
        Prim::Int => match v {
            Value::Double(x) => Value::Int(*x as i32),
            other => Value::Int(other.as_long()? as i32),
        },
        Prim::Long => match v {
            Value::Double(x) => Value::Long(*x as i64),
            other => Value::Long(other.as_long()?),
        },
        Prim::Double => Value::Double(v.as_double()?),
        Prim::Char => {
            let code = match v {
                Value::Double(x) => *x as i32,
                other => other.as_long()? as i32,
            };
            Value::Char(char::from_u32(code as u16 as u32).unwrap_or('\u{fffd}'))
        },
    };

    Some(out)
}

fn arithmetic() -> Fault {
    Fault::threw("ArithmeticException")
}

macro_rules! integral_op {
    ($op:expr, $a:expr, $b:expr, $wrap:path) => {{
        let (a, b) = ($a, $b);
        match $op {
            BinopKind::Plus => $wrap(a.wrapping_add(b)),
            BinopKind::Minus => $wrap(a.wrapping_sub(b)),
            BinopKind::Times => $wrap(a.wrapping_mul(b)),
            BinopKind::Divide if b == 0 => return Err(arithmetic()),
            BinopKind::Divide => $wrap(a.wrapping_div(b)),
            BinopKind::Rem if b == 0 => return Err(arithmetic()),
            BinopKind::Rem => $wrap(a.wrapping_rem(b)),
            BinopKind::Lt => Value::Bool(a < b),
            BinopKind::Le => Value::Bool(a <= b),
            BinopKind::Gt => Value::Bool(a > b),
            BinopKind::Ge => Value::Bool(a >= b),
            BinopKind::Eq => Value::Bool(a == b),
            BinopKind::Ne => Value::Bool(a != b),
            BinopKind::And | BinopKind::Or => return Err(Fault::threw("ClassCastException")),
        }
    }};
}

/// Non-concatenating binary operators on already evaluated operands.
pub fn binop(op: BinopKind, l: &Value, r: &Value) -> Result<Value, Fault> {
    let cce = || Fault::threw("ClassCastException");

    match (op, l, r) {
        (BinopKind::And, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a && *b)),
        (BinopKind::Or, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a || *b)),
        (BinopKind::Eq, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(a == b)),
        (BinopKind::Ne, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(a != b)),
        _ => (),
    }

    let (Some(lp), Some(rp)) = (prim_of(l), prim_of(r)) else {
        // Reference comparison.
        return match op {
            BinopKind::Eq => Ok(Value::Bool(l == r)),
            BinopKind::Ne => Ok(Value::Bool(l != r)),
            _ => Err(cce()),
        };
    };

    let res = match lp.promote(rp).ok_or_else(cce)? {
        Prim::Int => integral_op!(op, l.as_int().ok_or_else(cce)?, r.as_int().ok_or_else(cce)?, Value::Int),
        Prim::Long => integral_op!(op, l.as_long().ok_or_else(cce)?, r.as_long().ok_or_else(cce)?, Value::Long),
        Prim::Double => {
            let (a, b) = (l.as_double().ok_or_else(cce)?, r.as_double().ok_or_else(cce)?);
            match op {
                BinopKind::Plus => Value::Double(a + b),
                BinopKind::Minus => Value::Double(a - b),
                BinopKind::Times => Value::Double(a * b),
                BinopKind::Divide => Value::Double(a / b),
                BinopKind::Rem => Value::Double(a % b),
                BinopKind::Lt => Value::Bool(a < b),
                BinopKind::Le => Value::Bool(a <= b),
                BinopKind::Gt => Value::Bool(a > b),
                BinopKind::Ge => Value::Bool(a >= b),
                BinopKind::Eq => Value::Bool(a == b),
                BinopKind::Ne => Value::Bool(a != b),
                BinopKind::And | BinopKind::Or => return Err(cce()),
            }
        },
        Prim::Boolean | Prim::Char => return Err(cce()),
    };

    Ok(res)
}

pub fn unop(op: UnopKind, v: &Value) -> Result<Value, Fault> {
    let res = match (op, v) {
        (UnopKind::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnopKind::Negate, Value::Int(x)) => Value::Int(x.wrapping_neg()),
        (UnopKind::Negate, Value::Char(c)) => Value::Int(-(*c as i32)),
        (UnopKind::Negate, Value::Long(x)) => Value::Long(x.wrapping_neg()),
        (UnopKind::Negate, Value::Double(x)) => Value::Double(-x),
        _ => return Err(Fault::threw("ClassCastException")),
    };

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_wraps_and_traps() {
        assert_eq!(binop(BinopKind::Plus, &Value::Int(i32::MAX), &Value::Int(1)), Ok(Value::Int(i32::MIN)));
        assert_eq!(binop(BinopKind::Divide, &Value::Int(7), &Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(binop(BinopKind::Rem, &Value::Int(-7), &Value::Int(2)), Ok(Value::Int(-1)));
        assert_eq!(binop(BinopKind::Divide, &Value::Int(1), &Value::Int(0)), Err(arithmetic()));
        assert_eq!(binop(BinopKind::Plus, &Value::Int(1), &Value::Long(2)), Ok(Value::Long(3)));
        assert_eq!(binop(BinopKind::Divide, &Value::Double(1.0), &Value::Int(0)), Ok(Value::Double(f64::INFINITY)));
        assert_eq!(binop(BinopKind::Lt, &Value::Char('a'), &Value::Int(98)), Ok(Value::Bool(true)));
    }

    #[test]
    fn reference_equality() {
        assert_eq!(binop(BinopKind::Eq, &Value::Null, &Value::Null), Ok(Value::Bool(true)));
        assert_eq!(binop(BinopKind::Ne, &Value::str("a"), &Value::Null), Ok(Value::Bool(true)));
        assert!(binop(BinopKind::Minus, &Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn casts_convert_primitives() {
        assert_eq!(convert(Prim::Int, &Value::Double(2.9)), Some(Value::Int(2)));
        assert_eq!(convert(Prim::Int, &Value::Long(1 << 32)), Some(Value::Int(0)));
        assert_eq!(convert(Prim::Char, &Value::Int(65)), Some(Value::Char('A')));
        assert_eq!(convert(Prim::Int, &Value::Bool(true)), None);
        assert!(widens(Prim::Char, Prim::Int));
        assert!(widens(Prim::Int, Prim::Double));
        assert!(!widens(Prim::Long, Prim::Int));
        assert!(!widens(Prim::Int, Prim::Char));
    }

    #[test]
    fn negation() {
        assert_eq!(unop(UnopKind::Negate, &Value::Int(i32::MIN)), Ok(Value::Int(i32::MIN)));
        assert_eq!(unop(UnopKind::Not, &Value::Bool(true)), Ok(Value::Bool(false)));
        assert!(unop(UnopKind::Not, &Value::Int(1)).is_err());
    }
}
