use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::constraint::TypeConstraint;
use crate::error::SearchError;
use crate::expr::{Expr, ExprKind, Literal};
use crate::oracle::Frame;
use crate::runtime::Introspection;
use crate::syntax::{parse_expr, parse_literal};
use crate::types::{Type, Value};

/// Name a predicate specification binds the candidate's value to unless
/// told otherwise.
pub const DEFAULT_BOUND: &str = "_rv";

/// What the user demonstrated. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specification {
    /// The expression must evaluate to this value.
    Value(Value),
    /// The expression's value must be an instance of this type.
    Type(Type),
    /// A predicate over `before(x)` and `after(x)`, where `after(x)` is the
    /// candidate's value and `before(x)` the variable's current value.
    State {
        variable: Rc<str>,
        /// Name `after(variable)` was rewritten to.
        binding: Rc<str>,
        predicate: Expr,
        /// Subterms of `predicate` that read the heap without observing the
        /// candidate. They are evaluated before the candidate runs, so
        /// `before(p).f` sees the field as it was.
        snapshots: Vec<Expr>,
        source: String,
    },
    /// A boolean predicate over the candidate's value, bound to `bound`.
    Predicate {
        bound: Rc<str>,
        predicate: Expr,
        source: String,
    },
}

fn after_name(variable: &str) -> String {
    format!("{variable}'")
}

impl Specification {
    /// Parses a demonstrated literal such as `7` or `"ABAB"`.
    pub fn parse_value(src: &str) -> Result<Self, SearchError> {
        Ok(Specification::Value(parse_literal(src)?.to_value()))
    }

    pub fn type_named<P: Introspection + ?Sized>(name: &str, program: &P) -> Result<Self, SearchError> {
        let ty = Type::parse(name)
            .ok_or_else(|| SearchError::spec(format!("`{name}` is not a type name")))?;

        let mut base = &ty;
        while let Some(elem) = base.element() {
            base = elem;
        }
        if let Type::Class(class) = base {
            if !program.is_type_name(class) {
                return Err(SearchError::spec(format!("unknown type `{class}`")));
            }
        }
        if ty == Type::Null {
            return Err(SearchError::spec("`null` is not a target type"));
        }

        Ok(Specification::Type(ty))
    }

    /// Builds a state specification such as `after(x) == before(x) + 1`.
    pub fn state<P: Introspection + ?Sized>(
        src: &str,
        variable: &str,
        frame: &Frame,
        program: &P,
    ) -> Result<Self, SearchError> {
        if frame.local_type(variable).is_none() {
            return Err(SearchError::spec(format!("`{variable}` is not a local variable")));
        }

        let is_type = |name: &str| program.is_type_name(name);
        let parsed = parse_expr(src, &is_type)?;
        let binding = after_name(variable);
        let mut error = None;
        let mut mentions_after = false;

        let predicate = parsed.rewrite(&mut |node| {
            let ExprKind::Call(recv, name, args) = node.kind() else {
                return None;
            };
            if !matches!(recv.kind(), ExprKind::This) || !matches!(&**name, "before" | "after") {
                return None;
            }

            let target = match args.as_slice() {
                [arg] => arg.as_var(),
                _ => None,
            };
            match (target, &**name) {
                (Some(v), "after") if v == variable => {
                    mentions_after = true;
                    Some(Expr::var(&binding))
                },
                (Some(v), "after") => {
                    error = error.take().or(Some(format!("only `after({variable})` can be observed, not `after({v})`")));
                    None
                },
                (Some(v), _) if frame.local_type(v).is_some() => Some(Expr::var(v)),
                _ => {
                    error = error.take().or(Some(format!("`{name}` takes one local variable")));
                    None
                },
            }
        });

        if let Some(error) = error {
            return Err(SearchError::spec(error));
        }
        if !mentions_after {
            return Err(SearchError::spec(format!("predicate never mentions `after({variable})`")));
        }
        check_variables(&predicate, frame, &binding)?;

        let mut snapshots = Vec::new();
        collect_snapshots(&predicate, &binding, &mut snapshots);

        Ok(Specification::State {
            variable: variable.into(),
            binding: binding.into(),
            predicate,
            snapshots,
            source: src.trim().to_string(),
        })
    }

    /// Builds a predicate specification such as `_rv > 3 && _rv < 10`.
    pub fn predicate<P: Introspection + ?Sized>(
        src: &str,
        bound: Option<&str>,
        frame: &Frame,
        program: &P,
    ) -> Result<Self, SearchError> {
        let bound = bound.unwrap_or(DEFAULT_BOUND);
        let is_type = |name: &str| program.is_type_name(name);
        let predicate = parse_expr(src, &is_type)?;

        let mut mentions_bound = false;
        predicate.walk(&mut |e| mentions_bound |= e.as_var() == Some(bound));
        if !mentions_bound {
            return Err(SearchError::spec(format!("predicate never mentions `{bound}`")));
        }
        check_variables(&predicate, frame, bound)?;

        Ok(Specification::Predicate {
            bound: bound.into(),
            predicate,
            source: src.trim().to_string(),
        })
    }

    /// The name the candidate's value is bound to and the predicate to
    /// evaluate, for predicate-shaped specifications.
    pub fn predicate_expr(&self) -> Option<(&str, &Expr)> {
        match self {
            Specification::State { binding, predicate, .. } => Some((binding, predicate)),
            Specification::Predicate { bound, predicate, .. } => Some((bound, predicate)),
            Specification::Value(_) | Specification::Type(_) => None,
        }
    }

    /// Subterms to evaluate against the state found before the candidate.
    pub fn snapshots(&self) -> &[Expr] {
        match self {
            Specification::State { snapshots, .. } => snapshots,
            _ => &[],
        }
    }

    /// The variable a state specification describes.
    pub fn assigned_variable(&self) -> Option<&str> {
        match self {
            Specification::State { variable, .. } => Some(variable),
            _ => None,
        }
    }

    /// The constraint a search starts from when none is given.
    pub fn default_constraint<P: Introspection + ?Sized>(&self, frame: &Frame, program: &P) -> TypeConstraint {
        match self {
            Specification::Value(Value::Null) => TypeConstraint::Supertype(Type::object()),
            Specification::Value(v @ (Value::Object(_) | Value::Array(_))) => {
                TypeConstraint::Supertype(program.runtime_type(v))
            },
            Specification::Value(v) => match v.intrinsic_type() {
                Some(ty) => TypeConstraint::Exact(ty),
                None => TypeConstraint::Unconstrained,
            },
            Specification::Type(ty) => TypeConstraint::Supertype(ty.clone()),
            Specification::State { variable, .. } => match frame.local_type(variable) {
                Some(ty @ Type::Prim(_)) => TypeConstraint::Exact(ty.clone()),
                Some(ty) => TypeConstraint::Supertype(ty.clone()),
                None => TypeConstraint::Unconstrained,
            },
            Specification::Predicate { .. } => TypeConstraint::Unconstrained,
        }
    }

    /// Literal constants worth seeding the first level with: the
    /// demonstrated primitive, or the primitive literals of a predicate.
    pub fn seed_literals(&self) -> Vec<Literal> {
        let is_primitive = |lit: &Literal| !matches!(lit, Literal::Null | Literal::Str(_));

        match self {
            Specification::Value(v) => Literal::from_value(v)
                .filter(is_primitive)
                .into_iter()
                .collect(),
            Specification::Type(_) => Vec::new(),
            Specification::State { predicate, .. } | Specification::Predicate { predicate, .. } => {
                let mut out = IndexSet::new();
                predicate.walk(&mut |e| {
                    if let Some(lit) = e.as_literal().filter(|lit| is_primitive(lit)) {
                        out.insert(lit.clone());
                    }
                });
                out.into_iter().collect()
            },
        }
    }
}

/// Collects the largest subterms of `e` that never mention `binding` but
/// do read the heap.
fn collect_snapshots(e: &Expr, binding: &str, out: &mut Vec<Expr>) {
    let mut observes = false;
    let mut reads_heap = false;

    e.walk(&mut |node| {
        observes |= node.as_var() == Some(binding);
        reads_heap |= matches!(
            node.kind(),
            ExprKind::Field(..) | ExprKind::Call(..) | ExprKind::Index(..) | ExprKind::New(..)
        );
    });

    if !observes {
        if reads_heap {
            out.push(e.clone());
        }
        return;
    }

    for child in e.children() {
        collect_snapshots(child, binding, out);
    }
}

fn check_variables(predicate: &Expr, frame: &Frame, bound: &str) -> Result<(), SearchError> {
    let mut unknown = None;

    predicate.walk(&mut |e| {
        if let Some(name) = e.as_var() {
            if name != bound && frame.local_type(name).is_none() {
                unknown = unknown.take().or_else(|| Some(name.to_string()));
            }
        }
    });

    match unknown {
        Some(name) => Err(SearchError::spec(format!("unknown variable `{name}` in predicate"))),
        None => Ok(()),
    }
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Specification::Value(Value::Str(s)) => write!(f, "value {}", Literal::Str(s.clone())),
            Specification::Value(v) => write!(f, "value {v}"),
            Specification::Type(ty) => write!(f, "type {ty}"),
            Specification::State { source, .. } => write!(f, "state {source}"),
            Specification::Predicate { source, .. } => write!(f, "predicate {source}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::heap::MemoryProgram;

    fn frame() -> Frame {
        Frame::new()
            .local("x", Type::int(), Value::Int(5))
            .local("s", Type::string(), Value::str("ab"))
    }

    #[test]
    fn state_rewrites_before_and_after() {
        let program = MemoryProgram::new();
        let spec = Specification::state("after(x) == before(x) + 1", "x", &frame(), &program).unwrap();
        let (binding, predicate) = spec.predicate_expr().unwrap();

        assert_eq!(binding, "x'");
        assert_eq!(predicate.to_string(), "x' == x + 1");
        assert_eq!(spec.default_constraint(&frame(), &program), TypeConstraint::Exact(Type::int()));
        assert_eq!(spec.seed_literals(), vec![Literal::Int(1)]);
        assert!(spec.snapshots().is_empty());
    }

    #[test]
    fn before_reads_are_snapshotted() {
        let mut program = MemoryProgram::new();
        program.add_class(crate::runtime::heap::ClassBuilder::new("Box").field("v", Type::int()));
        let b = program.heap_mut().alloc("Box", vec![("v", Value::Int(1))]);
        let frame = Frame::new().local("b", Type::class("Box"), b);

        let spec = Specification::state("after(b).v == before(b).v + 1 && after(b) == before(b)", "b", &frame, &program)
            .unwrap();
        let snapshots: Vec<String> = spec.snapshots().iter().map(Expr::to_string).collect();

        assert_eq!(snapshots, vec!["b.v + 1"]);
    }

    #[test]
    fn malformed_specifications_are_rejected() {
        let program = MemoryProgram::new();
        let frame = frame();

        assert!(Specification::state("after(x) ==", "x", &frame, &program).is_err());
        assert!(Specification::state("before(x) == 1", "x", &frame, &program).is_err());
        assert!(Specification::state("after(s) == 1", "x", &frame, &program).is_err());
        assert!(Specification::state("after(x) == y", "x", &frame, &program).is_err());
        assert!(Specification::state("after(x) == 1", "nope", &frame, &program).is_err());
        assert!(Specification::predicate("x > 3", None, &frame, &program).is_err());
        assert!(Specification::type_named("Nope", &program).is_err());
        assert!(Specification::parse_value("x + 1").is_err());
    }

    #[test]
    fn value_constraints_and_seeds() {
        let program = MemoryProgram::new();
        let frame = frame();
        let seven = Specification::parse_value("7").unwrap();
        let abab = Specification::parse_value("\"ABAB\"").unwrap();

        assert_eq!(seven.default_constraint(&frame, &program), TypeConstraint::Exact(Type::int()));
        assert_eq!(seven.seed_literals(), vec![Literal::Int(7)]);
        assert_eq!(abab.default_constraint(&frame, &program), TypeConstraint::Exact(Type::string()));
        assert!(abab.seed_literals().is_empty());

        let pred = Specification::predicate("_rv > 3 && _rv < x", None, &frame, &program).unwrap();
        assert_eq!(pred.seed_literals(), vec![Literal::Int(3)]);
        assert_eq!(pred.to_string(), "predicate _rv > 3 && _rv < x");
    }
}
