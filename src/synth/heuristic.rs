//! Heuristic depth: the syntactic depth of an expression plus penalties
//! that push unnatural candidates to later levels.

use std::collections::HashMap;

use crate::config::SearchConfig;
use crate::corpus::Corpus;
use crate::expr::{Expr, ExprKind, Literal};
use crate::oracle::{Member, Oracle};
use crate::types::{Type, Value};

pub struct CostModel<'c> {
    corpus: &'c Corpus,
    config: &'c SearchConfig,
}

impl<'c> CostModel<'c> {
    pub fn new(corpus: &'c Corpus, config: &'c SearchConfig) -> Self {
        Self { corpus, config }
    }

    /// Raw depth plus one for each of: a repeated local or integer literal
    /// in a value position, a rare or blacklisted member, a constant field
    /// used outside an argument, and a boolean built once booleans are
    /// saturated for a non-boolean goal.
    pub fn cost(&self, e: &Expr, oracle: &mut Oracle<'_>, booleans_saturated: bool) -> usize {
        let mut cost = e.raw_depth();

        if !is_unique(e) {
            cost += 1;
        }
        if self.touches_unnatural(e, oracle) {
            cost += 1;
        }
        if uses_constant_outside_args(e, oracle) {
            cost += 1;
        }
        if booleans_saturated && oracle.type_of(e).is_some_and(|ty| ty.is_boolean()) {
            cost += 1;
        }

        cost
    }

    pub fn is_rare(&self, member: &Member) -> bool {
        self.corpus.is_rare(&member.owner().to_string(), &member.corpus_key(), self.config.policy.rare_fraction)
    }

    fn is_blacklisted(&self, member: &Member) -> bool {
        match member {
            Member::Method(m) => self.config.is_blacklisted(m),
            Member::Field(f) => self.config.is_blacklisted_field(&f.declaring.to_string(), &f.name),
        }
    }

    fn touches_unnatural(&self, e: &Expr, oracle: &mut Oracle<'_>) -> bool {
        members(e, oracle)
            .iter()
            .any(|m| self.is_rare(m) || self.is_blacklisted(m))
    }

    /// Corpus naturalness of every member `e` touches. Member-free
    /// expressions score as an average member.
    pub fn naturalness(&self, e: &Expr, oracle: &mut Oracle<'_>) -> f64 {
        let members = members(e, oracle);
        let keys: Vec<(String, String)> = members.iter()
            .map(|m| (m.owner().to_string(), m.corpus_key()))
            .collect();

        self.corpus.naturalness(keys.iter().map(|(ty, key)| (ty.as_str(), key.as_str())))
    }
}

/// Whether `e` reads a public constant field anywhere.
pub fn uses_constant(e: &Expr, oracle: &mut Oracle<'_>) -> bool {
    members(e, oracle).iter().any(Member::is_constant)
}

fn members(e: &Expr, oracle: &mut Oracle<'_>) -> Vec<Member> {
    let mut nodes = Vec::new();
    e.walk(&mut |node| {
        if matches!(node.kind(), ExprKind::Field(..) | ExprKind::Call(..) | ExprKind::New(..)) {
            nodes.push(node.clone());
        }
    });

    nodes.iter().filter_map(|node| oracle.member_of(node)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Token {
    Local(String),
    Int(i32),
}

/// No local and no integer literal occurs twice in a value position.
/// A local used only as a receiver is not a value.
fn is_unique(e: &Expr) -> bool {
    let mut counts: HashMap<Token, usize> = HashMap::new();
    count_tokens(e, false, &mut counts);
    counts.values().all(|&n| n < 2)
}

fn count_tokens(e: &Expr, receiver: bool, counts: &mut HashMap<Token, usize>) {
    match e.kind() {
        ExprKind::Var(name) if !receiver => {
            *counts.entry(Token::Local(name.to_string())).or_default() += 1;
        },
        ExprKind::Literal(Literal::Int(x)) => {
            *counts.entry(Token::Int(*x)).or_default() += 1;
        },
        ExprKind::Field(recv, _) => count_tokens(recv.unparen(), true, counts),
        ExprKind::Call(recv, _, args) => {
            count_tokens(recv.unparen(), true, counts);
            for arg in args {
                count_tokens(arg, false, counts);
            }
        },
        ExprKind::Paren(inner) => count_tokens(inner, receiver, counts),
        _ => {
            for child in e.children() {
                count_tokens(child, false, counts);
            }
        },
    }
}

fn uses_constant_outside_args(e: &Expr, oracle: &mut Oracle<'_>) -> bool {
    let mut outside = Vec::new();
    collect_outside_args(e, &mut outside);

    outside.iter().any(|node| oracle.member_of(node).is_some_and(|m| m.is_constant()))
}

fn collect_outside_args(e: &Expr, out: &mut Vec<Expr>) {
    match e.kind() {
        ExprKind::Field(recv, _) => {
            out.push(e.clone());
            collect_outside_args(recv, out);
        },
        ExprKind::Call(recv, _, _) => collect_outside_args(recv, out),
        ExprKind::New(_, _) => (),
        _ => {
            for child in e.children() {
                collect_outside_args(child, out);
            }
        },
    }
}

/// Boolean classes stop being interesting once both truth values exist and
/// the goal is not itself boolean.
pub fn booleans_saturated(goal_is_boolean: bool, seen: &[bool; 2]) -> bool {
    !goal_is_boolean && seen[0] && seen[1]
}

pub fn truth_index(value: &Value) -> Option<usize> {
    value.as_bool().map(usize::from)
}

pub fn is_boolean_goal(admissible: &[Type]) -> bool {
    !admissible.is_empty() && admissible.iter().all(Type::is_boolean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinopKind;
    use crate::oracle::Frame;
    use crate::runtime::heap::MemoryProgram;

    #[test]
    fn receivers_are_not_values() {
        let s = Expr::var("s");
        let upper = Expr::call(s.clone(), "toUpperCase", vec![]);
        let twice = Expr::binop(BinopKind::Plus, upper.clone(), upper);
        let concat = Expr::binop(BinopKind::Plus, s.clone(), s.clone());
        let incr = Expr::binop(BinopKind::Plus, Expr::binop(BinopKind::Plus, Expr::var("x"), Expr::int(1)), Expr::int(1));

        assert!(is_unique(&twice));
        assert!(!is_unique(&concat));
        assert!(!is_unique(&incr));
        assert!(is_unique(&Expr::call(s.clone(), "concat", vec![Expr::var("t")])));
        assert!(!is_unique(&Expr::call(s.clone(), "concat", vec![s])));
    }

    #[test]
    fn penalties_add_levels() {
        let mut program = MemoryProgram::new();
        let frame = Frame::new()
            .local("x", Type::int(), Value::Int(3))
            .local("s", Type::string(), Value::str("ab"));
        let corpus = Corpus::from_json_str(r#"{
            "types": { "String": { "length(0)": 900, "trim(0)": 1 } },
            "average": 100.0,
            "total": 901
        }"#).unwrap();
        let config = SearchConfig {
            blacklist: vec!["String.isEmpty".into()],
            ..SearchConfig::default()
        };
        let model = CostModel::new(&corpus, &config);
        let mut oracle = Oracle::new(&mut program, frame, config.clone());

        let s = Expr::var("s");
        let length = Expr::call(s.clone(), "length", vec![]);
        let trim = Expr::call(s.clone(), "trim", vec![]);
        let empty = Expr::call(s.clone(), "isEmpty", vec![]);
        let max = Expr::field(Expr::static_ref(Type::class("Integer")), "MAX_VALUE");
        let abs = Expr::call(Expr::static_ref(Type::class("Math")), "abs", vec![max.clone()]);

        assert_eq!(model.cost(&length, &mut oracle, false), 1);
        assert_eq!(model.cost(&trim, &mut oracle, false), 2);
        assert_eq!(model.cost(&empty, &mut oracle, false), 2);
        assert_eq!(model.cost(&empty, &mut oracle, true), 3);
        assert_eq!(model.cost(&max, &mut oracle, false), 2);
        assert_eq!(model.cost(&abs, &mut oracle, false), 2);
        assert_eq!(model.cost(&Expr::var("x"), &mut oracle, true), 0);

        assert!(model.naturalness(&length, &mut oracle) > model.naturalness(&trim, &mut oracle));
    }
}
