//! The statement a search leaves in the user's source: `choose(...)` over
//! every surviving candidate, or `chosen(e)` once only one is left.
//!
//! Re-running the program through such a statement refines it: each
//! alternative is checked again and the ones that fail are dropped.

use std::fmt;

use log::debug;

use crate::error::SearchError;
use crate::expr::{Expr, ExprKind};
use crate::oracle::{Oracle, Verdict};
use crate::search::Candidate;
use crate::spec::Specification;
use crate::syntax::Parser;

pub const CHOOSE: &str = "choose";
pub const CHOSEN: &str = "chosen";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Choose {
        lhs: Option<String>,
        alternatives: Vec<Expr>,
    },
    Chosen {
        lhs: Option<String>,
        expr: Expr,
    },
}

impl Placeholder {
    /// `None` when there is nothing to offer.
    pub fn from_candidates(lhs: Option<&str>, candidates: &[Candidate]) -> Option<Self> {
        Self::from_exprs(lhs.map(str::to_string), candidates.iter().map(|c| c.expr.clone()).collect())
    }

    fn from_exprs(lhs: Option<String>, mut exprs: Vec<Expr>) -> Option<Self> {
        match exprs.len() {
            0 => None,
            1 => exprs.pop().map(|expr| Placeholder::Chosen { lhs, expr }),
            _ => Some(Placeholder::Choose { lhs, alternatives: exprs }),
        }
    }

    /// Parses `x = choose(a, b);`, `chosen(a);` and the like.
    pub fn parse(src: &str, is_type: &dyn Fn(&str) -> bool) -> Result<Self, SearchError> {
        let mut parser = Parser::new(src, is_type)?;
        let lhs = match parser.ident() {
            Ok(name) if parser.eat_assign() => Some(name),
            _ => {
                parser = Parser::new(src, is_type)?;
                None
            },
        };
        let call = parser.expr()?;
        parser.finish()?;

        let ExprKind::Call(recv, name, args) = call.kind() else {
            return Err(SearchError::spec(format!("`{call}` is not a {CHOOSE} or {CHOSEN} statement")));
        };
        if !matches!(recv.kind(), ExprKind::This) {
            return Err(SearchError::spec(format!("`{call}` is not a {CHOOSE} or {CHOSEN} statement")));
        }

        match (&**name, args.as_slice()) {
            (CHOOSE, []) => Err(SearchError::spec("`choose` needs at least one alternative")),
            (CHOOSE, _) => Ok(Placeholder::Choose {
                lhs,
                alternatives: args.clone(),
            }),
            (CHOSEN, [expr]) => Ok(Placeholder::Chosen {
                lhs,
                expr: expr.clone(),
            }),
            (CHOSEN, _) => Err(SearchError::spec("`chosen` takes exactly one expression")),
            _ => Err(SearchError::spec(format!("`{name}` is not a {CHOOSE} or {CHOSEN} statement"))),
        }
    }

    pub fn lhs(&self) -> Option<&str> {
        match self {
            Placeholder::Choose { lhs, .. } | Placeholder::Chosen { lhs, .. } => lhs.as_deref(),
        }
    }

    pub fn alternatives(&self) -> Vec<&Expr> {
        match self {
            Placeholder::Choose { alternatives, .. } => alternatives.iter().collect(),
            Placeholder::Chosen { expr, .. } => vec![expr],
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Placeholder::Chosen { .. })
    }

    /// Re-checks the open alternatives against `spec` at the current
    /// program state. A resolved placeholder is returned unchanged; `None`
    /// means no alternative survived.
    pub fn refine(self, oracle: &mut Oracle<'_>, spec: &Specification) -> Result<Option<Self>, SearchError> {
        let (lhs, alternatives) = match self {
            Placeholder::Choose { lhs, alternatives } => (lhs, alternatives),
            chosen @ Placeholder::Chosen { .. } => return Ok(Some(chosen)),
        };

        let verdicts = oracle.evaluate(&alternatives, Some(spec))?;
        let before = alternatives.len();
        let kept: Vec<Expr> = alternatives.into_iter()
            .zip(verdicts)
            .filter(|(_, verdict)| matches!(verdict, Verdict::Accepted(_)))
            .map(|(e, _)| e)
            .collect();

        debug!("Refined {before} alternatives down to {}", kept.len());

        Ok(Self::from_exprs(lhs, kept))
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(lhs) = self.lhs() {
            write!(f, "{lhs} = ")?;
        }

        match self {
            Placeholder::Choose { alternatives, .. } => {
                write!(f, "{CHOOSE}(")?;
                for (idx, alt) in alternatives.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{alt}")?;
                }
                f.write_str(");")
            },
            Placeholder::Chosen { expr, .. } => write!(f, "{CHOSEN}({expr});"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_types(_: &str) -> bool {
        false
    }

    #[test]
    fn parses_and_renders() {
        let choose = Placeholder::parse("y = choose(x + 1, x - 1);", &no_types).unwrap();
        assert_eq!(choose.lhs(), Some("y"));
        assert_eq!(choose.alternatives().len(), 2);
        assert_eq!(choose.to_string(), "y = choose(x + 1, x - 1);");

        let chosen = Placeholder::parse("chosen(s.length())", &no_types).unwrap();
        assert!(chosen.is_resolved());
        assert_eq!(chosen.lhs(), None);
        assert_eq!(chosen.to_string(), "chosen(s.length());");
    }

    #[test]
    fn rejects_other_statements() {
        assert!(Placeholder::parse("y = x + 1;", &no_types).is_err());
        assert!(Placeholder::parse("y = choose();", &no_types).is_err());
        assert!(Placeholder::parse("chosen(a, b);", &no_types).is_err());
        assert!(Placeholder::parse("y = s.choose(a);", &no_types).is_err());
    }
}
