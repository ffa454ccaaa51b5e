//! Equivalence classes of expressions that evaluate to the same value with
//! the same net effects, and their re-expansion into every known phrasing.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};

use crate::expr::{Expr, ExprKind};
use crate::oracle::{EvalResult, ResultKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    New,
    Existing,
}

#[derive(Debug, Clone)]
struct Entry {
    expr: Expr,
    cost: usize,
    /// Touches a public constant field; such members make poor
    /// representatives.
    uses_constant: bool,
}

#[derive(Debug, Clone)]
pub struct EquivalenceClass {
    pub result: EvalResult,
    entries: Vec<Entry>,
}

impl EquivalenceClass {
    pub fn members(&self) -> impl Iterator<Item = &Expr> {
        self.entries.iter().map(|e| &e.expr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn representative(&self) -> Option<&Entry> {
        self.entries.iter().min_by_key(|e| (e.uses_constant, e.cost, e.expr.to_string().len()))
    }
}

/// What expansion needs to know about expressions it did not build itself.
pub trait ExpandEnv {
    /// Heuristic cost of a rebuilt top-level expression, or `None` when it
    /// is not admissible at all.
    fn cost(&mut self, e: &Expr) -> Option<usize>;

    /// Whether evaluating `e` leaves the heap untouched. Siblings evaluated
    /// after an effectful one are never substituted.
    fn effect_free(&mut self, e: &Expr) -> bool;

    /// `rebuilt` was derived from `original` by substituting equivalents.
    fn rebuilt(&mut self, original: &Expr, rebuilt: &Expr);
}

#[derive(Debug, Default)]
pub struct Registry {
    classes: IndexMap<ResultKey, EquivalenceClass>,
    index: HashMap<Expr, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Files `expr` under the class of `result`.
    pub fn classify(&mut self, expr: Expr, result: &EvalResult, cost: usize, uses_constant: bool) -> Classified {
        let key = result.key();
        let entry = Entry {
            expr: expr.clone(),
            cost,
            uses_constant,
        };

        match self.classes.get_full_mut(&key) {
            Some((idx, _, class)) => {
                if !self.index.contains_key(&expr) {
                    class.entries.push(entry);
                    self.index.insert(expr, idx);
                }
                Classified::Existing
            },
            None => {
                let idx = self.classes.len();
                self.classes.insert(key, EquivalenceClass {
                    result: result.clone(),
                    entries: vec![entry],
                });
                self.index.insert(expr, idx);
                Classified::New
            },
        }
    }

    pub fn class(&self, key: &ResultKey) -> Option<&EquivalenceClass> {
        self.classes.get(key)
    }

    pub fn class_of(&self, e: &Expr) -> Option<&EquivalenceClass> {
        let idx = *self.index.get(e)?;
        self.classes.get_index(idx).map(|(_, class)| class)
    }

    pub fn classes(&self) -> impl Iterator<Item = (&ResultKey, &EquivalenceClass)> {
        self.classes.iter()
    }

    /// The member to extend further: cheapest first, avoiding members that
    /// use constant fields.
    pub fn representative(&self, key: &ResultKey) -> Option<&Expr> {
        self.classes.get(key)?.representative().map(|e| &e.expr)
    }

    pub fn representatives(&self) -> impl Iterator<Item = &Expr> {
        self.classes.values().filter_map(|c| c.representative().map(|e| &e.expr))
    }

    /// Every phrasing of the `accepted` expressions obtained by
    /// substituting known equivalents for their subtrees, at every
    /// position, keeping those whose cost stays within `max_depth`.
    ///
    /// Cast-bearing phrasings are dropped whenever a cast-free phrasing of
    /// the same expression exists.
    pub fn expand<E: ExpandEnv>(
        &self,
        accepted: &[Expr],
        max_depth: usize,
        max_expansions: usize,
        env: &mut E,
    ) -> Vec<Expr> {
        let mut expander = Expander {
            registry: self,
            env,
            memo: HashMap::new(),
            visiting: HashSet::new(),
            cycles: 0,
            cap: max_expansions.max(1),
        };
        let mut out = IndexSet::new();

        for e in accepted {
            let variants: Vec<Expr> = expander.variants(e, e.raw_depth().max(max_depth))
                .into_iter()
                .filter(|v| expander.env.cost(v).is_some_and(|c| c <= max_depth))
                .collect();
            let has_cast_free = variants.iter().any(|v| !v.contains_cast());

            trace!("{e} expands to {} phrasings", variants.len());

            for v in variants {
                if has_cast_free && v.contains_cast() {
                    continue;
                }
                out.insert(v);
            }
        }

        debug!("Expansion produced {} expressions from {}", out.len(), accepted.len());

        out.into_iter().collect()
    }
}

struct Expander<'r, 'e, E> {
    registry: &'r Registry,
    env: &'e mut E,
    memo: HashMap<(Expr, usize), Vec<Expr>>,
    visiting: HashSet<Expr>,
    /// Times the cycle guard cut a walk short. Results computed under a
    /// cut are partial and stay out of `memo`.
    cycles: usize,
    cap: usize,
}

impl<E: ExpandEnv> Expander<'_, '_, E> {
    /// Phrasings of `e` whose raw depth is within `budget`. Always contains
    /// `e` itself when it fits.
    fn variants(&mut self, e: &Expr, budget: usize) -> Vec<Expr> {
        if let Some(known) = self.memo.get(&(e.clone(), budget)) {
            return known.clone();
        }
        if !self.visiting.insert(e.clone()) {
            self.cycles += 1;
            return vec![e.clone()];
        }
        let cycles = self.cycles;

        let alternatives: Vec<Expr> = match self.registry.class_of(e) {
            Some(class) => std::iter::once(e.clone())
                .chain(class.members().filter(|m| *m != e).cloned())
                .collect(),
            None => vec![e.clone()],
        };

        let mut out = IndexSet::new();
        for alt in alternatives {
            if alt.raw_depth() > budget {
                continue;
            }
            for v in self.rephrase(&alt, budget) {
                if out.len() >= self.cap {
                    break;
                }
                out.insert(v);
            }
        }

        self.visiting.remove(e);

        let out: Vec<Expr> = out.into_iter().collect();
        if self.cycles == cycles {
            self.memo.insert((e.clone(), budget), out.clone());
        }
        out
    }

    /// `e` with each child replaced by each of its phrasings.
    fn rephrase(&mut self, e: &Expr, budget: usize) -> Vec<Expr> {
        let children: Vec<Expr> = e.children().into_iter().cloned().collect();
        if children.is_empty() {
            return vec![e.clone()];
        }

        let child_budget = match e.kind() {
            ExprKind::Paren(_) | ExprKind::Cast(_, _) => budget,
            _ => budget.saturating_sub(1),
        };

        let mut pure_so_far = true;
        let mut options = Vec::with_capacity(children.len());
        for child in &children {
            let choices = if pure_so_far {
                self.variants(child, child_budget)
            } else {
                vec![child.clone()]
            };
            pure_so_far &= self.env.effect_free(child);
            options.push(choices);
        }

        let mut combos: Vec<Vec<Expr>> = vec![Vec::new()];
        for choices in options {
            let mut next = Vec::new();
            'outer: for prefix in &combos {
                for choice in &choices {
                    if next.len() >= self.cap {
                        break 'outer;
                    }
                    let mut combo = prefix.clone();
                    combo.push(choice.clone());
                    next.push(combo);
                }
            }
            combos = next;
        }

        combos.into_iter()
            .map(|combo| {
                if combo == children {
                    return e.clone();
                }
                let rebuilt = e.with_children(combo);
                self.env.rebuilt(e, &rebuilt);
                rebuilt
            })
            .collect()
    }
}
