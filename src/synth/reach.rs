//! Which types can still lead to a goal-fulfilling expression within a
//! given number of further construction steps.

use std::collections::HashMap;

use crate::config::SearchConfig;
use crate::constraint::TypeConstraint;
use crate::oracle::eval::assignable;
use crate::runtime::Introspection;
use crate::types::{Prim, Type};

/// A member some value can be passed into.
struct Consumer {
    params: Vec<Type>,
    ret: Type,
}

pub struct Reach {
    goal: TypeConstraint,
    admissible: Vec<Type>,
    operators: bool,
    consumers: Vec<Consumer>,
    memo: HashMap<(Type, usize), bool>,
}

impl Reach {
    pub fn new<P: Introspection + ?Sized>(goal: TypeConstraint, config: &SearchConfig, program: &P) -> Self {
        let mut consumers = Vec::new();

        for ty in program.known_types() {
            let is_static_type = config.static_types.iter().any(|s| Type::class(s) == ty);
            for m in program.methods(&ty) {
                if m.is_static && !is_static_type {
                    continue;
                }
                if let Some(ret) = m.ret {
                    consumers.push(Consumer { params: m.params, ret });
                }
            }
            if config.search_constructors {
                for c in program.constructors(&ty) {
                    consumers.push(Consumer {
                        params: c.params,
                        ret: ty.clone(),
                    });
                }
            }
        }

        Self {
            admissible: goal.admissible_types(program),
            goal,
            operators: config.search_operators,
            consumers,
            memo: HashMap::new(),
        }
    }

    pub fn goal(&self) -> &TypeConstraint {
        &self.goal
    }

    /// Whether a value of static type `ty` may still be cast down to a
    /// goal type.
    pub fn can_downcast<P: Introspection + ?Sized>(&self, ty: &Type, program: &P) -> bool {
        ty.is_reference()
            && *ty != Type::Null
            && self.admissible.iter().any(|goal| goal.is_reference() && program.is_subtype(goal, ty))
    }

    /// The most general goal type a value of runtime type `runtime` can be
    /// cast to from static type `ty`.
    pub fn downcast_target<P: Introspection + ?Sized>(&self, ty: &Type, runtime: &Type, program: &P) -> Option<Type> {
        self.admissible.iter()
            .find(|goal| goal.is_reference() && program.is_subtype(goal, ty) && program.is_subtype(runtime, goal))
            .cloned()
    }

    /// Whether an expression of type `ty` can still be turned into one
    /// fulfilling the goal with at most `steps` more levels.
    pub fn helpful<P: Introspection + ?Sized>(&mut self, ty: &Type, steps: usize, program: &P) -> bool {
        if let Some(&known) = self.memo.get(&(ty.clone(), steps)) {
            return known;
        }

        let out = self.compute(ty, steps, program);
        self.memo.insert((ty.clone(), steps), out);
        out
    }

    fn compute<P: Introspection + ?Sized>(&mut self, ty: &Type, steps: usize, program: &P) -> bool {
        if self.goal.is_fulfilled_by(ty, program) {
            return true;
        }
        if steps == 0 {
            return self.can_downcast(ty, program);
        }

        let next = steps - 1;
        let mut reachable: Vec<Type> = Vec::new();

        if self.operators {
            reachable.push(Type::string());
            match ty {
                Type::Prim(Prim::Boolean) => reachable.push(Type::boolean()),
                Type::Prim(p) => {
                    reachable.push(Type::boolean());
                    reachable.extend([Prim::Int, Prim::Long, Prim::Double]
                        .into_iter()
                        .filter_map(|other| p.promote(other))
                        .map(Type::Prim));
                },
                _ => reachable.push(Type::boolean()),
            }
        }
        if *ty != Type::Null && !ty.is_primitive() {
            reachable.extend(program.fields(ty).into_iter().filter(|f| !f.is_static).map(|f| f.ty));
            reachable.extend(program.methods(ty).into_iter().filter(|m| !m.is_static).filter_map(|m| m.ret));
        }
        if let Some(elem) = ty.element() {
            reachable.push(elem.clone());
        }
        reachable.extend(self.consumers.iter()
            .filter(|c| c.params.iter().any(|p| assignable(program, ty, p)))
            .map(|c| c.ret.clone()));

        reachable.sort();
        reachable.dedup();
        reachable.retain(|r| r != ty);

        reachable.iter().any(|r| self.helpful(r, next, program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::heap::{ClassBuilder, MemoryProgram};

    #[test]
    fn distances_to_goal() {
        let program = MemoryProgram::new();
        let config = SearchConfig {
            search_operators: false,
            static_types: Vec::new(),
            ..SearchConfig::default()
        };
        let mut reach = Reach::new(TypeConstraint::Exact(Type::int()), &config, &program);

        assert!(reach.helpful(&Type::int(), 0, &program));
        assert!(!reach.helpful(&Type::string(), 0, &program));
        assert!(reach.helpful(&Type::string(), 1, &program));
        assert!(!reach.helpful(&Type::boolean(), 3, &program));
    }

    #[test]
    fn downcasts() {
        let mut program = MemoryProgram::new();
        program.add_class(ClassBuilder::new("Point").field("x", Type::int()));
        program.add_class(ClassBuilder::new("ColorPoint").extends("Point"));
        let config = SearchConfig::default();
        let reach = Reach::new(TypeConstraint::Supertype(Type::class("Point")), &config, &program);
        let object = Type::object();

        assert!(reach.can_downcast(&object, &program));
        assert!(!reach.can_downcast(&Type::string(), &program));
        assert_eq!(
            reach.downcast_target(&object, &Type::class("ColorPoint"), &program),
            Some(Type::class("Point")),
        );
        assert_eq!(reach.downcast_target(&object, &Type::string(), &program), None);
    }
}
