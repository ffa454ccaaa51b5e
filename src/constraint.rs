use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::runtime::Introspection;
use crate::types::{Prim, Type};

/// A constraint on the static type of an expression, propagated top-down
/// into the sub-positions of accesses and calls.
///
/// Satisfaction is monotone under [`TypeConstraint::widen`]: a type that
/// fulfills a constraint fulfills every widening of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeConstraint {
    Exact(Type),
    Supertype(Type),
    SupertypeSet(Vec<Type>),
    /// The type has an instance field (named, or any with `None`) whose
    /// type fulfills `field`.
    FieldNamed {
        name: Option<Rc<str>>,
        field: Box<TypeConstraint>,
    },
    /// The type has an instance method (named, or any with `None`) whose
    /// return type fulfills `result` and, when given, whose parameter types
    /// fulfill `args` position by position.
    MethodNamed {
        name: Option<Rc<str>>,
        result: Box<TypeConstraint>,
        args: Option<Vec<TypeConstraint>>,
    },
    Unconstrained,
}

/// `ty <: bound`, letting primitives box into their wrapper's supertypes.
fn below<P: Introspection + ?Sized>(program: &P, ty: &Type, bound: &Type) -> bool {
    match ty {
        Type::Prim(prim) if bound.is_reference() => program.boxes_into(*prim, bound),
        _ => program.is_subtype(ty, bound),
    }
}

fn name_matches(want: &Option<Rc<str>>, have: &str) -> bool {
    want.as_deref().map_or(true, |w| w == have)
}

impl TypeConstraint {
    pub fn field(name: Option<&str>, field: TypeConstraint) -> Self {
        TypeConstraint::FieldNamed {
            name: name.map(Rc::from),
            field: Box::new(field),
        }
    }

    pub fn method(name: Option<&str>, result: TypeConstraint, args: Option<Vec<TypeConstraint>>) -> Self {
        TypeConstraint::MethodNamed {
            name: name.map(Rc::from),
            result: Box::new(result),
            args,
        }
    }

    pub fn is_fulfilled_by<P: Introspection + ?Sized>(&self, ty: &Type, program: &P) -> bool {
        match self {
            TypeConstraint::Exact(bound) => program.is_subtype(ty, bound),
            TypeConstraint::Supertype(bound) => below(program, ty, bound),
            TypeConstraint::SupertypeSet(bounds) => {
                bounds.iter().any(|bound| below(program, ty, bound))
            },
            TypeConstraint::FieldNamed { name, field } => {
                program.fields(ty)
                    .iter()
                    .any(|f| !f.is_static && name_matches(name, &f.name) && field.is_fulfilled_by(&f.ty, program))
            },
            TypeConstraint::MethodNamed { name, result, args } => {
                program.methods(ty)
                    .iter()
                    .filter(|m| !m.is_static && name_matches(name, &m.name))
                    .filter(|m| m.ret.as_ref().is_some_and(|ret| result.is_fulfilled_by(ret, program)))
                    .any(|m| match args {
                        None => true,
                        Some(args) => args.len() == m.params.len()
                            && args.iter().zip(&m.params).all(|(arg, param)| arg.is_fulfilled_by(param, program)),
                    })
            },
            TypeConstraint::Unconstrained => true,
        }
    }

    /// The concrete types currently known to fulfill this constraint, in a
    /// stable order.
    pub fn admissible_types<P: Introspection + ?Sized>(&self, program: &P) -> Vec<Type> {
        match self {
            TypeConstraint::Exact(ty) => vec![ty.clone()],
            TypeConstraint::Supertype(bound) if bound.is_primitive() => vec![bound.clone()],
            TypeConstraint::Supertype(bound) => {
                let mut out = IndexSet::new();
                out.insert(bound.clone());
                out.extend(program.known_types()
                    .into_iter()
                    .filter(|ty| program.is_subtype(ty, bound)));
                out.extend(Prim::ALL
                    .into_iter()
                    .filter(|prim| program.boxes_into(*prim, bound))
                    .map(Type::Prim));
                out.into_iter().collect()
            },
            TypeConstraint::SupertypeSet(bounds) => {
                let out: IndexSet<Type> = bounds.iter()
                    .flat_map(|bound| TypeConstraint::Supertype(bound.clone()).admissible_types(program))
                    .collect();
                out.into_iter().collect()
            },
            TypeConstraint::FieldNamed { .. } | TypeConstraint::MethodNamed { .. } | TypeConstraint::Unconstrained => {
                program.known_types()
                    .into_iter()
                    .filter(|ty| self.is_fulfilled_by(ty, program))
                    .collect()
            },
        }
    }

    /// A strictly weaker (or equal) constraint.
    pub fn widen<P: Introspection + ?Sized>(&self, program: &P) -> Self {
        match self {
            TypeConstraint::Exact(ty) => TypeConstraint::Supertype(ty.clone()),
            TypeConstraint::Supertype(ty) => {
                let mut bounds = vec![ty.clone()];
                bounds.extend(program.supertypes(ty));
                TypeConstraint::SupertypeSet(bounds)
            },
            TypeConstraint::SupertypeSet(_) | TypeConstraint::Unconstrained => TypeConstraint::Unconstrained,
            TypeConstraint::FieldNamed { field, .. } => TypeConstraint::FieldNamed {
                name: None,
                field: Box::new(field.widen(program)),
            },
            TypeConstraint::MethodNamed { result, .. } => TypeConstraint::MethodNamed {
                name: None,
                result: Box::new(result.widen(program)),
                args: None,
            },
        }
    }
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |n: &Option<Rc<str>>| n.as_deref().unwrap_or("*").to_string();

        match self {
            TypeConstraint::Exact(ty) => write!(f, "={ty}"),
            TypeConstraint::Supertype(ty) => write!(f, "<:{ty}"),
            TypeConstraint::SupertypeSet(tys) => {
                let tys: Vec<String> = tys.iter().map(Type::to_string).collect();
                write!(f, "<:{{{}}}", tys.join(", "))
            },
            TypeConstraint::FieldNamed { name: n, field } => write!(f, "{{.{}: {field}}}", name(n)),
            TypeConstraint::MethodNamed { name: n, result, .. } => write!(f, "{{.{}(..): {result}}}", name(n)),
            TypeConstraint::Unconstrained => f.write_str("?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::heap::{ClassBuilder, MemoryProgram};
    use crate::types::Value;

    fn shapes() -> MemoryProgram {
        let mut program = MemoryProgram::new();
        program.add_class(ClassBuilder::new("Shape").field("area", Type::int()));
        program.add_class(
            ClassBuilder::new("Circle")
                .extends("Shape")
                .field("radius", Type::int())
                .method("label", &[Type::int()], Type::string(), |_, _, _, _| Ok(Value::str("c"))),
        );
        program
    }

    #[test]
    fn supertype_bounds() {
        let program = shapes();
        let shape = TypeConstraint::Supertype(Type::class("Shape"));

        assert!(shape.is_fulfilled_by(&Type::class("Circle"), &program));
        assert!(shape.is_fulfilled_by(&Type::Null, &program));
        assert!(!shape.is_fulfilled_by(&Type::object(), &program));
        assert_eq!(
            shape.admissible_types(&program),
            vec![Type::class("Shape"), Type::class("Circle")]
        );
        assert_eq!(
            TypeConstraint::Exact(Type::int()).admissible_types(&program),
            vec![Type::int()]
        );
    }

    #[test]
    fn primitives_box_into_references() {
        let program = shapes();
        let object = TypeConstraint::Supertype(Type::object());

        assert!(object.is_fulfilled_by(&Type::int(), &program));
        assert!(object.is_fulfilled_by(&Type::boolean(), &program));
        assert!(TypeConstraint::Supertype(Type::class("Integer")).is_fulfilled_by(&Type::int(), &program));
        assert!(!TypeConstraint::Supertype(Type::class("Integer")).is_fulfilled_by(&Type::Prim(Prim::Long), &program));
        assert!(!TypeConstraint::Supertype(Type::class("Shape")).is_fulfilled_by(&Type::int(), &program));
        assert!(!TypeConstraint::Exact(Type::object()).is_fulfilled_by(&Type::int(), &program));
        assert!(object.admissible_types(&program).contains(&Type::int()));
        assert!(!TypeConstraint::Supertype(Type::class("Shape")).admissible_types(&program).contains(&Type::int()));
    }

    #[test]
    fn member_constraints() {
        let program = shapes();
        let circle = Type::class("Circle");
        let has_radius = TypeConstraint::field(Some("radius"), TypeConstraint::Supertype(Type::int()));
        let any_string_method = TypeConstraint::method(None, TypeConstraint::Exact(Type::string()), None);
        let label_of_int = TypeConstraint::method(
            Some("label"),
            TypeConstraint::Unconstrained,
            Some(vec![TypeConstraint::Exact(Type::int())]),
        );

        assert!(has_radius.is_fulfilled_by(&circle, &program));
        assert!(!has_radius.is_fulfilled_by(&Type::class("Shape"), &program));
        assert!(any_string_method.is_fulfilled_by(&Type::class("Shape"), &program));
        assert!(label_of_int.is_fulfilled_by(&circle, &program));
        assert_eq!(has_radius.admissible_types(&program), vec![circle]);
    }

    #[test]
    fn widening_is_monotone() {
        let program = shapes();
        let types = [
            Type::class("Circle"),
            Type::class("Shape"),
            Type::object(),
            Type::string(),
            Type::int(),
            Type::Null,
        ];
        let constraints = [
            TypeConstraint::Exact(Type::class("Circle")),
            TypeConstraint::Supertype(Type::class("Shape")),
            TypeConstraint::field(Some("radius"), TypeConstraint::Exact(Type::int())),
            TypeConstraint::method(Some("label"), TypeConstraint::Exact(Type::string()), Some(vec![TypeConstraint::Unconstrained])),
        ];

        for constraint in &constraints {
            let mut narrow = constraint.clone();
            for _ in 0..3 {
                let wide = narrow.widen(&program);
                for ty in &types {
                    if narrow.is_fulfilled_by(ty, &program) {
                        assert!(wide.is_fulfilled_by(ty, &program), "{narrow} -> {wide} lost {ty}");
                    }
                }
                narrow = wide;
            }
        }
    }
}
