use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

pub const OBJECT: &str = "Object";
pub const STRING: &str = "String";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prim {
    Boolean,
    Char,
    Int,
    Long,
    Double,
}

impl Prim {
    pub const ALL: [Prim; 5] = [Prim::Boolean, Prim::Char, Prim::Int, Prim::Long, Prim::Double];

    pub fn name(self) -> &'static str {
        match self {
            Prim::Boolean => "boolean",
            Prim::Char => "char",
            Prim::Int => "int",
            Prim::Long => "long",
            Prim::Double => "double",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Prim::Boolean)
    }

    /// The wrapper class a value of this type is boxed into.
    pub fn boxed(self) -> &'static str {
        match self {
            Prim::Boolean => "Boolean",
            Prim::Char => "Character",
            Prim::Int => "Integer",
            Prim::Long => "Long",
            Prim::Double => "Double",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Prim::Boolean => 0,
            Prim::Char | Prim::Int => 1,
            Prim::Long => 2,
            Prim::Double => 3,
        }
    }

    /// Binary numeric promotion. `None` for booleans.
    pub fn promote(self, other: Prim) -> Option<Prim> {
        if !self.is_numeric() || !other.is_numeric() {
            return None;
        }

        let wide = if self.rank() >= other.rank() { self } else { other };

        Some(match wide {
            Prim::Char => Prim::Int,
            x => x,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Prim(Prim),
    /// The type of the `null` literal.
    Null,
    Class(Rc<str>),
    Array(Rc<Type>),
}

impl Type {
    pub fn int() -> Self {
        Type::Prim(Prim::Int)
    }

    pub fn boolean() -> Self {
        Type::Prim(Prim::Boolean)
    }

    pub fn object() -> Self {
        Type::Class(OBJECT.into())
    }

    pub fn string() -> Self {
        Type::Class(STRING.into())
    }

    pub fn class(name: &str) -> Self {
        Type::Class(name.into())
    }

    pub fn array_of(elem: Type) -> Self {
        Type::Array(Rc::new(elem))
    }

    /// Parses a type name such as `int`, `String` or `Point[][]`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();

        if let Some(elem) = name.strip_suffix("[]") {
            return Type::parse(elem).map(Type::array_of);
        }

        let ty = match name {
            "boolean" => Type::Prim(Prim::Boolean),
            "char" => Type::Prim(Prim::Char),
            "int" => Type::Prim(Prim::Int),
            "long" => Type::Prim(Prim::Long),
            "double" => Type::Prim(Prim::Double),
            "null" => Type::Null,
            _ if is_identifier(name) => Type::Class(name.into()),
            _ => return None,
        };

        Some(ty)
    }

    pub fn prim(&self) -> Option<Prim> {
        match self {
            Type::Prim(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Prim(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Prim(p) if p.is_numeric())
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Prim(Prim::Boolean))
    }

    pub fn is_reference(&self) -> bool {
        !self.is_primitive()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Class(name) if &**name == STRING)
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(p) => f.write_str(p.name()),
            Type::Null => f.write_str("null"),
            Type::Class(name) => f.write_str(name),
            Type::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => (),
        _ => return false,
    }

    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Handle to an object or array living in the running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value observed in the running program.
///
/// Equality is structural: strings compare by content and doubles by bit
/// pattern, so two live handles denoting the same string compare equal.
/// Objects and arrays compare by handle.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(Rc<str>),
    Object(Handle),
    Array(Handle),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type of this value when it does not depend on the heap.
    pub fn intrinsic_type(&self) -> Option<Type> {
        let ty = match self {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Prim(Prim::Boolean),
            Value::Char(_) => Type::Prim(Prim::Char),
            Value::Int(_) => Type::Prim(Prim::Int),
            Value::Long(_) => Type::Prim(Prim::Long),
            Value::Double(_) => Type::Prim(Prim::Double),
            Value::Str(_) => Type::string(),
            Value::Object(_) | Value::Array(_) => return None,
        };

        Some(ty)
    }

    pub fn handle(&self) -> Option<Handle> {
        match self {
            Value::Object(h) | Value::Array(h) => Some(*h),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(x) => Some(*x),
            Value::Char(c) => Some(*c as i32),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x as i64),
            Value::Char(c) => Some(*c as i64),
            Value::Long(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(x) => Some(*x),
            other => other.as_long().map(|x| x as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// True for a numeric value equal to zero.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Double(x) => *x == 0.0,
            other => other.as_long() == Some(0),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);

        match self {
            Value::Null => (),
            Value::Bool(b) => b.hash(state),
            Value::Char(c) => c.hash(state),
            Value::Int(x) => x.hash(state),
            Value::Long(x) => x.hash(state),
            Value::Double(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Object(h) | Value::Array(h) => h.hash(state),
        }
    }
}

/// Java-flavoured rendering, used for string concatenation and display.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Int(x) => write!(f, "{x}"),
            Value::Long(x) => write!(f, "{x}"),
            Value::Double(x) => {
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            },
            Value::Str(s) => f.write_str(s),
            Value::Object(h) => write!(f, "Object{h}"),
            Value::Array(h) => write!(f, "Array{h}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_names() {
        assert_eq!(Type::parse("int"), Some(Type::int()));
        assert_eq!(Type::parse("String"), Some(Type::string()));
        assert_eq!(
            Type::parse("Point[][]"),
            Some(Type::array_of(Type::array_of(Type::class("Point"))))
        );
        assert_eq!(Type::parse("not a type"), None);
        assert_eq!(Type::array_of(Type::int()).to_string(), "int[]");
    }

    #[test]
    fn strings_compare_by_content() {
        let a = Value::Str(Rc::from(String::from("ab")));
        let b = Value::str("ab");

        assert_eq!(a, b);
        assert_ne!(Value::Object(Handle(1)), Value::Object(Handle(2)));
        assert_ne!(Value::Int(1), Value::Long(1));
    }

    #[test]
    fn numeric_promotion() {
        assert_eq!(Prim::Char.promote(Prim::Char), Some(Prim::Int));
        assert_eq!(Prim::Int.promote(Prim::Long), Some(Prim::Long));
        assert_eq!(Prim::Double.promote(Prim::Int), Some(Prim::Double));
        assert_eq!(Prim::Boolean.promote(Prim::Int), None);
    }
}
