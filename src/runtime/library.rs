//! Builtin `Object`, `String`, `Math` and `Integer` members.
//!
//! Everything here is side-effect free, so the same implementation backs
//! the in-memory program and the oracle's pure shortcut.

use crate::runtime::{FieldInfo, Fault, MethodInfo};
use crate::types::{Prim, Type, Value, OBJECT, STRING};

pub const MATH: &str = "Math";
pub const INTEGER: &str = "Integer";

/// Longest string a builtin builds. Anything longer fails the way an
/// exhausted heap would, without being allocated.
pub const MAX_STRING_CHARS: usize = 1 << 20;

pub fn out_of_memory() -> Fault {
    Fault::threw("OutOfMemoryError")
}

/// Fails with [`out_of_memory`] when a string of `chars` characters would
/// exceed [`MAX_STRING_CHARS`].
pub fn check_string_len(chars: usize) -> Result<(), Fault> {
    if chars > MAX_STRING_CHARS {
        Err(out_of_memory())
    } else {
        Ok(())
    }
}

pub struct Builtin {
    pub ty: Type,
    pub supers: Vec<Type>,
    pub statics: Vec<(FieldInfo, Value)>,
    pub methods: Vec<MethodInfo>,
}

fn method(owner: &Type, name: &str, params: &[Type], ret: Type, is_static: bool) -> MethodInfo {
    MethodInfo {
        name: name.into(),
        declaring: owner.clone(),
        params: params.to_vec(),
        ret: Some(ret),
        is_static,
        is_public: true,
        is_native: false,
    }
}

fn constant(owner: &Type, name: &str, ty: Type) -> FieldInfo {
    FieldInfo {
        name: name.into(),
        declaring: owner.clone(),
        ty,
        is_static: true,
        is_final: true,
        is_public: true,
    }
}

pub fn builtins() -> Vec<Builtin> {
    let object = Type::object();
    let string = Type::string();
    let math = Type::class(MATH);
    let integer = Type::class(INTEGER);
    let int = Type::int();
    let boolean = Type::boolean();
    let ch = Type::Prim(Prim::Char);

    vec![
        Builtin {
            ty: object.clone(),
            supers: vec![],
            statics: vec![],
            methods: vec![
                method(&object, "toString", &[], string.clone(), false),
                method(&object, "equals", &[object.clone()], boolean.clone(), false),
            ],
        },
        Builtin {
            ty: string.clone(),
            supers: vec![object.clone()],
            statics: vec![],
            methods: vec![
                method(&string, "length", &[], int.clone(), false),
                method(&string, "charAt", &[int.clone()], ch, false),
                method(&string, "isEmpty", &[], boolean.clone(), false),
                method(&string, "toUpperCase", &[], string.clone(), false),
                method(&string, "toLowerCase", &[], string.clone(), false),
                method(&string, "trim", &[], string.clone(), false),
                method(&string, "substring", &[int.clone()], string.clone(), false),
                method(&string, "substring", &[int.clone(), int.clone()], string.clone(), false),
                method(&string, "concat", &[string.clone()], string.clone(), false),
                method(&string, "indexOf", &[string.clone()], int.clone(), false),
                method(&string, "contains", &[string.clone()], boolean.clone(), false),
                method(&string, "startsWith", &[string.clone()], boolean.clone(), false),
                method(&string, "endsWith", &[string.clone()], boolean.clone(), false),
                method(&string, "repeat", &[int.clone()], string.clone(), false),
                method(&string, "equals", &[object.clone()], boolean.clone(), false),
                method(&string, "toString", &[], string.clone(), false),
            ],
        },
        Builtin {
            ty: math.clone(),
            supers: vec![object.clone()],
            statics: vec![],
            methods: vec![
                method(&math, "abs", &[int.clone()], int.clone(), true),
                method(&math, "max", &[int.clone(), int.clone()], int.clone(), true),
                method(&math, "min", &[int.clone(), int.clone()], int.clone(), true),
            ],
        },
        Builtin {
            ty: integer.clone(),
            supers: vec![object.clone()],
            statics: vec![
                (constant(&integer, "MAX_VALUE", int.clone()), Value::Int(i32::MAX)),
                (constant(&integer, "MIN_VALUE", int.clone()), Value::Int(i32::MIN)),
            ],
            methods: vec![
                method(&integer, "parseInt", &[string.clone()], int.clone(), true),
                method(&integer, "toString", &[int], string, true),
            ],
        },
    ]
}

fn owner_is(method: &MethodInfo, name: &str) -> bool {
    matches!(&method.declaring, Type::Class(n) if &**n == name)
}

/// Evaluates a builtin method directly. `None` when `method` is not one of
/// the pure builtins declared above.
pub fn call(method: &MethodInfo, receiver: Option<&Value>, args: &[Value]) -> Option<Result<Value, Fault>> {
    if owner_is(method, STRING) {
        let this = receiver?.as_str()?;
        return string_method(&method.name, this, args);
    }

    if owner_is(method, OBJECT) && &*method.name == "equals" {
        let this = receiver?;
        return Some(Ok(Value::Bool(args.first() == Some(this))));
    }

    if owner_is(method, MATH) {
        return math_method(&method.name, args);
    }

    if owner_is(method, INTEGER) {
        return integer_method(&method.name, args);
    }

    None
}

fn sioobe() -> Fault {
    Fault::threw("StringIndexOutOfBoundsException")
}

fn str_arg(args: &[Value], idx: usize) -> Result<&str, Fault> {
    match args.get(idx) {
        Some(Value::Str(s)) => Ok(s),
        _ => Err(Fault::npe()),
    }
}

fn int_arg(args: &[Value], idx: usize) -> Option<i32> {
    args.get(idx)?.as_int()
}

fn char_slice(chars: &[char], begin: i32, end: i32) -> Result<Value, Fault> {
    if begin < 0 || end as usize > chars.len() || begin > end {
        return Err(sioobe());
    }

    Ok(Value::Str(chars[begin as usize..end as usize].iter().collect::<String>().into()))
}

pub fn string_method(name: &str, this: &str, args: &[Value]) -> Option<Result<Value, Fault>> {
    let chars: Vec<char> = this.chars().collect();
    let len = chars.len() as i32;

    let res = match (name, args.len()) {
        ("length", 0) => Ok(Value::Int(len)),
        ("isEmpty", 0) => Ok(Value::Bool(chars.is_empty())),
        ("toUpperCase", 0) => Ok(Value::Str(this.to_uppercase().into())),
        ("toLowerCase", 0) => Ok(Value::Str(this.to_lowercase().into())),
        ("trim", 0) => Ok(Value::Str(this.trim_matches(|c: char| c <= ' ').into())),
        ("toString", 0) => Ok(Value::Str(this.into())),
        ("charAt", 1) => {
            let idx = int_arg(args, 0)?;
            if idx < 0 || idx >= len {
                Err(sioobe())
            } else {
                Ok(Value::Char(chars[idx as usize]))
            }
        },
        ("substring", 1) => char_slice(&chars, int_arg(args, 0)?, len),
        ("substring", 2) => char_slice(&chars, int_arg(args, 0)?, int_arg(args, 1)?),
        ("concat", 1) => str_arg(args, 0).and_then(|s| {
            check_string_len(chars.len() + s.chars().count())?;
            Ok(Value::Str(format!("{this}{s}").into()))
        }),
        ("indexOf", 1) => str_arg(args, 0).map(|s| {
            let idx = this.find(s)
                .map(|byte| this[..byte].chars().count() as i32)
                .unwrap_or(-1);
            Value::Int(idx)
        }),
        ("contains", 1) => str_arg(args, 0).map(|s| Value::Bool(this.contains(s))),
        ("startsWith", 1) => str_arg(args, 0).map(|s| Value::Bool(this.starts_with(s))),
        ("endsWith", 1) => str_arg(args, 0).map(|s| Value::Bool(this.ends_with(s))),
        ("repeat", 1) => {
            match usize::try_from(int_arg(args, 0)?) {
                Err(_) => Err(Fault::threw("IllegalArgumentException")),
                Ok(n) => check_string_len(chars.len().saturating_mul(n))
                    .map(|()| Value::Str(this.repeat(n).into())),
            }
        },
        ("equals", 1) => Ok(Value::Bool(matches!(&args[0], Value::Str(s) if &**s == this))),
        _ => return None,
    };

    Some(res)
}

pub fn math_method(name: &str, args: &[Value]) -> Option<Result<Value, Fault>> {
    let res = match (name, args.len()) {
        ("abs", 1) => Value::Int(int_arg(args, 0)?.wrapping_abs()),
        ("max", 2) => Value::Int(int_arg(args, 0)?.max(int_arg(args, 1)?)),
        ("min", 2) => Value::Int(int_arg(args, 0)?.min(int_arg(args, 1)?)),
        _ => return None,
    };

    Some(Ok(res))
}

pub fn integer_method(name: &str, args: &[Value]) -> Option<Result<Value, Fault>> {
    let res = match (name, args.len()) {
        ("parseInt", 1) => match &args[0] {
            Value::Str(s) => s.parse::<i32>()
                .map(Value::Int)
                .map_err(|_| Fault::threw("NumberFormatException")),
            _ => Err(Fault::threw("NumberFormatException")),
        },
        ("toString", 1) => Ok(Value::Str(int_arg(args, 0)?.to_string().into())),
        _ => return None,
    };

    Some(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_methods_follow_java() {
        let ab = "ab";

        assert_eq!(string_method("toUpperCase", ab, &[]), Some(Ok(Value::str("AB"))));
        assert_eq!(string_method("charAt", ab, &[Value::Int(1)]), Some(Ok(Value::Char('b'))));
        assert_eq!(string_method("charAt", ab, &[Value::Int(2)]), Some(Err(sioobe())));
        assert_eq!(string_method("substring", ab, &[Value::Int(2)]), Some(Ok(Value::str(""))));
        assert_eq!(string_method("substring", ab, &[Value::Int(1), Value::Int(0)]), Some(Err(sioobe())));
        assert_eq!(string_method("concat", ab, &[Value::Null]), Some(Err(Fault::npe())));
        assert_eq!(string_method("indexOf", "xab", &[Value::str("b")]), Some(Ok(Value::Int(2))));
        assert_eq!(string_method("nope", ab, &[]), None);
    }

    #[test]
    fn oversized_strings_fail_without_allocating() {
        let max = Value::Int(i32::MAX);

        assert_eq!(string_method("repeat", "ab", &[max]), Some(Err(out_of_memory())));
        assert_eq!(string_method("repeat", "", &[Value::Int(i32::MAX)]), Some(Ok(Value::str(""))));
        assert_eq!(string_method("repeat", "ab", &[Value::Int(2)]), Some(Ok(Value::str("abab"))));
        assert_eq!(
            string_method("repeat", "ab", &[Value::Int(-1)]),
            Some(Err(Fault::threw("IllegalArgumentException")))
        );

        let big: String = "x".repeat(MAX_STRING_CHARS);
        assert_eq!(string_method("concat", &big, &[Value::str("y")]), Some(Err(out_of_memory())));
    }

    #[test]
    fn statics() {
        assert_eq!(math_method("abs", &[Value::Int(i32::MIN)]), Some(Ok(Value::Int(i32::MIN))));
        assert_eq!(
            integer_method("parseInt", &[Value::str("x")]),
            Some(Err(Fault::threw("NumberFormatException")))
        );
    }
}
