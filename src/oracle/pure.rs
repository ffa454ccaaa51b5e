//! Direct interpretation of well-known side-effect free library members.
//! The shortcut must agree with the live call in both value and fault.

use crate::runtime::library::{self, INTEGER, MATH};
use crate::runtime::{Fault, MethodInfo};
use crate::types::{Type, Value, OBJECT, STRING};

fn is_pure(method: &MethodInfo) -> bool {
    let Type::Class(owner) = &method.declaring else {
        return false;
    };

    match &**owner {
        STRING | MATH | INTEGER => true,
        OBJECT => &*method.name == "equals",
        _ => false,
    }
}

/// `None` when the call must go to the running program.
pub fn shortcut(method: &MethodInfo, receiver: Option<&Value>, args: &[Value]) -> Option<Result<Value, Fault>> {
    if !is_pure(method) || receiver.is_some_and(Value::is_null) {
        return None;
    }

    library::call(method, receiver, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::heap::MemoryProgram;
    use crate::runtime::{Introspection, Runtime, Watchdog};
    use std::time::Duration;

    fn string_method(program: &MemoryProgram, name: &str, arity: usize) -> MethodInfo {
        program.methods(&Type::string())
            .into_iter()
            .find(|m| &*m.name == name && m.params.len() == arity)
            .unwrap()
    }

    #[test]
    fn agrees_with_live_calls() {
        let mut program = MemoryProgram::new();
        let dog = Watchdog::arm(Duration::from_secs(5));
        let cases = [
            ("toUpperCase", vec![]),
            ("charAt", vec![Value::Int(1)]),
            ("charAt", vec![Value::Int(9)]),
            ("substring", vec![Value::Int(1), Value::Int(0)]),
            ("indexOf", vec![Value::str("b")]),
            ("concat", vec![Value::Null]),
        ];
        let this = Value::str("ab");

        for (name, args) in cases {
            let method = string_method(&program, name, args.len());
            let short = shortcut(&method, Some(&this), &args).unwrap();
            let live = program.invoke(Some(&this), &method, &args, &dog);
            assert_eq!(short, live, "{name}");
        }
    }

    #[test]
    fn declines_null_receivers_and_user_types() {
        let program = MemoryProgram::new();
        let length = string_method(&program, "length", 0);
        let mut foreign = length.clone();
        foreign.declaring = Type::class("Point");

        assert_eq!(shortcut(&length, Some(&Value::Null), &[]), None);
        assert_eq!(shortcut(&foreign, Some(&Value::str("a")), &[]), None);
        assert_eq!(shortcut(&length, Some(&Value::str("abc")), &[]), Some(Ok(Value::Int(3))));
    }
}
