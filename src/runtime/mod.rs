//! The running program, seen through two capabilities: static
//! introspection of its types and members, and live evaluation against its
//! heap.

pub mod heap;
pub mod library;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::types::{Handle, Prim, Type, Value, OBJECT};

pub const CONSTRUCTOR: &str = "<init>";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldInfo {
    pub name: Rc<str>,
    pub declaring: Type,
    pub ty: Type,
    pub is_static: bool,
    pub is_final: bool,
    pub is_public: bool,
}

impl FieldInfo {
    /// A public static final field, e.g. `Integer.MAX_VALUE`.
    pub fn is_constant(&self) -> bool {
        self.is_static && self.is_final && self.is_public
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodInfo {
    pub name: Rc<str>,
    pub declaring: Type,
    pub params: Vec<Type>,
    /// `None` for void methods.
    pub ret: Option<Type>,
    pub is_static: bool,
    pub is_public: bool,
    /// Implemented outside the managed runtime; never entered unless vetted.
    pub is_native: bool,
}

impl MethodInfo {
    pub fn is_constructor(&self) -> bool {
        &*self.name == CONSTRUCTOR
    }

    /// `Type.name` key used by blacklists and native vetting.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.declaring, self.name)
    }
}

/// A heap location that an expression can write to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    Field(Handle, Rc<str>),
    Static(Rc<str>, Rc<str>),
    Element(Handle, i32),
}

/// One recorded heap mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Effect {
    pub location: Location,
    pub old: Value,
    pub new: Value,
}

/// Canonical, order-independent summary of a sequence of effects: the final
/// value of every location whose final value differs from its original.
pub fn net_effects(effects: &[Effect]) -> Vec<(Location, Value)> {
    let mut first_old: BTreeMap<&Location, &Value> = BTreeMap::new();
    let mut last_new: BTreeMap<&Location, &Value> = BTreeMap::new();

    for effect in effects {
        first_old.entry(&effect.location).or_insert(&effect.old);
        last_new.insert(&effect.location, &effect.new);
    }

    last_new.into_iter()
        .filter(|(loc, new)| first_old.get(loc) != Some(new))
        .map(|(loc, new)| (loc.clone(), new.clone()))
        .collect()
}

/// Why one live evaluation did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("threw {0}")]
    Threw(Rc<str>),
    #[error("timed out")]
    Timeout,
    #[error("refused to enter native method {0}")]
    NativeBlocked(Rc<str>),
    #[error("lost connection to the running program")]
    Disconnected,
}

impl Fault {
    pub fn threw(exception: &str) -> Self {
        Fault::Threw(exception.into())
    }

    pub fn npe() -> Self {
        Fault::threw("NullPointerException")
    }

    /// Faults that force-abort the whole probe rather than being recorded
    /// in the candidate's slot.
    pub fn aborts_probe(&self) -> bool {
        matches!(self, Fault::Timeout | Fault::NativeBlocked(_))
    }
}

/// Wall-clock budget for one live call. A [`Runtime`] must stop a call that
/// overruns it and report [`Fault::Timeout`]: the in-memory program checks
/// it on every heap access and again when the call returns.
#[derive(Debug, Clone)]
pub struct Watchdog {
    started: Instant,
    budget: Duration,
}

impl Watchdog {
    pub fn arm(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() > self.budget
    }

    pub fn check(&self) -> Result<(), Fault> {
        if self.expired() {
            Err(Fault::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Static view of the program's types and members.
pub trait Introspection {
    /// Instance and static fields visible on `ty`, inherited ones included.
    fn fields(&self, ty: &Type) -> Vec<FieldInfo>;

    /// Methods visible on `ty`, most-derived implementation first.
    fn methods(&self, ty: &Type) -> Vec<MethodInfo>;

    fn constructors(&self, ty: &Type) -> Vec<MethodInfo>;

    /// Direct supertypes.
    fn supertypes(&self, ty: &Type) -> Vec<Type>;

    /// Every class and array type the program knows about.
    fn known_types(&self) -> Vec<Type>;

    fn runtime_type(&self, value: &Value) -> Type;

    fn is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        if sub == sup {
            return true;
        }

        match (sub, sup) {
            (Type::Prim(_), _) | (_, Type::Prim(_)) => false,
            (Type::Null, _) => true,
            (_, Type::Null) => false,
            (Type::Array(a), Type::Array(b)) => {
                a.is_reference() && b.is_reference() && self.is_subtype(a, b)
            },
            (Type::Array(_), Type::Class(name)) => &**name == OBJECT,
            _ => {
                let mut seen = HashSet::new();
                let mut queue: VecDeque<Type> = self.supertypes(sub).into();

                while let Some(ty) = queue.pop_front() {
                    if &ty == sup {
                        return true;
                    }
                    if seen.insert(ty.clone()) {
                        queue.extend(self.supertypes(&ty));
                    }
                }

                false
            },
        }
    }

    /// Whether a `prim` value boxes into a reference of type `sup`.
    fn boxes_into(&self, prim: Prim, sup: &Type) -> bool {
        match sup {
            Type::Class(name) if &**name == OBJECT => true,
            Type::Class(_) => self.is_subtype(&Type::class(prim.boxed()), sup),
            _ => false,
        }
    }

    /// Names that parse as static references.
    fn is_type_name(&self, name: &str) -> bool {
        self.known_types().iter().any(|t| matches!(t, Type::Class(n) if &**n == name))
    }
}

/// Live access to the running program. Every mutation performed by
/// `get_field`, `invoke` or `construct` is journaled and handed out by
/// `take_effects`; `write` performs an unjournaled store used to redo and
/// undo effects.
pub trait Runtime: Introspection {
    fn get_field(
        &mut self,
        receiver: Option<&Value>,
        field: &FieldInfo,
        watchdog: &Watchdog,
    ) -> Result<Value, Fault>;

    fn invoke(
        &mut self,
        receiver: Option<&Value>,
        method: &MethodInfo,
        args: &[Value],
        watchdog: &Watchdog,
    ) -> Result<Value, Fault>;

    fn construct(
        &mut self,
        ctor: &MethodInfo,
        args: &[Value],
        watchdog: &Watchdog,
    ) -> Result<Value, Fault>;

    fn array_get(&mut self, array: &Value, index: i32) -> Result<Value, Fault>;

    fn take_effects(&mut self) -> Vec<Effect>;

    fn write(&mut self, location: &Location, value: &Value);

    /// Human-readable rendering of a value, as the debugger would show it.
    fn display(&self, value: &Value) -> String;

    /// Current extent of the heap, to hand back to [`Runtime::reclaim`].
    fn allocation_mark(&self) -> usize {
        0
    }

    /// Releases every object allocated since `mark`. Handles to them must
    /// not be used afterwards.
    fn reclaim(&mut self, _mark: usize) {}

    /// Brackets one round trip carrying a batch of candidates.
    fn begin_probe(&mut self) {}

    fn end_probe(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(loc: Location, old: i32, new: i32) -> Effect {
        Effect {
            location: loc,
            old: Value::Int(old),
            new: Value::Int(new),
        }
    }

    #[test]
    fn net_effects_drop_restored_locations() {
        let a = Location::Field(Handle(1), "n".into());
        let b = Location::Element(Handle(2), 0);
        let effects = [
            write(a.clone(), 0, 1),
            write(b.clone(), 5, 6),
            write(a.clone(), 1, 2),
            write(b.clone(), 6, 5),
        ];

        assert_eq!(net_effects(&effects), vec![(a, Value::Int(2))]);
    }

    #[test]
    fn watchdog_expires() {
        let dog = Watchdog::arm(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(dog.check(), Err(Fault::Timeout));
        assert!(Watchdog::arm(Duration::from_secs(60)).check().is_ok());
    }
}
