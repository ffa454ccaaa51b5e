//! In-memory stand-in for a running program: classes with natively
//! implemented members, a heap of instances and arrays, and a journal of
//! every mutation.

use std::collections::HashSet;
use std::mem;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use log::trace;

use crate::runtime::library;
use crate::runtime::{
    Effect, FieldInfo, Fault, Introspection, Location, MethodInfo, Runtime, Watchdog, CONSTRUCTOR,
};
use crate::types::{Handle, Type, Value, OBJECT};

/// Implementation of a method or constructor. Constructors receive `None`.
pub type NativeFn = Rc<dyn Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault>>;

#[derive(Debug, Clone)]
enum HeapObject {
    Instance {
        class: Rc<str>,
        fields: IndexMap<Rc<str>, Value>,
    },
    Array {
        elem: Type,
        items: Vec<Value>,
    },
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
    statics: IndexMap<(Rc<str>, Rc<str>), Value>,
    journal: Vec<Effect>,
    /// Budget of the live call in progress. Every read or write checks it,
    /// so a method body that never polls its watchdog still stops at its
    /// next heap access once the budget runs out.
    deadline: Option<Watchdog>,
}

impl Heap {
    fn tick(&self) -> Result<(), Fault> {
        match &self.deadline {
            Some(dog) => dog.check(),
            None => Ok(()),
        }
    }

    fn object(&self, value: &Value) -> Result<&HeapObject, Fault> {
        self.tick()?;
        let handle = match value {
            Value::Null => return Err(Fault::npe()),
            other => other.handle().ok_or_else(|| Fault::threw("ClassCastException"))?,
        };

        self.objects.get(handle.0 as usize).ok_or(Fault::Disconnected)
    }

    /// Instances and arrays allocated so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, class: &str, fields: Vec<(&str, Value)>) -> Value {
        let handle = Handle(self.objects.len() as u32);

        self.objects.push(HeapObject::Instance {
            class: class.into(),
            fields: fields.into_iter().map(|(k, v)| (Rc::from(k), v)).collect(),
        });

        Value::Object(handle)
    }

    pub fn alloc_array(&mut self, elem: Type, items: Vec<Value>) -> Value {
        let handle = Handle(self.objects.len() as u32);

        self.objects.push(HeapObject::Array { elem, items });

        Value::Array(handle)
    }

    pub fn get(&self, object: &Value, field: &str) -> Result<Value, Fault> {
        match self.object(object)? {
            HeapObject::Instance { fields, .. } => fields.get(field)
                .cloned()
                .ok_or_else(|| Fault::threw("NoSuchFieldError")),
            HeapObject::Array { items, .. } if field == "length" => Ok(Value::Int(items.len() as i32)),
            HeapObject::Array { .. } => Err(Fault::threw("NoSuchFieldError")),
        }
    }

    /// Journaled field store.
    pub fn set(&mut self, object: &Value, field: &str, value: Value) -> Result<(), Fault> {
        let old = self.get(object, field)?;
        let handle = object.handle().ok_or_else(Fault::npe)?;

        self.record(Location::Field(handle, field.into()), old, value);
        Ok(())
    }

    pub fn element(&self, array: &Value, index: i32) -> Result<Value, Fault> {
        match self.object(array)? {
            HeapObject::Array { items, .. } => usize::try_from(index)
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .ok_or_else(|| Fault::threw("ArrayIndexOutOfBoundsException")),
            HeapObject::Instance { .. } => Err(Fault::threw("ClassCastException")),
        }
    }

    /// Journaled element store.
    pub fn set_element(&mut self, array: &Value, index: i32, value: Value) -> Result<(), Fault> {
        let old = self.element(array, index)?;
        let handle = array.handle().ok_or_else(Fault::npe)?;

        self.record(Location::Element(handle, index), old, value);
        Ok(())
    }

    pub fn static_field(&self, class: &str, field: &str) -> Result<Value, Fault> {
        self.tick()?;
        self.statics.get(&(Rc::from(class), Rc::from(field)))
            .cloned()
            .ok_or_else(|| Fault::threw("NoSuchFieldError"))
    }

    /// Journaled static store.
    pub fn set_static(&mut self, class: &str, field: &str, value: Value) -> Result<(), Fault> {
        let old = self.static_field(class, field)?;

        self.record(Location::Static(class.into(), field.into()), old, value);
        Ok(())
    }

    fn record(&mut self, location: Location, old: Value, new: Value) {
        trace!("heap write {location:?}: {old} -> {new}");
        self.store(&location, new.clone());
        self.journal.push(Effect { location, old, new });
    }

    fn store(&mut self, location: &Location, value: Value) {
        match location {
            Location::Field(handle, name) => {
                if let Some(HeapObject::Instance { fields, .. }) = self.objects.get_mut(handle.0 as usize) {
                    fields.insert(name.clone(), value);
                }
            },
            Location::Element(handle, idx) => {
                if let Some(HeapObject::Array { items, .. }) = self.objects.get_mut(handle.0 as usize) {
                    if let Some(slot) = usize::try_from(*idx).ok().and_then(|i| items.get_mut(i)) {
                        *slot = value;
                    }
                }
            },
            Location::Static(class, name) => {
                self.statics.insert((class.clone(), name.clone()), value);
            },
        }
    }
}

struct ClassDef {
    supers: Vec<Type>,
    fields: Vec<FieldInfo>,
    /// `None` marks a builtin served by [`library`].
    methods: Vec<(MethodInfo, Option<NativeFn>)>,
    ctors: Vec<(MethodInfo, NativeFn)>,
}

/// Declares one class of a [`MemoryProgram`].
pub struct ClassBuilder {
    ty: Type,
    def: ClassDef,
    statics: Vec<(Rc<str>, Value)>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            ty: Type::class(name),
            def: ClassDef {
                supers: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                ctors: Vec::new(),
            },
            statics: Vec::new(),
        }
    }

    pub fn extends(mut self, sup: &str) -> Self {
        self.def.supers.push(Type::class(sup));
        self
    }

    fn add_field(mut self, name: &str, ty: Type, is_static: bool, is_final: bool) -> Self {
        self.def.fields.push(FieldInfo {
            name: name.into(),
            declaring: self.ty.clone(),
            ty,
            is_static,
            is_final,
            is_public: true,
        });
        self
    }

    pub fn field(self, name: &str, ty: Type) -> Self {
        self.add_field(name, ty, false, false)
    }

    pub fn constant(mut self, name: &str, ty: Type, value: Value) -> Self {
        self.statics.push((name.into(), value));
        self.add_field(name, ty, true, true)
    }

    pub fn static_field(mut self, name: &str, ty: Type, value: Value) -> Self {
        self.statics.push((name.into(), value));
        self.add_field(name, ty, true, false)
    }

    fn add_method<F>(mut self, name: &str, params: &[Type], ret: Option<Type>, is_static: bool, is_native: bool, f: F) -> Self
    where
        F: Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault> + 'static,
    {
        let info = MethodInfo {
            name: name.into(),
            declaring: self.ty.clone(),
            params: params.to_vec(),
            ret,
            is_static,
            is_public: true,
            is_native,
        };
        let f: NativeFn = Rc::new(f);
        self.def.methods.push((info, Some(f)));
        self
    }

    pub fn method<F>(self, name: &str, params: &[Type], ret: Type, f: F) -> Self
    where
        F: Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault> + 'static,
    {
        self.add_method(name, params, Some(ret), false, false, f)
    }

    pub fn static_method<F>(self, name: &str, params: &[Type], ret: Type, f: F) -> Self
    where
        F: Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault> + 'static,
    {
        self.add_method(name, params, Some(ret), true, false, f)
    }

    pub fn native_method<F>(self, name: &str, params: &[Type], ret: Type, f: F) -> Self
    where
        F: Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault> + 'static,
    {
        self.add_method(name, params, Some(ret), false, true, f)
    }

    pub fn void_method<F>(self, name: &str, params: &[Type], f: F) -> Self
    where
        F: Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault> + 'static,
    {
        self.add_method(name, params, None, false, false, f)
    }

    pub fn constructor<F>(mut self, params: &[Type], f: F) -> Self
    where
        F: Fn(&mut Heap, Option<&Value>, &[Value], &Watchdog) -> Result<Value, Fault> + 'static,
    {
        let info = MethodInfo {
            name: CONSTRUCTOR.into(),
            declaring: self.ty.clone(),
            params: params.to_vec(),
            ret: Some(self.ty.clone()),
            is_static: true,
            is_public: true,
            is_native: false,
        };
        let f: NativeFn = Rc::new(f);
        self.def.ctors.push((info, f));
        self
    }

    /// A constructor taking every instance field declared so far, in order.
    pub fn record_constructor(self) -> Self {
        let fields: Vec<FieldInfo> = self.def.fields.iter()
            .filter(|f| !f.is_static)
            .cloned()
            .collect();
        let params: Vec<Type> = fields.iter().map(|f| f.ty.clone()).collect();
        let class = match &self.ty {
            Type::Class(name) => name.clone(),
            _ => Rc::from(OBJECT),
        };

        self.constructor(&params, move |heap, _, args, _| {
            let values = fields.iter()
                .zip(args)
                .map(|(f, v)| (&*f.name, v.clone()))
                .collect();
            Ok(heap.alloc(&class, values))
        })
    }
}

/// An in-memory program snapshot implementing [`Runtime`].
pub struct MemoryProgram {
    classes: IndexMap<Rc<str>, ClassDef>,
    heap: Heap,
    live_calls: usize,
    probes: usize,
}

impl Default for MemoryProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProgram {
    /// A program containing only the builtin library classes.
    pub fn new() -> Self {
        let mut program = Self {
            classes: IndexMap::new(),
            heap: Heap::default(),
            live_calls: 0,
            probes: 0,
        };

        for builtin in library::builtins() {
            let Type::Class(name) = &builtin.ty else { continue };
            let mut fields = Vec::new();

            for (info, value) in builtin.statics {
                program.heap.statics.insert((name.clone(), info.name.clone()), value);
                fields.push(info);
            }

            program.classes.insert(name.clone(), ClassDef {
                supers: builtin.supers,
                fields,
                methods: builtin.methods.into_iter().map(|m| (m, None)).collect(),
                ctors: Vec::new(),
            });
        }

        program
    }

    pub fn add_class(&mut self, builder: ClassBuilder) {
        let Type::Class(name) = builder.ty else { return };
        let mut def = builder.def;

        if def.supers.is_empty() && &*name != OBJECT {
            def.supers.push(Type::object());
        }
        for (field, value) in builder.statics {
            self.heap.statics.insert((name.clone(), field), value);
        }

        self.classes.insert(name, def);
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Live calls served so far, pure shortcuts excluded.
    pub fn live_calls(&self) -> usize {
        self.live_calls
    }

    pub fn probes(&self) -> usize {
        self.probes
    }

    fn class_name<'t>(&self, ty: &'t Type) -> Option<&'t str> {
        match ty {
            Type::Class(name) => Some(name),
            Type::Array(_) => Some(OBJECT),
            _ => None,
        }
    }

    /// Class followed by its ancestors, breadth first.
    fn lineage(&self, ty: &Type) -> Vec<(Rc<str>, &ClassDef)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::new();

        if let Some(name) = self.class_name(ty) {
            queue.push_back(Rc::<str>::from(name));
        }

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(def) = self.classes.get(&name) {
                queue.extend(def.supers.iter().filter_map(|s| self.class_name(s)).map(Rc::from));
                out.push((name, def));
            }
        }

        out
    }

    /// Runs a method body under `watchdog`. A body that overruns is reported
    /// as timed out whatever it returned.
    fn guarded<F>(&mut self, watchdog: &Watchdog, f: F) -> Result<Value, Fault>
    where
        F: FnOnce(&mut Heap) -> Result<Value, Fault>,
    {
        watchdog.check()?;
        self.heap.deadline = Some(watchdog.clone());
        let res = f(&mut self.heap);
        self.heap.deadline = None;

        match res {
            _ if watchdog.expired() => Err(Fault::Timeout),
            res => res,
        }
    }

    fn implementation(&self, method: &MethodInfo) -> Option<Option<NativeFn>> {
        let owner = self.class_name(&method.declaring)?;
        let def = self.classes.get(owner)?;

        def.methods.iter()
            .find(|(info, _)| info.name == method.name && info.params == method.params)
            .map(|(_, f)| f.clone())
    }
}

impl Introspection for MemoryProgram {
    fn fields(&self, ty: &Type) -> Vec<FieldInfo> {
        if let Type::Array(_) = ty {
            return vec![FieldInfo {
                name: "length".into(),
                declaring: ty.clone(),
                ty: Type::int(),
                is_static: false,
                is_final: true,
                is_public: true,
            }];
        }

        self.lineage(ty)
            .into_iter()
            .flat_map(|(_, def)| def.fields.iter().cloned())
            .collect()
    }

    fn methods(&self, ty: &Type) -> Vec<MethodInfo> {
        let mut seen = HashSet::new();

        self.lineage(ty)
            .into_iter()
            .flat_map(|(_, def)| def.methods.iter().map(|(m, _)| m.clone()))
            .filter(|m| seen.insert((m.name.clone(), m.params.clone())))
            .collect()
    }

    fn constructors(&self, ty: &Type) -> Vec<MethodInfo> {
        match ty {
            Type::Class(name) => self.classes.get(name)
                .map(|def| def.ctors.iter().map(|(m, _)| m.clone()).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn supertypes(&self, ty: &Type) -> Vec<Type> {
        match ty {
            Type::Class(name) => self.classes.get(name)
                .map(|def| def.supers.clone())
                .unwrap_or_default(),
            Type::Array(_) => vec![Type::object()],
            _ => Vec::new(),
        }
    }

    fn known_types(&self) -> Vec<Type> {
        let mut types: IndexSet<Type> = self.classes.keys()
            .map(|name| Type::Class(name.clone()))
            .collect();

        for object in &self.heap.objects {
            if let HeapObject::Array { elem, .. } = object {
                types.insert(Type::array_of(elem.clone()));
            }
        }
        for def in self.classes.values() {
            let sigs = def.fields.iter().map(|f| &f.ty)
                .chain(def.methods.iter().flat_map(|(m, _)| m.params.iter().chain(&m.ret)));
            for ty in sigs {
                if let Type::Array(_) = ty {
                    types.insert(ty.clone());
                }
            }
        }

        types.into_iter().collect()
    }

    fn runtime_type(&self, value: &Value) -> Type {
        if let Some(ty) = value.intrinsic_type() {
            return ty;
        }

        match value.handle().and_then(|h| self.heap.objects.get(h.0 as usize)) {
            Some(HeapObject::Instance { class, .. }) => Type::Class(class.clone()),
            Some(HeapObject::Array { elem, .. }) => Type::array_of(elem.clone()),
            None => Type::object(),
        }
    }
}

impl Runtime for MemoryProgram {
    fn get_field(
        &mut self,
        receiver: Option<&Value>,
        field: &FieldInfo,
        _watchdog: &Watchdog,
    ) -> Result<Value, Fault> {
        match receiver {
            None => {
                let class = self.class_name(&field.declaring).ok_or(Fault::Disconnected)?;
                self.heap.static_field(class, &field.name)
            },
            Some(object) => self.heap.get(object, &field.name),
        }
    }

    fn invoke(
        &mut self,
        receiver: Option<&Value>,
        method: &MethodInfo,
        args: &[Value],
        watchdog: &Watchdog,
    ) -> Result<Value, Fault> {
        self.live_calls += 1;

        if !method.is_static && receiver.map_or(true, Value::is_null) {
            return Err(Fault::npe());
        }

        let f = match self.implementation(method) {
            Some(Some(f)) => f,
            Some(None) => {
                if &*method.name == "toString" && method.params.is_empty() {
                    let this = receiver.ok_or_else(Fault::npe)?;
                    return Ok(Value::Str(self.display(this).into()));
                }
                // Library calls are linear in their string arguments, which
                // are capped at `MAX_STRING_CHARS`.
                return library::call(method, receiver, args)
                    .unwrap_or_else(|| Err(Fault::threw("AbstractMethodError")));
            },
            None => return Err(Fault::threw("NoSuchMethodError")),
        };

        self.guarded(watchdog, |heap| f(heap, receiver, args, watchdog))
    }

    fn construct(
        &mut self,
        ctor: &MethodInfo,
        args: &[Value],
        watchdog: &Watchdog,
    ) -> Result<Value, Fault> {
        self.live_calls += 1;

        let f = self.class_name(&ctor.declaring)
            .and_then(|name| self.classes.get(name))
            .and_then(|def| def.ctors.iter().find(|(info, _)| info.params == ctor.params))
            .map(|(_, f)| f.clone())
            .ok_or_else(|| Fault::threw("NoSuchMethodError"))?;

        self.guarded(watchdog, |heap| f(heap, None, args, watchdog))
    }

    fn array_get(&mut self, array: &Value, index: i32) -> Result<Value, Fault> {
        self.heap.element(array, index)
    }

    fn take_effects(&mut self) -> Vec<Effect> {
        mem::take(&mut self.heap.journal)
    }

    fn write(&mut self, location: &Location, value: &Value) {
        self.heap.store(location, value.clone());
    }

    fn display(&self, value: &Value) -> String {
        match value {
            Value::Object(h) | Value::Array(h) => format!("{}@{}", self.runtime_type(value), h.0),
            other => other.to_string(),
        }
    }

    fn allocation_mark(&self) -> usize {
        self.heap.objects.len()
    }

    fn reclaim(&mut self, mark: usize) {
        if mark < self.heap.objects.len() {
            trace!("reclaiming {} objects", self.heap.objects.len() - mark);
            self.heap.objects.truncate(mark);
        }
    }

    fn begin_probe(&mut self) {
        self.probes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_program() -> (MemoryProgram, Value) {
        let mut program = MemoryProgram::new();
        program.add_class(
            ClassBuilder::new("Counter")
                .field("n", Type::int())
                .method("inc", &[], Type::int(), |heap, this, _, _| {
                    let this = this.ok_or_else(Fault::npe)?;
                    let n = heap.get(this, "n")?.as_int().unwrap_or(0) + 1;
                    heap.set(this, "n", Value::Int(n))?;
                    Ok(Value::Int(n))
                }),
        );
        let c = program.heap_mut().alloc("Counter", vec![("n", Value::Int(0))]);

        (program, c)
    }

    #[test]
    fn journals_and_rewinds_writes() {
        let (mut program, c) = counter_program();
        let inc = program.methods(&Type::class("Counter"))
            .into_iter()
            .find(|m| &*m.name == "inc")
            .unwrap();
        let dog = Watchdog::arm(std::time::Duration::from_secs(5));

        assert_eq!(program.invoke(Some(&c), &inc, &[], &dog), Ok(Value::Int(1)));
        let effects = program.take_effects();
        assert_eq!(effects.len(), 1);
        assert!(program.take_effects().is_empty());

        for effect in effects.iter().rev() {
            program.write(&effect.location, &effect.old);
        }
        assert_eq!(program.heap().get(&c, "n"), Ok(Value::Int(0)));
    }

    #[test]
    fn overrunning_bodies_stop_without_polling() {
        let (mut program, _) = counter_program();
        program.add_class(
            ClassBuilder::new("Busy")
                .field("n", Type::int())
                .method("churn", &[], Type::int(), |heap, this, _, _| {
                    let this = this.ok_or_else(Fault::npe)?;
                    loop {
                        heap.get(this, "n")?;
                    }
                })
                .method("nap", &[], Type::int(), |_, _, _, _| {
                    std::thread::sleep(std::time::Duration::from_millis(30));
                    Ok(Value::Int(1))
                }),
        );
        let busy = program.heap_mut().alloc("Busy", vec![("n", Value::Int(0))]);
        let method = |program: &MemoryProgram, name: &str| program.methods(&Type::class("Busy"))
            .into_iter()
            .find(|m| &*m.name == name)
            .unwrap();
        let (churn, nap) = (method(&program, "churn"), method(&program, "nap"));

        let short = || Watchdog::arm(std::time::Duration::from_millis(10));
        assert_eq!(program.invoke(Some(&busy), &churn, &[], &short()), Err(Fault::Timeout));
        assert_eq!(program.invoke(Some(&busy), &nap, &[], &short()), Err(Fault::Timeout));

        let dog = Watchdog::arm(std::time::Duration::from_secs(5));
        assert_eq!(program.invoke(Some(&busy), &nap, &[], &dog), Ok(Value::Int(1)));
        assert_eq!(program.heap().get(&busy, "n"), Ok(Value::Int(0)));
    }

    #[test]
    fn hierarchy_and_members() {
        let (program, _) = counter_program();
        let counter = Type::class("Counter");

        assert!(program.is_subtype(&counter, &Type::object()));
        assert!(program.is_subtype(&Type::Null, &counter));
        assert!(!program.is_subtype(&Type::object(), &counter));
        assert!(program.methods(&counter).iter().any(|m| &*m.name == "toString"));
        assert!(program.methods(&Type::string()).iter().any(|m| &*m.name == "toUpperCase"));
        assert_eq!(program.fields(&Type::class("Integer")).len(), 2);
    }

    #[test]
    fn arrays() {
        let mut program = MemoryProgram::new();
        let arr = program.heap_mut().alloc_array(Type::int(), vec![Value::Int(1), Value::Int(2)]);
        let length = program.fields(&program.runtime_type(&arr)).remove(0);
        let dog = Watchdog::arm(std::time::Duration::from_secs(5));

        assert_eq!(program.get_field(Some(&arr), &length, &dog), Ok(Value::Int(2)));
        assert_eq!(program.array_get(&arr, 1), Ok(Value::Int(2)));
        assert_eq!(
            program.array_get(&arr, 2),
            Err(Fault::threw("ArrayIndexOutOfBoundsException"))
        );
        assert!(program.known_types().contains(&Type::array_of(Type::int())));
    }
}
