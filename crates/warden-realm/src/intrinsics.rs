// intrinsics.rs — The ambient capability graph of a fresh environment.
//
// This is everything confined code could reach before taming and pruning.
// Some of it (clock, entropy, locale, stack hooks, legacy match state, the
// dynamic `Function` evaluator) exists only to be shimmed or pruned away.

use crate::error::ErrorKind;
use crate::natives::{Builtin, LEGACY_GROUPS};
use crate::value::{Callable, Heap, Object, ObjectId, ObjectKind, Property, Value};

/// Well-known objects the interpreter allocates against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Intrinsics {
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub regexp_prototype: ObjectId,
    /// Indexed by `ErrorKind::index()`.
    pub error_prototypes: [ObjectId; 7],
}

impl Intrinsics {
    /// Intrinsics reachable only through hidden linkage, by policy name.
    pub(crate) fn anonymous(&self) -> [(&'static str, ObjectId); 1] {
        [("FunctionPrototype", self.function_prototype)]
    }
}

struct Setup<'h> {
    heap: &'h mut Heap,
    function_prototype: ObjectId,
}

impl Setup<'_> {
    fn object(&mut self, proto: Option<ObjectId>) -> ObjectId {
        self.heap.alloc(Object::ordinary(proto))
    }

    fn function(&mut self, builtin: Builtin) -> ObjectId {
        self.heap.alloc(Object::new(
            Some(self.function_prototype),
            ObjectKind::Function(Callable::Builtin(builtin)),
        ))
    }

    fn put(&mut self, target: ObjectId, key: &str, value: Value) {
        if let Some(object) = self.heap.object_mut(target) {
            object.properties.insert(key.to_string(), Property::Data(value));
        }
    }

    fn put_object(&mut self, target: ObjectId, key: &str, value: ObjectId) {
        self.put(target, key, Value::Object(value));
    }

    fn method(&mut self, target: ObjectId, key: &str, builtin: Builtin) -> ObjectId {
        let function = self.function(builtin);
        self.put_object(target, key, function);
        function
    }

    fn getter(&mut self, target: ObjectId, key: &str, builtin: Builtin) {
        let function = self.function(builtin);
        if let Some(object) = self.heap.object_mut(target) {
            object.properties.insert(
                key.to_string(),
                Property::Accessor {
                    get: Some(function),
                },
            );
        }
    }

    /// A constructor wired to its prototype both ways.
    fn constructor(&mut self, builtin: Builtin, prototype: ObjectId) -> ObjectId {
        let constructor = self.function(builtin);
        self.put_object(constructor, "prototype", prototype);
        self.put_object(prototype, "constructor", constructor);
        constructor
    }
}

/// Allocate the full intrinsic graph. Returns the global object.
pub(crate) fn create(heap: &mut Heap) -> (ObjectId, Intrinsics) {
    let object_prototype = heap.alloc(Object::ordinary(None));
    let function_prototype = heap.alloc(Object::ordinary(Some(object_prototype)));
    let mut setup = Setup {
        heap,
        function_prototype,
    };
    let global = setup.object(None);

    // Object
    let object_ctor = setup.function(Builtin::ObjectCtor);
    setup.put_object(object_ctor, "prototype", object_prototype);
    setup.method(object_ctor, "keys", Builtin::ObjectKeys);
    setup.method(object_ctor, "freeze", Builtin::ObjectFreeze);
    setup.method(object_ctor, "isFrozen", Builtin::ObjectIsFrozen);
    setup.method(object_ctor, "defineProperty", Builtin::ObjectDefineProperty);
    setup.method(object_ctor, "getPrototypeOf", Builtin::ObjectGetPrototypeOf);
    setup.method(object_prototype, "hasOwnProperty", Builtin::ObjectHasOwnProperty);
    setup.method(object_prototype, "toString", Builtin::ObjectToString);
    setup.method(object_prototype, "toLocaleString", Builtin::ObjectToLocaleString);
    setup.put_object(global, "Object", object_ctor);

    // The hidden function prototype and the dynamic evaluator behind it.
    setup.method(function_prototype, "toString", Builtin::FunctionToString);
    setup.constructor(Builtin::FunctionCtor, function_prototype);

    // Array
    let array_prototype = setup.object(Some(object_prototype));
    let array_ctor = setup.constructor(Builtin::ArrayCtor, array_prototype);
    setup.method(array_ctor, "isArray", Builtin::ArrayIsArray);
    setup.method(array_prototype, "push", Builtin::ArrayPush);
    setup.method(array_prototype, "join", Builtin::ArrayJoin);
    setup.method(array_prototype, "map", Builtin::ArrayMap);
    setup.method(array_prototype, "toString", Builtin::ArrayToString);
    setup.put_object(global, "Array", array_ctor);

    // Math
    let math = setup.object(Some(object_prototype));
    setup.method(math, "abs", Builtin::MathAbs);
    setup.method(math, "floor", Builtin::MathFloor);
    setup.method(math, "ceil", Builtin::MathCeil);
    setup.method(math, "max", Builtin::MathMax);
    setup.method(math, "min", Builtin::MathMin);
    setup.method(math, "sqrt", Builtin::MathSqrt);
    setup.method(math, "random", Builtin::MathRandom);
    setup.put(math, "PI", Value::Number(std::f64::consts::PI));
    setup.put_object(global, "Math", math);

    // Date
    let date = setup.object(Some(object_prototype));
    setup.method(date, "now", Builtin::DateNow);
    setup.put_object(global, "Date", date);

    // Intl
    let intl = setup.object(Some(object_prototype));
    setup.method(intl, "DateTimeFormat", Builtin::IntlDateTimeFormat);
    setup.method(intl, "NumberFormat", Builtin::IntlNumberFormat);
    setup.put_object(global, "Intl", intl);

    // RegExp, with the legacy match-state accessors.
    let regexp_prototype = setup.object(Some(object_prototype));
    let regexp_ctor = setup.constructor(Builtin::RegExpCtor, regexp_prototype);
    setup.method(regexp_prototype, "test", Builtin::RegExpTest);
    setup.method(regexp_prototype, "exec", Builtin::RegExpExec);
    setup.method(regexp_prototype, "toString", Builtin::RegExpToString);
    setup.getter(regexp_ctor, "lastMatch", Builtin::RegExpLastMatch);
    setup.getter(regexp_ctor, "input", Builtin::RegExpInput);
    for n in 1..=LEGACY_GROUPS {
        setup.getter(regexp_ctor, &format!("${}", n), Builtin::RegExpGroup(n));
    }
    setup.put_object(global, "RegExp", regexp_ctor);

    // Error and the standard kinds. Kinds other than Error inherit from it.
    let mut error_prototypes = [object_prototype; 7];
    let mut base_error: Option<(ObjectId, ObjectId)> = None;
    for kind in ErrorKind::ALL {
        let (proto_parent, ctor_parent) = match base_error {
            Some((ctor, proto)) => (proto, ctor),
            None => (object_prototype, function_prototype),
        };
        let prototype = setup.object(Some(proto_parent));
        let ctor = setup.constructor(Builtin::ErrorCtor(kind), prototype);
        if let Some(object) = setup.heap.object_mut(ctor) {
            object.proto = Some(ctor_parent);
        }
        setup.put(prototype, "name", Value::str(kind.name()));
        setup.put(prototype, "message", Value::str(""));
        if kind == ErrorKind::Error {
            setup.method(prototype, "toString", Builtin::ErrorToString);
            setup.method(ctor, "captureStackTrace", Builtin::ErrorCaptureStackTrace);
            setup.put(ctor, "stackTraceLimit", Value::Number(10.0));
            setup.put(ctor, "prepareStackTrace", Value::Undefined);
            base_error = Some((ctor, prototype));
        }
        error_prototypes[kind.index()] = prototype;
        setup.put_object(global, kind.name(), ctor);
    }

    setup.method(global, "isNaN", Builtin::IsNaN);
    setup.method(global, "String", Builtin::StringCtor);
    setup.method(global, "Number", Builtin::NumberCtor);

    let intrinsics = Intrinsics {
        object_prototype,
        function_prototype,
        array_prototype,
        regexp_prototype,
        error_prototypes,
    };
    (global, intrinsics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own(heap: &Heap, id: ObjectId, key: &str) -> Option<ObjectId> {
        match heap.object(id).properties.get(key) {
            Some(Property::Data(Value::Object(child))) => Some(*child),
            _ => None,
        }
    }

    #[test]
    fn ambient_surface_is_present() {
        let mut heap = Heap::building();
        let (global, _) = create(&mut heap);
        for name in ["Object", "Array", "Math", "Date", "Intl", "RegExp", "Error", "URIError"] {
            assert!(own(&heap, global, name).is_some(), "missing {}", name);
        }
        let error = own(&heap, global, "Error").unwrap();
        assert!(heap.object(error).properties.contains_key("captureStackTrace"));
        let regexp = own(&heap, global, "RegExp").unwrap();
        assert!(matches!(
            heap.object(regexp).properties.get("$9"),
            Some(Property::Accessor { get: Some(_) })
        ));
    }

    #[test]
    fn error_kinds_inherit_from_error() {
        let mut heap = Heap::building();
        let (global, intrinsics) = create(&mut heap);
        let base = intrinsics.error_prototypes[ErrorKind::Error.index()];
        let type_proto = intrinsics.error_prototypes[ErrorKind::TypeError.index()];
        assert_eq!(heap.object(type_proto).proto, Some(base));
        let error = own(&heap, global, "Error").unwrap();
        let type_error = own(&heap, global, "TypeError").unwrap();
        assert_eq!(heap.object(type_error).proto, Some(error));
    }

    #[test]
    fn function_constructor_hides_behind_the_prototype() {
        let mut heap = Heap::building();
        let (global, intrinsics) = create(&mut heap);
        assert!(own(&heap, global, "Function").is_none());
        assert!(own(&heap, intrinsics.function_prototype, "constructor").is_some());
    }
}
