// value.rs — Confined values and the object arena they live in.
//
// Objects and lexical scopes are stored in a `Graph` and addressed by index.
// A `Heap` layers a private, growable graph over a shared read-only base:
//
//   ids [0, base.len)        → the sealed intrinsic graph (never mutated)
//   ids [base.len, ...)      → this heap's own objects
//
// While an environment is being built the base is empty and everything is
// local. Sealing moves the local graph into the base; every evaluation then
// gets a fresh overlay that is dropped when the call returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use regex::Regex;

use crate::host::HostFunction;
use crate::natives::Builtin;
use crate::syntax::ast::FunctionDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u32);

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(ObjectId),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::String(Arc::from(s))
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }
}

/// Render a number the way the confined language prints it.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let magnitude = n.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return format!("{}", n);
    }
    let exp = format!("{:e}", n);
    match exp.split_once('e') {
        Some((mantissa, power)) if !power.starts_with('-') => format!("{}e+{}", mantissa, power),
        _ => exp,
    }
}

#[derive(Debug, Clone)]
pub enum Property {
    Data(Value),
    /// Getter-only accessor; assignments to it throw.
    Accessor { get: Option<ObjectId> },
}

#[derive(Debug, Clone)]
pub struct Object {
    pub proto: Option<ObjectId>,
    pub properties: BTreeMap<String, Property>,
    pub kind: ObjectKind,
    pub frozen: bool,
}

impl Object {
    pub fn new(proto: Option<ObjectId>, kind: ObjectKind) -> Self {
        Self {
            proto,
            properties: BTreeMap::new(),
            kind,
            frozen: false,
        }
    }

    pub fn ordinary(proto: Option<ObjectId>) -> Self {
        Self::new(proto, ObjectKind::Ordinary)
    }

    pub fn callable(&self) -> Option<&Callable> {
        match &self.kind {
            ObjectKind::Function(callable) => Some(callable),
            _ => None,
        }
    }

    /// Values directly held by this object: property values, getters and
    /// array elements. Prototype links are reported separately.
    pub fn referenced_objects(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for property in self.properties.values() {
            match property {
                Property::Data(Value::Object(id)) => out.push(*id),
                Property::Accessor { get: Some(id) } => out.push(*id),
                _ => {}
            }
        }
        if let ObjectKind::Array(items) = &self.kind {
            out.extend(items.iter().filter_map(Value::as_object));
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum ObjectKind {
    Ordinary,
    Array(Vec<Value>),
    Function(Callable),
    Error,
    RegExp(Arc<PatternSlot>),
}

#[derive(Debug, Clone)]
pub enum Callable {
    Builtin(Builtin),
    Closure {
        def: Arc<FunctionDef>,
        scope: ScopeId,
        name: Arc<str>,
        /// Arrow functions cannot be constructed.
        arrow: bool,
    },
    Host(HostFunction),
}

impl Callable {
    pub fn name(&self) -> Arc<str> {
        match self {
            Callable::Builtin(builtin) => Arc::from(builtin.name()),
            Callable::Closure { name, .. } => name.clone(),
            Callable::Host(f) => Arc::from(f.name()),
        }
    }
}

/// A compiled pattern and the source it came from.
#[derive(Debug)]
pub struct PatternSlot {
    pub source: String,
    pub flags: String,
    pub regex: Regex,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub bindings: HashMap<String, Binding>,
}

/// Arena of objects and scopes.
#[derive(Debug, Default)]
pub struct Graph {
    pub(crate) objects: Vec<Object>,
    pub(crate) scopes: Vec<Scope>,
}

impl Graph {
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// A mutable overlay on a shared, read-only base graph.
#[derive(Debug)]
pub struct Heap {
    base: Arc<Graph>,
    local: Graph,
}

impl Heap {
    /// A heap with no base: everything is mutable.
    pub fn building() -> Self {
        Self::overlay(Arc::new(Graph::default()))
    }

    pub fn overlay(base: Arc<Graph>) -> Self {
        Self {
            base,
            local: Graph::default(),
        }
    }

    /// Give up the local graph (used when sealing).
    pub fn into_local(self) -> Graph {
        self.local
    }

    pub fn base(&self) -> &Arc<Graph> {
        &self.base
    }

    fn base_objects(&self) -> usize {
        self.base.objects.len()
    }

    fn base_scopes(&self) -> usize {
        self.base.scopes.len()
    }

    pub fn is_base_object(&self, id: ObjectId) -> bool {
        (id.0 as usize) < self.base_objects()
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        let index = id.0 as usize;
        let base = self.base_objects();
        if index < base {
            &self.base.objects[index]
        } else {
            &self.local.objects[index - base]
        }
    }

    /// `None` for objects in the read-only base.
    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        let index = id.0 as usize;
        let base = self.base_objects();
        if index < base {
            None
        } else {
            self.local.objects.get_mut(index - base)
        }
    }

    pub fn alloc(&mut self, object: Object) -> ObjectId {
        let id = ObjectId((self.base_objects() + self.local.objects.len()) as u32);
        self.local.objects.push(object);
        id
    }

    pub fn is_frozen(&self, id: ObjectId) -> bool {
        self.is_base_object(id) || self.object(id).frozen
    }

    pub fn object_count(&self) -> usize {
        self.base_objects() + self.local.objects.len()
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        let index = id.0 as usize;
        let base = self.base_scopes();
        if index < base {
            &self.base.scopes[index]
        } else {
            &self.local.scopes[index - base]
        }
    }

    /// `None` for scopes captured into the read-only base.
    pub fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        let index = id.0 as usize;
        let base = self.base_scopes();
        if index < base {
            None
        } else {
            self.local.scopes.get_mut(index - base)
        }
    }

    pub fn alloc_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId((self.base_scopes() + self.local.scopes.len()) as u32);
        self.local.scopes.push(Scope {
            parent,
            bindings: HashMap::new(),
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_print_like_the_language() {
        assert_eq!(number_to_string(4.0), "4");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn overlay_never_writes_the_base() {
        let mut building = Heap::building();
        let id = building.alloc(Object::ordinary(None));
        let base = Arc::new(building.into_local());

        let mut overlay = Heap::overlay(base.clone());
        assert!(overlay.is_frozen(id));
        assert!(overlay.object_mut(id).is_none());

        let fresh = overlay.alloc(Object::ordinary(Some(id)));
        assert_eq!(fresh.0, 1);
        assert!(!overlay.is_frozen(fresh));
        assert_eq!(overlay.object(fresh).proto, Some(id));
        assert_eq!(base.object_count(), 1);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::Object(ObjectId(0)).truthy());
    }
}
