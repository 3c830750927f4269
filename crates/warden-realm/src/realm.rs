// realm.rs — An environment under construction.
//
// A `Realm` owns the intrinsic graph while it is still mutable and enforces
// the construction order:
//
//   Building → ShimsApplied → BootstrapEvaluated → Pruned → Sealed
//
// Transitions only move forward one step at a time. Once sealed, the graph
// lives in a shared read-only arena and the realm can be turned into a
// `ConfinementEnvironment`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use warden_policy::ShimKind;

use crate::error::{ConstructionError, RealmError, ShimError};
use crate::gateway::ConfinementEnvironment;
use crate::host::{HostValue, OutputLevel, OutputSink};
use crate::interp::{Interpreter, RealmContext, Thrown};
use crate::intrinsics;
use crate::marshal::marshal;
use crate::natives::{self, Builtin};
use crate::shims::TamingShim;
use crate::value::{Callable, Graph, Heap, Object, ObjectId, ObjectKind, Property, Value};

/// The bootstrap program. Evaluated once per construction with the
/// construction-only endowment `deepFreeze`; its completion value is the
/// table of bindings installed on the global object.
pub const BOOTSTRAP_SOURCE: &str = r#"
({
  harden: (value) => deepFreeze(value),
  nat: function nat(n) {
    if (typeof n !== "number") {
      throw new TypeError("nat: not a number: " + n)
    }
    if (n < 0 || n % 1 !== 0) {
      throw new RangeError("nat: not a natural number: " + n)
    }
    if (n > 9007199254740991) {
      throw new RangeError("nat: not a safe integer: " + n)
    }
    return n
  }
})
"#;

/// Construction state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Building,
    ShimsApplied,
    BootstrapEvaluated,
    Pruned,
    Sealed,
}

impl Lifecycle {
    /// The only state this one may advance to.
    pub fn next(self) -> Option<Lifecycle> {
        match self {
            Lifecycle::Building => Some(Lifecycle::ShimsApplied),
            Lifecycle::ShimsApplied => Some(Lifecycle::BootstrapEvaluated),
            Lifecycle::BootstrapEvaluated => Some(Lifecycle::Pruned),
            Lifecycle::Pruned => Some(Lifecycle::Sealed),
            Lifecycle::Sealed => None,
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Building => "building",
            Lifecycle::ShimsApplied => "shims_applied",
            Lifecycle::BootstrapEvaluated => "bootstrap_evaluated",
            Lifecycle::Pruned => "pruned",
            Lifecycle::Sealed => "sealed",
        };
        f.write_str(name)
    }
}

pub struct Realm {
    id: Uuid,
    state: Lifecycle,
    pub(crate) heap: Heap,
    pub(crate) sealed: Option<Arc<Graph>>,
    pub(crate) context: RealmContext,
    applied_shims: BTreeSet<ShimKind>,
    bootstrap_bindings: BTreeSet<String>,
}

impl Realm {
    /// A fresh realm holding the full ambient intrinsic graph.
    pub fn new(output: Arc<dyn OutputSink>) -> Self {
        let mut heap = Heap::building();
        let (global, intrinsics) = intrinsics::create(&mut heap);
        let id = Uuid::new_v4();
        debug!(env = %id, objects = heap.object_count(), "created intrinsic graph");
        Self {
            id,
            state: Lifecycle::Building,
            heap,
            sealed: None,
            context: RealmContext {
                global,
                intrinsics,
                capture_stacks: true,
                output,
            },
            applied_shims: BTreeSet::new(),
            bootstrap_bindings: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn applied_shims(&self) -> &BTreeSet<ShimKind> {
        &self.applied_shims
    }

    /// Names installed by the constructor itself; exempt from pruning.
    pub fn bootstrap_bindings(&self) -> &BTreeSet<String> {
        &self.bootstrap_bindings
    }

    /// Move to `to`, which must be the immediate successor state.
    pub fn advance(&mut self, to: Lifecycle) -> Result<(), RealmError> {
        if self.state.next() != Some(to) {
            return Err(RealmError::Lifecycle {
                from: self.state,
                to,
            });
        }
        debug!(env = %self.id, from = %self.state, to = %to, "lifecycle transition");
        self.state = to;
        Ok(())
    }

    fn ensure_unsealed(&self, operation: &'static str) -> Result<(), RealmError> {
        if self.state == Lifecycle::Sealed {
            return Err(RealmError::Sealed { operation });
        }
        Ok(())
    }

    /// Apply a taming shim. Returns `false` if that shim already ran.
    pub fn apply_shim(&mut self, shim: &dyn TamingShim) -> Result<bool, ShimError> {
        self.ensure_unsealed("apply shim")?;
        if self.state != Lifecycle::Building {
            return Err(RealmError::Lifecycle {
                from: self.state,
                to: Lifecycle::ShimsApplied,
            }
            .into());
        }
        if self.applied_shims.contains(&shim.kind()) {
            return Ok(false);
        }
        shim.apply(self)?;
        self.applied_shims.insert(shim.kind());
        debug!(env = %self.id, shim = %shim.kind(), "applied taming shim");
        Ok(true)
    }

    fn check_new_binding(&self, name: &str) -> Result<(), RealmError> {
        self.ensure_unsealed("define global")?;
        let reason = if self.state >= Lifecycle::Pruned {
            Some("environment has already been pruned")
        } else if name.is_empty() {
            Some("name is empty")
        } else if self.global_has(name) {
            Some("name is already bound")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(RealmError::InvalidBinding {
                name: name.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Install a host value as a global binding. Host-defined globals are
    /// bootstrap bindings: the policy does not prune them.
    pub fn define_global(&mut self, name: &str, value: HostValue) -> Result<(), RealmError> {
        self.check_new_binding(name)?;
        let value = Interpreter::new(&mut self.heap, &self.context).import(&value);
        self.install_global(name, value);
        Ok(())
    }

    /// The nested-confinement gateway, `Confine.evaluate(code, endowments)`.
    pub fn install_gateway(&mut self) -> Result<(), RealmError> {
        self.install_namespace(
            "Confine",
            &[
                ("evaluate", Builtin::ConfineEvaluate),
                ("evaluateExpression", Builtin::ConfineEvaluateExpression),
            ],
        )
    }

    /// The restricted `console`, forwarding to this realm's output sink.
    pub fn install_console(&mut self) -> Result<(), RealmError> {
        self.install_namespace(
            "console",
            &[
                ("log", Builtin::Console(OutputLevel::Log)),
                ("info", Builtin::Console(OutputLevel::Info)),
                ("warn", Builtin::Console(OutputLevel::Warn)),
                ("error", Builtin::Console(OutputLevel::Error)),
            ],
        )
    }

    fn install_namespace(&mut self, name: &str, entries: &[(&str, Builtin)]) -> Result<(), RealmError> {
        self.check_new_binding(name)?;
        let proto = self.context.intrinsics.object_prototype;
        let namespace = self.heap.alloc(Object::ordinary(Some(proto)));
        for (key, builtin) in entries {
            let function = self.builtin_function(*builtin);
            self.put(namespace, key, Value::Object(function));
        }
        self.install_global(name, Value::Object(namespace));
        Ok(())
    }

    /// Run the bootstrap program and install its completion table.
    pub fn evaluate_bootstrap(&mut self, source: &str) -> Result<(), ConstructionError> {
        self.ensure_unsealed("evaluate bootstrap")?;
        if self.state != Lifecycle::ShimsApplied {
            return Err(RealmError::Lifecycle {
                from: self.state,
                to: Lifecycle::BootstrapEvaluated,
            }
            .into());
        }

        let bindings = {
            let mut interp = Interpreter::new(&mut self.heap, &self.context);
            let root = interp.heap.alloc_scope(None);
            let deep_freeze = natives::function_object(&mut interp, Builtin::Harden);
            interp.bind(root, "deepFreeze", deep_freeze, false);
            match interp.evaluate_source(source, root, false) {
                Ok(Value::Object(id)) if matches!(interp.heap.object(id).kind, ObjectKind::Ordinary) => {
                    interp
                        .heap
                        .object(id)
                        .properties
                        .iter()
                        .filter_map(|(name, property)| match property {
                            Property::Data(value) => Some((name.clone(), value.clone())),
                            Property::Accessor { .. } => None,
                        })
                        .collect::<Vec<_>>()
                }
                Ok(other) => {
                    return Err(ConstructionError::BootstrapShape(format!(
                        "completion value is {}, expected a table of bindings",
                        interp.type_of(&other)
                    )))
                }
                Err(Thrown(raw)) => return Err(ConstructionError::Bootstrap(marshal(&mut interp, raw))),
            }
        };

        for (name, value) in bindings {
            if self.global_has(&name) {
                return Err(ConstructionError::BootstrapShape(format!(
                    "binding '{}' collides with an existing global",
                    name
                )));
            }
            self.install_global(&name, value);
        }
        self.advance(Lifecycle::BootstrapEvaluated)?;
        Ok(())
    }

    /// Hand the sealed graph to a usable environment.
    pub fn into_environment(self, policy_fingerprint: String) -> Result<ConfinementEnvironment, RealmError> {
        let graph = match (&self.sealed, self.state) {
            (Some(graph), Lifecycle::Sealed) => graph.clone(),
            _ => {
                return Err(RealmError::Lifecycle {
                    from: self.state,
                    to: Lifecycle::Sealed,
                })
            }
        };
        Ok(ConfinementEnvironment::new(
            self.id,
            graph,
            self.context,
            policy_fingerprint,
            self.bootstrap_bindings,
        ))
    }

    // ── crate-internal graph surgery (shims, pruner, sealer) ────

    pub(crate) fn global(&self) -> ObjectId {
        self.context.global
    }

    fn global_has(&self, name: &str) -> bool {
        self.heap
            .object(self.context.global)
            .properties
            .contains_key(name)
    }

    fn install_global(&mut self, name: &str, value: Value) {
        let global = self.context.global;
        self.put(global, name, value);
        self.bootstrap_bindings.insert(name.to_string());
    }

    /// The object held by `target[key]`, if it is a data property.
    pub(crate) fn member(&self, target: ObjectId, key: &str) -> Option<ObjectId> {
        match self.heap.object(target).properties.get(key) {
            Some(Property::Data(Value::Object(id))) => Some(*id),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_member(&self, target: ObjectId, key: &str) -> bool {
        self.heap.object(target).properties.contains_key(key)
    }

    pub(crate) fn builtin_function(&mut self, builtin: Builtin) -> ObjectId {
        let proto = self.context.intrinsics.function_prototype;
        self.heap.alloc(Object::new(
            Some(proto),
            ObjectKind::Function(Callable::Builtin(builtin)),
        ))
    }

    pub(crate) fn put(&mut self, target: ObjectId, key: &str, value: Value) {
        if let Some(object) = self.heap.object_mut(target) {
            object.properties.insert(key.to_string(), Property::Data(value));
        }
    }

    pub(crate) fn remove(&mut self, target: ObjectId, key: &str) -> bool {
        self.heap
            .object_mut(target)
            .is_some_and(|object| object.properties.remove(key).is_some())
    }

    pub(crate) fn set_stack_capture(&mut self, enabled: bool) {
        self.context.capture_stacks = enabled;
    }

    pub(crate) fn mark_sealed(&mut self, graph: Arc<Graph>) -> Result<(), RealmError> {
        self.heap = Heap::overlay(graph.clone());
        self.sealed = Some(graph);
        self.advance(Lifecycle::Sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferedOutput;

    fn realm() -> Realm {
        Realm::new(Arc::new(BufferedOutput::new()))
    }

    #[test]
    fn transitions_must_be_sequential() {
        let mut realm = realm();
        assert!(matches!(
            realm.advance(Lifecycle::Pruned),
            Err(RealmError::Lifecycle {
                from: Lifecycle::Building,
                to: Lifecycle::Pruned
            })
        ));
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        assert!(realm.advance(Lifecycle::Building).is_err());
        assert_eq!(realm.state(), Lifecycle::ShimsApplied);
    }

    #[test]
    fn bootstrap_installs_its_table() {
        let mut realm = realm();
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        realm.evaluate_bootstrap(BOOTSTRAP_SOURCE).unwrap();
        assert_eq!(realm.state(), Lifecycle::BootstrapEvaluated);
        let names: Vec<_> = realm.bootstrap_bindings().iter().cloned().collect();
        assert_eq!(names, vec!["harden".to_string(), "nat".to_string()]);
        assert!(!realm.has_member(realm.global(), "deepFreeze"));
    }

    #[test]
    fn bootstrap_must_yield_an_object() {
        let mut realm = realm();
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        let err = realm.evaluate_bootstrap("1 + 1").unwrap_err();
        assert!(matches!(err, ConstructionError::BootstrapShape(_)));
    }

    #[test]
    fn failing_bootstrap_is_marshalled() {
        let mut realm = realm();
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        let err = realm
            .evaluate_bootstrap("throw new RangeError('no')")
            .unwrap_err();
        match err {
            ConstructionError::Bootstrap(boundary) => {
                assert_eq!(boundary.kind, crate::ErrorKind::RangeError);
                assert_eq!(boundary.message, "no");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bootstrap_cannot_shadow_intrinsics() {
        let mut realm = realm();
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        let err = realm.evaluate_bootstrap("({ Math: 1 })").unwrap_err();
        assert!(matches!(err, ConstructionError::BootstrapShape(_)));
    }

    #[test]
    fn globals_are_validated() {
        let mut realm = realm();
        realm.define_global("answer", HostValue::Number(42.0)).unwrap();
        assert!(realm.define_global("answer", HostValue::Null).is_err());
        assert!(realm.define_global("", HostValue::Null).is_err());
        assert!(realm.define_global("Math", HostValue::Null).is_err());
        assert!(realm.bootstrap_bindings().contains("answer"));
    }
}
