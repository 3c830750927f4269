// seal.rs — Deep-freeze a pruned environment.
//
// Sealing marks every object reachable from the global object and the
// anonymous intrinsics as frozen, following property values, getters,
// prototypes and the scopes captured by closures. The realm's graph then
// moves into a shared read-only arena; later evaluations allocate into
// private overlays and can never write the sealed graph.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::error::RealmError;
use crate::realm::{Lifecycle, Realm};
use crate::value::{Callable, Heap, ObjectId, ObjectKind, ScopeId};

/// Result of a seal call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SealReport {
    /// Objects frozen by this call.
    pub frozen: usize,
    /// The realm was sealed before this call; nothing changed.
    pub already_sealed: bool,
}

/// Seal `realm`. Idempotent once the realm is sealed.
pub fn seal(realm: &mut Realm) -> Result<SealReport, RealmError> {
    match realm.state() {
        Lifecycle::Sealed => {
            return Ok(SealReport {
                frozen: 0,
                already_sealed: true,
            })
        }
        Lifecycle::Pruned => {}
        other => {
            return Err(RealmError::Lifecycle {
                from: other,
                to: Lifecycle::Sealed,
            })
        }
    }

    let mut pending: Vec<ObjectId> = vec![realm.global()];
    pending.extend(
        realm
            .context
            .intrinsics
            .anonymous()
            .iter()
            .map(|(_, id)| *id),
    );
    let frozen = freeze_reachable(&mut realm.heap, pending);

    let heap = std::mem::replace(&mut realm.heap, Heap::building());
    let graph = Arc::new(heap.into_local());
    let objects = graph.object_count();
    realm.mark_sealed(graph)?;
    info!(env = %realm.id(), frozen, objects, "sealed environment");
    Ok(SealReport {
        frozen,
        already_sealed: false,
    })
}

fn freeze_reachable(heap: &mut Heap, mut pending: Vec<ObjectId>) -> usize {
    let mut scopes_seen: HashSet<ScopeId> = HashSet::new();
    let mut frozen = 0;
    while let Some(id) = pending.pop() {
        let Some(object) = heap.object_mut(id) else {
            continue;
        };
        if object.frozen {
            continue;
        }
        object.frozen = true;
        frozen += 1;
        pending.extend(object.referenced_objects());
        pending.extend(object.proto);

        let mut scope = match &object.kind {
            ObjectKind::Function(Callable::Closure { scope, .. }) => Some(*scope),
            _ => None,
        };
        while let Some(current) = scope {
            if !scopes_seen.insert(current) {
                break;
            }
            let captured = heap.scope(current);
            pending.extend(
                captured
                    .bindings
                    .values()
                    .filter_map(|binding| binding.value.as_object()),
            );
            scope = captured.parent;
        }
    }
    frozen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferedOutput;
    use crate::prune::prune;
    use crate::realm::BOOTSTRAP_SOURCE;
    use warden_policy::CapabilityPolicy;

    fn pruned() -> Realm {
        let mut realm = Realm::new(Arc::new(BufferedOutput::new()));
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        realm.evaluate_bootstrap(BOOTSTRAP_SOURCE).unwrap();
        prune(&mut realm, &CapabilityPolicy::default_policy().unwrap()).unwrap();
        realm
    }

    #[test]
    fn seal_is_idempotent() {
        let mut realm = pruned();
        let first = seal(&mut realm).unwrap();
        assert!(!first.already_sealed);
        assert!(first.frozen > 0);
        let second = seal(&mut realm).unwrap();
        assert!(second.already_sealed);
        assert_eq!(second.frozen, 0);
        assert_eq!(realm.state(), Lifecycle::Sealed);
    }

    #[test]
    fn sealed_graph_is_read_only() {
        let mut realm = pruned();
        seal(&mut realm).unwrap();
        let global = realm.global();
        assert!(realm.heap.is_frozen(global));
        assert!(realm.heap.object_mut(global).is_none());
        assert!(!realm.remove(global, "Math"));
    }

    #[test]
    fn unpruned_realm_cannot_seal() {
        let mut realm = Realm::new(Arc::new(BufferedOutput::new()));
        assert!(matches!(
            seal(&mut realm),
            Err(RealmError::Lifecycle { .. })
        ));
    }
}
