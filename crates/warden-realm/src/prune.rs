// prune.rs — Remove every binding the capability policy does not license.
//
// Pruning walks the intrinsic graph from two kinds of root:
//
// - the global object, against the policy's named table
// - each anonymous intrinsic (reachable only via hidden linkage), against
//   its entry in the anonymous table
//
// A member missing from its table, or mapped to `false`, is deleted. `true`
// keeps the member and everything beneath it. A nested table keeps the
// member and prunes its own members in turn. An object reachable under two
// different tables is pruned by both, so it keeps the intersection.
//
// Bindings installed by the constructor itself (bootstrap bindings) are
// never pruned.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};
use warden_policy::{CapabilityPolicy, PolicyNode};

use crate::error::RealmError;
use crate::realm::{Lifecycle, Realm};
use crate::value::{ObjectId, Property, Value};

type Table = BTreeMap<String, PolicyNode>;

/// What a prune pass deleted, as dotted paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub removed: Vec<String>,
}

struct Pass<'p> {
    object: ObjectId,
    table: &'p Table,
    path: String,
    spare_bootstrap: bool,
}

/// Prune `realm` against `policy` and advance it to `Pruned`.
pub fn prune(realm: &mut Realm, policy: &CapabilityPolicy) -> Result<PruneReport, RealmError> {
    if realm.state() == Lifecycle::Sealed {
        return Err(RealmError::Sealed { operation: "prune" });
    }
    if realm.state() != Lifecycle::BootstrapEvaluated {
        return Err(RealmError::Lifecycle {
            from: realm.state(),
            to: Lifecycle::Pruned,
        });
    }

    let empty = Table::new();
    let mut report = PruneReport::default();
    let mut work = vec![Pass {
        object: realm.global(),
        table: &policy.named,
        path: String::new(),
        spare_bootstrap: true,
    }];

    for (name, object) in realm.context.intrinsics.anonymous() {
        let label = format!("%{}%", name);
        match policy.anonymous.get(name) {
            Some(PolicyNode::Allow(true)) => {}
            Some(PolicyNode::Members(members)) => work.push(Pass {
                object,
                table: members,
                path: label,
                spare_bootstrap: false,
            }),
            // Unlisted or denied: the intrinsic stays (it is still linked
            // from every function) but loses all of its members.
            Some(PolicyNode::Allow(false)) | None => work.push(Pass {
                object,
                table: &empty,
                path: label,
                spare_bootstrap: false,
            }),
        }
    }

    let mut visited: HashSet<(ObjectId, *const Table)> = HashSet::new();
    while let Some(pass) = work.pop() {
        if !visited.insert((pass.object, pass.table as *const Table)) {
            continue;
        }
        let keys: Vec<String> = realm
            .heap
            .object(pass.object)
            .properties
            .keys()
            .cloned()
            .collect();
        for key in keys {
            let path = if pass.path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", pass.path, key)
            };
            if pass.spare_bootstrap && realm.bootstrap_bindings().contains(&key) {
                continue;
            }
            match pass.table.get(&key) {
                Some(PolicyNode::Allow(true)) => {}
                Some(PolicyNode::Members(members)) => {
                    if let Some(Property::Data(Value::Object(child))) =
                        realm.heap.object(pass.object).properties.get(&key)
                    {
                        work.push(Pass {
                            object: *child,
                            table: members,
                            path,
                            spare_bootstrap: false,
                        });
                    }
                }
                Some(PolicyNode::Allow(false)) | None => {
                    realm.remove(pass.object, &key);
                    debug!(path = %path, "pruned binding");
                    report.removed.push(path);
                }
            }
        }
    }

    report.removed.sort();
    realm.advance(Lifecycle::Pruned)?;
    info!(
        env = %realm.id(),
        removed = report.removed.len(),
        "pruned environment against capability policy"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::host::BufferedOutput;
    use crate::realm::BOOTSTRAP_SOURCE;

    fn bootstrapped() -> Realm {
        let mut realm = Realm::new(Arc::new(BufferedOutput::new()));
        realm.advance(Lifecycle::ShimsApplied).unwrap();
        realm.evaluate_bootstrap(BOOTSTRAP_SOURCE).unwrap();
        realm
    }

    fn policy(json: &str) -> CapabilityPolicy {
        CapabilityPolicy::from_json(json).unwrap()
    }

    #[test]
    fn keeps_only_licensed_paths() {
        let mut realm = bootstrapped();
        let policy = policy(r#"{"version":1,"named":{"Math":{"abs":true},"Array":true}}"#);
        let report = prune(&mut realm, &policy).unwrap();

        let global = realm.global();
        let math = realm.member(global, "Math").unwrap();
        assert!(realm.has_member(math, "abs"));
        assert!(!realm.has_member(math, "random"));
        assert!(realm.member(global, "Array").is_some());
        assert!(realm.member(global, "Date").is_none());
        assert!(report.removed.contains(&"Math.random".to_string()));
        assert!(report.removed.contains(&"Intl".to_string()));
        assert_eq!(realm.state(), Lifecycle::Pruned);
    }

    #[test]
    fn bootstrap_bindings_survive() {
        let mut realm = bootstrapped();
        prune(&mut realm, &policy(r#"{"version":1}"#)).unwrap();
        let global = realm.global();
        assert!(realm.has_member(global, "harden"));
        assert!(realm.has_member(global, "nat"));
        assert!(!realm.has_member(global, "Object"));
    }

    #[test]
    fn anonymous_intrinsics_lose_unlisted_members() {
        let mut realm = bootstrapped();
        let policy = policy(
            r#"{"version":1,"anonymous":{"FunctionPrototype":{"toString":true}}}"#,
        );
        let report = prune(&mut realm, &policy).unwrap();
        let proto = realm.context.intrinsics.function_prototype;
        assert!(realm.has_member(proto, "toString"));
        assert!(!realm.has_member(proto, "constructor"));
        assert!(report
            .removed
            .contains(&"%FunctionPrototype%.constructor".to_string()));
    }

    #[test]
    fn requires_bootstrap_first() {
        let mut realm = Realm::new(Arc::new(BufferedOutput::new()));
        let err = prune(&mut realm, &policy(r#"{"version":1}"#)).unwrap_err();
        assert!(matches!(err, RealmError::Lifecycle { .. }));
    }
}
