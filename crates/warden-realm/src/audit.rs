// audit.rs — Enumerate and check the binding paths of a sealed graph.

use std::collections::{BTreeSet, HashSet, VecDeque};

use warden_policy::CapabilityPolicy;

use crate::error::PolicyViolationError;
use crate::interp::RealmContext;
use crate::value::{Graph, ObjectId, Property, Value};

/// Breadth-first walk over data properties. Each object is expanded once,
/// under the shortest path that reaches it.
pub(crate) fn reachable_paths(graph: &Graph, context: &RealmContext) -> Vec<String> {
    let mut queue: VecDeque<(ObjectId, String)> = VecDeque::new();
    queue.push_back((context.global, String::new()));
    for (name, id) in context.intrinsics.anonymous() {
        queue.push_back((id, format!("%{}%", name)));
    }

    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut paths = Vec::new();
    while let Some((id, prefix)) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        let Some(object) = graph.objects.get(id.0 as usize) else {
            continue;
        };
        for (key, property) in &object.properties {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            if let Property::Data(Value::Object(child)) = property {
                queue.push_back((*child, path.clone()));
            }
            paths.push(path);
        }
    }
    paths.sort();
    paths
}

/// Paths neither licensed by `policy` nor under a bootstrap binding.
pub(crate) fn check(
    paths: &[String],
    policy: &CapabilityPolicy,
    bootstrap: &BTreeSet<String>,
) -> Result<(), PolicyViolationError> {
    let violations: Vec<String> = paths
        .iter()
        .filter(|path| !licensed(path, policy, bootstrap))
        .cloned()
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(PolicyViolationError { paths: violations })
    }
}

fn licensed(path: &str, policy: &CapabilityPolicy, bootstrap: &BTreeSet<String>) -> bool {
    if let Some(rest) = path.strip_prefix('%') {
        return match rest.split_once("%.") {
            Some((name, member)) => policy.permits_anonymous(name, member),
            None => false,
        };
    }
    let root = path.split('.').next().unwrap_or(path);
    bootstrap.contains(root) || policy.permits(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_paths_check_the_anonymous_table() {
        let policy = CapabilityPolicy::from_json(
            r#"{"version":1,"named":{"Math":{"abs":true}},"anonymous":{"FunctionPrototype":{"toString":true}}}"#,
        )
        .unwrap();
        let bootstrap: BTreeSet<String> = ["harden".to_string()].into_iter().collect();
        assert!(licensed("%FunctionPrototype%.toString", &policy, &bootstrap));
        assert!(!licensed("%FunctionPrototype%.constructor", &policy, &bootstrap));
        assert!(licensed("Math.abs", &policy, &bootstrap));
        assert!(!licensed("Math.random", &policy, &bootstrap));
        assert!(licensed("harden", &policy, &bootstrap));
    }

    #[test]
    fn violations_are_listed() {
        let policy = CapabilityPolicy::from_json(r#"{"version":1}"#).unwrap();
        let paths = vec!["Intl".to_string(), "Intl.NumberFormat".to_string()];
        let err = check(&paths, &policy, &BTreeSet::new()).unwrap_err();
        assert_eq!(err.paths.len(), 2);
    }
}
