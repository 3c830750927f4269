// capability.rs — Capability policy tree.
//
// A capability policy lists every ambient binding allowed to survive into a
// confined environment. It is a tree: `true` keeps a binding and everything
// beneath it, `false` (or absence) removes it, and a nested map keeps the
// binding while pruning its members against the map. Anything not named is
// denied.
//
// Two roots exist. `named` starts at the environment's global object.
// `anonymous` covers intrinsics that no global name reaches (e.g. the shared
// prototype of every function); a walk driven by top-level names alone would
// never visit them, so they must be listed here explicitly.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PolicyError;

/// The embedded default policy, versioned alongside the intrinsic set.
const DEFAULT_POLICY_JSON: &str = include_str!("../policies/default.json");

/// One node of the policy tree.
///
/// `#[serde(untagged)]` lets the JSON form be either a bare boolean or an
/// object, exactly as written in policy files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PolicyNode {
    /// `true` keeps the binding and its entire subtree; `false` removes it.
    Allow(bool),
    /// Keep the binding, prune its members against the nested table.
    Members(BTreeMap<String, PolicyNode>),
}

impl PolicyNode {
    /// Whether this node keeps its binding at all.
    pub fn keeps(&self) -> bool {
        !matches!(self, PolicyNode::Allow(false))
    }

    /// The member table, if this node prunes beneath itself.
    pub fn members(&self) -> Option<&BTreeMap<String, PolicyNode>> {
        match self {
            PolicyNode::Members(m) => Some(m),
            PolicyNode::Allow(_) => None,
        }
    }
}

/// A complete, versioned capability policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityPolicy {
    /// Policy format/content version.
    pub version: u32,
    /// Allowed bindings rooted at the global object.
    #[serde(default)]
    pub named: BTreeMap<String, PolicyNode>,
    /// Allowed members of intrinsics reachable only through hidden linkage.
    #[serde(default)]
    pub anonymous: BTreeMap<String, PolicyNode>,
}

impl CapabilityPolicy {
    /// The built-in default policy.
    pub fn default_policy() -> Result<Self, PolicyError> {
        Self::from_json(DEFAULT_POLICY_JSON)
    }

    /// Parse a policy document.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(json).map_err(|source| PolicyError::InvalidPolicy { source })
    }

    /// Load a policy document from disk.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let json = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Check whether a dotted binding path (e.g. `"Math.random"`) survives
    /// pruning under the named root.
    pub fn permits(&self, path: &str) -> bool {
        permits_in(&self.named, path)
    }

    /// Check whether `path` survives on the anonymous intrinsic `name`.
    /// An empty path asks about the intrinsic's own presence in the table.
    pub fn permits_anonymous(&self, name: &str, path: &str) -> bool {
        match self.anonymous.get(name) {
            None => false,
            Some(node) if path.is_empty() => node.keeps(),
            Some(PolicyNode::Allow(keep)) => *keep,
            Some(PolicyNode::Members(members)) => permits_in(members, path),
        }
    }

    /// Grant a dotted path in the named root, creating intermediate member
    /// tables as needed. Used only on a construction-local copy of a policy.
    pub fn grant(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut table = &mut self.named;
        for segment in parents {
            let node = table
                .entry((*segment).to_string())
                .or_insert_with(|| PolicyNode::Members(BTreeMap::new()));
            // Already wholly allowed: nothing beneath needs granting.
            if matches!(node, PolicyNode::Allow(true)) {
                return;
            }
            if matches!(node, PolicyNode::Allow(false)) {
                *node = PolicyNode::Members(BTreeMap::new());
            }
            table = match node {
                PolicyNode::Members(m) => m,
                PolicyNode::Allow(_) => return,
            };
        }
        table.insert((*last).to_string(), PolicyNode::Allow(true));
    }

    /// SHA-256 fingerprint of the canonical JSON form, lowercase hex.
    ///
    /// `BTreeMap` keeps key order stable, so equal policies hash equally.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

/// Walk a member table along a dotted path.
fn permits_in(root: &BTreeMap<String, PolicyNode>, path: &str) -> bool {
    let mut table = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        match table.get(segment) {
            None | Some(PolicyNode::Allow(false)) => return false,
            Some(PolicyNode::Allow(true)) => return true,
            Some(PolicyNode::Members(members)) => {
                if segments.peek().is_none() {
                    return true;
                }
                table = members;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CapabilityPolicy {
        CapabilityPolicy::from_json(
            r#"{
                "version": 1,
                "named": {
                    "Math": { "floor": true, "random": false },
                    "Date": true
                },
                "anonymous": { "FunctionPrototype": { "toString": true } }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn default_policy_parses() {
        let policy = CapabilityPolicy::default_policy().unwrap();
        assert!(policy.permits("Math.random"));
        assert!(policy.permits("Object.prototype.toLocaleString"));
        assert!(!policy.permits("Intl"));
        assert!(!policy.permits("Error.captureStackTrace"));
        assert!(policy.permits_anonymous("FunctionPrototype", "toString"));
        assert!(!policy.permits_anonymous("FunctionPrototype", "constructor"));
    }

    #[test]
    fn true_keeps_whole_subtree() {
        let policy = sample();
        assert!(policy.permits("Date"));
        assert!(policy.permits("Date.now"));
        assert!(policy.permits("Date.now.anything.below"));
    }

    #[test]
    fn members_prune_beneath() {
        let policy = sample();
        assert!(policy.permits("Math"));
        assert!(policy.permits("Math.floor"));
        assert!(!policy.permits("Math.random"));
        assert!(!policy.permits("Math.sqrt"));
        assert!(!policy.permits("Intl"));
    }

    #[test]
    fn anonymous_lookup() {
        let policy = sample();
        assert!(policy.permits_anonymous("FunctionPrototype", ""));
        assert!(policy.permits_anonymous("FunctionPrototype", "toString"));
        assert!(!policy.permits_anonymous("FunctionPrototype", "constructor"));
        assert!(!policy.permits_anonymous("Unlisted", ""));
    }

    #[test]
    fn grant_creates_intermediate_tables() {
        let mut policy = sample();
        policy.grant("Error.captureStackTrace");
        assert!(policy.permits("Error"));
        assert!(policy.permits("Error.captureStackTrace"));
        assert!(!policy.permits("Error.prototype"));

        // Granting beneath a wholly-allowed node changes nothing.
        let before = policy.clone();
        policy.grant("Date.now");
        assert_eq!(policy, before);
    }

    #[test]
    fn grant_overrides_explicit_deny() {
        let mut policy = sample();
        policy.grant("Math.random");
        assert!(policy.permits("Math.random"));
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = sample();
        let b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut c = sample();
        c.grant("Math.sqrt");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn invalid_document_is_rejected() {
        let err = CapabilityPolicy::from_json(r#"{"named": {}}"#).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPolicy { .. }));
    }
}
