// gateway.rs — The boundary gateway of a sealed environment.
//
// `ConfinementEnvironment` is the only thing callers hold after
// construction. Every evaluation runs in a private heap overlay on top of
// the sealed graph: endowments, locals and any objects the code allocates
// live in that overlay and are dropped when the call returns.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, debug_span};
use uuid::Uuid;
use warden_policy::CapabilityPolicy;

use crate::audit;
use crate::error::{BoundaryError, PolicyViolationError};
use crate::host::{Endowments, HostValue};
use crate::interp::{Interpreter, RealmContext, Thrown};
use crate::marshal::marshal;
use crate::value::{Graph, Heap};

/// A sealed confinement environment. Cheap to clone; safe to share across
/// threads.
#[derive(Clone)]
pub struct ConfinementEnvironment {
    id: Uuid,
    graph: Arc<Graph>,
    context: Arc<RealmContext>,
    policy_fingerprint: String,
    bootstrap_bindings: Arc<BTreeSet<String>>,
}

impl std::fmt::Debug for ConfinementEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfinementEnvironment")
            .field("id", &self.id)
            .field("objects", &self.graph.object_count())
            .field("policy_fingerprint", &self.policy_fingerprint)
            .finish()
    }
}

impl ConfinementEnvironment {
    pub(crate) fn new(
        id: Uuid,
        graph: Arc<Graph>,
        context: RealmContext,
        policy_fingerprint: String,
        bootstrap_bindings: BTreeSet<String>,
    ) -> Self {
        Self {
            id,
            graph,
            context: Arc::new(context),
            policy_fingerprint,
            bootstrap_bindings: Arc::new(bootstrap_bindings),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Fingerprint of the effective policy this environment was pruned under.
    pub fn policy_fingerprint(&self) -> &str {
        &self.policy_fingerprint
    }

    pub fn bootstrap_bindings(&self) -> &BTreeSet<String> {
        &self.bootstrap_bindings
    }

    /// Run a program; its result is the value of the last expression
    /// statement.
    pub fn evaluate(&self, code: &str, endowments: &Endowments) -> Result<HostValue, BoundaryError> {
        self.run(code, endowments, false)
    }

    /// Evaluate exactly one expression.
    pub fn evaluate_expression(
        &self,
        code: &str,
        endowments: &Endowments,
    ) -> Result<HostValue, BoundaryError> {
        self.run(code, endowments, true)
    }

    fn run(&self, code: &str, endowments: &Endowments, expression: bool) -> Result<HostValue, BoundaryError> {
        let span = debug_span!("evaluate", env = %self.id, expression);
        let _guard = span.enter();

        let mut heap = Heap::overlay(self.graph.clone());
        let mut interp = Interpreter::new(&mut heap, &self.context);
        let root = interp.endowment_scope(endowments);
        let outcome = match interp.evaluate_source(code, root, expression) {
            Ok(value) => Ok(interp.export(&value)),
            Err(Thrown(raw)) => Err(marshal(&mut interp, raw)),
        };
        match &outcome {
            Ok(_) => debug!(allocated = heap.object_count() - self.graph.object_count(), "evaluation completed"),
            Err(err) => debug!(kind = %err.kind, opaque = err.opaque, "evaluation failed"),
        }
        outcome
    }

    /// Every binding path reachable from the global object and the anonymous
    /// intrinsics, sorted.
    pub fn reachable_paths(&self) -> Vec<String> {
        audit::reachable_paths(&self.graph, &self.context)
    }

    /// Check that every reachable path is licensed by `policy` or lies under
    /// a bootstrap binding.
    pub fn audit(&self, policy: &CapabilityPolicy) -> Result<(), PolicyViolationError> {
        audit::check(&self.reachable_paths(), policy, &self.bootstrap_bindings)
    }
}
