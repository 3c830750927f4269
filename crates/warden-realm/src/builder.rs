// builder.rs — Build a sealed environment in one atomic step.
//
// Construction order:
//
// 1. Apply the selected taming shims
// 2. Install the gateway (and the console, if output is allowed)
// 3. Evaluate the bootstrap program
// 4. Prune against the effective policy
// 5. Seal
//
// Any failure aborts the whole build; no partially built environment is
// ever returned.

use std::sync::Arc;

use tracing::{debug, info, info_span};
use warden_policy::EffectivePolicy;

use crate::error::ConstructionError;
use crate::gateway::ConfinementEnvironment;
use crate::host::{OutputSink, TracingOutput};
use crate::prune::prune;
use crate::realm::{Lifecycle, Realm, BOOTSTRAP_SOURCE};
use crate::seal::seal;
use crate::shims::shim_for;

pub struct EnvironmentBuilder {
    effective: EffectivePolicy,
    output: Arc<dyn OutputSink>,
    bootstrap: String,
}

impl EnvironmentBuilder {
    pub fn new(effective: EffectivePolicy) -> Self {
        Self {
            effective,
            output: Arc::new(TracingOutput),
            bootstrap: BOOTSTRAP_SOURCE.to_string(),
        }
    }

    /// Where the confined `console` writes. Ignored unless output is allowed.
    pub fn with_output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = output;
        self
    }

    /// Replace the bootstrap program. Its completion value must be an object
    /// whose own properties become global bindings.
    pub fn with_bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap = source.into();
        self
    }

    pub fn build(self) -> Result<ConfinementEnvironment, ConstructionError> {
        let mut realm = Realm::new(self.output);
        let span = info_span!("construct", env = %realm.id());
        let _guard = span.enter();

        for kind in &self.effective.shims {
            realm.apply_shim(shim_for(*kind).as_ref())?;
        }
        realm.advance(Lifecycle::ShimsApplied)?;
        debug!(shims = ?self.effective.shims, "shims applied");

        realm.install_gateway()?;
        if self.effective.install_output {
            realm.install_console()?;
        }
        realm.evaluate_bootstrap(&self.bootstrap)?;
        debug!(bindings = ?realm.bootstrap_bindings(), "bootstrap evaluated");

        let report = prune(&mut realm, &self.effective.policy)?;
        let sealed = seal(&mut realm)?;

        info!(
            pruned = report.removed.len(),
            frozen = sealed.frozen,
            "environment constructed"
        );
        Ok(realm.into_environment(self.effective.policy.fingerprint())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BufferedOutput, Endowments};
    use warden_policy::{resolve, CapabilityPolicy, ConfinementOptions};

    fn effective(options: ConfinementOptions) -> EffectivePolicy {
        resolve(&options, &CapabilityPolicy::default_policy().unwrap())
    }

    #[test]
    fn builds_a_sealed_environment() {
        let env = EnvironmentBuilder::new(effective(ConfinementOptions::default()))
            .build()
            .unwrap();
        let result = env.evaluate("1 + 2", &Endowments::new()).unwrap();
        assert_eq!(result.as_f64(), Some(3.0));
        assert_eq!(env.policy_fingerprint().len(), 64);
    }

    #[test]
    fn console_only_when_output_is_allowed() {
        let sink = Arc::new(BufferedOutput::new());
        let env = EnvironmentBuilder::new(effective(ConfinementOptions::default()))
            .with_output(sink.clone())
            .build()
            .unwrap();
        let err = env
            .evaluate("console.log('hi')", &Endowments::new())
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::ReferenceError);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn bad_bootstrap_aborts_construction() {
        let err = EnvironmentBuilder::new(effective(ConfinementOptions::default()))
            .with_bootstrap("throw new Error('boom')")
            .build()
            .unwrap_err();
        match err {
            ConstructionError::Bootstrap(boundary) => assert_eq!(boundary.message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bootstrap_cannot_rebind_the_gateway() {
        let err = EnvironmentBuilder::new(effective(ConfinementOptions::default()))
            .with_bootstrap("({ Confine: 1 })")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConstructionError::BootstrapShape(_)));
    }
}
