// resolve.rs — Effective policy resolution.
//
// `resolve()` turns a base policy plus construction options into the
// snapshot one environment is built under:
//
// 1. Copy the base policy (the caller's copy is never touched)
// 2. For each option not set to "allow", select that capability's shim
// 3. If diagnostics are allowed, widen the copy to re-admit the stack hooks
// 4. Record whether the restricted output binding should be installed
//
// Only the diagnostic option widens the policy. Other "allow" settings just
// skip their shim; the base policy still decides what survives pruning.

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityPolicy;
use crate::options::{ConfinementOptions, ShimKind};

/// Stack/trace hooks on the base error constructor, re-admitted when
/// diagnostics are allowed.
pub const DIAGNOSTIC_HOOKS: &[&str] = &[
    "Error.captureStackTrace",
    "Error.stackTraceLimit",
    "Error.prepareStackTrace",
];

/// The policy snapshot and shim selection for exactly one construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePolicy {
    /// Construction-local policy copy, possibly widened.
    pub policy: CapabilityPolicy,
    /// Shims to apply, in no particular order (capabilities are disjoint).
    pub shims: Vec<ShimKind>,
    /// Whether the restricted `console` binding is installed.
    pub install_output: bool,
    /// The options this snapshot was resolved from.
    pub options: ConfinementOptions,
}

impl EffectivePolicy {
    pub fn applies(&self, shim: ShimKind) -> bool {
        self.shims.contains(&shim)
    }
}

/// Resolve construction options against a base policy.
pub fn resolve(options: &ConfinementOptions, base: &CapabilityPolicy) -> EffectivePolicy {
    let mut policy = base.clone();
    let mut shims = Vec::new();

    if !options.clock_mode.is_allow() {
        shims.push(ShimKind::Clock);
    }
    if !options.random_mode.is_allow() {
        shims.push(ShimKind::Random);
    }
    if !options.locale_mode.is_allow() {
        shims.push(ShimKind::Locale);
    }
    if options.diagnostic_mode.is_allow() {
        // Without these, allowed diagnostics would still lose their hooks
        // to the pruner.
        for hook in DIAGNOSTIC_HOOKS {
            policy.grant(hook);
        }
    } else {
        shims.push(ShimKind::Diagnostic);
    }
    if !options.pattern_mode.is_allow() {
        shims.push(ShimKind::Pattern);
    }

    tracing::debug!(
        shims = ?shims,
        install_output = options.output_mode.is_allow(),
        "resolved effective policy"
    );

    EffectivePolicy {
        policy,
        shims,
        install_output: options.output_mode.is_allow(),
        options: *options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CapabilityMode;

    fn base() -> CapabilityPolicy {
        CapabilityPolicy::default_policy().unwrap()
    }

    #[test]
    fn restrictive_defaults_select_every_shim() {
        let effective = resolve(&ConfinementOptions::default(), &base());
        assert_eq!(effective.shims.len(), 5);
        assert!(!effective.install_output);
        assert_eq!(effective.policy, base());
    }

    #[test]
    fn allow_skips_the_shim() {
        let options = ConfinementOptions {
            clock_mode: CapabilityMode::Allow,
            ..Default::default()
        };
        let effective = resolve(&options, &base());
        assert!(!effective.applies(ShimKind::Clock));
        assert!(effective.applies(ShimKind::Random));
    }

    #[test]
    fn allowed_diagnostics_widen_the_copy_only() {
        let base = base();
        let options = ConfinementOptions {
            diagnostic_mode: CapabilityMode::Allow,
            ..Default::default()
        };
        let effective = resolve(&options, &base);
        for hook in DIAGNOSTIC_HOOKS {
            assert!(effective.policy.permits(hook), "{hook} should be granted");
            assert!(!base.permits(hook), "base policy must stay untouched");
        }
        assert!(effective.policy.permits("Error.prototype.message"));
        assert!(!effective.applies(ShimKind::Diagnostic));
    }

    #[test]
    fn other_allows_do_not_widen() {
        let base = base();
        let options = ConfinementOptions {
            locale_mode: CapabilityMode::Allow,
            ..Default::default()
        };
        let effective = resolve(&options, &base);
        assert_eq!(effective.policy, base);
        assert!(!effective.policy.permits("Intl"));
    }

    #[test]
    fn output_mode_controls_console() {
        let options = ConfinementOptions {
            output_mode: CapabilityMode::Allow,
            ..Default::default()
        };
        assert!(resolve(&options, &base()).install_output);
    }
}
