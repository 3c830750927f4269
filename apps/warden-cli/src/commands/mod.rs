pub mod audit;
pub mod eval;
pub mod policy;
pub mod serve;

use warden_policy::{resolve, EffectivePolicy, WardenConfig};

/// Resolve the configured options against the configured base policy.
pub(crate) fn effective_policy(config: &WardenConfig) -> anyhow::Result<EffectivePolicy> {
    let base = config.base_policy()?;
    Ok(resolve(&config.capabilities, &base))
}
