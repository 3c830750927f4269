// audit.rs — Build an environment and check what it can reach.

use warden_policy::WardenConfig;
use warden_realm::EnvironmentBuilder;

pub fn execute(config: &WardenConfig, show_paths: bool) -> anyhow::Result<()> {
    let effective = super::effective_policy(config)?;
    let env = EnvironmentBuilder::new(effective.clone()).build()?;
    let paths = env.reachable_paths();

    println!("Environment:  {}", env.id());
    println!("Fingerprint:  {}", env.policy_fingerprint());
    println!("Reachable:    {} path(s)", paths.len());
    if show_paths {
        println!();
        for path in &paths {
            println!("  {}", path);
        }
    }
    println!();

    match env.audit(&effective.policy) {
        Ok(()) => {
            println!("Audit passed: every reachable path is licensed.");
            Ok(())
        }
        Err(violation) => {
            println!("POLICY VIOLATION: {} unlicensed path(s):", violation.paths.len());
            for path in &violation.paths {
                println!("  {}", path);
            }
            anyhow::bail!("Audit failed")
        }
    }
}
