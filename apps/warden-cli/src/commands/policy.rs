// policy.rs — Policy subcommands: show.

use clap::Subcommand;
use warden_policy::{PolicyNode, WardenConfig};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Show the effective policy, selected shims and fingerprint.
    Show {
        /// Print the whole effective policy as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn describe(node: &PolicyNode) -> String {
    match node.members() {
        Some(members) => members.keys().cloned().collect::<Vec<_>>().join(", "),
        None if node.keeps() => "(all)".to_string(),
        None => "(denied)".to_string(),
    }
}

pub fn execute(cmd: &PolicyCommands, config: &WardenConfig) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::Show { json } => {
            let effective = super::effective_policy(config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&effective)?);
                return Ok(());
            }

            let source = config
                .policy
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in default".to_string());
            let shims: Vec<String> = effective.shims.iter().map(|s| s.to_string()).collect();

            println!("Policy:       {} (version {})", source, effective.policy.version);
            println!("Fingerprint:  {}", effective.policy.fingerprint());
            println!(
                "Shims:        {}",
                if shims.is_empty() { "none".to_string() } else { shims.join(", ") }
            );
            println!(
                "Console:      {}",
                if effective.install_output { "installed" } else { "not installed" }
            );
            println!();
            println!("{:<20} MEMBERS", "BINDING");
            println!("{}", "-".repeat(60));
            for (name, node) in &effective.policy.named {
                println!("{:<20} {}", name, describe(node));
            }
            for (name, node) in &effective.policy.anonymous {
                println!("{:<20} {}", format!("%{}%", name), describe(node));
            }
        }
    }

    Ok(())
}
