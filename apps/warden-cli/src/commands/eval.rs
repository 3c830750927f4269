// eval.rs — Evaluate code in a freshly sealed environment.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use warden_policy::WardenConfig;
use warden_realm::{Endowments, EnvironmentBuilder, HostValue};

#[derive(Args)]
pub struct EvalArgs {
    /// Source file to evaluate (reads stdin when neither FILE nor -e is given).
    pub file: Option<PathBuf>,

    /// Evaluate CODE instead of a file.
    #[arg(short = 'e', long = "code", value_name = "CODE", conflicts_with = "file")]
    pub code: Option<String>,

    /// Parse the input as a single expression.
    #[arg(long)]
    pub expr: bool,

    /// Endow a binding for this evaluation, e.g. `--endow limit=10`.
    #[arg(long = "endow", value_name = "NAME=JSON")]
    pub endow: Vec<String>,
}

/// Parse `NAME=JSON` into an endowment. Values that are not valid JSON are
/// taken as plain strings.
fn parse_endowment(entry: &str) -> anyhow::Result<(String, HostValue)> {
    let (name, raw) = entry
        .split_once('=')
        .with_context(|| format!("endowment '{}' is not NAME=JSON", entry))?;
    if name.is_empty() {
        anyhow::bail!("endowment '{}' has an empty name", entry);
    }
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => HostValue::from(json),
        Err(_) => HostValue::from(raw),
    };
    Ok((name.to_string(), value))
}

fn read_source(args: &EvalArgs) -> anyhow::Result<String> {
    if let Some(code) = &args.code {
        return Ok(code.clone());
    }
    match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        None => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("failed to read stdin")?;
            Ok(source)
        }
    }
}

pub fn execute(args: &EvalArgs, config: &WardenConfig) -> anyhow::Result<()> {
    let source = read_source(args)?;
    let mut endowments = Endowments::new();
    for entry in &args.endow {
        let (name, value) = parse_endowment(entry)?;
        endowments.insert(name, value);
    }

    let effective = super::effective_policy(config)?;
    let env = EnvironmentBuilder::new(effective).build()?;
    tracing::debug!(env = %env.id(), "environment ready");

    let outcome = if args.expr {
        env.evaluate_expression(&source, &endowments)
    } else {
        env.evaluate(&source, &endowments)
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value.to_json())?);
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "error": err }))?
            );
            anyhow::bail!("evaluation failed: {}", err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endowments_parse_json_or_fall_back_to_strings() {
        let (name, value) = parse_endowment("limit=10").unwrap();
        assert_eq!(name, "limit");
        assert_eq!(value.as_f64(), Some(10.0));

        let (_, value) = parse_endowment("greeting=hello").unwrap();
        assert_eq!(value.as_str(), Some("hello"));

        let (_, value) = parse_endowment(r#"cfg={"a":[1,2]}"#).unwrap();
        assert!(value.get("a").is_some());

        assert!(parse_endowment("novalue").is_err());
        assert!(parse_endowment("=1").is_err());
    }
}
