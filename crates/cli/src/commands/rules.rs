//! `toolwarden rules` — list compiled rules in evaluation order.

use std::process::ExitCode;

use toolwarden_rules::RuleEngine;

use super::Env;

pub fn run(env: &Env) -> anyhow::Result<ExitCode> {
    let config = env.load_config()?;
    if !config.rules.enabled {
        println!("Rules are disabled.");
        return Ok(ExitCode::SUCCESS);
    }

    let (engine, errors) = RuleEngine::from_config(&config.rules);
    if engine.rules().is_empty() {
        println!("No rules configured.");
    } else {
        println!("{:>8}  {:<6} NAME", "PRIORITY", "ACTION");
        for rule in engine.rules() {
            let state = if rule.enabled { "" } else { " (disabled)" };
            println!(
                "{:>8}  {:<6} {}{state}",
                rule.priority,
                rule.action.action_type.to_string(),
                rule.name
            );
        }
    }
    if engine.stop_on_first_match() {
        println!("\nEvaluation stops at the first matching rule.");
    }

    for error in &errors {
        println!("  ❌ {error}");
    }
    Ok(ExitCode::SUCCESS)
}
