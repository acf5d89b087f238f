//! `toolwarden plugins` — list loaded plugins and load errors.

use std::process::ExitCode;

use toolwarden_core::CallContext;
use toolwarden_dispatch::BuildError;

use super::Env;

pub async fn run(env: &Env) -> anyhow::Result<ExitCode> {
    let cx = CallContext::background();
    let build = env.build(&cx).await?;
    let entries = build.plugins.entries();

    if entries.is_empty() {
        println!("No plugins loaded.");
    } else {
        println!("{:<24} {:<12} {:<10} DESCRIPTION", "NAME", "VERSION", "TRANSPORT");
        for entry in &entries {
            let info = entry.plugin.info();
            println!(
                "{:<24} {:<12} {:<10} {}",
                entry.name,
                info.version,
                entry.transport.to_string(),
                info.description
            );
        }
    }

    let load_errors: Vec<&BuildError> = build
        .errors
        .iter()
        .filter(|e| matches!(e, BuildError::Plugin(_)))
        .collect();
    if !load_errors.is_empty() {
        println!("\nFailed to load:");
        for error in load_errors {
            println!("  ❌ {error}");
        }
    }

    build.dispatcher.close().await;
    Ok(ExitCode::SUCCESS)
}
