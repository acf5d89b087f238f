//! `toolwarden doctor` — build everything and report what failed.

use std::process::ExitCode;

use toolwarden_core::CallContext;

use super::Env;

pub async fn run(env: &Env) -> anyhow::Result<ExitCode> {
    println!("🩺 toolwarden doctor");
    println!("====================\n");

    let config = match env.load_config() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let cx = CallContext::background();
    let build = toolwarden_dispatch::build_from_config(&cx, config, Some(env.project_root())).await;

    println!(
        "  ✅ {} validator(s), {} rule(s), {} plugin(s) ready",
        build.dispatcher.registry().len(),
        build.rules.active_count(),
        build.plugins.len()
    );
    for error in &build.errors {
        println!("  ❌ {error}");
    }
    let close_errors = build.dispatcher.close().await;
    for error in &close_errors {
        println!("  ⚠️  close: {error}");
    }

    let issues = build.errors.len();
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
        Ok(ExitCode::FAILURE)
    }
}
