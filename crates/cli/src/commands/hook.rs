//! `toolwarden hook` — validate one tool call.
//!
//! Reads the hook event JSON from stdin and answers through the exit code:
//! `0` lets the call proceed (a warning is printed to stderr), `2` blocks it
//! with the reason on stderr. Anything that stops a verdict from being
//! reached (deadline, cancellation, unreadable config) blocks.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::AsyncReadExt;
use toolwarden_core::{CallContext, Decision, EventContext, Verdict};
use tracing::{debug, warn};

use super::Env;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Exit code that tells the agent to block the tool call.
const BLOCK_EXIT_CODE: u8 = 2;

pub async fn run(env: &Env, timeout_ms: u64) -> anyhow::Result<ExitCode> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read hook event from stdin")?;
    let event = parse_event(&input)?;

    let cx = CallContext::with_timeout(Duration::from_millis(timeout_ms));
    let build = match env.build(&cx).await {
        Ok(build) => build,
        Err(e) => return Ok(block(&format!("toolwarden: configuration error: {e}"))),
    };
    for error in &build.errors {
        warn!(error = %error, "Skipping component that failed to build");
    }

    let outcome = build.dispatcher.dispatch(&cx, &event).await;
    build.dispatcher.close().await;

    match outcome {
        Ok(verdict) => Ok(report(&verdict)),
        Err(e) => Ok(block(&format!("toolwarden: validation did not complete: {e}"))),
    }
}

fn parse_event(input: &str) -> anyhow::Result<EventContext> {
    let event: EventContext =
        serde_json::from_str(input).context("stdin is not a valid hook event")?;
    debug!(
        event_type = %event.event_type,
        tool = %event.tool_type,
        "Hook event received"
    );
    Ok(event)
}

fn report(verdict: &Verdict) -> ExitCode {
    match verdict.decision {
        Decision::Allow => ExitCode::SUCCESS,
        Decision::Warn => {
            eprintln!("{}", describe(verdict));
            ExitCode::SUCCESS
        }
        Decision::Block => block(&describe(verdict)),
    }
}

fn block(message: &str) -> ExitCode {
    eprintln!("{message}");
    ExitCode::from(BLOCK_EXIT_CODE)
}

fn describe(verdict: &Verdict) -> String {
    let result = &verdict.result;
    let mut text = verdict.message().to_string();
    if let Some(hint) = &result.fix_hint {
        text.push_str(&format!("\nFix: {hint}"));
    }
    if let Some(reference) = &result.reference {
        text.push_str(&format!("\nReference: {reference}"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolwarden_core::{ToolType, ValidationResult, aggregate};

    #[test]
    fn parses_hook_payload() {
        let event = parse_event(
            r#"{"hook_event_name":"PreToolUse","tool_name":"Bash","tool_input":{"command":"ls"}}"#,
        )
        .unwrap();
        assert_eq!(event.tool_type, ToolType::Bash);
        assert_eq!(event.command(), Some("ls"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn describe_includes_hint_and_reference() {
        let verdict = aggregate([(
            "x".to_string(),
            ValidationResult::block("No")
                .with_fix_hint("Ask first")
                .with_reference("DOC-1"),
        )]);
        assert_eq!(describe(&verdict), "No\nFix: Ask first\nReference: DOC-1");
    }
}
