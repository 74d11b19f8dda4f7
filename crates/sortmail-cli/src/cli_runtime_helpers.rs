use anyhow::Result;
use clap::Parser;
use serde_json::{Value as JsonValue, json};

use super::{CLI_SCHEMA_VERSION, Cli, CliCommand, shell_split};

pub(crate) fn output_ok(value: JsonValue) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": true,
            "result": value
        }))?
    );
    Ok(())
}

pub(crate) fn output_error(message: &str) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(&json!({
            "schema": CLI_SCHEMA_VERSION,
            "ok": false,
            "error": message
        }))?
    );
    Ok(())
}

/// Expands `-c/--cmd` into a parsed command; otherwise returns the command
/// given directly on the command line.
pub(crate) fn resolve_cli_command(cli: Cli) -> Result<Option<CliCommand>> {
    if let Some(cmd) = cli.cmd {
        let parts = shell_split(&cmd).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        if parts.is_empty() {
            return Ok(None);
        }
        let mut args = Vec::with_capacity(parts.len() + 1);
        args.push("sortmail".to_string());
        args.extend(parts);
        let parsed = Cli::try_parse_from(args).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        return Ok(parsed.command);
    }
    Ok(cli.command)
}
