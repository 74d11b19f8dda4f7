use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use shell_words::split as shell_split;
use tracing::debug;

mod cli;

use crate::cli::{Cli, output_error, resolve_cli_command, run_cli};

const CLI_SCHEMA_VERSION: &str = "sortmail.cli.v1";

fn main() -> Result<()> {
    sortmail_core::init_logging();
    let cli = Cli::parse();
    if let Err(err) = ensure_default_config_exists() {
        debug!(error = %err, "config bootstrap failed");
    }
    let command = match resolve_cli_command(cli) {
        Ok(command) => command,
        Err(err) => {
            return output_error(&err.to_string());
        }
    };
    let Some(command) = command else {
        return output_error("No command provided");
    };
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    if let Err(err) = run_cli(&rt, command) {
        debug!(error = %err, "command failed");
        return output_error(&err.to_string());
    }
    Ok(())
}

fn xdg_config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn config_path_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("sortmail.toml"),
        xdg_config_dir().join("sortmail").join("sortmail.toml"),
    ]
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(content);
        }
    }
    None
}

fn default_config_template() -> &'static str {
    r#"# Auto-generated by sortmail on first run.

[imap]
host = "imap.gmail.com"
port = 993
folder = "INBOX"
skip_tls_verify = false

[model]
base_url = "https://api.deepinfra.com/v1/openai"
model = "meta-llama/Llama-2-70b-chat-hf"
max_tokens = 256
timeout_secs = 60
retry_attempts = 1
retry_backoff_ms = 500

[store]
# Relative paths live under $XDG_STATE_HOME/sortmail.
path = "email_data.jsonl"

[identity]
db_path = "users.db"

[lexicon]
# Directory holding the WordNet data.noun/data.verb/data.adj/data.adv files.
# wordnet_dir = "/usr/share/wordnet"
cache_size = 1024

[categories]
# Travel = ["flight", "hotel", "itinerary"]
"#
}

fn ensure_default_config_exists() -> Result<()> {
    if load_config_text().is_some() {
        return Ok(());
    }
    let path = xdg_config_dir().join("sortmail").join("sortmail.toml");
    write_text_atomic(&path, default_config_template())
}

fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    // Keep ownership of an existing user-owned file.
    if path.exists() {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(content.as_bytes())?;
        return Ok(());
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content.as_bytes())?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{default_config_template, write_text_atomic};

    #[test]
    fn default_template_is_valid_toml() {
        let value: toml::Value = toml::from_str(default_config_template()).unwrap();
        assert_eq!(value["imap"]["port"].as_integer(), Some(993));
        assert_eq!(value["model"]["max_tokens"].as_integer(), Some(256));
        assert!(value["categories"].as_table().unwrap().is_empty());
    }

    #[test]
    fn atomic_write_creates_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sortmail.toml");
        write_text_atomic(&path, "a = 1\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 1\n");
        write_text_atomic(&path, "a = 2\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 2\n");
        assert!(!path.with_extension("tmp").exists());
    }
}
