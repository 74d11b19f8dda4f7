use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sortmail_classify::{ModelConfig, RetryPolicy};

use super::{CLI_SCHEMA_VERSION, config_path_candidates, load_config_text, shell_split};

#[path = "cli_command_handlers.rs"]
mod cli_command_handlers;
#[path = "cli_config.rs"]
mod cli_config;
#[path = "cli_runtime_helpers.rs"]
mod cli_runtime_helpers;
pub(crate) use cli_command_handlers::run_cli;
pub(crate) use cli_config::load_app_config;
pub(crate) use cli_runtime_helpers::{output_error, output_ok, resolve_cli_command};

#[derive(Parser, Debug)]
#[command(name = "sortmail", version, about = "Sort recent email into categories")]
pub(crate) struct Cli {
    /// Whole command line as one shell-quoted string.
    #[arg(short = 'c', long = "cmd")]
    cmd: Option<String>,
    #[command(subcommand)]
    pub(crate) command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Register an email address with the local account registry.
    Signup(SignupCmd),
    /// Log in and check the IMAP connection.
    Login(LoginCmd),
    /// Forget the session and clear stored messages.
    Logout,
    /// Validate and save the model API key.
    ApiKey(ApiKeyCmd),
    /// Replace the message store with recent inbox messages.
    Fetch(FetchCmd),
    Classify(ClassifyCmd),
    /// List known categories and their keywords.
    Categories,
    Status,
}

#[derive(Args, Debug)]
pub(crate) struct SignupCmd {
    #[arg(long)]
    email: String,
}

#[derive(Args, Debug)]
pub(crate) struct LoginCmd {
    #[arg(long)]
    email: String,
    /// Google app password.
    #[arg(long)]
    password: String,
}

#[derive(Args, Debug)]
pub(crate) struct ApiKeyCmd {
    /// Falls back to SORTMAIL_API_KEY.
    #[arg(long)]
    key: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct FetchCmd {
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=30))]
    days: u32,
}

#[derive(Args, Debug)]
pub(crate) struct ClassifyCmd {
    #[command(subcommand)]
    command: ClassifyCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ClassifyCommand {
    /// Match stored messages against the category keywords.
    Keywords(ClassifyKeywords),
    /// Ask the model about every stored message.
    Ai(ClassifyAi),
}

#[derive(Args, Debug)]
pub(crate) struct ClassifyKeywords {
    #[arg(long)]
    category: String,
    /// Also add the category as a Gmail label to matched messages.
    #[arg(long)]
    label: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ClassifyAi {
    #[arg(long)]
    category: String,
    /// Include negative and unreadable labels in the output.
    #[arg(long)]
    all: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImapSettings {
    host: String,
    port: u16,
    folder: String,
    skip_tls_verify: bool,
    fetch_chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ModelSettings {
    config: ModelConfig,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LexiconSettings {
    wordnet_dir: Option<PathBuf>,
    cache_size: NonZeroUsize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppConfig {
    imap: ImapSettings,
    model: ModelSettings,
    store_path: PathBuf,
    identity_db: PathBuf,
    session_path: PathBuf,
    lexicon: LexiconSettings,
    categories: Vec<(String, Vec<String>)>,
    load_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, CliCommand, ClassifyCommand, resolve_cli_command};

    #[test]
    fn cmd_string_is_split_like_a_shell() {
        let cli = Cli::try_parse_from([
            "sortmail",
            "-c",
            "classify keywords --category 'Travel Plans' --label",
        ])
        .unwrap();
        let command = resolve_cli_command(cli).unwrap();
        let Some(CliCommand::Classify(cmd)) = command else {
            panic!("expected classify command");
        };
        let ClassifyCommand::Keywords(args) = cmd.command else {
            panic!("expected keywords subcommand");
        };
        assert_eq!(args.category, "Travel Plans");
        assert!(args.label);
    }

    #[test]
    fn empty_cmd_string_yields_no_command() {
        let cli = Cli::try_parse_from(["sortmail", "--cmd", "  "]).unwrap();
        assert!(resolve_cli_command(cli).unwrap().is_none());
    }

    #[test]
    fn fetch_days_default_and_range() {
        let cli = Cli::try_parse_from(["sortmail", "fetch"]).unwrap();
        let Some(CliCommand::Fetch(args)) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.days, 7);

        assert!(Cli::try_parse_from(["sortmail", "fetch", "--days", "30"]).is_ok());
        assert!(Cli::try_parse_from(["sortmail", "fetch", "--days", "0"]).is_err());
        assert!(Cli::try_parse_from(["sortmail", "fetch", "--days", "31"]).is_err());
    }

    #[test]
    fn bad_cmd_string_is_an_error() {
        let cli = Cli::try_parse_from(["sortmail", "-c", "fetch --days 90"]).unwrap();
        assert!(resolve_cli_command(cli).is_err());
        let cli = Cli::try_parse_from(["sortmail", "-c", "classify ai --category 'open"]).unwrap();
        assert!(resolve_cli_command(cli).is_err());
    }
}
