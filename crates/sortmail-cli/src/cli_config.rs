use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sortmail_classify::synonyms::DEFAULT_CACHE_SIZE;
use sortmail_classify::{ModelConfig, RetryPolicy};
use sortmail_mail::{DEFAULT_IMAP_HOST, DEFAULT_IMAP_PORT};

use super::{AppConfig, ImapSettings, LexiconSettings, ModelSettings, load_config_text};

const DEFAULT_FOLDER: &str = "INBOX";
const DEFAULT_FETCH_CHUNK: usize = 50;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

pub(crate) fn load_app_config() -> AppConfig {
    let mut config = parse_app_config(load_config_text().as_deref(), &sortmail_core::state_dir());
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

pub(crate) fn parse_app_config(content: Option<&str>, state_dir: &Path) -> AppConfig {
    let mut config = default_app_config(state_dir);
    let content = match content {
        Some(content) => content,
        None => return config,
    };
    let value: toml::Value = match toml::from_str(content) {
        Ok(value) => value,
        Err(err) => {
            config.load_error = Some(format!("Invalid sortmail.toml: {}", err));
            return config;
        }
    };
    if let Some(imap) = value.get("imap") {
        config.imap = parse_imap(imap, config.imap);
    }
    if let Some(model) = value.get("model") {
        config.model = parse_model(model, config.model);
    }
    if let Some(path) = value
        .get("store")
        .and_then(|store| store.get("path"))
        .and_then(|v| v.as_str())
    {
        config.store_path = resolve_state_path(path, state_dir);
    }
    if let Some(path) = value
        .get("identity")
        .and_then(|identity| identity.get("db_path"))
        .and_then(|v| v.as_str())
    {
        config.identity_db = resolve_state_path(path, state_dir);
    }
    if let Some(lexicon) = value.get("lexicon") {
        config.lexicon = parse_lexicon(lexicon, config.lexicon);
    }
    if let Some(categories) = value.get("categories").and_then(|v| v.as_table()) {
        for (name, keywords) in categories {
            if let Some(list) = parse_string_list(keywords) {
                config.categories.push((name.clone(), list));
            }
        }
    }
    config
}

pub(crate) fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("SORTMAIL_MODEL_URL").filter(|v| !v.trim().is_empty()) {
        config.model.config.base_url = url.trim().to_string();
    }
    if let Some(dir) = lookup("SORTMAIL_WORDNET_DIR").filter(|v| !v.trim().is_empty()) {
        config.lexicon.wordnet_dir = Some(PathBuf::from(dir.trim()));
    }
}

fn default_app_config(state_dir: &Path) -> AppConfig {
    AppConfig {
        imap: ImapSettings {
            host: DEFAULT_IMAP_HOST.to_string(),
            port: DEFAULT_IMAP_PORT,
            folder: DEFAULT_FOLDER.to_string(),
            skip_tls_verify: false,
            fetch_chunk_size: DEFAULT_FETCH_CHUNK,
        },
        model: ModelSettings {
            config: ModelConfig::default(),
            retry: RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            },
        },
        store_path: state_dir.join("email_data.jsonl"),
        identity_db: state_dir.join("users.db"),
        session_path: state_dir.join("session.json"),
        lexicon: LexiconSettings {
            wordnet_dir: None,
            cache_size: DEFAULT_CACHE_SIZE,
        },
        categories: Vec::new(),
        load_error: None,
    }
}

fn parse_imap(imap: &toml::Value, default: ImapSettings) -> ImapSettings {
    let host = imap
        .get("host")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(default.host);
    let port = match imap.get("port") {
        Some(v) => v
            .as_integer()
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(default.port),
        None => default.port,
    };
    let folder = imap
        .get("folder")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(default.folder);
    let skip_tls_verify = imap
        .get("skip_tls_verify")
        .and_then(parse_bool)
        .unwrap_or(default.skip_tls_verify);
    let fetch_chunk_size = imap
        .get("fetch_chunk_size")
        .and_then(|v| v.as_integer())
        .map(|v| v.clamp(1, 500) as usize)
        .unwrap_or(default.fetch_chunk_size);
    ImapSettings {
        host,
        port,
        folder,
        skip_tls_verify,
        fetch_chunk_size,
    }
}

fn parse_model(model: &toml::Value, default: ModelSettings) -> ModelSettings {
    let base_url = model
        .get("base_url")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(default.config.base_url);
    let name = model
        .get("model")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(default.config.model);
    let max_tokens = model
        .get("max_tokens")
        .and_then(|v| v.as_integer())
        .map(|v| v.clamp(1, 4096) as u32)
        .unwrap_or(default.config.max_tokens);
    let timeout_secs = model
        .get("timeout_secs")
        .and_then(|v| v.as_integer())
        .map(|v| v.clamp(1, 600) as u64)
        .unwrap_or(default.config.timeout_secs);
    let max_attempts = model
        .get("retry_attempts")
        .and_then(|v| v.as_integer())
        .map(|v| v.clamp(1, 10) as u32)
        .unwrap_or(default.retry.max_attempts);
    let backoff = model
        .get("retry_backoff_ms")
        .and_then(|v| v.as_integer())
        .map(|v| Duration::from_millis(v.clamp(0, 60_000) as u64))
        .unwrap_or(default.retry.backoff);
    ModelSettings {
        config: ModelConfig {
            base_url,
            model: name,
            max_tokens,
            timeout_secs,
        },
        retry: RetryPolicy {
            max_attempts,
            backoff,
        },
    }
}

fn parse_lexicon(lexicon: &toml::Value, default: LexiconSettings) -> LexiconSettings {
    let wordnet_dir = lexicon
        .get("wordnet_dir")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .or(default.wordnet_dir);
    let cache_size = lexicon
        .get("cache_size")
        .and_then(|v| v.as_integer())
        .and_then(|v| usize::try_from(v).ok())
        .and_then(NonZeroUsize::new)
        .unwrap_or(default.cache_size);
    LexiconSettings {
        wordnet_dir,
        cache_size,
    }
}

fn resolve_state_path(raw: &str, state_dir: &Path) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        state_dir.join(path)
    }
}

fn parse_string_list(value: &toml::Value) -> Option<Vec<String>> {
    let list = value.as_array()?;
    let mut out = Vec::new();
    for item in list {
        if let Some(s) = item.as_str() {
            out.push(s.to_string());
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

fn parse_bool(value: &toml::Value) -> Option<bool> {
    value.as_bool().or_else(|| {
        value
            .as_str()
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
    })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{apply_env_overrides, parse_app_config};

    #[test]
    fn missing_config_uses_defaults() {
        let config = parse_app_config(None, Path::new("/state"));
        assert_eq!(config.imap.host, "imap.gmail.com");
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.imap.folder, "INBOX");
        assert_eq!(config.model.config.max_tokens, 256);
        assert_eq!(config.model.retry.max_attempts, 1);
        assert_eq!(config.store_path, PathBuf::from("/state/email_data.jsonl"));
        assert_eq!(config.identity_db, PathBuf::from("/state/users.db"));
        assert_eq!(config.lexicon.cache_size.get(), 1024);
        assert!(config.load_error.is_none());
    }

    #[test]
    fn retry_backoff_default_does_not_depend_on_model_section() {
        let expected = Duration::from_millis(500);
        let bare = parse_app_config(None, Path::new("/state"));
        assert_eq!(bare.model.retry.backoff, expected);

        let with_model =
            parse_app_config(Some("[model]\nretry_attempts = 2\n"), Path::new("/state"));
        assert_eq!(with_model.model.retry.max_attempts, 2);
        assert_eq!(with_model.model.retry.backoff, expected);
    }

    #[test]
    fn sections_override_defaults() {
        let content = r#"
[imap]
host = "imap.example.com"
port = 1993
skip_tls_verify = "true"

[model]
base_url = "http://localhost:8080/v1"
retry_attempts = 3
retry_backoff_ms = 50

[store]
path = "inbox.jsonl"

[identity]
db_path = "/var/lib/sortmail/users.db"

[lexicon]
wordnet_dir = "/usr/share/wordnet"
cache_size = 64

[categories]
Travel = ["flight", "hotel"]
Empty = []
"#;
        let config = parse_app_config(Some(content), Path::new("/state"));
        assert_eq!(config.imap.host, "imap.example.com");
        assert_eq!(config.imap.port, 1993);
        assert!(config.imap.skip_tls_verify);
        assert_eq!(config.model.config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model.retry.max_attempts, 3);
        assert_eq!(config.model.retry.backoff, Duration::from_millis(50));
        assert_eq!(config.store_path, PathBuf::from("/state/inbox.jsonl"));
        assert_eq!(config.identity_db, PathBuf::from("/var/lib/sortmail/users.db"));
        assert_eq!(config.lexicon.wordnet_dir, Some(PathBuf::from("/usr/share/wordnet")));
        assert_eq!(config.lexicon.cache_size.get(), 64);
        assert_eq!(
            config.categories,
            vec![(
                "Travel".to_string(),
                vec!["flight".to_string(), "hotel".to_string()]
            )]
        );
    }

    #[test]
    fn invalid_toml_is_reported_and_defaults_kept() {
        let config = parse_app_config(Some("[imap\nhost = 1"), Path::new("/state"));
        assert!(config.load_error.unwrap().starts_with("Invalid sortmail.toml"));
        assert_eq!(config.imap.host, "imap.gmail.com");
    }

    #[test]
    fn environment_overrides_model_url_and_wordnet_dir() {
        let mut config = parse_app_config(None, Path::new("/state"));
        apply_env_overrides(&mut config, |key| match key {
            "SORTMAIL_MODEL_URL" => Some("http://127.0.0.1:9000".to_string()),
            "SORTMAIL_WORDNET_DIR" => Some("/opt/wn".to_string()),
            _ => None,
        });
        assert_eq!(config.model.config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.lexicon.wordnet_dir, Some(PathBuf::from("/opt/wn")));
    }
}
