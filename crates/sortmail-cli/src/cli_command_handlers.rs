use anyhow::{Result, anyhow};
use serde_json::{Value as JsonValue, json};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use sortmail_classify::{
    AiClassifier, CategoryRegistry, ChatCompletionClient, EmptyLexicon, Label, Lexicon,
    SynonymExpander, WordNetLexicon, keyword,
};
use sortmail_content::{ingest, parse_message};
use sortmail_core::{
    IdentityProvider, MessageStore, Session, SortError, SqliteIdentityStore,
};
use sortmail_mail::{ImapConfig, apply_label, fetch_since, verify_connection};

use super::{
    AppConfig, ClassifyCommand, CliCommand, config_path_candidates, load_app_config, output_ok,
};

pub(crate) fn run_cli(rt: &Runtime, command: CliCommand) -> Result<()> {
    let config = load_app_config();
    if let Some(err) = config.load_error.as_deref() {
        return Err(anyhow!(err.to_string()));
    }
    let result = dispatch(rt, &config, command)?;
    output_ok(result)
}

fn dispatch(rt: &Runtime, config: &AppConfig, command: CliCommand) -> Result<JsonValue> {
    match command {
        CliCommand::Signup(args) => signup(rt, config, &args.email),
        CliCommand::Login(args) => login(rt, config, &args.email, &args.password),
        CliCommand::Logout => logout(config),
        CliCommand::ApiKey(args) => {
            let key = args
                .key
                .or_else(|| std::env::var("SORTMAIL_API_KEY").ok())
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| anyhow!("API key required (--key or SORTMAIL_API_KEY)"))?;
            save_api_key(rt, config, key.trim())
        }
        CliCommand::Fetch(args) => fetch(config, args.days),
        CliCommand::Classify(cmd) => match cmd.command {
            ClassifyCommand::Keywords(args) => {
                classify_keywords(config, &args.category, args.label)
            }
            ClassifyCommand::Ai(args) => classify_ai(rt, config, &args.category, args.all),
        },
        CliCommand::Categories => categories(config),
        CliCommand::Status => status(config),
    }
}

async fn identity_store(config: &AppConfig) -> Result<SqliteIdentityStore> {
    if let Some(parent) = config.identity_db.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteIdentityStore::connect(&config.identity_db.to_string_lossy()).await?;
    store.init().await?;
    Ok(store)
}

fn signup(rt: &Runtime, config: &AppConfig, email: &str) -> Result<JsonValue> {
    rt.block_on(async {
        let identity = identity_store(config).await?;
        identity.create(email).await
    })?;
    Ok(json!({ "email": email.trim().to_lowercase(), "created": true }))
}

fn login(rt: &Runtime, config: &AppConfig, email: &str, password: &str) -> Result<JsonValue> {
    let known = rt.block_on(async {
        let identity = identity_store(config).await?;
        identity.lookup(email).await
    })?;
    if !known {
        return Err(SortError::Auth(format!(
            "no account found for {}; run `sortmail signup --email {}` first",
            email, email
        ))
        .into());
    }
    let user = email.trim().to_string();
    let (mail_verified, warning) = match verify_connection(&imap_config(config, &user, password)) {
        Ok(()) => (true, None),
        Err(err) => {
            warn!(user = %user, error = %err, "login recorded without a working mail connection");
            (false, Some(err.to_string()))
        }
    };
    let mut session = Session::load(&config.session_path)?;
    session.login(&user, password, mail_verified);
    session.save(&config.session_path)?;
    Ok(json!({
        "user": user,
        "mail_verified": mail_verified,
        "warning": warning,
    }))
}

fn logout(config: &AppConfig) -> Result<JsonValue> {
    let was_logged_in = Session::load(&config.session_path)
        .map(|s| s.is_logged_in())
        .unwrap_or(false);
    Session::clear(&config.session_path)?;
    MessageStore::new(&config.store_path).clear()?;
    Ok(json!({ "logged_out": was_logged_in, "store_cleared": true }))
}

fn save_api_key(rt: &Runtime, config: &AppConfig, key: &str) -> Result<JsonValue> {
    let mut session = Session::load(&config.session_path)?;
    require_login(&session)?;
    let client = ChatCompletionClient::new(config.model.config.clone(), key)?;
    match rt.block_on(client.validate()) {
        Ok(()) => {
            session.api_key = Some(key.to_string());
            session.api_valid = true;
            session.save(&config.session_path)?;
            Ok(json!({ "api_valid": true, "model": config.model.config.model }))
        }
        Err(err) => {
            session.api_valid = false;
            session.save(&config.session_path)?;
            Err(anyhow!("Invalid API key: {}", err))
        }
    }
}

fn fetch(config: &AppConfig, days: u32) -> Result<JsonValue> {
    let session = Session::load(&config.session_path)?;
    let (user, password) = require_login(&session)?;
    let imap = imap_config(config, user, password);
    let fetched = fetch_since(&imap, i64::from(days))?;
    let mut raws = Vec::with_capacity(fetched.len());
    for message in &fetched {
        match parse_message(message.uid, &message.raw) {
            Ok(raw) => raws.push(raw),
            Err(err) => warn!(uid = message.uid, error = %err, "skipping unparseable message"),
        }
    }
    let store = MessageStore::new(&config.store_path);
    let stored = ingest(&store, &raws).map_err(|e| SortError::Ingest(e.to_string()))?;
    debug!(fetched = fetched.len(), stored, days, "fetch complete");
    Ok(json!({
        "days": days,
        "fetched": fetched.len(),
        "stored": stored,
        "store": store.path(),
    }))
}

fn classify_keywords(config: &AppConfig, category: &str, label: bool) -> Result<JsonValue> {
    let session = Session::load(&config.session_path)?;
    let credentials = require_login(&session)?;
    let category = require_category(category)?;
    let messages = MessageStore::new(&config.store_path).read_all()?;
    let mut registry = build_registry(config)?;
    let matches = keyword::classify(&mut registry, &messages, category);

    let labeled = if label {
        let uids: Vec<u32> = matches
            .iter()
            .filter_map(|m| m.message.imap_uid())
            .collect();
        let (user, password) = credentials;
        Some(apply_label(&imap_config(config, user, password), &uids, category)?)
    } else {
        None
    };

    let rows: Vec<JsonValue> = matches
        .iter()
        .map(|m| {
            json!({
                "id": m.message.id,
                "date": m.message.date,
                "from": m.message.from,
                "subject": m.message.subject,
                "matched_keywords": m.matched_keywords,
            })
        })
        .collect();
    Ok(json!({
        "category": category,
        "keywords": registry.get(category).unwrap_or_default(),
        "scanned": messages.len(),
        "matches": rows,
        "labeled": labeled,
    }))
}

fn classify_ai(rt: &Runtime, config: &AppConfig, category: &str, all: bool) -> Result<JsonValue> {
    let session = Session::load(&config.session_path)?;
    require_login(&session)?;
    let category = require_category(category)?;
    let key = match std::env::var("SORTMAIL_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
        _ => match (&session.api_key, session.api_valid) {
            (Some(key), true) => key.clone(),
            _ => return Err(anyhow!("Save a valid model API key first (sortmail api-key)")),
        },
    };
    let messages = MessageStore::new(&config.store_path).read_all()?;
    let client = ChatCompletionClient::new(config.model.config.clone(), key)?;
    let classifier = AiClassifier::new(client)
        .with_retry(config.model.retry)
        .with_max_tokens(config.model.config.max_tokens);
    let labels = rt.block_on(classifier.classify(&messages, category))?;

    let rows: Vec<JsonValue> = labels
        .iter()
        .filter(|l| all || l.label == Label::Yes)
        .map(|l| {
            json!({
                "id": l.message.id,
                "from": l.message.from,
                "subject": l.message.subject,
                "label": l.label,
            })
        })
        .collect();
    Ok(json!({
        "category": category,
        "scanned": messages.len(),
        "labels": rows,
    }))
}

fn categories(config: &AppConfig) -> Result<JsonValue> {
    let registry = build_registry(config)?;
    Ok(json!(registry.categories()))
}

fn status(config: &AppConfig) -> Result<JsonValue> {
    let session = Session::load(&config.session_path)?;
    let stored = MessageStore::new(&config.store_path)
        .read_all()
        .map(|records| records.len())
        .unwrap_or(0);
    let config_path = config_path_candidates().into_iter().find(|p| p.exists());
    Ok(json!({
        "user": session.user,
        "mail_verified": session.mail_verified,
        "api_valid": session.api_valid,
        "stored_messages": stored,
        "store": config.store_path,
        "config": config_path,
        "wordnet_dir": config.lexicon.wordnet_dir,
    }))
}

fn build_registry(config: &AppConfig) -> Result<CategoryRegistry> {
    let lexicon: Box<dyn Lexicon> = match &config.lexicon.wordnet_dir {
        Some(dir) => Box::new(WordNetLexicon::load(dir)?),
        None => Box::new(EmptyLexicon),
    };
    let expander = SynonymExpander::new(lexicon, config.lexicon.cache_size);
    Ok(CategoryRegistry::with_extra(
        expander,
        config.categories.clone(),
    ))
}

fn imap_config(config: &AppConfig, user: &str, password: &str) -> ImapConfig {
    ImapConfig {
        host: config.imap.host.clone(),
        port: config.imap.port,
        username: user.to_string(),
        password: password.to_string(),
        folder: config.imap.folder.clone(),
        skip_tls_verify: config.imap.skip_tls_verify,
        fetch_chunk_size: config.imap.fetch_chunk_size,
    }
}

fn require_login(session: &Session) -> Result<(&str, &str)> {
    match (session.user.as_deref(), session.app_password.as_deref()) {
        (Some(user), Some(password)) => Ok((user, password)),
        _ => Err(anyhow!("Please log in first (sortmail login)")),
    }
}

/// Rejects blank names. The name is otherwise used as given, since registry
/// lookups are exact.
fn require_category(category: &str) -> Result<&str> {
    if category.trim().is_empty() {
        return Err(anyhow!("Category is required"));
    }
    Ok(category)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use sortmail_core::{MessageRecord, MessageStore, Session, SortError};

    use super::{categories, classify_keywords, fetch, login, logout, signup, status};
    use crate::cli::AppConfig;
    use crate::cli::cli_config::parse_app_config;

    fn config_in(dir: &Path, content: Option<&str>) -> AppConfig {
        parse_app_config(content, dir)
    }

    fn record(id: &str, subject: &str, body: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            date: "2025-03-01 09:30:00".to_string(),
            from: "billing@example.com".to_string(),
            to: "me@example.com".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    fn logged_in(config: &AppConfig) {
        let mut session = Session::default();
        session.login("me@example.com", "app-pass", true);
        session.save(&config.session_path).unwrap();
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn keyword_classify_reports_matches() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), None);
        logged_in(&config);
        MessageStore::new(&config.store_path)
            .replace_all(&[
                record("11", "Invoice due", "please pay"),
                record("12", "Lunch", "tomorrow?"),
            ])
            .unwrap();

        let result = classify_keywords(&config, "Finance", false).unwrap();
        assert_eq!(result["scanned"], 2);
        assert_eq!(result["matches"].as_array().unwrap().len(), 1);
        assert_eq!(result["matches"][0]["id"], "11");
        assert_eq!(result["matches"][0]["matched_keywords"], json!(["invoice"]));
        assert!(result["labeled"].is_null());
    }

    #[test]
    fn classify_requires_login_and_category() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), None);
        assert!(classify_keywords(&config, "Finance", false).is_err());
        assert!(fetch(&config, 7).is_err());
        logged_in(&config);
        assert!(classify_keywords(&config, "   ", false).is_err());
    }

    #[test]
    fn padded_category_name_is_not_the_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), None);
        logged_in(&config);
        MessageStore::new(&config.store_path)
            .replace_all(&[record("11", "Invoice due", "please pay")])
            .unwrap();

        let result = classify_keywords(&config, " Finance", false).unwrap();
        assert_eq!(result["category"], " Finance");
        assert_eq!(result["keywords"], json!(["finance"]));
        assert!(result["matches"].as_array().unwrap().is_empty());
    }

    #[test]
    fn categories_include_seeded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), Some("[categories]\nTravel = [\"flight\"]\n"));
        let result = categories(&config).unwrap();
        let names: Vec<&str> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Urgent", "Finance", "Meetings", "Offers", "Travel"]);
    }

    #[test]
    fn logout_clears_session_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), None);
        logged_in(&config);
        let store = MessageStore::new(&config.store_path);
        store.replace_all(&[record("1", "a", "b")]).unwrap();

        let result = logout(&config).unwrap();
        assert_eq!(result["logged_out"], true);
        assert!(store.read_all().unwrap().is_empty());
        assert!(!Session::load(&config.session_path).unwrap().is_logged_in());

        let status = status(&config).unwrap();
        assert!(status["user"].is_null());
        assert_eq!(status["stored_messages"], 0);
    }

    #[test]
    fn signup_then_duplicate_signup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), None);
        let rt = runtime();
        let result = signup(&rt, &config, "New.User@Example.com").unwrap();
        assert_eq!(result["email"], "new.user@example.com");

        let err = signup(&rt, &config, "new.user@example.com").unwrap_err();
        assert!(matches!(err.downcast_ref::<SortError>(), Some(SortError::Auth(_))));
    }

    #[test]
    fn login_for_unknown_account_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), None);
        let rt = runtime();
        let err = login(&rt, &config, "ghost@example.com", "pw").unwrap_err();
        assert!(matches!(err.downcast_ref::<SortError>(), Some(SortError::Auth(_))));
        assert!(!config.session_path.exists());
    }

    const UNREACHABLE_IMAP: &str = "[imap]\nhost = \"127.0.0.1\"\nport = 1\n";

    #[test]
    fn login_without_mail_connection_still_saves_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), Some(UNREACHABLE_IMAP));
        let rt = runtime();
        signup(&rt, &config, "me@example.com").unwrap();

        let result = login(&rt, &config, "me@example.com", "app-pass").unwrap();
        assert_eq!(result["mail_verified"], false);
        assert!(result["warning"].is_string());

        let session = Session::load(&config.session_path).unwrap();
        assert!(session.is_logged_in());
        assert!(!session.mail_verified);
    }

    #[test]
    fn failed_fetch_keeps_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), Some(UNREACHABLE_IMAP));
        logged_in(&config);
        let store = MessageStore::new(&config.store_path);
        let batch = [record("1", "Invoice", "pay"), record("2", "Lunch", "soon")];
        store.replace_all(&batch).unwrap();

        assert!(fetch(&config, 7).is_err());
        assert_eq!(store.read_all().unwrap(), batch.to_vec());
    }
}
