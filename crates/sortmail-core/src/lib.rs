use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

mod error;
mod identity;
mod session;
mod store;

pub use error::SortError;
pub use identity::{IdentityProvider, SqliteIdentityStore};
pub use session::Session;
pub use store::MessageStore;

pub const RECORD_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One message as handed over by the mail collaborator, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    /// Unix timestamp parsed from the `Date` header.
    pub date: Option<i64>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

/// Normalized, persisted representation of one retrieved message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub date: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl MessageRecord {
    pub fn imap_uid(&self) -> Option<u32> {
        self.id.parse().ok()
    }
}

pub fn format_record_date(ts: Option<i64>) -> String {
    ts.and_then(|ts| Local.timestamp_opt(ts, 0).single())
        .map(|dt| dt.format(RECORD_DATE_FORMAT).to_string())
        .unwrap_or_default()
}

pub fn state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sortmail")
}

/// Routes `tracing` output to `sortmail.log` in the state dir when
/// `SORTMAIL_LOG` is set. Stdout stays reserved for command output.
pub fn init_logging() {
    let Ok(raw) = std::env::var("SORTMAIL_LOG") else {
        return;
    };
    let directive = log_directive(&raw);
    let dir = state_dir();
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("sortmail.log"))
    else {
        return;
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}

fn log_directive(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "1" || trimmed.eq_ignore_ascii_case("true") {
        "debug".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageRecord, format_record_date, log_directive};

    #[test]
    fn log_directive_treats_flags_as_debug() {
        assert_eq!(log_directive("1"), "debug");
        assert_eq!(log_directive("TRUE"), "debug");
        assert_eq!(log_directive(""), "debug");
        assert_eq!(log_directive("sortmail_mail=trace"), "sortmail_mail=trace");
    }

    #[test]
    fn record_date_is_blank_without_timestamp() {
        assert_eq!(format_record_date(None), "");
        let formatted = format_record_date(Some(1_700_000_000));
        assert_eq!(formatted.len(), "2023-11-14 22:13:20".len());
    }

    #[test]
    fn imap_uid_parses_numeric_ids_only() {
        let mut record = MessageRecord {
            id: "42".to_string(),
            date: String::new(),
            from: String::new(),
            to: String::new(),
            subject: String::new(),
            body: String::new(),
        };
        assert_eq!(record.imap_uid(), Some(42));
        record.id = "abc".to_string();
        assert_eq!(record.imap_uid(), None);
    }
}
