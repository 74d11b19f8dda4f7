//! IMAP retrieval: login check, date-bounded fetch and server-side labels.

use anyhow::Result;
use chrono::{Datelike, Duration, Local};
use imap::{ClientBuilder, ConnectionMode};
use tracing::debug;

use sortmail_core::SortError;

pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
pub const DEFAULT_IMAP_PORT: u16 = 993;

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
    pub skip_tls_verify: bool,
    pub fetch_chunk_size: usize,
}

/// One message as returned by the server, still in RFC 822 form.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub raw: Vec<u8>,
}

type Session = imap::Session<imap::Connection>;

fn imap_connect(imap: &ImapConfig) -> Result<Session> {
    debug!(host = %imap.host, port = imap.port, "imap_connect start");
    let client = ClientBuilder::new(imap.host.as_str(), imap.port)
        .tls_kind(imap::TlsKind::Native)
        .mode(ConnectionMode::AutoTls)
        .danger_skip_tls_verify(imap.skip_tls_verify)
        .connect()
        .map_err(|e| SortError::Connection(e.to_string()))?;
    debug!("imap_connect tcp connected");
    let session = client
        .login(&imap.username, &imap.password)
        .map_err(|e| SortError::Connection(e.0.to_string()))?;
    debug!("imap_connect login ok");
    Ok(session)
}

/// Logs in, opens the configured folder and logs out again.
pub fn verify_connection(imap: &ImapConfig) -> Result<()> {
    let mut session = imap_connect(imap)?;
    session
        .select(&imap.folder)
        .map_err(|e| SortError::Connection(e.to_string()))?;
    let _ = session.logout();
    Ok(())
}

/// Fetches every message in the configured folder dated within the last
/// `days` days, oldest UID first.
pub fn fetch_since(imap: &ImapConfig, days: i64) -> Result<Vec<FetchedMessage>> {
    let mut session = imap_connect(imap)?;
    let messages = fetch_folder_since(&mut session, &imap.folder, days, imap.fetch_chunk_size)
        .map_err(|e| SortError::Ingest(e.to_string()))?;
    let _ = session.logout();
    debug!(count = messages.len(), "imap_fetch_since logout");
    Ok(messages)
}

fn fetch_folder_since(
    session: &mut Session,
    folder: &str,
    days: i64,
    fetch_chunk_size: usize,
) -> Result<Vec<FetchedMessage>> {
    let mailbox = session.select(folder)?;
    debug!(folder, exists = mailbox.exists, "imap_fetch select");
    if mailbox.exists == 0 {
        return Ok(Vec::new());
    }
    let query = format!("SINCE {}", imap_search_since(days));
    debug!(folder, %query, "imap_fetch uid_search");
    let mut uids: Vec<u32> = session.uid_search(&query)?.into_iter().collect();
    uids.sort_unstable();

    let mut out = Vec::with_capacity(uids.len());
    for chunk in uids.chunks(fetch_chunk_size.max(1)) {
        debug!(folder, count = chunk.len(), "imap_fetch uid_fetch");
        let fetches = session.uid_fetch(uid_set(chunk), "(UID RFC822)")?;
        for fetch in fetches.iter() {
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                continue;
            };
            out.push(FetchedMessage {
                uid,
                raw: body.to_vec(),
            });
        }
    }
    out.sort_by_key(|m| m.uid);
    Ok(out)
}

/// Adds a Gmail label to each message in `uids`.
pub fn apply_label(imap: &ImapConfig, uids: &[u32], label: &str) -> Result<usize> {
    if uids.is_empty() {
        return Ok(0);
    }
    let mut session = imap_connect(imap)?;
    session.select(&imap.folder)?;
    let query = label_store_query(label);
    debug!(count = uids.len(), %query, "imap_apply_label");
    session.uid_store(uid_set(uids), &query)?;
    session.logout()?;
    Ok(uids.len())
}

fn label_store_query(label: &str) -> String {
    let escaped = label.replace('\\', "\\\\").replace('"', "\\\"");
    format!("+X-GM-LABELS (\"{}\")", escaped)
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn imap_search_since(days_back: i64) -> String {
    let target = Local::now() - Duration::days(days_back);
    imap_date_from_parts(target.year(), target.month(), target.day())
}

fn imap_date_from_parts(year: i32, month: u32, day: u32) -> String {
    let month = match month {
        1 => "Jan",
        2 => "Feb",
        3 => "Mar",
        4 => "Apr",
        5 => "May",
        6 => "Jun",
        7 => "Jul",
        8 => "Aug",
        9 => "Sep",
        10 => "Oct",
        11 => "Nov",
        12 => "Dec",
        _ => "Jan",
    };
    format!("{}-{}-{}", day, month, year)
}
