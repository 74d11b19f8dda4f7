//! Message body extraction and text cleanup.

use anyhow::Result;
use html2text::render::text_renderer::TrivialDecorator;
use mailparse::{MailAddr, MailHeaderMap, ParsedMail};

use sortmail_core::{MessageRecord, MessageStore, RawMessage, format_record_date};

const PLAIN_TEXT_WIDTH: usize = 4096;

/// Renders HTML as plain text, one line per block element. `script` and
/// `style` elements are dropped together with their content.
pub fn strip_markup(html: &str) -> String {
    let sanitized = sanitize_html(html);
    let text = html2text::from_read_with_decorator(
        sanitized.as_bytes(),
        PLAIN_TEXT_WIDTH,
        TrivialDecorator::new(),
    );
    normalize_lines(&text)
}

/// Replaces each run of non-ASCII characters with a space, then collapses
/// whitespace runs to single spaces and trims both ends. The vertical tab and
/// the `\x1c`..`\x1f` separator controls count as whitespace.
pub fn strip_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text
        .split(|c: char| {
            !c.is_ascii()
                || c.is_ascii_whitespace()
                || c == '\u{0b}'
                || ('\u{1c}'..='\u{1f}').contains(&c)
        })
        .filter(|w| !w.is_empty())
    {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Drops every `http://`/`https://` token together with the whitespace
/// character that ends it.
pub fn strip_urls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = find_url_start(rest) {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        rest = match tail.char_indices().find(|(_, c)| c.is_whitespace()) {
            Some((idx, ch)) => &tail[idx + ch.len_utf8()..],
            None => "",
        };
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn find_url_start(text: &str) -> Option<usize> {
    let mut from = 0usize;
    while let Some(pos) = text[from..].find("http") {
        let start = from + pos;
        let after = &text[start + 4..];
        let after = after.strip_prefix('s').unwrap_or(after);
        if let Some(host) = after.strip_prefix("://") {
            if host.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
                return Some(start);
            }
        }
        from = start + 4;
    }
    None
}

fn sanitize_html(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.add_clean_content_tags(["script", "style"]);
    builder.clean(html).to_string()
}

fn normalize_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            out.push(trimmed);
        }
    }
    out.join("\n")
}

/// Parses one RFC 822 message fetched under `uid`.
pub fn parse_message(uid: u32, raw: &[u8]) -> Result<RawMessage> {
    let parsed = mailparse::parse_mail(raw)?;
    let header = |name: &str| parsed.headers.get_first_value(name).unwrap_or_default();

    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(d.trim()).ok());
    let from = first_address(&header("From"));
    let to = address_list(&header("To"));
    let (text, html) = select_parts(&parsed);

    Ok(RawMessage {
        uid,
        date,
        from,
        to,
        subject: header("Subject"),
        text,
        html,
    })
}

fn select_parts(parsed: &ParsedMail) -> (Option<String>, Option<String>) {
    let mut text_plain: Option<String> = None;
    let mut text_html: Option<String> = None;

    walk_parts(parsed, &mut |part| {
        if !part.subparts.is_empty() || is_attachment(part) {
            return;
        }
        let ctype = part.ctype.mimetype.to_lowercase();
        if ctype == "text/plain" && text_plain.is_none() {
            if let Ok(body) = part.get_body() {
                text_plain = Some(body);
            }
        }
        if ctype == "text/html" && text_html.is_none() {
            if let Ok(body) = part.get_body() {
                text_html = Some(body);
            }
        }
    });

    (text_plain, text_html)
}

fn is_attachment(part: &ParsedMail) -> bool {
    matches!(
        part.get_content_disposition().disposition,
        mailparse::DispositionType::Attachment
    )
}

fn walk_parts<F>(parsed: &ParsedMail, cb: &mut F)
where
    F: FnMut(&ParsedMail),
{
    cb(parsed);
    for part in &parsed.subparts {
        walk_parts(part, cb);
    }
}

fn mail_addrs(input: &str) -> Vec<String> {
    let Ok(list) = mailparse::addrparse(input) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push(info.addr.clone()),
            MailAddr::Group(group) => out.extend(group.addrs.iter().map(|i| i.addr.clone())),
        }
    }
    out
}

fn first_address(input: &str) -> String {
    mail_addrs(input)
        .into_iter()
        .next()
        .unwrap_or_else(|| input.trim().to_string())
}

fn address_list(input: &str) -> String {
    let addrs = mail_addrs(input);
    if addrs.is_empty() {
        input.trim().to_string()
    } else {
        addrs.join(", ")
    }
}

/// Plain-text part when it has content, otherwise the HTML part rendered
/// through [`strip_markup`].
pub fn plain_body(raw: &RawMessage) -> String {
    match (&raw.text, &raw.html) {
        (Some(text), _) if !text.trim().is_empty() => text.clone(),
        (_, Some(html)) => strip_markup(html),
        _ => String::new(),
    }
}

pub fn to_record(raw: &RawMessage) -> MessageRecord {
    MessageRecord {
        id: raw.uid.to_string(),
        date: format_record_date(raw.date),
        from: raw.from.clone(),
        to: raw.to.clone(),
        subject: raw.subject.clone(),
        body: strip_non_ascii(&plain_body(raw)),
    }
}

/// Normalizes a fetched batch and replaces the store contents with it.
pub fn ingest(store: &MessageStore, raw_messages: &[RawMessage]) -> Result<usize> {
    let records: Vec<MessageRecord> = raw_messages.iter().map(to_record).collect();
    store.replace_all(&records)
}
