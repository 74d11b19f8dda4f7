use serde::Serialize;
use tracing::debug;

use sortmail_core::MessageRecord;

use crate::registry::CategoryRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordMatch<'a> {
    pub message: &'a MessageRecord,
    pub matched_keywords: Vec<String>,
}

/// Messages whose subject or body contains at least one keyword of
/// `category`, resolving the category through the registry first.
pub fn classify<'a>(
    registry: &mut CategoryRegistry,
    messages: &'a [MessageRecord],
    category: &str,
) -> Vec<KeywordMatch<'a>> {
    let keywords = registry.ensure_category(category);
    let out: Vec<KeywordMatch<'a>> = messages
        .iter()
        .filter_map(|message| {
            let matched = matched_keywords(keywords, message);
            (!matched.is_empty()).then_some(KeywordMatch {
                message,
                matched_keywords: matched,
            })
        })
        .collect();
    debug!(
        category,
        scanned = messages.len(),
        matched = out.len(),
        "keyword classify"
    );
    out
}

/// Plain substring containment against the lowercased subject and body, so
/// "urgently" matches "urgent". Keywords are reported as stored.
pub fn matched_keywords(keywords: &[String], message: &MessageRecord) -> Vec<String> {
    let haystack = format!("{} {}", message.subject, message.body).to_lowercase();
    keywords
        .iter()
        .filter(|keyword| !keyword.is_empty() && haystack.contains(&keyword.to_lowercase()))
        .cloned()
        .collect()
}
