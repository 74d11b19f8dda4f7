use serde::Serialize;
use tracing::debug;

use crate::synonyms::SynonymExpander;

pub const BUILTIN_CATEGORIES: [(&str, [&str; 5]); 4] = [
    (
        "Urgent",
        ["urgent", "asap", "important", "immediate", "priority"],
    ),
    (
        "Finance",
        ["invoice", "payment", "refund", "billing", "transaction"],
    ),
    (
        "Meetings",
        ["meeting", "appointment", "schedule", "conference", "calendar"],
    ),
    ("Offers", ["offer", "discount", "sale", "promo", "deal"]),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Category name to keyword list. Names are matched exactly and, once
/// present, their keywords never change.
///
/// The registry owns the synonym expander so the whole classification state
/// travels as one value.
pub struct CategoryRegistry {
    categories: Vec<Category>,
    expander: SynonymExpander,
}

impl CategoryRegistry {
    pub fn new(expander: SynonymExpander) -> Self {
        let categories = BUILTIN_CATEGORIES
            .iter()
            .map(|(name, keywords)| Category {
                name: name.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            })
            .collect();
        Self {
            categories,
            expander,
        }
    }

    /// Built-ins plus extra seeded categories; a seeded name replaces a
    /// built-in of the same name.
    pub fn with_extra<I>(expander: SynonymExpander, extra: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut registry = Self::new(expander);
        for (name, keywords) in extra {
            let keywords = dedup_keywords(keywords.into_iter().map(|k| k.trim().to_string()));
            match registry.position(&name) {
                Some(idx) => registry.categories[idx].keywords = keywords,
                None => registry.categories.push(Category { name, keywords }),
            }
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name)
            .map(|idx| self.categories[idx].keywords.as_slice())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Returns the keywords for `name`, expanding and storing them first if
    /// the name is new.
    pub fn ensure_category(&mut self, name: &str) -> &[String] {
        let idx = match self.position(name) {
            Some(idx) => idx,
            None => {
                let keywords = self.expand(name);
                debug!(name, count = keywords.len(), "category created");
                self.categories.push(Category {
                    name: name.to_string(),
                    keywords,
                });
                self.categories.len() - 1
            }
        };
        &self.categories[idx].keywords
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| c.name == name)
    }

    fn expand(&mut self, name: &str) -> Vec<String> {
        let words: Vec<String> = name.split_whitespace().map(str::to_lowercase).collect();
        let mut keywords = words.clone();
        for word in &words {
            keywords.extend(self.expander.synonyms_of(word));
        }
        dedup_keywords(keywords)
    }
}

fn dedup_keywords<I>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for keyword in keywords {
        if !keyword.is_empty() && !out.contains(&keyword) {
            out.push(keyword);
        }
    }
    out
}
