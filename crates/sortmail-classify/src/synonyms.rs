use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::{Result, bail};
use lru::LruCache;
use tracing::debug;

pub const DEFAULT_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(size) => size,
    None => panic!("synonym cache size must be non-zero"),
};

const WORDNET_FILES: [(PartOfSpeech, &str, &str); 4] = [
    (PartOfSpeech::Noun, "data.noun", "noun.exc"),
    (PartOfSpeech::Verb, "data.verb", "verb.exc"),
    (PartOfSpeech::Adjective, "data.adj", "adj.exc"),
    (PartOfSpeech::Adverb, "data.adv", "adv.exc"),
];

const NOUN_SUFFIXES: &[(&str, &str)] = &[
    ("s", ""),
    ("ses", "s"),
    ("xes", "x"),
    ("zes", "z"),
    ("ches", "ch"),
    ("shes", "sh"),
    ("men", "man"),
    ("ies", "y"),
];
const VERB_SUFFIXES: &[(&str, &str)] = &[
    ("s", ""),
    ("ies", "y"),
    ("es", "e"),
    ("es", ""),
    ("ed", "e"),
    ("ed", ""),
    ("ing", "e"),
    ("ing", ""),
];
const ADJECTIVE_SUFFIXES: &[(&str, &str)] = &[("er", ""), ("est", ""), ("er", "e"), ("est", "e")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PartOfSpeech {
    Noun,
    Verb,
    Adjective,
    Adverb,
}

impl PartOfSpeech {
    const ALL: [PartOfSpeech; 4] = [Self::Noun, Self::Verb, Self::Adjective, Self::Adverb];

    fn from_ss_type(field: &str) -> Option<Self> {
        match field {
            "n" => Some(Self::Noun),
            "v" => Some(Self::Verb),
            "a" | "s" => Some(Self::Adjective),
            "r" => Some(Self::Adverb),
            _ => None,
        }
    }

    fn suffixes(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Noun => NOUN_SUFFIXES,
            Self::Verb => VERB_SUFFIXES,
            Self::Adjective => ADJECTIVE_SUFFIXES,
            Self::Adverb => &[],
        }
    }
}

/// Source of word senses. Each sense is the list of lemma names that share
/// it, multi-word lemmas joined with `_`.
pub trait Lexicon {
    fn senses(&self, word: &str) -> Vec<Vec<String>>;
}

/// Lexicon that knows no words; categories then expand to their own words.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyLexicon;

impl Lexicon for EmptyLexicon {
    fn senses(&self, _word: &str) -> Vec<Vec<String>> {
        Vec::new()
    }
}

/// In-memory index over the WordNet `data.*` database files, with the
/// `*.exc` exception lists used to reduce inflected words to base forms.
#[derive(Debug, Default)]
pub struct WordNetLexicon {
    index: HashMap<String, Vec<usize>>,
    synsets: Vec<(PartOfSpeech, Vec<String>)>,
    exceptions: HashMap<(PartOfSpeech, String), Vec<String>>,
}

impl WordNetLexicon {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut lexicon = Self::default();
        let mut loaded = 0usize;
        for (pos, data_name, exc_name) in WORDNET_FILES {
            if let Some(content) = read_optional(&dir.join(data_name))? {
                lexicon.add_data(&content);
                loaded += 1;
            }
            if let Some(content) = read_optional(&dir.join(exc_name))? {
                lexicon.add_exceptions(pos, &content);
            }
        }
        if loaded == 0 {
            bail!("no WordNet data files found in {}", dir.display());
        }
        debug!(
            synsets = lexicon.synsets.len(),
            lemmas = lexicon.index.len(),
            exceptions = lexicon.exceptions.len(),
            "wordnet loaded"
        );
        Ok(lexicon)
    }

    pub fn from_data(content: &str) -> Self {
        let mut lexicon = Self::default();
        lexicon.add_data(content);
        lexicon
    }

    pub fn synset_count(&self) -> usize {
        self.synsets.len()
    }

    fn add_data(&mut self, content: &str) {
        for line in content.lines() {
            // License header lines are indented.
            if line.starts_with(' ') || line.trim().is_empty() {
                continue;
            }
            let Some((pos, lemmas)) = parse_synset_lemmas(line) else {
                continue;
            };
            let id = self.synsets.len();
            for lemma in &lemmas {
                let slots = self.index.entry(lemma.to_lowercase()).or_default();
                if !slots.contains(&id) {
                    slots.push(id);
                }
            }
            self.synsets.push((pos, lemmas));
        }
    }

    /// `inflected base [base ...]` per line.
    fn add_exceptions(&mut self, pos: PartOfSpeech, content: &str) {
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let Some(inflected) = fields.next() else {
                continue;
            };
            let bases: Vec<String> = fields.map(str::to_lowercase).collect();
            if bases.is_empty() {
                continue;
            }
            self.exceptions
                .entry((pos, inflected.to_lowercase()))
                .or_default()
                .extend(bases);
        }
    }

    /// The word itself plus its base forms for `pos`: exception-list bases
    /// when the word is listed there, suffix-rule candidates otherwise.
    fn base_forms(&self, pos: PartOfSpeech, word: &str) -> Vec<String> {
        let mut forms = vec![word.to_string()];
        if let Some(bases) = self.exceptions.get(&(pos, word.to_string())) {
            forms.extend(bases.iter().cloned());
            return forms;
        }
        for (suffix, ending) in pos.suffixes() {
            if let Some(stem) = word.strip_suffix(suffix) {
                if !stem.is_empty() {
                    forms.push(format!("{stem}{ending}"));
                }
            }
        }
        forms
    }
}

impl Lexicon for WordNetLexicon {
    fn senses(&self, word: &str) -> Vec<Vec<String>> {
        let key = word.trim().to_lowercase().replace(' ', "_");
        let mut ids: Vec<usize> = Vec::new();
        for pos in PartOfSpeech::ALL {
            for form in self.base_forms(pos, &key) {
                let Some(slots) = self.index.get(&form) else {
                    continue;
                };
                for id in slots {
                    if self.synsets[*id].0 == pos && !ids.contains(id) {
                        ids.push(*id);
                    }
                }
            }
        }
        ids.into_iter().map(|id| self.synsets[id].1.clone()).collect()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "wordnet file missing");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// `offset lex_filenum ss_type w_cnt (word lex_id){w_cnt} ...`, with w_cnt
/// in hex.
fn parse_synset_lemmas(line: &str) -> Option<(PartOfSpeech, Vec<String>)> {
    let mut fields = line.split_whitespace();
    fields.next()?.parse::<u64>().ok()?;
    fields.next()?;
    let pos = PartOfSpeech::from_ss_type(fields.next()?)?;
    let count = usize::from_str_radix(fields.next()?, 16).ok()?;
    let mut lemmas = Vec::with_capacity(count);
    for _ in 0..count {
        let word = fields.next()?;
        fields.next()?;
        lemmas.push(strip_adjective_marker(word).to_string());
    }
    Some((pos, lemmas))
}

fn strip_adjective_marker(word: &str) -> &str {
    for marker in ["(a)", "(p)", "(ip)"] {
        if let Some(stripped) = word.strip_suffix(marker) {
            return stripped;
        }
    }
    word
}

/// Memoizes lexicon lookups per exact word, evicting the least recently
/// used word once `capacity` distinct words are cached.
pub struct SynonymExpander {
    lexicon: Box<dyn Lexicon>,
    cache: LruCache<String, BTreeSet<String>>,
}

impl SynonymExpander {
    pub fn new(lexicon: Box<dyn Lexicon>, capacity: NonZeroUsize) -> Self {
        Self {
            lexicon,
            cache: LruCache::new(capacity),
        }
    }

    pub fn synonyms_of(&mut self, word: &str) -> BTreeSet<String> {
        if let Some(hit) = self.cache.get(word) {
            return hit.clone();
        }
        let mut out = BTreeSet::new();
        for sense in self.lexicon.senses(word) {
            for lemma in sense {
                out.insert(lemma.replace('_', " "));
            }
        }
        debug!(word, count = out.len(), "synonyms expanded");
        self.cache.put(word.to_string(), out.clone());
        out
    }

    pub fn cached_words(&self) -> usize {
        self.cache.len()
    }
}

impl Default for SynonymExpander {
    fn default() -> Self {
        Self::new(Box::new(EmptyLexicon), DEFAULT_CACHE_SIZE)
    }
}
