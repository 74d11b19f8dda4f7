//! Category resolution and the two classifiers that consume it.

pub mod ai;
pub mod keyword;
pub mod registry;
pub mod synonyms;

pub use ai::{
    AiClassifier, AiLabel, ChatCompletionClient, Label, ModelConfig, ModelEndpoint, RetryPolicy,
};
pub use keyword::KeywordMatch;
pub use registry::{BUILTIN_CATEGORIES, Category, CategoryRegistry};
pub use synonyms::{EmptyLexicon, Lexicon, SynonymExpander, WordNetLexicon};
