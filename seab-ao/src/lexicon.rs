//! Process-wide CEFR lexicon and text utilities.
//!
//! The word list is loaded once at startup via [`init`], before the server
//! accepts requests; request paths only ever read it. Lazy init inside
//! handlers is deliberately impossible here.

use seab_common::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

static LEXICON: OnceLock<Lexicon> = OnceLock::new();

/// Six-level CEFR scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "A1" => Some(CefrLevel::A1),
            "A2" => Some(CefrLevel::A2),
            "B1" => Some(CefrLevel::B1),
            "B2" => Some(CefrLevel::B2),
            "C1" => Some(CefrLevel::C1),
            "C2" => Some(CefrLevel::C2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
        }
    }

    /// Next level on the progression ladder used for upgrade suggestions.
    pub fn next(&self) -> Option<CefrLevel> {
        match self {
            CefrLevel::A2 => Some(CefrLevel::B1),
            CefrLevel::B1 => Some(CefrLevel::B2),
            CefrLevel::B2 => Some(CefrLevel::C1),
            _ => None,
        }
    }
}

/// Read-only word → CEFR level table.
pub struct Lexicon {
    words: HashMap<String, CefrLevel>,
}

impl Lexicon {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, CefrLevel)>) -> Self {
        Self {
            words: entries
                .into_iter()
                .map(|(word, level)| (word.to_lowercase(), level))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Level of a word, with a crude singular fallback for plural forms.
    pub fn level_of(&self, word: &str) -> Option<CefrLevel> {
        let normalized = normalize_word(word);
        if normalized.is_empty() {
            return None;
        }
        if let Some(level) = self.words.get(&normalized) {
            return Some(*level);
        }
        normalized
            .strip_suffix('s')
            .and_then(|singular| self.words.get(singular))
            .copied()
    }
}

/// Parse a word-list asset. Entries come in two shapes:
/// `{"value": {"word": "...", "level": "B2"}}` (the published list) and the
/// flat `{"word": "...", "level": "B2"}` used by fixtures.
fn parse_lexicon(raw: &Value) -> Result<Lexicon> {
    let entries = raw
        .as_array()
        .ok_or_else(|| Error::InvalidInput("lexicon asset is not a JSON array".into()))?;

    let mut words = Vec::new();
    for entry in entries {
        let record = entry.get("value").unwrap_or(entry);
        let (Some(word), Some(level)) = (
            record.get("word").and_then(Value::as_str),
            record.get("level").and_then(Value::as_str),
        ) else {
            continue;
        };
        if let Some(level) = CefrLevel::parse(level) {
            words.push((word.to_string(), level));
        }
    }

    Ok(Lexicon::from_entries(words))
}

/// Load the lexicon from disk and install it process-wide. Must be called
/// before the first handler is served; calling twice is a no-op.
pub fn init(path: &Path) -> Result<()> {
    if LEXICON.get().is_some() {
        return Ok(());
    }

    let content = std::fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&content)?;
    let lexicon = parse_lexicon(&raw)?;

    info!(path = %path.display(), words = lexicon.len(), "Lexicon loaded");
    let _ = LEXICON.set(lexicon);
    Ok(())
}

/// Install an in-memory lexicon (tests, degraded startup).
pub fn init_with(lexicon: Lexicon) {
    let _ = LEXICON.set(lexicon);
}

/// The installed lexicon, if [`init`] has run.
pub fn global() -> Option<&'static Lexicon> {
    LEXICON.get()
}

fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphabetic() || *c == '\'')
        .collect::<String>()
        .to_lowercase()
}

/// Count actual words, excluding punctuation tokens.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|token| token.chars().any(|c| c.is_alphanumeric()))
        .count()
}

/// Split text into non-empty sentences on terminal punctuation.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
        .map(str::to_string)
        .collect()
}
