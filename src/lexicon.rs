use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::parse_category::parse_entries;
use crate::syntree::Span;
use crate::types::TypeRepository;
use crate::Err;

/// Where a lexical entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
  /// Hand-written for the domain
  FixedDomain,
  /// Induced during training
  Learned,
  /// Made up on the fly by the parser, e.g. for skipped words
  Generated,
}

impl fmt::Display for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::FixedDomain => write!(f, "fixed"),
      Self::Learned => write!(f, "learned"),
      Self::Generated => write!(f, "generated"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LexicalEntry {
  pub tokens: Vec<String>,
  pub category: Category,
  pub origin: Origin,
}

impl LexicalEntry {
  pub fn new(tokens: Vec<String>, category: Category, origin: Origin) -> Self {
    Self {
      tokens,
      category,
      origin,
    }
  }
}

impl fmt::Display for LexicalEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} :- {}", self.tokens.join(" "), self.category)
  }
}

/// Source of lexical entries for token spans.
pub trait LexicalProvider: Send + Sync {
  /// Entries whose tokens are exactly `tokens`. `span` is where they sit in
  /// the sentence being parsed.
  fn lookup(&self, tokens: &[String], span: Span) -> Vec<LexicalEntry>;

  /// Longest token sequence any entry covers. Bounds the spans the parser
  /// asks about.
  fn max_entry_len(&self) -> usize;
}

/// An in-memory lexicon keyed by token sequence.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
  entries: HashMap<Vec<String>, Vec<LexicalEntry>>,
  max_len: usize,
}

impl Lexicon {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds an entry. Returns false if an identical one was already present.
  pub fn add(&mut self, entry: LexicalEntry) -> bool {
    let bucket = self.entries.entry(entry.tokens.clone()).or_default();
    if bucket.iter().any(|e| e.category == entry.category) {
      return false;
    }
    self.max_len = self.max_len.max(entry.tokens.len());
    bucket.push(entry);
    true
  }

  pub fn len(&self) -> usize {
    self.entries.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn entries(&self) -> impl Iterator<Item = &LexicalEntry> {
    self.entries.values().flatten()
  }

  /// Parses `tokens :- Category [@origin]` lines
  pub fn parse(src: &str, types: &TypeRepository) -> Result<Self, Err> {
    let mut lexicon = Self::new();
    for entry in parse_entries(src, types)? {
      lexicon.add(entry);
    }
    Ok(lexicon)
  }

  pub fn read_from_file(path: impl AsRef<Path>, types: &TypeRepository) -> Result<Self, Err> {
    let src = fs::read_to_string(path)?;
    Self::parse(&src, types)
  }
}

impl LexicalProvider for Lexicon {
  fn lookup(&self, tokens: &[String], _span: Span) -> Vec<LexicalEntry> {
    self.entries.get(tokens).cloned().unwrap_or_default()
  }

  fn max_entry_len(&self) -> usize {
    self.max_len
  }
}

/// Wraps a provider so that single tokens it knows nothing about can be
/// skipped, by giving them the EMPTY category.
pub struct WordSkipping<'a> {
  inner: &'a dyn LexicalProvider,
}

impl<'a> WordSkipping<'a> {
  pub fn new(inner: &'a dyn LexicalProvider) -> Self {
    Self { inner }
  }
}

impl LexicalProvider for WordSkipping<'_> {
  fn lookup(&self, tokens: &[String], span: Span) -> Vec<LexicalEntry> {
    let mut entries = self.inner.lookup(tokens, span);
    if entries.is_empty() && tokens.len() == 1 {
      entries.push(LexicalEntry::new(
        tokens.to_vec(),
        Category::empty(),
        Origin::Generated,
      ));
    }
    entries
  }

  fn max_entry_len(&self) -> usize {
    self.inner.max_entry_len().max(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::Type;

  fn toks(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
  }

  #[test]
  fn test_lookup_and_dedup() {
    let mut types = TypeRepository::new();
    types
      .declare_constant("book", Type::arrow(Type::entity(), Type::truth()))
      .unwrap();

    let mut lexicon = Lexicon::parse(
      "book :- N : book\nbook :- N : λx:e.book(x)\nthe book :- NP",
      &types,
    )
    .unwrap();

    // the second line is the same category once normalized
    assert_eq!(lexicon.len(), 2);
    assert_eq!(lexicon.max_entry_len(), 2);
    assert_eq!(lexicon.lookup(&toks("book"), Span::new(0, 1)).len(), 1);
    assert!(lexicon.lookup(&toks("uh"), Span::new(0, 1)).is_empty());

    let dup = lexicon.entries().next().unwrap().clone();
    assert!(!lexicon.add(dup));
  }

  #[test]
  fn test_word_skipping() {
    let lexicon = Lexicon::parse("book :- N", &TypeRepository::new()).unwrap();
    let skipping = WordSkipping::new(&lexicon);

    let uh = skipping.lookup(&toks("uh"), Span::new(0, 1));
    assert_eq!(uh.len(), 1);
    assert!(uh[0].category.is_empty());
    assert_eq!(uh[0].origin, Origin::Generated);

    // known words don't get skip entries, and neither do multi-token spans
    assert_eq!(skipping.lookup(&toks("book"), Span::new(0, 1)).len(), 1);
    assert!(skipping.lookup(&toks("uh uh"), Span::new(0, 2)).is_empty());
  }
}
