use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::lexicon::LexicalEntry;
use crate::rules::RuleId;

/// A half-open token range `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
  pub start: usize,
  pub end: usize,
}

impl Span {
  pub fn new(start: usize, end: usize) -> Self {
    Self { start, end }
  }

  pub fn len(&self) -> usize {
    self.end - self.start
  }

  pub fn is_empty(&self) -> bool {
    self.start >= self.end
  }

  pub fn contains(&self, other: Span) -> bool {
    self.start <= other.start && other.end <= self.end
  }

  pub fn overlaps(&self, other: Span) -> bool {
    self.start < other.end && other.start < self.end
  }
}

impl fmt::Display for Span {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}", self.start, self.end)
  }
}

/// One step of a derivation: a rule (or a lexical lookup) that produced
/// `category` over `span`.
///
/// Identity is (span, rule, category). The entry is carried along so that
/// lexical steps can be scored, but two lookups producing the same category
/// over the same span are the same step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingOp {
  pub span: Span,
  pub rule: RuleId,
  pub category: Category,
  pub entry: Option<LexicalEntry>,
}

impl ParsingOp {
  pub fn lexical(span: Span, entry: LexicalEntry) -> Self {
    Self {
      span,
      rule: RuleId::Lexical,
      category: entry.category.clone(),
      entry: Some(entry),
    }
  }

  pub fn rule(span: Span, rule: RuleId, category: Category) -> Self {
    Self {
      span,
      rule,
      category,
      entry: None,
    }
  }

  pub fn is_lexical(&self) -> bool {
    self.rule == RuleId::Lexical
  }

  fn key(&self) -> (&Span, &RuleId, &Category) {
    (&self.span, &self.rule, &self.category)
  }
}

impl PartialEq for ParsingOp {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl Eq for ParsingOp {}

impl Hash for ParsingOp {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key().hash(state)
  }
}

impl PartialOrd for ParsingOp {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for ParsingOp {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key().cmp(&other.key())
  }
}

impl fmt::Display for ParsingOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {:?}: {}", self.span, self.rule, self.category)
  }
}

/// Whether equivalent partial derivations are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackingMode {
  /// Merge items with the same category (chart) or the same stack and
  /// cursor (beam), counting how many derivations each stands for.
  #[default]
  Packed,
  /// Keep every derivation as its own item.
  Unpacked,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Constituent<T> {
  pub value: T,
  pub span: Span,
}

impl<T> fmt::Display for Constituent<T>
where
  T: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.span, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Word<U> {
  pub value: U,
  pub span: Span,
}

impl<U> fmt::Display for Word<U>
where
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.span, self.value)
  }
}

#[derive(Debug, PartialEq, Clone)]
pub enum SynTree<T, U> {
  Branch(Constituent<T>, Vec<SynTree<T, U>>),
  Leaf(Word<U>),
}

/// A derivation: categories over words.
pub type DerivationTree = SynTree<Category, String>;

impl<T, U> SynTree<T, U> {
  pub fn is_leaf(&self) -> bool {
    matches!(self, Self::Leaf(_))
  }

  pub fn get_leaf(&self) -> Option<&Word<U>> {
    match self {
      Self::Leaf(w) => Some(w),
      _ => None,
    }
  }

  pub fn get_branch(&self) -> Option<(&Constituent<T>, &Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn span(&self) -> Span {
    match self {
      Self::Branch(c, _) => c.span,
      Self::Leaf(w) => w.span,
    }
  }

  /// Leaves, left to right
  pub fn words(&self) -> Vec<&U> {
    match self {
      Self::Leaf(w) => vec![&w.value],
      Self::Branch(_, children) => children.iter().flat_map(|c| c.words()).collect(),
    }
  }

  pub fn map<V, W>(
    &self,
    map_branch: fn(&Constituent<T>) -> V,
    map_leaf: fn(&Word<U>) -> W,
  ) -> SynTree<V, W> {
    match self {
      Self::Branch(t, children) => {
        let children = children
          .iter()
          .map(|c| c.map(map_branch, map_leaf))
          .collect::<Vec<_>>();
        SynTree::Branch(
          Constituent {
            span: t.span,
            value: map_branch(t),
          },
          children,
        )
      }
      Self::Leaf(u) => SynTree::Leaf(Word {
        span: u.span,
        value: map_leaf(u),
      }),
    }
  }
}

impl DerivationTree {
  pub fn category(&self) -> Option<&Category> {
    self.get_branch().map(|(c, _)| &c.value)
  }
}

impl<T, U> fmt::Display for SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(t) => write!(f, "{}", t),
      Self::Branch(t, ts) => {
        write!(f, "({}", t)?;
        if ts.len() == 1 {
          write!(f, " ({}))", ts[0])
        } else {
          for t in ts.iter() {
            let fmt = format!("{}", t);
            for line in fmt.lines() {
              write!(f, "\n  {}", line)?;
            }
          }
          write!(f, ")")
        }
      }
    }
  }
}
