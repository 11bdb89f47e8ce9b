use std::fmt;

use serde::{Deserialize, Serialize};

use crate::semantics::Term;
use crate::syntax::Syntax;

/// A syntactic category paired with optional semantics. The semantics is
/// always kept in normal form, so two categories are equal exactly when their
/// syntax is equal and their meanings are alpha-equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Category {
  syntax: Syntax,
  semantics: Option<Term>,
}

impl Category {
  pub fn new(syntax: Syntax, semantics: Option<Term>) -> Self {
    Self {
      syntax,
      semantics: semantics.map(|t| t.normalize()),
    }
  }

  pub fn syntactic(syntax: Syntax) -> Self {
    Self {
      syntax,
      semantics: None,
    }
  }

  /// The category of a skipped word
  pub fn empty() -> Self {
    Self::syntactic(Syntax::empty())
  }

  pub fn syntax(&self) -> &Syntax {
    &self.syntax
  }

  pub fn semantics(&self) -> Option<&Term> {
    self.semantics.as_ref()
  }

  pub fn is_empty(&self) -> bool {
    self.syntax.is_empty()
  }

  pub fn with_semantics(&self, semantics: Option<Term>) -> Self {
    Self::new(self.syntax.clone(), semantics)
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.syntax)?;
    if let Some(sem) = &self.semantics {
      write!(f, " : {}", sem)?;
    }
    Ok(())
  }
}
