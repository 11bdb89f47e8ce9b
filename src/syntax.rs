use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slash {
  /// `X/Y` takes its argument from the right
  Forward,
  /// `X\Y` takes its argument from the left
  Backward,
}

impl fmt::Display for Slash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Forward => write!(f, "/"),
      Self::Backward => write!(f, "\\"),
    }
  }
}

/// A CCG syntactic category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Syntax {
  Atomic(String),
  Complex {
    result: Box<Syntax>,
    slash: Slash,
    arg: Box<Syntax>,
  },
}

/// Name of the atomic category that skipped words get.
pub const EMPTY: &str = "EMPTY";

impl Syntax {
  pub fn atomic(name: &str) -> Self {
    Self::Atomic(name.to_string())
  }

  pub fn complex(result: Syntax, slash: Slash, arg: Syntax) -> Self {
    Self::Complex {
      result: Box::new(result),
      slash,
      arg: Box::new(arg),
    }
  }

  pub fn forward(result: Syntax, arg: Syntax) -> Self {
    Self::complex(result, Slash::Forward, arg)
  }

  pub fn backward(result: Syntax, arg: Syntax) -> Self {
    Self::complex(result, Slash::Backward, arg)
  }

  pub fn s() -> Self {
    Self::atomic("S")
  }

  pub fn n() -> Self {
    Self::atomic("N")
  }

  pub fn np() -> Self {
    Self::atomic("NP")
  }

  pub fn pp() -> Self {
    Self::atomic("PP")
  }

  pub fn empty() -> Self {
    Self::atomic(EMPTY)
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, Self::Atomic(name) if name == EMPTY)
  }

  pub fn is_atomic(&self) -> bool {
    matches!(self, Self::Atomic(_))
  }

  pub fn as_complex(&self) -> Option<(&Syntax, Slash, &Syntax)> {
    match self {
      Self::Complex { result, slash, arg } => Some((result, *slash, arg)),
      _ => None,
    }
  }

  /// Peels `depth` arguments off the right edge of a category, e.g.
  /// `((X/A)/B)` at depth 2 gives `X` and `[(/, A), (/, B)]` (outermost last).
  pub fn peel(&self, depth: usize) -> Option<(&Syntax, Vec<(Slash, &Syntax)>)> {
    let mut current = self;
    let mut args = Vec::with_capacity(depth);
    for _ in 0..depth {
      let (result, slash, arg) = current.as_complex()?;
      args.push((slash, arg));
      current = result;
    }
    args.reverse();
    Some((current, args))
  }

  /// Rebuilds a category from a result and arguments in `peel` order
  pub fn wrap(result: Syntax, args: &[(Slash, &Syntax)]) -> Syntax {
    args
      .iter()
      .fold(result, |acc, (slash, arg)| Syntax::complex(acc, *slash, (*arg).clone()))
  }

  /// Number of slashes
  pub fn arity(&self) -> usize {
    match self {
      Self::Atomic(_) => 0,
      Self::Complex { result, .. } => 1 + result.arity(),
    }
  }
}

impl fmt::Display for Syntax {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Atomic(name) => write!(f, "{}", name),
      Self::Complex { result, slash, arg } => {
        // slashes are left-associative, so only a complex argument needs parens
        write!(f, "{}{}", result, slash)?;
        if arg.is_atomic() {
          write!(f, "{}", arg)
        } else {
          write!(f, "({})", arg)
        }
      }
    }
  }
}

#[test]
fn test_display() {
  let tv = Syntax::forward(Syntax::backward(Syntax::s(), Syntax::np()), Syntax::np());
  assert_eq!(tv.to_string(), "S\\NP/NP");

  let raised = Syntax::forward(Syntax::s(), Syntax::backward(Syntax::s(), Syntax::np()));
  assert_eq!(raised.to_string(), "S/(S\\NP)");
}

#[test]
fn test_peel_and_wrap() {
  let tv = Syntax::forward(Syntax::backward(Syntax::s(), Syntax::np()), Syntax::pp());
  let (result, args) = tv.peel(2).unwrap();
  assert_eq!(result, &Syntax::s());
  assert_eq!(args, vec![(Slash::Backward, &Syntax::np()), (Slash::Forward, &Syntax::pp())]);
  assert_eq!(Syntax::wrap(result.clone(), &args), tv);
  assert!(tv.peel(3).is_none());
}
