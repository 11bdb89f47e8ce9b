//! Typed lambda calculus terms for category semantics.
//!
//! Bound variables are de Bruijn indices, so alpha-equivalent terms are
//! structurally equal and `==` on normalized terms is the equivalence the
//! parser needs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Type, TypeSystem};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
  Constant(String, Type),
  /// de Bruijn index, 0 is the innermost binder
  Var(usize),
  App(Box<Term>, Box<Term>),
  Lambda(Type, Box<Term>),
}

impl Term {
  pub fn constant(name: &str, ty: Type) -> Self {
    Self::Constant(name.to_string(), ty)
  }

  pub fn app(f: Term, arg: Term) -> Self {
    Self::App(Box::new(f), Box::new(arg))
  }

  pub fn lambda(ty: Type, body: Term) -> Self {
    Self::Lambda(ty, Box::new(body))
  }

  /// Applies `f` to `args` left to right
  pub fn apply_all(f: Term, args: impl IntoIterator<Item = Term>) -> Self {
    args.into_iter().fold(f, Self::app)
  }

  /// Adds `d` to every variable index at or above `cutoff`.
  pub fn shift(&self, d: isize, cutoff: usize) -> Term {
    match self {
      Self::Constant(..) => self.clone(),
      Self::Var(k) => {
        if *k >= cutoff {
          Self::Var((*k as isize + d) as usize)
        } else {
          Self::Var(*k)
        }
      }
      Self::App(f, a) => Self::app(f.shift(d, cutoff), a.shift(d, cutoff)),
      Self::Lambda(ty, body) => Self::lambda(ty.clone(), body.shift(d, cutoff + 1)),
    }
  }

  /// Replaces variable `j` with `s`.
  pub fn subst(&self, j: usize, s: &Term) -> Term {
    match self {
      Self::Constant(..) => self.clone(),
      Self::Var(k) => {
        if *k == j {
          s.clone()
        } else {
          Self::Var(*k)
        }
      }
      Self::App(f, a) => Self::app(f.subst(j, s), a.subst(j, s)),
      Self::Lambda(ty, body) => Self::lambda(ty.clone(), body.subst(j + 1, &s.shift(1, 0))),
    }
  }

  fn beta(body: &Term, arg: &Term) -> Term {
    body.subst(0, &arg.shift(1, 0)).shift(-1, 0)
  }

  /// Beta-eta normal form. Only terminates for well-typed terms, which is
  /// all the parser ever builds.
  pub fn normalize(&self) -> Term {
    match self {
      Self::Constant(..) | Self::Var(_) => self.clone(),
      Self::App(f, a) => {
        let f = f.normalize();
        let a = a.normalize();
        match f {
          Self::Lambda(_, body) => Self::beta(&body, &a).normalize(),
          f => Self::app(f, a),
        }
      }
      Self::Lambda(ty, body) => {
        let body = body.normalize();
        if let Self::App(f, a) = &body {
          if **a == Self::Var(0) && !f.has_free(0) {
            return f.shift(-1, 0);
          }
        }
        Self::lambda(ty.clone(), body)
      }
    }
  }

  /// Does variable `idx` (relative to this term) occur free?
  pub fn has_free(&self, idx: usize) -> bool {
    match self {
      Self::Constant(..) => false,
      Self::Var(k) => *k == idx,
      Self::App(f, a) => f.has_free(idx) || a.has_free(idx),
      Self::Lambda(_, body) => body.has_free(idx + 1),
    }
  }

  pub fn is_closed(&self) -> bool {
    self.max_free(0).is_none()
  }

  fn max_free(&self, depth: usize) -> Option<usize> {
    match self {
      Self::Constant(..) => None,
      Self::Var(k) => (*k >= depth).then(|| *k - depth),
      Self::App(f, a) => f.max_free(depth).max(a.max_free(depth)),
      Self::Lambda(_, body) => body.max_free(depth + 1),
    }
  }

  /// The type of this term, or None if it is ill-typed or not closed.
  pub fn infer(&self, types: &dyn TypeSystem) -> Option<Type> {
    self.infer_in(types, &mut Vec::new())
  }

  fn infer_in(&self, types: &dyn TypeSystem, ctx: &mut Vec<Type>) -> Option<Type> {
    match self {
      Self::Constant(_, ty) => Some(ty.clone()),
      Self::Var(k) => ctx.len().checked_sub(k + 1).map(|i| ctx[i].clone()),
      Self::App(f, a) => {
        let f_ty = f.infer_in(types, ctx)?;
        let a_ty = a.infer_in(types, ctx)?;
        let (arg, ret) = f_ty.as_arrow()?;
        types.is_compatible(arg, &a_ty).then(|| ret.clone())
      }
      Self::Lambda(ty, body) => {
        ctx.push(ty.clone());
        let body_ty = body.infer_in(types, ctx);
        ctx.pop();
        Some(Type::arrow(ty.clone(), body_ty?))
      }
    }
  }

  /// Is `needle` this term or one of its subterms?
  pub fn contains_subterm(&self, needle: &Term) -> bool {
    if self == needle {
      return true;
    }
    match self {
      Self::Constant(..) | Self::Var(_) => false,
      Self::App(f, a) => f.contains_subterm(needle) || a.contains_subterm(needle),
      Self::Lambda(_, body) => body.contains_subterm(needle),
    }
  }

  /// Names of all constants in this term
  pub fn constants(&self) -> BTreeSet<&str> {
    let mut out = BTreeSet::new();
    self.collect_constants(&mut out);
    out
  }

  fn collect_constants<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
    match self {
      Self::Constant(name, _) => {
        out.insert(name);
      }
      Self::Var(_) => {}
      Self::App(f, a) => {
        f.collect_constants(out);
        a.collect_constants(out);
      }
      Self::Lambda(_, body) => body.collect_constants(out),
    }
  }

  /// Splits `f(a)(b)` into `f` and `[a, b]`
  pub fn spine(&self) -> (&Term, Vec<&Term>) {
    let mut head = self;
    let mut args = Vec::new();
    while let Self::App(f, a) = head {
      args.push(&**a);
      head = f;
    }
    args.reverse();
    (head, args)
  }

  fn fmt_at(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match self {
      Self::Constant(name, _) => write!(f, "{}", name),
      Self::Var(k) => match depth.checked_sub(k + 1) {
        Some(level) => write!(f, "${}", level),
        None => write!(f, "#{}", k),
      },
      Self::Lambda(ty, body) => {
        write!(f, "λ${}:{}.", depth, ty)?;
        body.fmt_at(f, depth + 1)
      }
      Self::App(..) => {
        let (head, args) = self.spine();
        if matches!(head, Self::Lambda(..)) {
          write!(f, "(")?;
          head.fmt_at(f, depth)?;
          write!(f, ")")?;
        } else {
          head.fmt_at(f, depth)?;
        }
        write!(f, "(")?;
        for (i, arg) in args.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          arg.fmt_at(f, depth)?;
        }
        write!(f, ")")
      }
    }
  }
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.fmt_at(f, 0)
  }
}

/// Maps semantics to the form oracles compare against the target, e.g. by
/// erasing distinctions the training data does not make.
pub trait Underspecify: Send + Sync + fmt::Debug {
  fn underspecify(&self, term: &Term) -> Term;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Underspecify for Identity {
  fn underspecify(&self, term: &Term) -> Term {
    term.clone()
  }
}
