use std::fmt;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::ConfigError;
use crate::semantics::Term;
use crate::syntax::{Slash, Syntax};
use crate::types::{Type, TypeSystem};

/// Which rule produced a step. Lexical lookups sort before every rule, and
/// rules sort in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleId {
  Lexical,
  Rule(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
  /// `X/Y:f  Y:a  =>  X:f(a)`
  ForwardApplication,
  /// `Y:a  X\Y:f  =>  X:f(a)`
  BackwardApplication,
  /// `X/Y:f  Y/Z..:g  =>  X/Z..:λz...f(g(z...))`
  ForwardComposition { max_degree: usize },
  /// `Y\Z..:g  X\Y:f  =>  X\Z..:λz...f(g(z...))`
  BackwardComposition { max_degree: usize },
  /// `X:a  (R\X)/Z:g  =>  R/Z:λz.g(z)(a)`
  ForwardTypeRaisedComposition,
  /// `EMPTY  X  =>  X`
  ForwardSkipping,
  /// `X  EMPTY  =>  X`
  BackwardSkipping,
  /// `X:a  =>  T/(T\X):λf.f(a)`
  TypeRaising {
    name: String,
    arg: Syntax,
    target: Syntax,
    target_type: Type,
  },
  /// `from:a  =>  to:template(a)`
  TypeShifting {
    name: String,
    from: Syntax,
    to: Syntax,
    template: Term,
  },
}

/// Semantics of a result: None means the rule doesn't apply, Some(None) that
/// it applies to categories without semantics.
type Sem = Option<Option<Term>>;

impl Rule {
  /// Looks up a binary rule by its configuration name
  pub fn from_name(name: &str, max_degree: usize) -> Result<Self, ConfigError> {
    Ok(match name {
      "forward-application" => Self::ForwardApplication,
      "backward-application" => Self::BackwardApplication,
      "forward-composition" => Self::ForwardComposition { max_degree },
      "backward-composition" => Self::BackwardComposition { max_degree },
      "forward-type-raised-composition" => Self::ForwardTypeRaisedComposition,
      "forward-skipping" => Self::ForwardSkipping,
      "backward-skipping" => Self::BackwardSkipping,
      _ => return Err(ConfigError::UnknownRule(name.to_string())),
    })
  }

  pub fn name(&self) -> &str {
    match self {
      Self::ForwardApplication => "forward-application",
      Self::BackwardApplication => "backward-application",
      Self::ForwardComposition { .. } => "forward-composition",
      Self::BackwardComposition { .. } => "backward-composition",
      Self::ForwardTypeRaisedComposition => "forward-type-raised-composition",
      Self::ForwardSkipping => "forward-skipping",
      Self::BackwardSkipping => "backward-skipping",
      Self::TypeRaising { name, .. } | Self::TypeShifting { name, .. } => name.as_str(),
    }
  }

  pub fn arity(&self) -> usize {
    match self {
      Self::TypeRaising { .. } | Self::TypeShifting { .. } => 1,
      _ => 2,
    }
  }

  pub fn is_unary(&self) -> bool {
    self.arity() == 1
  }

  pub fn is_skipping(&self) -> bool {
    matches!(self, Self::ForwardSkipping | Self::BackwardSkipping)
  }

  /// Cheap syntactic precondition, tested before building any semantics
  pub fn applies(&self, left: &Syntax, right: &Syntax) -> bool {
    match self {
      Self::ForwardApplication => {
        matches!(left.as_complex(), Some((_, Slash::Forward, arg)) if arg == right)
      }
      Self::BackwardApplication => {
        matches!(right.as_complex(), Some((_, Slash::Backward, arg)) if arg == left)
      }
      Self::ForwardComposition { .. } => {
        matches!(left.as_complex(), Some((_, Slash::Forward, _))) && !right.is_atomic()
      }
      Self::BackwardComposition { .. } => {
        matches!(right.as_complex(), Some((_, Slash::Backward, _))) && !left.is_atomic()
      }
      Self::ForwardTypeRaisedComposition => match right.as_complex() {
        Some((inner, Slash::Forward, _)) => {
          matches!(inner.as_complex(), Some((_, Slash::Backward, x)) if x == left)
        }
        _ => false,
      },
      Self::ForwardSkipping => left.is_empty() && !right.is_empty(),
      Self::BackwardSkipping => right.is_empty() && !left.is_empty(),
      Self::TypeRaising { .. } | Self::TypeShifting { .. } => false,
    }
  }

  /// Applies a unary rule. Results equal to the input are dropped.
  pub fn apply_unary(&self, cat: &Category, types: &dyn TypeSystem) -> Option<Category> {
    let result = match self {
      Self::TypeRaising {
        arg,
        target,
        target_type,
        ..
      } => {
        if cat.syntax() != arg {
          return None;
        }
        let syntax = Syntax::forward(target.clone(), Syntax::backward(target.clone(), arg.clone()));
        let sem = match cat.semantics() {
          Some(a) => {
            let a_ty = types.type_of(a)?;
            let f_ty = Type::arrow(a_ty, target_type.clone());
            Some(Term::lambda(
              f_ty,
              Term::app(Term::Var(0), a.shift(1, 0)),
            ))
          }
          None => None,
        };
        Category::new(syntax, sem)
      }
      Self::TypeShifting { from, to, template, .. } => {
        if cat.syntax() != from {
          return None;
        }
        let sem = apply_sem(Some(template), cat.semantics(), types)?;
        Category::new(to.clone(), sem)
      }
      _ => return None,
    };

    if &result == cat { None } else { Some(result) }
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ForwardComposition { max_degree } | Self::BackwardComposition { max_degree } => {
        write!(f, "{}[{}]", self.name(), max_degree)
      }
      Self::TypeRaising { arg, target, .. } => {
        write!(f, "{}: {} => {}/({}\\{})", self.name(), arg, target, target, arg)
      }
      Self::TypeShifting { from, to, template, .. } => {
        write!(f, "{}: {} => {} : {}", self.name(), from, to, template)
      }
      _ => write!(f, "{}", self.name()),
    }
  }
}

/// `f(a)` if both are present and it type-checks
fn apply_sem(f: Option<&Term>, a: Option<&Term>, types: &dyn TypeSystem) -> Sem {
  match (f, a) {
    (Some(f), Some(a)) => {
      let term = Term::app(f.clone(), a.clone());
      types.type_of(&term)?;
      Some(Some(term))
    }
    _ => Some(None),
  }
}

/// `λz1..zk.f(g(z1..zk))`, with the binder types read off `g`'s type
fn compose_sem(f: Option<&Term>, g: Option<&Term>, degree: usize, types: &dyn TypeSystem) -> Sem {
  let (f, g) = match (f, g) {
    (Some(f), Some(g)) => (f, g),
    _ => return Some(None),
  };

  let mut g_ty = types.type_of(g)?;
  let mut binder_types = Vec::with_capacity(degree);
  for _ in 0..degree {
    let (arg, ret) = g_ty.as_arrow()?;
    binder_types.push(arg.clone());
    g_ty = ret.clone();
  }

  let vars = (0..degree).rev().map(Term::Var);
  let inner = Term::apply_all(g.shift(degree as isize, 0), vars);
  let body = Term::app(f.shift(degree as isize, 0), inner);
  let term = binder_types
    .into_iter()
    .rev()
    .fold(body, |body, ty| Term::lambda(ty, body));

  types.type_of(&term)?;
  Some(Some(term))
}

/// Tries harmonic composition of degree 1..=max_degree, returning the first
/// that matches. `functor` is the `X|Y` side, `other` the `Y|Z..` side.
fn compose(
  functor: &Category,
  other: &Category,
  slash: Slash,
  max_degree: usize,
  types: &dyn TypeSystem,
) -> Option<Category> {
  let (x, f_slash, y) = functor.syntax().as_complex()?;
  if f_slash != slash {
    return None;
  }

  for degree in 1..=max_degree {
    let Some((core, args)) = other.syntax().peel(degree) else {
      break;
    };
    if core != y || args.iter().any(|(s, _)| *s != slash) {
      continue;
    }
    let sem = compose_sem(functor.semantics(), other.semantics(), degree, types)?;
    return Some(Category::new(Syntax::wrap(x.clone(), &args), sem));
  }
  None
}

/// Combines two adjacent categories with a binary rule.
pub fn combine(
  left: &Category,
  right: &Category,
  rule: &Rule,
  types: &dyn TypeSystem,
) -> Option<Category> {
  if !rule.applies(left.syntax(), right.syntax()) {
    return None;
  }

  match rule {
    Rule::ForwardApplication => {
      let (x, _, _) = left.syntax().as_complex()?;
      let sem = apply_sem(left.semantics(), right.semantics(), types)?;
      Some(Category::new(x.clone(), sem))
    }
    Rule::BackwardApplication => {
      let (x, _, _) = right.syntax().as_complex()?;
      let sem = apply_sem(right.semantics(), left.semantics(), types)?;
      Some(Category::new(x.clone(), sem))
    }
    Rule::ForwardComposition { max_degree } => {
      compose(left, right, Slash::Forward, *max_degree, types)
    }
    Rule::BackwardComposition { max_degree } => {
      compose(right, left, Slash::Backward, *max_degree, types)
    }
    Rule::ForwardTypeRaisedComposition => {
      let (inner, _, z) = right.syntax().as_complex()?;
      let (r, _, _) = inner.as_complex()?;
      let syntax = Syntax::forward(r.clone(), z.clone());
      let sem = match (left.semantics(), right.semantics()) {
        (Some(a), Some(g)) => {
          let g_ty = types.type_of(g)?;
          let (z_ty, _) = g_ty.as_arrow()?;
          let term = Term::lambda(
            z_ty.clone(),
            Term::apply_all(g.shift(1, 0), [Term::Var(0), a.shift(1, 0)]),
          );
          types.type_of(&term)?;
          Some(term)
        }
        _ => None,
      };
      Some(Category::new(syntax, sem))
    }
    Rule::ForwardSkipping => Some(right.clone()),
    Rule::BackwardSkipping => Some(left.clone()),
    Rule::TypeRaising { .. } | Rule::TypeShifting { .. } => None,
  }
}

/// The registered rules. Registration order is the tie-break order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
  rules: Vec<Rule>,
}

impl RuleSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Application, harmonic composition up to `max_degree`, forward
  /// type-raised composition, and skipping.
  pub fn standard(max_degree: usize) -> Self {
    let mut rules = Self::new();
    rules.register(Rule::ForwardApplication);
    rules.register(Rule::BackwardApplication);
    rules.register(Rule::ForwardComposition { max_degree });
    rules.register(Rule::BackwardComposition { max_degree });
    rules.register(Rule::ForwardTypeRaisedComposition);
    rules.register(Rule::ForwardSkipping);
    rules.register(Rule::BackwardSkipping);
    rules
  }

  pub fn register(&mut self, rule: Rule) -> RuleId {
    self.rules.push(rule);
    RuleId::Rule(self.rules.len() - 1)
  }

  pub fn get(&self, id: RuleId) -> Option<&Rule> {
    match id {
      RuleId::Lexical => None,
      RuleId::Rule(idx) => self.rules.get(idx),
    }
  }

  pub fn name(&self, id: RuleId) -> &str {
    self.get(id).map(Rule::name).unwrap_or("lexical")
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
    self
      .rules
      .iter()
      .enumerate()
      .map(|(idx, r)| (RuleId::Rule(idx), r))
  }

  pub fn has_unary(&self) -> bool {
    self.rules.iter().any(Rule::is_unary)
  }

  /// Every binary rule result for an adjacent pair, in registration order
  pub fn apply_binary(
    &self,
    left: &Category,
    right: &Category,
    types: &dyn TypeSystem,
  ) -> Vec<(RuleId, Category)> {
    self
      .iter()
      .filter(|(_, r)| !r.is_unary())
      .filter_map(|(id, r)| combine(left, right, r, types).map(|c| (id, c)))
      .collect()
  }

  /// Every unary rule result for a category, in registration order
  pub fn apply_unary(&self, cat: &Category, types: &dyn TypeSystem) -> Vec<(RuleId, Category)> {
    self
      .iter()
      .filter(|(_, r)| r.is_unary())
      .filter_map(|(id, r)| r.apply_unary(cat, types).map(|c| (id, c)))
      .collect()
  }
}

impl fmt::Display for RuleSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (idx, rule) in self.rules.iter().enumerate() {
      writeln!(f, "{}: {}", idx, rule)?;
    }
    Ok(())
  }
}
