use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::semantics::Term;

/// A simple type: an atomic name like `e` or `t`, or a function `<arg,ret>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Type {
  Atomic(String),
  Arrow(Box<Type>, Box<Type>),
}

impl Type {
  pub fn atomic(name: &str) -> Self {
    Self::Atomic(name.to_string())
  }

  pub fn arrow(arg: Type, ret: Type) -> Self {
    Self::Arrow(Box::new(arg), Box::new(ret))
  }

  /// `e`, the type of entities
  pub fn entity() -> Self {
    Self::atomic("e")
  }

  /// `t`, the type of truth values
  pub fn truth() -> Self {
    Self::atomic("t")
  }

  pub fn as_arrow(&self) -> Option<(&Type, &Type)> {
    match self {
      Self::Arrow(arg, ret) => Some((arg, ret)),
      _ => None,
    }
  }

  pub fn is_arrow(&self) -> bool {
    self.as_arrow().is_some()
  }

  /// Calls `f` on every atomic name in this type
  fn for_each_atom<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
    match self {
      Self::Atomic(name) => f(name),
      Self::Arrow(arg, ret) => {
        arg.for_each_atom(f);
        ret.for_each_atom(f);
      }
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Atomic(name) => write!(f, "{}", name),
      Self::Arrow(arg, ret) => write!(f, "<{},{}>", arg, ret),
    }
  }
}

/// The contract the category algebra needs from a type system.
pub trait TypeSystem: Send + Sync {
  /// The type of a closed term, or None if it is ill-typed.
  fn type_of(&self, term: &Term) -> Option<Type>;

  /// Whether a value of type `actual` may stand where `expected` is required.
  fn is_compatible(&self, expected: &Type, actual: &Type) -> bool;
}

/// Atomic type hierarchy plus the signature of known constants. Built once,
/// then shared immutably.
#[derive(Debug, Clone)]
pub struct TypeRepository {
  parents: HashMap<String, Option<String>>,
  constants: BTreeMap<String, Type>,
}

impl Default for TypeRepository {
  fn default() -> Self {
    Self::new()
  }
}

impl TypeRepository {
  /// A repository holding only `e` and `t`.
  pub fn new() -> Self {
    let mut parents = HashMap::new();
    parents.insert("e".to_string(), None);
    parents.insert("t".to_string(), None);
    Self {
      parents,
      constants: BTreeMap::new(),
    }
  }

  /// Declares an atomic type, optionally below an already-declared parent.
  pub fn add_atomic(&mut self, name: &str, parent: Option<&str>) -> Result<(), ConfigError> {
    if let Some(parent) = parent {
      if !self.parents.contains_key(parent) {
        return Err(ConfigError::UnknownType(parent.to_string()));
      }
    }

    let parent = parent.map(str::to_string);
    match self.parents.get(name) {
      Some(existing) if *existing != parent => Err(ConfigError::ConflictingType {
        name: name.to_string(),
        parent,
      }),
      Some(_) => Ok(()),
      None => {
        self.parents.insert(name.to_string(), parent);
        Ok(())
      }
    }
  }

  pub fn has_atomic(&self, name: &str) -> bool {
    self.parents.contains_key(name)
  }

  /// Errors if `ty` mentions an undeclared atomic type
  pub fn validate(&self, ty: &Type) -> Result<(), ConfigError> {
    let mut missing = None;
    ty.for_each_atom(&mut |atom| {
      if missing.is_none() && !self.has_atomic(atom) {
        missing = Some(atom.to_string());
      }
    });
    match missing {
      Some(atom) => Err(ConfigError::UnknownType(atom)),
      None => Ok(()),
    }
  }

  pub fn declare_constant(&mut self, name: &str, ty: Type) -> Result<(), ConfigError> {
    self.validate(&ty)?;
    self.constants.insert(name.to_string(), ty);
    Ok(())
  }

  pub fn constant_type(&self, name: &str) -> Option<&Type> {
    self.constants.get(name)
  }

  pub fn constants(&self) -> impl Iterator<Item = (&str, &Type)> {
    self.constants.iter().map(|(k, v)| (k.as_str(), v))
  }

  /// Is atomic `sub` equal to or below atomic `sup`?
  pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
    let mut current = Some(sub);
    while let Some(name) = current {
      if name == sup {
        return true;
      }
      current = self.parents.get(name).and_then(|p| p.as_deref());
    }
    false
  }
}

impl TypeSystem for TypeRepository {
  fn type_of(&self, term: &Term) -> Option<Type> {
    term.infer(self)
  }

  fn is_compatible(&self, expected: &Type, actual: &Type) -> bool {
    match (expected, actual) {
      (Type::Atomic(e), Type::Atomic(a)) => self.is_subtype(a, e),
      // arguments are contravariant, results covariant
      (Type::Arrow(e_arg, e_ret), Type::Arrow(a_arg, a_ret)) => {
        self.is_compatible(a_arg, e_arg) && self.is_compatible(e_ret, a_ret)
      }
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn et() -> Type {
    Type::arrow(Type::entity(), Type::truth())
  }

  #[test]
  fn test_display() {
    let ty = Type::arrow(et(), Type::entity());
    assert_eq!(ty.to_string(), "<<e,t>,e>");
  }

  #[test]
  fn test_hierarchy() {
    let mut repo = TypeRepository::new();
    repo.add_atomic("loc", Some("e")).unwrap();
    repo.add_atomic("city", Some("loc")).unwrap();

    assert!(repo.is_subtype("city", "e"));
    assert!(!repo.is_subtype("e", "city"));

    let city = Type::atomic("city");
    assert!(repo.is_compatible(&Type::entity(), &city));
    assert!(!repo.is_compatible(&city, &Type::entity()));

    // a predicate over all entities can be used where a predicate over cities is needed
    let city_t = Type::arrow(city, Type::truth());
    assert!(repo.is_compatible(&city_t, &et()));
    assert!(!repo.is_compatible(&et(), &city_t));
  }

  #[test]
  fn test_malformed_declarations() {
    let mut repo = TypeRepository::new();
    assert!(matches!(
      repo.add_atomic("city", Some("loc")),
      Err(ConfigError::UnknownType(_))
    ));
    assert!(matches!(
      repo.add_atomic("e", Some("t")),
      Err(ConfigError::ConflictingType { .. })
    ));
    assert!(repo
      .declare_constant("boston", Type::atomic("city"))
      .is_err());
  }
}
