//! Scoring of parsing ops and the shared, trainable weight vector.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::grammar::Grammar;
use crate::syntree::ParsingOp;

/// Feature name of skipping-rule ops. Its weight is fixed, never learned.
pub const SKIP_FEATURE: &str = "SKIP";

/// Sparse feature counts, ordered by name so iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(BTreeMap<String, f64>);

impl FeatureVector {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, name: impl Into<String>, value: f64) {
    *self.0.entry(name.into()).or_insert(0.0) += value;
  }

  /// self += scale * other
  pub fn add_all(&mut self, other: &FeatureVector, scale: f64) {
    for (name, value) in other.iter() {
      self.add(name, scale * value);
    }
  }

  /// Drops entries that cancelled out
  pub fn prune_zeros(&mut self) {
    self.0.retain(|_, v| *v != 0.0);
  }

  pub fn get(&self, name: &str) -> f64 {
    self.0.get(name).copied().unwrap_or(0.0)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.contains_key(name)
  }

  pub fn remove(&mut self, name: &str) -> Option<f64> {
    self.0.remove(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.0.iter().map(|(k, v)| (k.as_str(), *v))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn l2_norm(&self) -> f64 {
    self.0.values().map(|v| v * v).sum::<f64>().sqrt()
  }
}

impl fmt::Display for FeatureVector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (name, value)) in self.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}={}", name, value)?;
    }
    write!(f, "}}")
  }
}

/// What a scorer may look at besides the op itself.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
  pub grammar: &'a Grammar,
  pub tokens: &'a [String],
}

/// Maps ops to scores. Scoring may happen from many threads at once; updates
/// follow the scorer's [`UpdateDiscipline`].
pub trait Scorer: Send + Sync {
  fn features(&self, op: &ParsingOp, ctx: &ScoringContext<'_>) -> FeatureVector;

  fn score(&self, op: &ParsingOp, ctx: &ScoringContext<'_>) -> f64;

  /// weights += step * delta
  fn apply_update(&self, delta: &FeatureVector, step: f64);

  /// Summed features of a sequence of ops
  fn derivation_features(&self, ops: &[ParsingOp], ctx: &ScoringContext<'_>) -> FeatureVector {
    let mut total = FeatureVector::new();
    for op in ops {
      total.add_all(&self.features(op, ctx), 1.0);
    }
    total
  }
}

/// How concurrent trainers write to the shared weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateDiscipline {
  /// One writer at a time, holding the write lock for the whole update.
  /// Together with sequential example order this makes training reproducible.
  #[default]
  Serialized,
  /// Existing weights are bumped with atomic adds under a shared lock, so
  /// updates from different workers interleave. Only new feature names take
  /// the write lock. Results depend on scheduling.
  LockFree,
}

#[derive(Debug)]
enum Store {
  Serialized(RwLock<HashMap<String, f64>>),
  LockFree(RwLock<HashMap<String, AtomicU64>>),
}

fn atomic_add(cell: &AtomicU64, delta: f64) {
  let mut current = cell.load(Ordering::Relaxed);
  loop {
    let new = (f64::from_bits(current) + delta).to_bits();
    match cell.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Relaxed) {
      Ok(_) => return,
      Err(actual) => current = actual,
    }
  }
}

/// The model weights, shared by every parse and written only by training.
#[derive(Debug)]
pub struct WeightVector {
  store: Store,
}

impl WeightVector {
  pub fn new(discipline: UpdateDiscipline) -> Self {
    let store = match discipline {
      UpdateDiscipline::Serialized => Store::Serialized(RwLock::new(HashMap::new())),
      UpdateDiscipline::LockFree => Store::LockFree(RwLock::new(HashMap::new())),
    };
    Self { store }
  }

  pub fn from_snapshot(discipline: UpdateDiscipline, weights: BTreeMap<String, f64>) -> Self {
    let store = match discipline {
      UpdateDiscipline::Serialized => Store::Serialized(RwLock::new(weights.into_iter().collect())),
      UpdateDiscipline::LockFree => Store::LockFree(RwLock::new(
        weights
          .into_iter()
          .map(|(k, v)| (k, AtomicU64::new(v.to_bits())))
          .collect(),
      )),
    };
    Self { store }
  }

  pub fn discipline(&self) -> UpdateDiscipline {
    match self.store {
      Store::Serialized(_) => UpdateDiscipline::Serialized,
      Store::LockFree(_) => UpdateDiscipline::LockFree,
    }
  }

  pub fn get(&self, name: &str) -> f64 {
    match &self.store {
      Store::Serialized(map) => {
        let map = map.read().unwrap_or_else(PoisonError::into_inner);
        map.get(name).copied().unwrap_or(0.0)
      }
      Store::LockFree(map) => {
        let map = map.read().unwrap_or_else(PoisonError::into_inner);
        map
          .get(name)
          .map(|w| f64::from_bits(w.load(Ordering::Relaxed)))
          .unwrap_or(0.0)
      }
    }
  }

  pub fn dot(&self, features: &FeatureVector) -> f64 {
    match &self.store {
      Store::Serialized(map) => {
        let map = map.read().unwrap_or_else(PoisonError::into_inner);
        features
          .iter()
          .map(|(name, v)| v * map.get(name).copied().unwrap_or(0.0))
          .sum()
      }
      Store::LockFree(map) => {
        let map = map.read().unwrap_or_else(PoisonError::into_inner);
        features
          .iter()
          .map(|(name, v)| {
            v * map
              .get(name)
              .map(|w| f64::from_bits(w.load(Ordering::Relaxed)))
              .unwrap_or(0.0)
          })
          .sum()
      }
    }
  }

  /// weights += step * delta
  pub fn add_scaled(&self, delta: &FeatureVector, step: f64) {
    match &self.store {
      Store::Serialized(map) => {
        let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
        for (name, v) in delta.iter() {
          *map.entry(name.to_string()).or_insert(0.0) += step * v;
        }
      }
      Store::LockFree(map) => {
        let mut missing = Vec::new();
        {
          let map = map.read().unwrap_or_else(PoisonError::into_inner);
          for (name, v) in delta.iter() {
            match map.get(name) {
              Some(cell) => atomic_add(cell, step * v),
              None => missing.push((name, step * v)),
            }
          }
        }
        if !missing.is_empty() {
          let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
          for (name, v) in missing {
            // another worker may have inserted it since we dropped the read lock
            let cell = map
              .entry(name.to_string())
              .or_insert_with(|| AtomicU64::new(0.0f64.to_bits()));
            atomic_add(cell, v);
          }
        }
      }
    }
  }

  /// A sorted copy of every weight, for persisting
  pub fn snapshot(&self) -> BTreeMap<String, f64> {
    match &self.store {
      Store::Serialized(map) => {
        let map = map.read().unwrap_or_else(PoisonError::into_inner);
        map.iter().map(|(k, v)| (k.clone(), *v)).collect()
      }
      Store::LockFree(map) => {
        let map = map.read().unwrap_or_else(PoisonError::into_inner);
        map
          .iter()
          .map(|(k, v)| (k.clone(), f64::from_bits(v.load(Ordering::Relaxed))))
          .collect()
      }
    }
  }

  pub fn len(&self) -> usize {
    match &self.store {
      Store::Serialized(map) => map.read().unwrap_or_else(PoisonError::into_inner).len(),
      Store::LockFree(map) => map.read().unwrap_or_else(PoisonError::into_inner).len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// A perceptron-style linear model over sparse indicator features.
#[derive(Debug)]
pub struct LinearScorer {
  weights: WeightVector,
  skip_penalty: f64,
}

impl LinearScorer {
  pub fn new(discipline: UpdateDiscipline, skip_penalty: f64) -> Self {
    Self::with_weights(WeightVector::new(discipline), skip_penalty)
  }

  pub fn with_weights(weights: WeightVector, skip_penalty: f64) -> Self {
    Self {
      weights,
      skip_penalty,
    }
  }

  pub fn weights(&self) -> &WeightVector {
    &self.weights
  }

  pub fn skip_penalty(&self) -> f64 {
    self.skip_penalty
  }
}

impl Scorer for LinearScorer {
  fn features(&self, op: &ParsingOp, ctx: &ScoringContext<'_>) -> FeatureVector {
    let mut features = FeatureVector::new();
    features.add(format!("RULE={}", ctx.grammar.rules.name(op.rule)), 1.0);
    features.add(format!("SYN={}", op.category.syntax()), 1.0);

    if let Some(entry) = &op.entry {
      features.add(format!("LEX={}", entry), 1.0);
      features.add(format!("LEXORIGIN={}", entry.origin), 1.0);
    }
    if ctx.grammar.rules.get(op.rule).is_some_and(|r| r.is_skipping()) {
      features.add(SKIP_FEATURE, 1.0);
    }
    features
  }

  fn score(&self, op: &ParsingOp, ctx: &ScoringContext<'_>) -> f64 {
    let mut features = self.features(op, ctx);
    let skips = features.remove(SKIP_FEATURE).unwrap_or(0.0);
    self.weights.dot(&features) + skips * self.skip_penalty
  }

  fn apply_update(&self, delta: &FeatureVector, step: f64) {
    if delta.contains(SKIP_FEATURE) {
      let mut delta = delta.clone();
      delta.remove(SKIP_FEATURE);
      self.weights.add_scaled(&delta, step);
    } else {
      self.weights.add_scaled(delta, step);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::category::Category;
  use crate::rules::{RuleId, RuleSet};
  use crate::syntax::Syntax;
  use crate::syntree::Span;
  use crate::types::TypeRepository;

  fn features(pairs: &[(&str, f64)]) -> FeatureVector {
    let mut fv = FeatureVector::new();
    for (name, v) in pairs {
      fv.add(*name, *v);
    }
    fv
  }

  #[test]
  fn test_feature_arithmetic() {
    let mut a = features(&[("x", 1.0), ("y", 2.0)]);
    a.add_all(&features(&[("x", 1.0), ("z", 4.0)]), -1.0);
    a.prune_zeros();
    assert_eq!(a, features(&[("y", 2.0), ("z", -4.0)]));
    assert_eq!(a.l2_norm(), 20.0f64.sqrt());
    assert_eq!(a.to_string(), "{y=2, z=-4}");
  }

  #[test]
  fn test_disciplines_agree_sequentially() {
    let delta = features(&[("a", 1.5), ("b", -1.0)]);
    for discipline in [UpdateDiscipline::Serialized, UpdateDiscipline::LockFree] {
      let weights = WeightVector::new(discipline);
      weights.add_scaled(&delta, 2.0);
      weights.add_scaled(&delta, 1.0);
      assert_eq!(weights.get("a"), 4.5);
      assert_eq!(weights.dot(&features(&[("a", 1.0), ("b", 1.0)])), 1.5);
      assert_eq!(weights.discipline(), discipline);
    }
  }

  #[test]
  fn test_lock_free_concurrent_updates() {
    let weights = WeightVector::new(UpdateDiscipline::LockFree);
    let delta = features(&[("a", 1.0)]);
    std::thread::scope(|s| {
      for _ in 0..4 {
        s.spawn(|| {
          for _ in 0..100 {
            weights.add_scaled(&delta, 1.0);
          }
        });
      }
    });
    assert_eq!(weights.get("a"), 400.0);
  }

  #[test]
  fn test_skip_weight_is_frozen() {
    let grammar = Grammar::new(TypeRepository::new(), RuleSet::standard(1));
    let tokens = vec!["uh".to_string(), "book".to_string()];
    let ctx = ScoringContext {
      grammar: &grammar,
      tokens: &tokens,
    };
    // rule 5 is forward skipping in the standard set
    let op = ParsingOp::rule(Span::new(0, 2), RuleId::Rule(5), Category::syntactic(Syntax::n()));

    let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -2.0);
    let fv = scorer.features(&op, &ctx);
    assert_eq!(fv.get(SKIP_FEATURE), 1.0);
    assert_eq!(scorer.score(&op, &ctx), -2.0);

    scorer.apply_update(&fv, 1.0);
    assert_eq!(scorer.weights().get(SKIP_FEATURE), 0.0);
    // RULE and SYN each moved by one
    assert_eq!(scorer.score(&op, &ctx), 0.0);
  }
}
