//! Oracle-guided perceptron training over a dataset of (sentence, target
//! semantics) pairs.

use std::fmt;
use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ParserConfig, TrainerConfig};
use crate::error::TrainError;
use crate::grammar::Grammar;
use crate::lexicon::LexicalProvider;
use crate::oracle::{AcceptAll, FilterKind, Oracle, OracleBuilder, OracleFilter};
use crate::parse_category::parse_term_str;
use crate::scorer::{FeatureVector, Scorer, ScoringContext, UpdateDiscipline};
use crate::semantics::Term;
use crate::shiftreduce::ShiftReduceParser;
use crate::syntree::{ParsingOp, Span};
use crate::types::TypeRepository;
use crate::Err;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
  pub tokens: Vec<String>,
  pub target: Term,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
  examples: Vec<TrainingExample>,
}

impl Dataset {
  pub fn new(examples: Vec<TrainingExample>) -> Self {
    Self { examples }
  }

  /// Reads `tokens<TAB>term` lines. Blank lines and `//` comments are skipped.
  pub fn parse(src: &str, types: &TypeRepository) -> Result<Self, Err> {
    let mut examples = Vec::new();
    for (lineno, line) in src.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with("//") {
        continue;
      }
      let (tokens, term) = line
        .split_once('\t')
        .ok_or_else(|| format!("line {}: expected tokens<TAB>term", lineno + 1))?;
      let tokens = tokens.split_whitespace().map(str::to_string).collect::<Vec<_>>();
      if tokens.is_empty() {
        return Err(format!("line {}: no tokens", lineno + 1).into());
      }
      let target = parse_term_str(term.trim(), types).map_err(|e| format!("line {}: {}", lineno + 1, e))?;
      examples.push(TrainingExample { tokens, target });
    }
    Ok(Self::new(examples))
  }

  pub fn read_from_file(path: impl AsRef<Path>, types: &TypeRepository) -> Result<Self, Err> {
    let src = fs::read_to_string(path)?;
    Self::parse(&src, types)
  }

  pub fn len(&self) -> usize {
    self.examples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.examples.is_empty()
  }

  pub fn get(&self, idx: usize) -> Option<&TrainingExample> {
    self.examples.get(idx)
  }

  pub fn iter(&self) -> impl Iterator<Item = &TrainingExample> {
    self.examples.iter()
  }
}

/// Gold op sequences by example index. `None` until a gold derivation is
/// found.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoldCache(Vec<Option<Vec<ParsingOp>>>);

impl GoldCache {
  pub fn new(len: usize) -> Self {
    Self(vec![None; len])
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn get(&self, idx: usize) -> Option<&[ParsingOp]> {
    self.0.get(idx)?.as_deref()
  }

  /// How many examples have a cached derivation
  pub fn filled(&self) -> usize {
    self.0.iter().filter(|g| g.is_some()).count()
  }
}

/// Oracles by example index, built lazily and reused across epochs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterMemo(Vec<Option<Oracle>>);

impl FilterMemo {
  pub fn new(len: usize) -> Self {
    Self(vec![None; len])
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn get(&self, idx: usize) -> Option<&Oracle> {
    self.0.get(idx)?.as_ref()
  }

  pub fn built(&self) -> usize {
    self.0.iter().filter(|o| o.is_some()).count()
  }
}

/// What happened to one example in one epoch.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
  TooLong,
  Unreachable,
  Correct,
  /// wrong root, but the gold still outscored everything it competed with
  NoViolation,
  Updated {
    updates: usize,
    pruned: usize,
    fail_ratio: f64,
  },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochStats {
  pub epoch: usize,
  pub examples: usize,
  pub correct: usize,
  pub updates: usize,
  /// updates where the gold fell off the beam
  pub early_updates: usize,
  pub no_violation: usize,
  pub unreachable: usize,
  pub skipped: usize,
  fail_ratio_sum: f64,
  fail_ratio_count: usize,
}

impl EpochStats {
  fn record(&mut self, outcome: &Outcome) {
    self.examples += 1;
    match outcome {
      Outcome::TooLong => self.skipped += 1,
      Outcome::Unreachable => self.unreachable += 1,
      Outcome::Correct => self.correct += 1,
      Outcome::NoViolation => self.no_violation += 1,
      Outcome::Updated {
        updates,
        pruned,
        fail_ratio,
      } => {
        self.updates += updates;
        self.early_updates += pruned;
        self.fail_ratio_sum += fail_ratio;
        self.fail_ratio_count += updates;
      }
    }
  }

  /// Mean of `fail_at / gold_len` over all updates
  pub fn avg_fail_ratio(&self) -> Option<f64> {
    (self.fail_ratio_count > 0).then(|| self.fail_ratio_sum / self.fail_ratio_count as f64)
  }

  pub fn accuracy(&self) -> f64 {
    if self.examples == 0 {
      0.0
    } else {
      self.correct as f64 / self.examples as f64
    }
  }
}

impl fmt::Display for EpochStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "epoch {}: {}/{} correct, {} updates ({} early), {} unreachable, {} skipped",
      self.epoch, self.correct, self.examples, self.updates, self.early_updates, self.unreachable, self.skipped
    )?;
    if let Some(ratio) = self.avg_fail_ratio() {
      write!(f, ", avg fail at {:.2}", ratio)?;
    }
    Ok(())
  }
}

/// A gold op sequence over one window, whole or only a prefix.
struct Gold {
  window: Span,
  ops: Vec<ParsingOp>,
  complete: bool,
}

/// The read-only half of a trainer, shared by every worker.
struct Worker<'a> {
  grammar: &'a Grammar,
  lexicon: &'a dyn LexicalProvider,
  scorer: &'a dyn Scorer,
  parser: &'a ParserConfig,
  trainer: &'a TrainerConfig,
}

impl Worker<'_> {
  fn oracle_builder(&self) -> OracleBuilder<'_> {
    OracleBuilder::new(self.grammar)
      .with_pruning(self.parser.cells_per_span)
      .with_early_update(self.trainer.early_update)
      .with_discontiguous(self.trainer.discontiguous)
  }

  fn matches_target(&self, sem: Option<&Term>, target: &Term) -> bool {
    let underspecify = self.grammar.underspecify();
    sem.is_some_and(|sem| underspecify.underspecify(sem) == underspecify.underspecify(target))
  }

  /// Runs the parser under `filter` and returns the best derivation matching
  /// its target, falling back to the best prefix the filter saw.
  fn constrained(&self, idx: usize, tokens: &[String], filter: &mut OracleFilter) -> Option<Gold> {
    let sr = ShiftReduceParser::new(self.grammar, self.parser.beam_width);
    let window = filter.window();
    filter.reset();
    let parse = sr.parse_window(tokens, window, self.lexicon, self.scorer, filter, self.parser.packing);

    let correct = parse
      .derivations()
      .into_iter()
      .filter(|d| filter.matches(&d.category, self.grammar))
      .collect::<Vec<_>>();
    let num_correct = correct.iter().map(|d| d.num_parses).fold(0u64, u64::saturating_add);
    debug!(example = idx, window = %window, correct = num_correct, "constrained parse");

    if let Some(best) = correct.first() {
      return Some(Gold {
        window,
        ops: parse.ops(best.states[0]),
        complete: true,
      });
    }
    if filter.kind() == FilterKind::Exact {
      warn!(
        example = idx,
        window = %window,
        "chart derives the target but the constrained beam search doesn't"
      );
    }
    filter.early_update_states().first().map(|ops| Gold {
      window,
      ops: ops.clone(),
      complete: false,
    })
  }

  fn gold(
    &self,
    idx: usize,
    example: &TrainingExample,
    memo: &mut Option<Oracle>,
    cached: &mut Option<Vec<ParsingOp>>,
  ) -> Vec<Gold> {
    let full = Span::new(0, example.tokens.len());
    if self.trainer.use_stored_gold {
      if let Some(ops) = cached.as_ref() {
        return vec![Gold {
          window: full,
          ops: ops.clone(),
          complete: true,
        }];
      }
    }

    let oracle = memo.get_or_insert_with(|| {
      self
        .oracle_builder()
        .build(&example.tokens, &example.target, self.lexicon, self.scorer)
    });

    match oracle {
      Oracle::Exact(filter) => {
        let gold = self.constrained(idx, &example.tokens, filter);
        if let Some(gold) = gold.as_ref().filter(|g| g.complete) {
          *cached = Some(gold.ops.clone());
        }
        gold.into_iter().collect()
      }
      // partial matches only ever yield a prefix, unless pruning hid an
      // exact derivation from the oracle's chart
      Oracle::EarlyUpdate(filter) => self.constrained(idx, &example.tokens, filter).into_iter().collect(),
      Oracle::Discontiguous(filters) => filters
        .iter_mut()
        .filter_map(|f| self.constrained(idx, &example.tokens, f))
        .collect(),
      Oracle::Unreachable => Vec::new(),
    }
  }

  fn train_example(
    &self,
    idx: usize,
    example: &TrainingExample,
    memo: &mut Option<Oracle>,
    cached: &mut Option<Vec<ParsingOp>>,
  ) -> Result<Outcome, TrainError> {
    let tokens = &example.tokens;
    if tokens.len() > self.parser.max_sentence_length {
      warn!(
        example = idx,
        tokens = tokens.len(),
        max = self.parser.max_sentence_length,
        "sentence too long, skipping"
      );
      return Ok(Outcome::TooLong);
    }

    let golds = self.gold(idx, example, memo, cached);
    if golds.is_empty() {
      info!(example = idx, "no gold derivation, skipping");
      return Ok(Outcome::Unreachable);
    }

    let sr = ShiftReduceParser::new(self.grammar, self.parser.beam_width);
    let predicted = sr.parse(tokens, self.lexicon, self.scorer, &mut AcceptAll, self.parser.packing);
    if let Some(best) = predicted.best_derivation() {
      if self.matches_target(best.category.semantics(), &example.target) {
        debug!(example = idx, category = %best.category, "already correct");
        return Ok(Outcome::Correct);
      }
    }

    let ctx = ScoringContext {
      grammar: self.grammar,
      tokens,
    };
    let mut updates = 0;
    let mut pruned = 0;
    let mut fail_ratio = 0.0;
    for gold in golds {
      let Some(violation) =
        sr.find_violation(tokens, gold.window, &gold.ops, gold.complete, self.lexicon, self.scorer)?
      else {
        continue;
      };
      if violation.pruned && violation.gold.len() != violation.predicted.len() {
        return Err(TrainError::invariant(format!(
          "example {}: gold prefix of {} ops compared against {} predicted ops",
          idx,
          violation.gold.len(),
          violation.predicted.len()
        )));
      }

      let mut delta = self.scorer.derivation_features(&violation.gold, &ctx);
      delta.add_all(&self.scorer.derivation_features(&violation.predicted, &ctx), -1.0);
      delta.prune_zeros();
      let step = self.step_size(&delta);
      if step > 0.0 {
        self.scorer.apply_update(&delta, step);
      }

      debug!(
        example = idx,
        fail_at = violation.fail_at,
        gold_len = gold.ops.len(),
        features = delta.len(),
        step,
        "update"
      );
      updates += 1;
      if violation.pruned {
        pruned += 1;
      }
      fail_ratio += violation.fail_at as f64 / gold.ops.len().max(1) as f64;
    }

    if updates == 0 {
      Ok(Outcome::NoViolation)
    } else {
      Ok(Outcome::Updated {
        updates,
        pruned,
        fail_ratio,
      })
    }
  }

  /// The learning rate, shrunk so the update's norm stays under the cap
  fn step_size(&self, delta: &FeatureVector) -> f64 {
    let norm = delta.l2_norm();
    if norm == 0.0 {
      return 0.0;
    }
    let step = self.trainer.learning_rate;
    if norm * step > self.trainer.max_update_norm {
      self.trainer.max_update_norm / norm
    } else {
      step
    }
  }
}

/// Perceptron trainer. Oracles and gold derivations are memoized per example
/// and survive across epochs (and, through [`crate::persist`], across runs).
pub struct Trainer<'a> {
  grammar: &'a Grammar,
  lexicon: &'a dyn LexicalProvider,
  scorer: &'a dyn Scorer,
  parser: ParserConfig,
  config: TrainerConfig,
  filters: FilterMemo,
  gold: GoldCache,
}

impl<'a> Trainer<'a> {
  pub fn new(
    grammar: &'a Grammar,
    lexicon: &'a dyn LexicalProvider,
    scorer: &'a dyn Scorer,
    parser: ParserConfig,
    config: TrainerConfig,
  ) -> Self {
    Self {
      grammar,
      lexicon,
      scorer,
      parser,
      config,
      filters: FilterMemo::default(),
      gold: GoldCache::default(),
    }
  }

  /// Starts from previously built oracles instead of building them again
  pub fn with_filters(mut self, filters: FilterMemo) -> Self {
    self.filters = filters;
    self
  }

  pub fn with_gold_cache(mut self, gold: GoldCache) -> Self {
    self.gold = gold;
    self
  }

  pub fn filters(&self) -> &FilterMemo {
    &self.filters
  }

  pub fn gold_cache(&self) -> &GoldCache {
    &self.gold
  }

  /// Sizes empty memos to the dataset. Memos of another size mean they were
  /// built for different data.
  fn check_sizes(&mut self, dataset: &Dataset) -> Result<(), TrainError> {
    if self.filters.is_empty() {
      self.filters = FilterMemo::new(dataset.len());
    }
    if self.gold.is_empty() {
      self.gold = GoldCache::new(dataset.len());
    }
    if self.filters.len() != dataset.len() {
      return Err(TrainError::invariant(format!(
        "{} stored filters for {} examples",
        self.filters.len(),
        dataset.len()
      )));
    }
    if self.gold.len() != dataset.len() {
      return Err(TrainError::invariant(format!(
        "{} stored gold derivations for {} examples",
        self.gold.len(),
        dataset.len()
      )));
    }
    Ok(())
  }

  pub fn train(&mut self, dataset: &Dataset) -> Result<Vec<EpochStats>, TrainError> {
    (1..=self.config.epochs)
      .map(|epoch| self.run_epoch(epoch, dataset))
      .collect()
  }

  /// One pass over the dataset. Serialized scorers see the examples in order
  /// on this thread; lock-free ones are trained from a rayon pool.
  pub fn run_epoch(&mut self, epoch: usize, dataset: &Dataset) -> Result<EpochStats, TrainError> {
    self.check_sizes(dataset)?;

    let worker = Worker {
      grammar: self.grammar,
      lexicon: self.lexicon,
      scorer: self.scorer,
      parser: &self.parser,
      trainer: &self.config,
    };
    let filters = &mut self.filters.0;
    let gold = &mut self.gold.0;
    let outcomes = match self.config.discipline {
      UpdateDiscipline::Serialized => filters
        .iter_mut()
        .zip(gold.iter_mut())
        .zip(dataset.examples.iter())
        .enumerate()
        .map(|(idx, ((memo, cached), example))| worker.train_example(idx, example, memo, cached))
        .collect::<Result<Vec<_>, _>>()?,
      UpdateDiscipline::LockFree => filters
        .par_iter_mut()
        .zip(gold.par_iter_mut())
        .zip(dataset.examples.par_iter())
        .enumerate()
        .map(|(idx, ((memo, cached), example))| worker.train_example(idx, example, memo, cached))
        .collect::<Result<Vec<_>, _>>()?,
    };

    let mut stats = EpochStats {
      epoch,
      ..EpochStats::default()
    };
    for outcome in outcomes.iter() {
      stats.record(outcome);
    }
    info!(
      epoch,
      correct = stats.correct,
      examples = stats.examples,
      updates = stats.updates,
      gold_cached = self.gold.filled(),
      "{}",
      stats
    );
    Ok(stats)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_dataset_parse() {
    let mut types = TypeRepository::new();
    types.declare_constant("book", "<e,t>".parse().unwrap()).unwrap();
    types.declare_constant("the", "<<e,t>,e>".parse().unwrap()).unwrap();

    let dataset = Dataset::parse(
      "// comment\nthe book\tthe(book)\n\nbook\tλx:e.book(x)\n",
      &types,
    )
    .unwrap();
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.get(0).unwrap().tokens, vec!["the", "book"]);
    assert_eq!(format!("{}", dataset.get(1).unwrap().target), "book");

    let err = Dataset::parse("the book the(book)", &types).unwrap_err();
    assert!(err.to_string().starts_with("line 1"));
    assert!(Dataset::parse("the book\tthe(book", &types).is_err());
  }

  #[test]
  fn test_exact_filter_without_derivation_falls_back_to_prefix() {
    use crate::lexicon::Lexicon;
    use crate::rules::RuleSet;
    use crate::scorer::LinearScorer;

    let mut types = TypeRepository::new();
    types.declare_constant("book", "<e,t>".parse().unwrap()).unwrap();
    types.declare_constant("the", "<<e,t>,e>".parse().unwrap()).unwrap();
    let lexicon = Lexicon::parse(
      "book :- N : λx:e.book(x)\nthe :- NP/N : λf:<e,t>.the(f)",
      &types,
    )
    .unwrap();
    let grammar = Grammar::new(types, RuleSet::standard(1));
    let scorer = LinearScorer::new(UpdateDiscipline::Serialized, -1.0);
    let tokens = vec!["the".to_string(), "book".to_string()];
    let target = parse_term_str("the(book)", &grammar.types).unwrap();

    let Oracle::Exact(exact) = OracleBuilder::new(&grammar).build(&tokens, &target, &lexicon, &scorer) else {
      panic!("expected an exact oracle");
    };
    // drop the application, so the beam can shift both words but never finish
    let lexical = exact
      .gold_ops()
      .iter()
      .filter(|op| op.is_lexical())
      .cloned()
      .collect();
    let mut filter = OracleFilter::new(
      FilterKind::Exact,
      target,
      exact.category().cloned(),
      exact.window(),
      lexical,
      exact.parse_trees(),
    );

    let (parser, trainer) = (ParserConfig::default(), TrainerConfig::default());
    let worker = Worker {
      grammar: &grammar,
      lexicon: &lexicon,
      scorer: &scorer,
      parser: &parser,
      trainer: &trainer,
    };
    let gold = worker.constrained(0, &tokens, &mut filter).unwrap();
    assert!(!gold.complete);
    assert_eq!(gold.ops.len(), 2);
    assert!(gold.ops.iter().all(ParsingOp::is_lexical));
    assert_eq!(filter.cursor(), 2);
  }

  #[test]
  fn test_epoch_stats() {
    let mut stats = EpochStats::default();
    stats.record(&Outcome::Correct);
    stats.record(&Outcome::TooLong);
    stats.record(&Outcome::Updated {
      updates: 2,
      pruned: 1,
      fail_ratio: 1.0,
    });
    assert_eq!(stats.examples, 3);
    assert_eq!(stats.updates, 2);
    assert_eq!(stats.early_updates, 1);
    assert_eq!(stats.avg_fail_ratio(), Some(0.5));
    assert!((stats.accuracy() - 1.0 / 3.0).abs() < 1e-9);
  }
}
