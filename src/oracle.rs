//! Filters that restrict which parsing ops a search may take, and the oracle
//! that builds them from a target semantics.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::Category;
use crate::chart::{Chart, ChartParser, GroupIdx};
use crate::grammar::Grammar;
use crate::lexicon::LexicalProvider;
use crate::scorer::Scorer;
use crate::semantics::Term;
use crate::syntree::{PackingMode, ParsingOp, Span};

/// A read-only look at a shift-reduce beam after one step.
pub trait BeamView {
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The best op sequence that led to the `idx`th state
  fn ops(&self, idx: usize) -> Vec<ParsingOp>;

  fn score(&self, idx: usize) -> f64;
}

/// Decides which ops a parser may apply. Both parsers consult it before
/// adding an op; the shift-reduce parser also shows it each beam.
pub trait ParsingFilter {
  fn accept(&mut self, op: &ParsingOp) -> bool;

  fn observe_beam(&mut self, _step: usize, _beam: &dyn BeamView) {}
}

/// Lets everything through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ParsingFilter for AcceptAll {
  fn accept(&mut self, _op: &ParsingOp) -> bool {
    true
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
  /// Only ops of derivations whose semantics is exactly the target
  Exact,
  /// Ops whose semantics is empty or a subterm of the target
  EarlyUpdate,
}

/// A set of gold ops for one sentence (or one window of it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleFilter {
  kind: FilterKind,
  target: Term,
  /// the chart's best category for the target, for exact filters
  category: Option<Category>,
  window: Span,
  gold: BTreeSet<ParsingOp>,
  /// derivations of the target the chart found
  parse_trees: u64,
  #[serde(skip)]
  cursor: usize,
  #[serde(skip)]
  early_update_states: Vec<Vec<ParsingOp>>,
}

impl OracleFilter {
  pub fn new(
    kind: FilterKind,
    target: Term,
    category: Option<Category>,
    window: Span,
    gold: BTreeSet<ParsingOp>,
    parse_trees: u64,
  ) -> Self {
    Self {
      kind,
      target,
      category,
      window,
      gold,
      parse_trees,
      cursor: 0,
      early_update_states: Vec::new(),
    }
  }

  pub fn kind(&self) -> FilterKind {
    self.kind
  }

  pub fn target(&self) -> &Term {
    &self.target
  }

  pub fn category(&self) -> Option<&Category> {
    self.category.as_ref()
  }

  pub fn window(&self) -> Span {
    self.window
  }

  pub fn gold_ops(&self) -> &BTreeSet<ParsingOp> {
    &self.gold
  }

  pub fn parse_trees(&self) -> u64 {
    self.parse_trees
  }

  /// Last step at which the beam was non-empty
  pub fn cursor(&self) -> usize {
    self.cursor
  }

  /// Op sequences of the last non-empty beam, best first
  pub fn early_update_states(&self) -> &[Vec<ParsingOp>] {
    &self.early_update_states
  }

  /// Clears what the last parse recorded
  pub fn reset(&mut self) {
    self.cursor = 0;
    self.early_update_states.clear();
  }

  /// Whether `category` carries the target semantics
  pub fn matches(&self, category: &Category, grammar: &Grammar) -> bool {
    category
      .semantics()
      .is_some_and(|sem| grammar.underspecify().underspecify(sem) == self.target)
  }
}

impl ParsingFilter for OracleFilter {
  fn accept(&mut self, op: &ParsingOp) -> bool {
    self.window.contains(op.span) && self.gold.contains(op)
  }

  fn observe_beam(&mut self, step: usize, beam: &dyn BeamView) {
    if beam.is_empty() {
      return;
    }
    self.cursor = step;
    self.early_update_states = (0..beam.len()).map(|i| beam.ops(i)).collect();
  }
}

/// Exact filters over disjoint windows, each matching part of the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscontiguousFilters {
  filters: Vec<OracleFilter>,
}

impl DiscontiguousFilters {
  pub fn new(filters: Vec<OracleFilter>) -> Self {
    Self { filters }
  }

  pub fn len(&self) -> usize {
    self.filters.len()
  }

  pub fn is_empty(&self) -> bool {
    self.filters.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &OracleFilter> {
    self.filters.iter()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut OracleFilter> {
    self.filters.iter_mut()
  }

  pub fn windows(&self) -> Vec<Span> {
    self.filters.iter().map(OracleFilter::window).collect()
  }

  pub fn reset(&mut self) {
    self.filters.iter_mut().for_each(OracleFilter::reset);
  }
}

/// What the oracle could make of a (sentence, target) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Oracle {
  Exact(OracleFilter),
  EarlyUpdate(OracleFilter),
  Discontiguous(DiscontiguousFilters),
  /// Nothing in the chart relates to the target
  Unreachable,
}

impl Oracle {
  pub fn is_reachable(&self) -> bool {
    !matches!(self, Oracle::Unreachable)
  }

  pub fn reset(&mut self) {
    match self {
      Oracle::Exact(f) | Oracle::EarlyUpdate(f) => f.reset(),
      Oracle::Discontiguous(fs) => fs.reset(),
      Oracle::Unreachable => {}
    }
  }
}

/// Admits ops whose semantics mentions no constant outside the target, so
/// per-span pruning only ever chooses between readings of the target.
struct TargetConstants<'a> {
  grammar: &'a Grammar,
  constants: BTreeSet<&'a str>,
}

impl ParsingFilter for TargetConstants<'_> {
  fn accept(&mut self, op: &ParsingOp) -> bool {
    let Some(sem) = op.category.semantics() else {
      return true;
    };
    let sem = self.grammar.underspecify().underspecify(sem);
    sem.constants().is_subset(&self.constants)
  }
}

/// Builds oracles by charting the sentence over target-consistent ops and
/// reading gold ops off the groups whose semantics relate to the target.
pub struct OracleBuilder<'g> {
  grammar: &'g Grammar,
  cells_per_span: Option<usize>,
  early_update: bool,
  discontiguous: bool,
}

impl<'g> OracleBuilder<'g> {
  pub fn new(grammar: &'g Grammar) -> Self {
    Self {
      grammar,
      cells_per_span: None,
      early_update: true,
      discontiguous: false,
    }
  }

  pub fn with_pruning(mut self, cells_per_span: Option<usize>) -> Self {
    self.cells_per_span = cells_per_span;
    self
  }

  pub fn with_early_update(mut self, enabled: bool) -> Self {
    self.early_update = enabled;
    self
  }

  pub fn with_discontiguous(mut self, enabled: bool) -> Self {
    self.discontiguous = enabled;
    self
  }

  /// Exact if some root derivation has the target semantics; otherwise
  /// discontiguous windows (when enabled and any part matches), then early
  /// update (when enabled), then unreachable.
  pub fn build(
    &self,
    tokens: &[String],
    target: &Term,
    lexicon: &dyn LexicalProvider,
    scorer: &dyn Scorer,
  ) -> Oracle {
    let target = self.grammar.underspecify().underspecify(&target.normalize());
    let chart = {
      let mut consistent = TargetConstants {
        grammar: self.grammar,
        constants: target.constants(),
      };
      ChartParser::new(self.grammar)
        .with_pruning(self.cells_per_span)
        .parse(tokens, lexicon, scorer, &mut consistent, PackingMode::Packed)
    };

    if let Some(filter) = self.exact(&chart, &target) {
      debug!(gold = filter.gold.len(), parse_trees = filter.parse_trees, "exact oracle");
      return Oracle::Exact(filter);
    }

    if self.discontiguous {
      let filters = self.discontiguous_filters(&chart, &target);
      if !filters.is_empty() {
        debug!(windows = ?filters.windows(), "discontiguous oracle");
        return Oracle::Discontiguous(filters);
      }
    }

    if self.early_update {
      let gold = chart
        .all_ops()
        .into_iter()
        .filter(|op| self.related(&op.category, &target))
        .collect::<BTreeSet<_>>();
      if !gold.is_empty() {
        debug!(gold = gold.len(), "early-update oracle");
        return Oracle::EarlyUpdate(OracleFilter::new(
          FilterKind::EarlyUpdate,
          target,
          None,
          Span::new(0, tokens.len()),
          gold,
          0,
        ));
      }
    }

    debug!(tokens = tokens.len(), "target unreachable");
    Oracle::Unreachable
  }

  fn underspecified(&self, category: &Category) -> Option<Term> {
    category
      .semantics()
      .map(|sem| self.grammar.underspecify().underspecify(sem))
  }

  /// Semantics is absent or a piece of the target
  fn related(&self, category: &Category, target: &Term) -> bool {
    match self.underspecified(category) {
      None => true,
      Some(sem) => target.contains_subterm(&sem),
    }
  }

  fn exact_filter(&self, chart: &Chart, group: GroupIdx, target: Term) -> OracleFilter {
    let g = chart.group(group);
    OracleFilter::new(
      FilterKind::Exact,
      target,
      Some(g.category.clone()),
      g.span,
      chart.ops_under(group),
      chart.num_parses(group),
    )
  }

  fn exact(&self, chart: &Chart, target: &Term) -> Option<OracleFilter> {
    let group = chart
      .derivations()
      .iter()
      .copied()
      .find(|&g| self.underspecified(&chart.group(g).category).as_ref() == Some(target))?;
    Some(self.exact_filter(chart, group, target.clone()))
  }

  /// Greedily picks the longest spans whose best matching group carries a
  /// proper piece of the target, skipping spans that overlap earlier picks.
  fn discontiguous_filters(&self, chart: &Chart, target: &Term) -> DiscontiguousFilters {
    let full = Span::new(0, chart.tokens().len());
    let mut candidates = chart
      .cells()
      .filter(|(span, _)| *span != full)
      .filter_map(|(span, groups)| {
        groups.iter().copied().find_map(|g| {
          let sem = self.underspecified(&chart.group(g).category)?;
          target.contains_subterm(&sem).then_some((span, g, sem))
        })
      })
      .collect::<Vec<_>>();
    candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.start.cmp(&b.0.start)));

    let mut chosen: Vec<Span> = Vec::new();
    let mut filters = Vec::new();
    for (span, group, sem) in candidates {
      if chosen.iter().any(|c| c.overlaps(span)) {
        continue;
      }
      chosen.push(span);
      filters.push(self.exact_filter(chart, group, sem));
    }
    filters.sort_by_key(|f| f.window.start);
    DiscontiguousFilters::new(filters)
  }
}
